// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::runtime::fail::Fail;
use ::std::{
    fs::File,
    io::Read,
    str::FromStr,
};
use ::yaml_rust::{
    Yaml,
    YamlLoader,
};

//======================================================================================================================
// Constants
//======================================================================================================================

// Control-plane sizing options.
mod ctrl_config {
    pub const SECTION_NAME: &str = "toe_ctrl";
    pub const MAX_SESSIONS: &str = "max_sessions";
    pub const MSS: &str = "mss";
}

// Timer durations, in sweep ticks. One tick is one visit of the timer sweep to a session slot; the wall-clock rate of
// the sweep is a deployment concern, not a constant of this crate.
mod timer_config {
    pub const SECTION_NAME: &str = "timers";
    pub const ACK_DELAY_TICKS: &str = "ack_delay_ticks";
    pub const TIME_WAIT_TICKS: &str = "time_wait_ticks";
    pub const RETRANSMIT_BASE_TICKS: &str = "retransmit_base_ticks";
}

// Bounded queue depths.
mod queue_config {
    pub const SECTION_NAME: &str = "queues";
    pub const EVENT_DEPTH: &str = "event_depth";
    pub const REQUEST_DEPTH: &str = "request_depth";
    pub const SIGNAL_DEPTH: &str = "signal_depth";
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Control-plane configuration file.
#[derive(Clone, Debug)]
pub struct Config(pub Yaml);

/// Resolved configuration values handed to the control-plane components.
#[derive(Clone, Debug)]
pub struct CtrlConfig {
    /// Number of session table slots. Session ids at or beyond this bound are rejected.
    pub max_sessions: u16,
    /// Maximum segment size, used to derive the initial congestion window.
    pub mss: u16,
    /// Coalescing delay for pure acknowledgments (nominal 100ms equivalent).
    pub ack_delay_ticks: u16,
    /// TIME_WAIT countdown (nominal 60s equivalent).
    pub time_wait_ticks: u32,
    /// Base retransmission timeout; the escalation table scales from this.
    pub retransmit_base_ticks: u32,
    /// Depth of every event queue.
    pub event_queue_depth: usize,
    /// Depth of every table request/reply queue.
    pub request_queue_depth: usize,
    /// Depth of the credit signal queues.
    pub signal_queue_depth: usize,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

/// Common associate functions for the configuration file.
impl Config {
    /// Reads a configuration file into a [Config] object.
    pub fn load(config_path: &str) -> Result<Self, Fail> {
        let mut config_s: String = String::new();
        File::open(config_path)?.read_to_string(&mut config_s)?;
        Self::parse(&config_s)
    }

    /// Parses configuration text into a [Config] object.
    pub fn parse(config_s: &str) -> Result<Self, Fail> {
        let config: Vec<Yaml> = match YamlLoader::load_from_str(config_s) {
            Ok(config) => config,
            Err(e) => {
                let cause: String = format!("failed to parse config: {:?}", e);
                error!("parse(): {}", cause);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        let config_obj: &Yaml = match &config[..] {
            &[ref c] => c,
            _ => return Err(Fail::new(libc::EINVAL, "wrong number of config objects")),
        };
        Ok(Self(config_obj.clone()))
    }

    fn get_ctrl_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, ctrl_config::SECTION_NAME)
    }

    fn get_timer_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, timer_config::SECTION_NAME)
    }

    fn get_queue_config(&self) -> Result<&Yaml, Fail> {
        Self::get_subsection(&self.0, queue_config::SECTION_NAME)
    }

    /// Reads the "maximum session count" parameter from the environment variable first and then the underlying
    /// configuration file.
    pub fn max_sessions(&self) -> Result<u16, Fail> {
        if let Some(sessions) = Self::get_typed_env_option(ctrl_config::MAX_SESSIONS)? {
            Ok(sessions)
        } else {
            Self::get_int_option(self.get_ctrl_config()?, ctrl_config::MAX_SESSIONS)
        }
    }

    /// Reads the "MSS" parameter from the environment variable first and then the underlying configuration file.
    pub fn mss(&self) -> Result<u16, Fail> {
        if let Some(mss) = Self::get_typed_env_option(ctrl_config::MSS)? {
            Ok(mss)
        } else {
            Self::get_int_option(self.get_ctrl_config()?, ctrl_config::MSS)
        }
    }

    pub fn ack_delay_ticks(&self) -> Result<u16, Fail> {
        Self::get_int_option(self.get_timer_config()?, timer_config::ACK_DELAY_TICKS)
    }

    pub fn time_wait_ticks(&self) -> Result<u32, Fail> {
        Self::get_int_option(self.get_timer_config()?, timer_config::TIME_WAIT_TICKS)
    }

    pub fn retransmit_base_ticks(&self) -> Result<u32, Fail> {
        Self::get_int_option(self.get_timer_config()?, timer_config::RETRANSMIT_BASE_TICKS)
    }

    pub fn event_queue_depth(&self) -> Result<usize, Fail> {
        Self::get_int_option(self.get_queue_config()?, queue_config::EVENT_DEPTH)
    }

    pub fn request_queue_depth(&self) -> Result<usize, Fail> {
        Self::get_int_option(self.get_queue_config()?, queue_config::REQUEST_DEPTH)
    }

    pub fn signal_queue_depth(&self) -> Result<usize, Fail> {
        Self::get_int_option(self.get_queue_config()?, queue_config::SIGNAL_DEPTH)
    }

    //==================================================================================================================
    // Static Functions
    //==================================================================================================================

    /// Indexes `yaml` to find the subsection at `index`, validating that it is a hash.
    fn get_subsection<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        let section: &'a Yaml = Self::get_option(yaml, index)?;
        match section {
            Yaml::Hash(_) => Ok(section),
            _ => {
                let cause: String = format!("parameter \"{}\" has unexpected type", index);
                Err(Fail::new(libc::EINVAL, &cause))
            },
        }
    }

    /// Indexes `yaml` to find the value at `index`, validating that the index exists.
    fn get_option<'a>(yaml: &'a Yaml, index: &str) -> Result<&'a Yaml, Fail> {
        match &yaml[index] {
            Yaml::BadValue => {
                let cause: String = format!("missing configuration option \"{}\"", index);
                Err(Fail::new(libc::EINVAL, &cause))
            },
            value => Ok(value),
        }
    }

    /// Gets a value where the environment variable overrides the configuration file if it exists.
    fn get_typed_env_option<T: FromStr>(index: &str) -> Result<Option<T>, Fail> {
        if let Ok(var) = ::std::env::var(index.to_uppercase()) {
            if let Ok(value) = var.as_str().parse() {
                return Ok(Some(value));
            }
            let cause: String = format!("parameter {} has unexpected type", index);
            return Err(Fail::new(libc::EINVAL, &cause));
        }
        Ok(None)
    }

    /// Reads an integer option, verifying that the destination type may hold the value.
    fn get_int_option<T: TryFrom<i64>>(yaml: &Yaml, index: &str) -> Result<T, Fail> {
        let value: &Yaml = Self::get_option(yaml, index)?;
        let value: i64 = match value.as_i64() {
            Some(value) => value,
            None => {
                let cause: String = format!("parameter \"{}\" has unexpected type", index);
                return Err(Fail::new(libc::EINVAL, &cause));
            },
        };
        match T::try_from(value) {
            Ok(value) => Ok(value),
            _ => {
                let cause: String = format!("parameter \"{}\" is out of range", index);
                Err(Fail::new(libc::ERANGE, &cause))
            },
        }
    }
}

impl CtrlConfig {
    /// Resolves every control-plane option from a configuration file.
    pub fn from_config(config: &Config) -> Result<Self, Fail> {
        Ok(Self {
            max_sessions: config.max_sessions()?,
            mss: config.mss()?,
            ack_delay_ticks: config.ack_delay_ticks()?,
            time_wait_ticks: config.time_wait_ticks()?,
            retransmit_base_ticks: config.retransmit_base_ticks()?,
            event_queue_depth: config.event_queue_depth()?,
            request_queue_depth: config.request_queue_depth()?,
            signal_queue_depth: config.signal_queue_depth()?,
        })
    }
}

//======================================================================================================================
// Trait Implementations
//======================================================================================================================

impl Default for CtrlConfig {
    fn default() -> Self {
        Self {
            max_sessions: 1024,
            mss: 1460,
            ack_delay_ticks: 100,
            time_wait_ticks: 60_000,
            retransmit_base_ticks: 1_000,
            event_queue_depth: 64,
            request_queue_depth: 16,
            signal_queue_depth: 64,
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        Config,
        CtrlConfig,
    };
    use ::anyhow::Result;

    const CONFIG: &str = "
toe_ctrl:
    max_sessions: 64
    mss: 1460
timers:
    ack_delay_ticks: 100
    time_wait_ticks: 60000
    retransmit_base_ticks: 1000
queues:
    event_depth: 32
    request_depth: 8
    signal_depth: 32
";

    #[test]
    fn parse_full_config() -> Result<()> {
        let config: Config = match Config::parse(CONFIG) {
            Ok(config) => config,
            Err(e) => anyhow::bail!("failed to parse config: {:?}", e),
        };
        let ctrl: CtrlConfig = match CtrlConfig::from_config(&config) {
            Ok(ctrl) => ctrl,
            Err(e) => anyhow::bail!("failed to resolve config: {:?}", e),
        };

        crate::ensure_eq!(ctrl.max_sessions, 64);
        crate::ensure_eq!(ctrl.mss, 1460);
        crate::ensure_eq!(ctrl.ack_delay_ticks, 100);
        crate::ensure_eq!(ctrl.time_wait_ticks, 60_000);
        crate::ensure_eq!(ctrl.retransmit_base_ticks, 1_000);
        crate::ensure_eq!(ctrl.event_queue_depth, 32);
        crate::ensure_eq!(ctrl.request_queue_depth, 8);
        crate::ensure_eq!(ctrl.signal_queue_depth, 32);

        Ok(())
    }

    #[test]
    fn missing_option_is_rejected() -> Result<()> {
        let config: Config = match Config::parse("toe_ctrl:\n    mss: 1460\n") {
            Ok(config) => config,
            Err(e) => anyhow::bail!("failed to parse config: {:?}", e),
        };

        crate::ensure_eq!(config.max_sessions().is_err(), true);

        Ok(())
    }
}
