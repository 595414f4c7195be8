// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod ctrl;
pub mod runtime;

pub use self::{
    ctrl::{
        config::{Config, CtrlConfig},
        engine::{ControlPlane, Handles},
        event::{Event, EventKind},
        seq::SeqNumber,
        state::TcpState,
        SessionId,
    },
    runtime::fail::Fail,
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr $(,)?) => {{
        let left = $left;
        let right = $right;
        if left != right {
            ::anyhow::bail!(
                "ensure_eq!({}, {}) failed: left: `{:?}`, right: `{:?}`",
                stringify!($left),
                stringify!($right),
                left,
                right
            );
        }
    }};
}

/// Ensures that two expressions are not equal, bailing out of the calling test otherwise.
#[macro_export]
macro_rules! ensure_neq {
    ($left:expr, $right:expr $(,)?) => {{
        let left = $left;
        let right = $right;
        if left == right {
            ::anyhow::bail!(
                "ensure_neq!({}, {}) failed: both: `{:?}`",
                stringify!($left),
                stringify!($right),
                left
            );
        }
    }};
}
