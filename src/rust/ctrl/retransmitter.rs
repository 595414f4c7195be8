// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Per-session retransmission timer with exponential escalation and a give-up policy.
//
// One timer per session, not one per segment: arming an already-armed timer changes nothing. The countdown is driven
// by a round-robin sweep that revisits every session slot; external load/stop commands for a session take priority
// over that session's visit in the step they arrive, without holding up anybody else's visit.

use crate::ctrl::{
    event::{
        Event,
        EventKind,
    },
    notify::{
        OpenNotification,
        RxAppNotification,
    },
    table_index,
    SessionId,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

/// Consecutive expiries tolerated before the connection is abandoned.
pub const MAX_RETRIES: u8 = 4;

// Escalation table: multiples of the base timeout, indexed by the retry count.
const ESCALATION: [u32; 5] = [1, 5, 10, 15, 30];

#[derive(Clone, Copy, Debug)]
pub struct RetransmitEntry {
    /// Remaining sweep visits; zero whenever inactive.
    pub time: u32,
    pub retries: u8,
    pub active: bool,
    /// The kind of event that armed the timer, redelivered on expiry.
    pub kind: EventKind,
}

/// Rx-path command: `load` re-arms at the base timeout, `stop` disarms. Both reset the retry counter.
#[derive(Clone, Copy, Debug)]
pub struct TimerCommand {
    pub session: SessionId,
    pub stop: bool,
}

/// Tx-path notice that a segment went out and now needs a timer covering it.
#[derive(Clone, Copy, Debug)]
pub struct TimerArm {
    pub session: SessionId,
    pub kind: EventKind,
}

pub struct RetransmitTimer {
    entries: Vec<RetransmitEntry>,
    sweep: usize,
    base_ticks: u32,

    commands: Receiver<TimerCommand>,
    arms: Receiver<TimerArm>,

    // Expiry-driven retransmissions, back into the arbiter.
    events: Sender<Event>,
    // Give-up: session release toward the state table, failure notice toward the owning application interface.
    release: Sender<SessionId>,
    open_notify: Sender<OpenNotification>,
    data_notify: Sender<RxAppNotification>,
}

impl TimerCommand {
    pub fn load(session: SessionId) -> Self {
        Self { session, stop: false }
    }

    pub fn stop(session: SessionId) -> Self {
        Self { session, stop: true }
    }
}

impl Default for RetransmitEntry {
    fn default() -> Self {
        Self {
            time: 0,
            retries: 0,
            active: false,
            kind: EventKind::Tx,
        }
    }
}

impl RetransmitTimer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_sessions: u16,
        base_ticks: u32,
        commands: Receiver<TimerCommand>,
        arms: Receiver<TimerArm>,
        events: Sender<Event>,
        release: Sender<SessionId>,
        open_notify: Sender<OpenNotification>,
        data_notify: Sender<RxAppNotification>,
    ) -> Self {
        Self {
            entries: vec![RetransmitEntry::default(); max_sessions as usize],
            sweep: 0,
            base_ticks: base_ticks.max(1),
            commands,
            arms,
            events,
            release,
            open_notify,
            data_notify,
        }
    }

    fn timeout(&self, retries: u8) -> u32 {
        self.base_ticks.saturating_mul(ESCALATION[(retries as usize).min(ESCALATION.len() - 1)])
    }

    /// Applies at most one external command, then performs one sweep visit. A command for the swept session replaces
    /// that session's visit; other sessions are revisited on schedule even under command load.
    pub fn step(&mut self) -> bool {
        let mut touched: Option<SessionId> = None;

        if let Ok(command) = self.commands.try_recv() {
            let index: usize = table_index(command.session, self.entries.len());
            let entry: &mut RetransmitEntry = &mut self.entries[index];
            if command.stop {
                trace!("step(): session {} timer stopped", command.session);
                *entry = RetransmitEntry::default();
            } else {
                trace!("step(): session {} timer re-armed", command.session);
                entry.active = true;
                entry.time = self.base_ticks;
                entry.retries = 0;
            }
            touched = Some(command.session);
        } else if let Ok(arm) = self.arms.try_recv() {
            let index: usize = table_index(arm.session, self.entries.len());
            let timeout: u32 = self.timeout(self.entries[index].retries);
            let entry: &mut RetransmitEntry = &mut self.entries[index];
            if !entry.active {
                entry.active = true;
                entry.time = timeout;
                entry.kind = arm.kind;
                trace!("step(): session {} armed for {:?}", arm.session, arm.kind);
            }
            touched = Some(arm.session);
        }

        let worked: bool = touched.is_some();

        self.sweep = (self.sweep + 1) % self.entries.len();
        if touched == Some(SessionId::new(self.sweep as u16)) {
            return worked;
        }
        self.visit(self.sweep) || worked
    }

    /// Decrements one active countdown; on expiry, either escalates or gives up.
    fn visit(&mut self, index: usize) -> bool {
        let entry: RetransmitEntry = self.entries[index];
        if !entry.active {
            return false;
        }
        if entry.time > 1 {
            self.entries[index].time = entry.time - 1;
            return true;
        }

        let session: SessionId = SessionId::new(index as u16);
        if entry.retries < MAX_RETRIES {
            // Expiries hold at one while the event queue is congested and fire on a later visit.
            if self.events.is_full() {
                return false;
            }
            let retries: u8 = entry.retries + 1;
            self.entries[index].retries = retries;
            self.entries[index].time = self.timeout(retries);
            // Data segments redeliver as an explicit retransmission; control segments redeliver as themselves.
            let kind: EventKind = match entry.kind {
                EventKind::Tx => EventKind::Retransmit,
                kind => kind,
            };
            trace!("visit(): session {} retransmission #{} ({:?})", session, retries, kind);
            if self.events.try_send(Event::redelivery(kind, session, retries)).is_err() {
                warn!("visit(): event receiver is gone");
            }
            true
        } else {
            self.give_up(index, session, entry.kind)
        }
    }

    /// The connection is unilaterally aborted: the session is released and the owning application interface learns of
    /// the failure. Connection attempts belong to the outbound interface, everything else to the inbound one.
    fn give_up(&mut self, index: usize, session: SessionId, kind: EventKind) -> bool {
        if self.release.is_full() {
            return false;
        }
        let notify_full: bool = match kind {
            EventKind::Syn => self.open_notify.is_full(),
            _ => self.data_notify.is_full(),
        };
        if notify_full {
            return false;
        }

        self.entries[index] = RetransmitEntry::default();
        error!("give_up(): session {} out of retries ({:?}), aborting", session, kind);
        if self.release.try_send(session).is_err() {
            warn!("give_up(): release receiver is gone");
        }
        match kind {
            EventKind::Syn => {
                if self.open_notify.try_send(OpenNotification::timed_out(session)).is_err() {
                    warn!("give_up(): open-notification receiver is gone");
                }
            },
            _ => {
                if self.data_notify.try_send(RxAppNotification::closed(session)).is_err() {
                    warn!("give_up(): data-notification receiver is gone");
                }
            },
        }
        true
    }

    #[cfg(test)]
    fn entry(&self, session: SessionId) -> RetransmitEntry {
        self.entries[table_index(session, self.entries.len())]
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        RetransmitTimer,
        TimerArm,
        TimerCommand,
    };
    use crate::ctrl::{
        event::{
            Event,
            EventKind,
        },
        notify::{
            OpenNotification,
            RxAppNotification,
        },
        SessionId,
    };
    use ::anyhow::Result;
    use ::crossbeam_channel::{
        Receiver,
        Sender,
    };

    struct Harness {
        commands: Sender<TimerCommand>,
        arms: Sender<TimerArm>,
        events: Receiver<Event>,
        release: Receiver<SessionId>,
        open_notify: Receiver<OpenNotification>,
        data_notify: Receiver<RxAppNotification>,
    }

    fn timer(max_sessions: u16, base_ticks: u32) -> (RetransmitTimer, Harness) {
        let (commands_tx, commands_rx) = crossbeam_channel::bounded(16);
        let (arms_tx, arms_rx) = crossbeam_channel::bounded(16);
        let (events_tx, events_rx) = crossbeam_channel::bounded(64);
        let (release_tx, release_rx) = crossbeam_channel::bounded(16);
        let (open_notify_tx, open_notify_rx) = crossbeam_channel::bounded(16);
        let (data_notify_tx, data_notify_rx) = crossbeam_channel::bounded(16);
        let timer: RetransmitTimer = RetransmitTimer::new(
            max_sessions,
            base_ticks,
            commands_rx,
            arms_rx,
            events_tx,
            release_tx,
            open_notify_tx,
            data_notify_tx,
        );
        let harness: Harness = Harness {
            commands: commands_tx,
            arms: arms_tx,
            events: events_rx,
            release: release_rx,
            open_notify: open_notify_rx,
            data_notify: data_notify_rx,
        };
        (timer, harness)
    }

    fn sid(id: u16) -> SessionId {
        SessionId::new(id)
    }

    /// With no acknowledgments arriving, expiries follow the escalation sequence and exactly four retransmissions
    /// precede the abort.
    #[test]
    fn backoff_escalation_then_abort() -> Result<()> {
        const SESSIONS: u16 = 2;
        let (mut timer, h) = timer(SESSIONS, 1);

        h.arms.send(TimerArm {
            session: sid(1),
            kind: EventKind::Tx,
        })?;

        let mut retransmissions: Vec<(u8, usize)> = Vec::new();
        let mut aborted_at: Option<usize> = None;
        for step in 0..((1 + 5 + 10 + 15 + 30 + 2) * SESSIONS as usize + 4) {
            timer.step();
            if let Ok(event) = h.events.try_recv() {
                crate::ensure_eq!(event.kind, EventKind::Retransmit);
                crate::ensure_eq!(event.session, sid(1));
                retransmissions.push((event.retries.unwrap_or(0), step));
            }
            if h.release.try_recv().is_ok() {
                aborted_at = Some(step);
                break;
            }
        }

        let counts: Vec<u8> = retransmissions.iter().map(|&(retries, _)| retries).collect();
        crate::ensure_eq!(counts, vec![1, 2, 3, 4]);

        // Successive gaps between expiries follow the escalation table (in sweep visits).
        let gaps: Vec<usize> = retransmissions
            .windows(2)
            .map(|pair| (pair[1].1 - pair[0].1) / SESSIONS as usize)
            .collect();
        crate::ensure_eq!(gaps, vec![5, 10, 15]);

        crate::ensure_eq!(aborted_at.is_some(), true);
        crate::ensure_eq!(h.data_notify.try_recv()?.closed, true);
        crate::ensure_eq!(h.open_notify.is_empty(), true);
        crate::ensure_eq!(timer.entry(sid(1)).active, false);
        crate::ensure_eq!(timer.entry(sid(1)).retries, 0);
        crate::ensure_eq!(timer.entry(sid(1)).time, 0);

        Ok(())
    }

    /// A SYN-kind timeout notifies the outbound-connection interface, not the inbound-data one.
    #[test]
    fn syn_timeout_notifies_connect_interface() -> Result<()> {
        let (commands_tx, commands_rx) = crossbeam_channel::bounded(16);
        let (arms_tx, arms_rx) = crossbeam_channel::bounded(16);
        let (events_tx, events_rx) = crossbeam_channel::bounded(64);
        let (release_tx, release_rx) = crossbeam_channel::bounded(16);
        let (open_notify_tx, open_notify_rx) = crossbeam_channel::bounded(16);
        let (data_notify_tx, data_notify_rx) = crossbeam_channel::bounded(16);
        let mut timer: RetransmitTimer = RetransmitTimer::new(
            1,
            1,
            commands_rx,
            arms_rx,
            events_tx,
            release_tx,
            open_notify_tx,
            data_notify_tx,
        );
        let _ = commands_tx;

        arms_tx.send(TimerArm {
            session: sid(0),
            kind: EventKind::Syn,
        })?;
        for _ in 0..128 {
            timer.step();
            while events_rx.try_recv().is_ok() {}
        }

        let notification: OpenNotification = open_notify_rx.try_recv()?;
        crate::ensure_eq!(notification.session, sid(0));
        crate::ensure_eq!(notification.timed_out, true);
        crate::ensure_eq!(data_notify_rx.is_empty(), true);
        crate::ensure_eq!(release_rx.try_recv()?, sid(0));

        // Retransmitted SYNs keep their kind.
        crate::ensure_eq!(timer.entry(sid(0)).active, false);

        Ok(())
    }

    /// `load` restarts the backoff from scratch; `stop` disarms outright.
    #[test]
    fn load_and_stop_reset_backoff() -> Result<()> {
        let (mut timer, h) = timer(2, 4);

        h.arms.send(TimerArm {
            session: sid(0),
            kind: EventKind::Tx,
        })?;
        // Burn a few visits, then pretend an ACK advanced the window.
        for _ in 0..5 {
            timer.step();
        }
        h.commands.send(TimerCommand::load(sid(0)))?;
        timer.step();
        crate::ensure_eq!(timer.entry(sid(0)).active, true);
        crate::ensure_eq!(timer.entry(sid(0)).retries, 0);
        crate::ensure_eq!(timer.entry(sid(0)).time, 4);

        h.commands.send(TimerCommand::stop(sid(0)))?;
        timer.step();
        crate::ensure_eq!(timer.entry(sid(0)).active, false);
        crate::ensure_eq!(timer.entry(sid(0)).time, 0);

        Ok(())
    }

    /// Arming an armed timer leaves the running countdown untouched.
    #[test]
    fn rearm_does_not_extend() -> Result<()> {
        let (mut timer, h) = timer(2, 8);

        h.arms.send(TimerArm {
            session: sid(1),
            kind: EventKind::Tx,
        })?;
        timer.step();
        let before: u32 = timer.entry(sid(1)).time;

        h.arms.send(TimerArm {
            session: sid(1),
            kind: EventKind::Fin,
        })?;
        timer.step();
        crate::ensure_eq!(timer.entry(sid(1)).time <= before, true);
        crate::ensure_eq!(timer.entry(sid(1)).kind, EventKind::Tx);

        Ok(())
    }
}
