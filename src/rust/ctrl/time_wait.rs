// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Fixed-duration TIME_WAIT countdown per session.
//
// Arming always restarts the full countdown, even for a session already counting down; there is no partial carryover.
// When a countdown runs out, the session is handed to the state table for release.

use crate::ctrl::{
    table_index,
    SessionId,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct CloseEntry {
    /// Remaining sweep visits; zero whenever inactive.
    pub time: u32,
    pub active: bool,
}

pub struct CloseTimer {
    entries: Vec<CloseEntry>,
    sweep: usize,
    close_ticks: u32,

    arms: Receiver<SessionId>,
    release: Sender<SessionId>,
}

impl CloseTimer {
    pub fn new(max_sessions: u16, close_ticks: u32, arms: Receiver<SessionId>, release: Sender<SessionId>) -> Self {
        Self {
            entries: vec![CloseEntry::default(); max_sessions as usize],
            sweep: 0,
            close_ticks: close_ticks.max(1),
            arms,
            release,
        }
    }

    /// Services one arm request, or failing that, one sweep visit.
    pub fn step(&mut self) -> bool {
        if let Ok(session) = self.arms.try_recv() {
            let index: usize = table_index(session, self.entries.len());
            debug!("step(): session {} entering time-wait", session);
            self.entries[index] = CloseEntry {
                time: self.close_ticks,
                active: true,
            };
            return true;
        }

        self.sweep = (self.sweep + 1) % self.entries.len();
        let entry: CloseEntry = self.entries[self.sweep];
        if !entry.active {
            return false;
        }
        if entry.time > 1 {
            self.entries[self.sweep].time = entry.time - 1;
            return true;
        }
        // Hold at one while the release queue is congested; retry on the next visit.
        if self.release.is_full() {
            return false;
        }
        self.entries[self.sweep] = CloseEntry::default();
        let session: SessionId = SessionId::new(self.sweep as u16);
        trace!("step(): session {} time-wait expired", session);
        if self.release.try_send(session).is_err() {
            warn!("step(): release receiver is gone");
        }
        true
    }

    #[cfg(test)]
    fn entry(&self, session: SessionId) -> CloseEntry {
        self.entries[table_index(session, self.entries.len())]
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
