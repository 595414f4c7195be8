// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Per-session transmit sliding-window and congestion accounting ("Tx SAR").
//
// Send sequence space, per RFC 793 Section 3.7:
//
//                    ackd              not_ackd     ackd + min(cong_window, recv_window)
//                     v                    v                          v
// ... ----------------|--------------------|--------------------------|------------------------------
//       acknowledged  |   unacknowledged   |     allowed to send      | future sequence number space
//
// The effective window handed to the transmit engine is always the minimum of the congestion window and the window
// advertised by the peer. The congestion window evolves only here: reset on session init and collapsed on a
// retransmission timeout (RFC 5681 slow-start threshold halving). `app_ptr` tracks how much the local application has
// queued for transmission beyond `ackd`, as a 16-bit cursor into the external byte store.

use crate::ctrl::{
    notify::AckNotification,
    seq::SeqNumber,
    table_index,
    SessionId,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

// Initial congestion window, in maximum-segment-sizes.
const INITIAL_WINDOW_MSS: u16 = 10;

#[derive(Clone, Copy, Debug, Default)]
pub struct TxWindowEntry {
    pub ackd: SeqNumber,
    pub not_ackd: SeqNumber,
    pub recv_window: u16,
    pub cong_window: u16,
    pub ss_thresh: u16,
    pub app_ptr: u16,
    pub fin_ready: bool,
    pub fin_sent: bool,
    /// Duplicate-ACK count, maintained by the Rx engine.
    pub count: u8,
}

/// Transmit-engine access to one entry. With `write == false` this is a lookup answered by a [TxWindowView]; writes
/// update `not_ackd`, except that `init`, FIN-flag, and `retransmit` writes carry their own semantics and leave
/// `not_ackd` alone.
#[derive(Clone, Copy, Debug)]
pub struct TxQuery {
    pub session: SessionId,
    pub write: bool,
    pub not_ackd: SeqNumber,
    pub init: bool,
    pub fin_ready: bool,
    pub fin_sent: bool,
    pub retransmit: bool,
}

/// Snapshot returned to the transmit engine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TxWindowView {
    pub session: SessionId,
    pub ackd: SeqNumber,
    pub not_ackd: SeqNumber,
    /// min(cong_window, recv_window).
    pub usable_window: u16,
    pub app_ptr: u16,
    pub fin_ready: bool,
    pub fin_sent: bool,
}

/// Write-only application-pointer push from the Tx-application path.
#[derive(Clone, Copy, Debug)]
pub struct AppPush {
    pub session: SessionId,
    pub app_ptr: u16,
}

/// Rx-engine update derived from a received acknowledgment.
#[derive(Clone, Copy, Debug)]
pub struct AckUpdate {
    pub session: SessionId,
    pub ackd: SeqNumber,
    pub recv_window: u16,
    pub cong_window: u16,
    pub count: u8,
    pub init: bool,
}

pub struct TxWindowTable {
    entries: Vec<TxWindowEntry>,
    mss: u16,

    tx_req: Receiver<TxQuery>,
    tx_rsp: Sender<TxWindowView>,
    app_push: Receiver<AppPush>,
    rx_update: Receiver<AckUpdate>,

    // ACK-push notifications toward the Tx-application layer.
    ack_notify: Sender<AckNotification>,
}

impl TxQuery {
    pub fn read(session: SessionId) -> Self {
        Self {
            session,
            write: false,
            not_ackd: SeqNumber::default(),
            init: false,
            fin_ready: false,
            fin_sent: false,
            retransmit: false,
        }
    }

    pub fn write(session: SessionId, not_ackd: SeqNumber) -> Self {
        Self {
            session,
            write: true,
            not_ackd,
            init: false,
            fin_ready: false,
            fin_sent: false,
            retransmit: false,
        }
    }

    /// Initializes a session's send window around its initial sequence number.
    pub fn init(session: SessionId, iss: SeqNumber) -> Self {
        Self {
            session,
            write: true,
            not_ackd: iss,
            init: true,
            fin_ready: false,
            fin_sent: false,
            retransmit: false,
        }
    }

    /// Marks FIN progress. Flags are monotonic; this write does not touch `not_ackd`.
    pub fn mark_fin(session: SessionId, ready: bool, sent: bool) -> Self {
        Self {
            session,
            write: true,
            not_ackd: SeqNumber::default(),
            init: false,
            fin_ready: ready,
            fin_sent: sent,
            retransmit: false,
        }
    }

    /// Retransmission-timeout reaction: collapse the congestion window.
    pub fn retransmit(session: SessionId) -> Self {
        Self {
            session,
            write: true,
            not_ackd: SeqNumber::default(),
            init: false,
            fin_ready: false,
            fin_sent: false,
            retransmit: true,
        }
    }
}

impl TxWindowTable {
    pub fn new(
        max_sessions: u16,
        mss: u16,
        tx_req: Receiver<TxQuery>,
        tx_rsp: Sender<TxWindowView>,
        app_push: Receiver<AppPush>,
        rx_update: Receiver<AckUpdate>,
        ack_notify: Sender<AckNotification>,
    ) -> Self {
        Self {
            entries: vec![TxWindowEntry::default(); max_sessions as usize],
            mss,
            tx_req,
            tx_rsp,
            app_push,
            rx_update,
            ack_notify,
        }
    }

    fn initial_window(&self) -> u16 {
        self.mss.saturating_mul(INITIAL_WINDOW_MSS)
    }

    /// Services at most one request: transmit-engine query, then application pointer push, then Rx-engine update.
    pub fn step(&mut self) -> bool {
        if let Some(worked) = self.step_tx() {
            return worked;
        }

        if let Ok(push) = self.app_push.try_recv() {
            let index: usize = table_index(push.session, self.entries.len());
            self.entries[index].app_ptr = push.app_ptr;
            return true;
        }

        if !self.ack_notify.is_full() {
            if let Ok(update) = self.rx_update.try_recv() {
                self.apply_ack(update);
                return true;
            }
        }

        false
    }

    /// Transmit-engine port. Returns None when no request is serviceable so lower-priority ports get a chance.
    fn step_tx(&mut self) -> Option<bool> {
        // A lookup needs reply capacity; an init write needs notification capacity.
        if self.tx_rsp.is_full() || self.ack_notify.is_full() {
            return None;
        }
        let query: TxQuery = self.tx_req.try_recv().ok()?;
        let index: usize = table_index(query.session, self.entries.len());
        if !query.write {
            let entry: &TxWindowEntry = &self.entries[index];
            let view: TxWindowView = TxWindowView {
                session: query.session,
                ackd: entry.ackd,
                not_ackd: entry.not_ackd,
                usable_window: entry.cong_window.min(entry.recv_window),
                app_ptr: entry.app_ptr,
                fin_ready: entry.fin_ready,
                fin_sent: entry.fin_sent,
            };
            if self.tx_rsp.try_send(view).is_err() {
                warn!("step_tx(): view receiver for session {} is gone", query.session);
            }
            return Some(true);
        }

        let initial_window: u16 = self.initial_window();
        let two_mss: u16 = self.mss.saturating_mul(2);
        let entry: &mut TxWindowEntry = &mut self.entries[index];
        if query.init {
            entry.not_ackd = query.not_ackd;
            entry.ackd = query.not_ackd - SeqNumber::from(1);
            entry.app_ptr = u32::from(query.not_ackd) as u16;
            entry.cong_window = initial_window;
            entry.ss_thresh = u16::MAX;
            debug!("step_tx(): session {} window init at {}", query.session, query.not_ackd);
            let notification: AckNotification = AckNotification {
                session: query.session,
                acked_up_to: query.not_ackd,
                init: true,
            };
            if self.ack_notify.try_send(notification).is_err() {
                warn!("step_tx(): ack-push receiver is gone");
            }
        } else if query.fin_ready || query.fin_sent {
            entry.fin_ready |= query.fin_ready;
            entry.fin_sent |= query.fin_sent;
        } else if query.retransmit {
            // RFC 5681 Section 3.1: on a retransmission timeout, half the flight size bounds the slow-start
            // threshold, and transmission restarts from a fresh window.
            let in_flight: u32 = u32::from(entry.not_ackd - entry.ackd);
            let in_flight: u16 = u16::try_from(in_flight).unwrap_or(u16::MAX);
            entry.ss_thresh = (in_flight / 2).max(two_mss);
            entry.cong_window = initial_window;
            debug!(
                "step_tx(): session {} rto, ss_thresh {} cong_window {}",
                query.session, entry.ss_thresh, entry.cong_window
            );
        } else {
            entry.not_ackd = query.not_ackd;
        }
        Some(true)
    }

    /// Applies an Rx-engine acknowledgment update and pushes the new `ackd` toward the application layer.
    fn apply_ack(&mut self, update: AckUpdate) {
        let index: usize = table_index(update.session, self.entries.len());
        let entry: &mut TxWindowEntry = &mut self.entries[index];
        entry.ackd = update.ackd;
        entry.recv_window = update.recv_window;
        entry.cong_window = update.cong_window;
        entry.count = update.count;
        if update.init {
            entry.fin_ready = false;
            entry.fin_sent = false;
        }
        debug!(
            "apply_ack(): session {} ackd {} recv_window {}",
            update.session, update.ackd, update.recv_window
        );
        let notification: AckNotification = AckNotification {
            session: update.session,
            acked_up_to: update.ackd,
            init: false,
        };
        if self.ack_notify.try_send(notification).is_err() {
            warn!("apply_ack(): ack-push receiver is gone");
        }
    }

    #[cfg(test)]
    fn entry(&self, session: SessionId) -> TxWindowEntry {
        self.entries[table_index(session, self.entries.len())]
    }
}

// TODO: Use the duplicate-ACK count to raise a fast-retransmit event instead of always waiting for the timer.

//======================================================================================================================
// Unit Tests
//======================================================================================================================
