// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Per-session receive sliding-window accounting ("Rx SAR").
//
// The Rx engine is the only writer of `recvd`; the application is the only writer of `appd`; the transmit engine only
// ever reads. With one writer class per field there is nothing to lock: the priority order below is all the
// arbitration this table needs.

use crate::ctrl::{
    seq::SeqNumber,
    table_index,
    SessionId,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

#[derive(Clone, Copy, Debug, Default)]
pub struct RxWindowEntry {
    /// Sequence number of the next byte we expect from the peer (RCV.NXT).
    pub recvd: SeqNumber,
    /// Application read cursor into the external byte store; trails `recvd`, never retreats.
    pub appd: u16,
    /// Highest sequence number acknowledged back to the peer.
    pub ackd: SeqNumber,
    /// Window advertised to the peer.
    pub recv_window: u16,
    pub count: u8,
}

/// Snapshot for the transmit engine: the ACK number and window to put in outgoing segments.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RxView {
    pub session: SessionId,
    pub recvd: SeqNumber,
    pub recv_window: u16,
}

/// Application access to the read cursor.
#[derive(Clone, Copy, Debug)]
pub struct AppRequest {
    pub session: SessionId,
    pub write: bool,
    /// New cursor; ignored on reads.
    pub appd: u16,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AppCursor {
    pub session: SessionId,
    pub appd: u16,
}

/// Rx-engine update derived from an accepted segment.
#[derive(Clone, Copy, Debug)]
pub struct SegmentUpdate {
    pub session: SessionId,
    pub recvd: SeqNumber,
    pub ackd: SeqNumber,
    pub recv_window: u16,
    pub count: u8,
    /// First accepted data for this session: the read cursor snaps to `recvd`.
    pub init: bool,
}

pub struct RxWindowTable {
    entries: Vec<RxWindowEntry>,

    tx_req: Receiver<SessionId>,
    tx_rsp: Sender<RxView>,
    app_req: Receiver<AppRequest>,
    app_rsp: Sender<AppCursor>,
    rx_update: Receiver<SegmentUpdate>,
}

impl AppRequest {
    pub fn read(session: SessionId) -> Self {
        Self {
            session,
            write: false,
            appd: 0,
        }
    }

    pub fn write(session: SessionId, appd: u16) -> Self {
        Self {
            session,
            write: true,
            appd,
        }
    }
}

impl RxWindowTable {
    pub fn new(
        max_sessions: u16,
        tx_req: Receiver<SessionId>,
        tx_rsp: Sender<RxView>,
        app_req: Receiver<AppRequest>,
        app_rsp: Sender<AppCursor>,
        rx_update: Receiver<SegmentUpdate>,
    ) -> Self {
        Self {
            entries: vec![RxWindowEntry::default(); max_sessions as usize],
            tx_req,
            tx_rsp,
            app_req,
            app_rsp,
            rx_update,
        }
    }

    /// Services at most one request: transmit-engine read, then application update/read, then Rx-engine update.
    pub fn step(&mut self) -> bool {
        if !self.tx_rsp.is_full() {
            if let Ok(session) = self.tx_req.try_recv() {
                let entry: &RxWindowEntry = &self.entries[table_index(session, self.entries.len())];
                let view: RxView = RxView {
                    session,
                    recvd: entry.recvd,
                    recv_window: entry.recv_window,
                };
                if self.tx_rsp.try_send(view).is_err() {
                    warn!("step(): view receiver for session {} is gone", session);
                }
                return true;
            }
        }

        if !self.app_rsp.is_full() {
            if let Ok(req) = self.app_req.try_recv() {
                self.service_app(req);
                return true;
            }
        }

        if let Ok(update) = self.rx_update.try_recv() {
            self.apply_segment(update);
            return true;
        }

        false
    }

    fn service_app(&mut self, req: AppRequest) {
        let index: usize = table_index(req.session, self.entries.len());
        let entry: &mut RxWindowEntry = &mut self.entries[index];
        if req.write {
            // The cursor may only move forward, and never past what has been received.
            let limit: u16 = u32::from(entry.recvd) as u16;
            let advance: u16 = req.appd.wrapping_sub(entry.appd);
            let room: u16 = limit.wrapping_sub(entry.appd);
            debug_assert!(
                advance <= room,
                "session {} read cursor {} -> {} overruns recvd {}",
                req.session,
                entry.appd,
                req.appd,
                entry.recvd
            );
            entry.appd = req.appd;
        } else {
            let cursor: AppCursor = AppCursor {
                session: req.session,
                appd: entry.appd,
            };
            if self.app_rsp.try_send(cursor).is_err() {
                warn!("service_app(): cursor receiver for session {} is gone", req.session);
            }
        }
    }

    fn apply_segment(&mut self, update: SegmentUpdate) {
        let index: usize = table_index(update.session, self.entries.len());
        let entry: &mut RxWindowEntry = &mut self.entries[index];
        entry.recvd = update.recvd;
        entry.ackd = update.ackd;
        entry.recv_window = update.recv_window;
        entry.count = update.count;
        if update.init {
            entry.appd = u32::from(update.recvd) as u16;
        }
        debug!(
            "apply_segment(): session {} recvd {} window {}",
            update.session, update.recvd, update.recv_window
        );
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
