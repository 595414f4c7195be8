// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Per-session TCP state, shared between the Rx path and the Tx-application path.
//
// The table itself is a key-value store: callers decide the next state, the table only guarantees that the two actor
// classes never observe or apply conflicting updates to the same session. A read takes the requesting actor's advisory
// lock on the target session; the matching write releases it. A request that collides with the other actor's lock is
// deferred and retried on a later step, never dropped.

use crate::ctrl::{
    table_index,
    SessionId,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

/// TCP connection states, per RFC 793 Section 3.2. `Closed` doubles as the vacant-slot marker: a released session
/// parks at `Closed` until the allocator hands its id out again.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum TcpState {
    #[default]
    Closed,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    Closing,
    TimeWait,
    LastAck,
}

/// The two actor classes arbitrated by the table.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Actor {
    RxPath,
    TxApp,
}

/// An update (write) or lookup (read) of one session's state.
#[derive(Clone, Copy, Debug)]
pub struct StateRequest {
    pub session: SessionId,
    pub write: bool,
    /// Next state; ignored on reads.
    pub state: TcpState,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StateResponse {
    pub session: SessionId,
    pub state: TcpState,
}

pub struct SessionStateTable {
    entries: Vec<TcpState>,

    // Which single session each actor class currently holds a read-lock on.
    rx_locked: Option<SessionId>,
    tx_app_locked: Option<SessionId>,

    // At most one outstanding deferred request per actor; while occupied, no fresh request of that class is popped, so
    // per-actor ordering is preserved.
    deferred_rx: Option<StateRequest>,
    deferred_tx_app: Option<StateRequest>,
    deferred_release: Option<SessionId>,

    tx_app_req: Receiver<StateRequest>,
    tx_app_rsp: Sender<StateResponse>,
    stream_req: Receiver<SessionId>,
    stream_rsp: Sender<StateResponse>,
    rx_req: Receiver<StateRequest>,
    rx_rsp: Sender<StateResponse>,
    release_req: Receiver<SessionId>,

    // Session-release notifications toward the external allocator.
    released: Sender<SessionId>,
}

impl StateRequest {
    pub fn read(session: SessionId) -> Self {
        Self {
            session,
            write: false,
            state: TcpState::Closed,
        }
    }

    pub fn write(session: SessionId, state: TcpState) -> Self {
        Self {
            session,
            write: true,
            state,
        }
    }
}

impl SessionStateTable {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        max_sessions: u16,
        tx_app_req: Receiver<StateRequest>,
        tx_app_rsp: Sender<StateResponse>,
        stream_req: Receiver<SessionId>,
        stream_rsp: Sender<StateResponse>,
        rx_req: Receiver<StateRequest>,
        rx_rsp: Sender<StateResponse>,
        release_req: Receiver<SessionId>,
        released: Sender<SessionId>,
    ) -> Self {
        Self {
            entries: vec![TcpState::default(); max_sessions as usize],
            rx_locked: None,
            tx_app_locked: None,
            deferred_rx: None,
            deferred_tx_app: None,
            deferred_release: None,
            tx_app_req,
            tx_app_rsp,
            stream_req,
            stream_rsp,
            rx_req,
            rx_rsp,
            release_req,
            released,
        }
    }

    /// Services at most one request, in fixed priority order: fresh Tx-application update/read, Tx-application
    /// stream-only read, fresh Rx-path update/read, timer-driven release, then resumption of deferred requests.
    /// Returns whether any request was serviced.
    pub fn step(&mut self) -> bool {
        // (1) Fresh Tx-application update/read. Skipped while one is deferred to keep per-actor FIFO order.
        if self.deferred_tx_app.is_none() {
            if let Ok(req) = self.tx_app_req.try_recv() {
                if self.service(Actor::TxApp, req) {
                    return true;
                }
                self.deferred_tx_app = Some(req);
            }
        }

        // (2) Stream-only read: no locking, never hazards.
        if !self.stream_rsp.is_full() {
            if let Ok(session) = self.stream_req.try_recv() {
                let state: TcpState = self.entries[table_index(session, self.entries.len())];
                if self.stream_rsp.try_send(StateResponse { session, state }).is_err() {
                    warn!("step(): stream response receiver for session {} is gone", session);
                }
                return true;
            }
        }

        // (3) Fresh Rx-path update/read.
        if self.deferred_rx.is_none() {
            if let Ok(req) = self.rx_req.try_recv() {
                if self.service(Actor::RxPath, req) {
                    return true;
                }
                self.deferred_rx = Some(req);
            }
        }

        // (4) Timer-driven release.
        if self.deferred_release.is_none() {
            if let Ok(session) = self.release_req.try_recv() {
                if self.service_release(session) {
                    return true;
                }
                self.deferred_release = Some(session);
            }
        }

        // (5) Resumption of deferred requests.
        if let Some(req) = self.deferred_tx_app.take() {
            if self.service(Actor::TxApp, req) {
                return true;
            }
            self.deferred_tx_app = Some(req);
        }
        if let Some(req) = self.deferred_rx.take() {
            if self.service(Actor::RxPath, req) {
                return true;
            }
            self.deferred_rx = Some(req);
        }
        if let Some(session) = self.deferred_release.take() {
            if self.service_release(session) {
                return true;
            }
            self.deferred_release = Some(session);
        }

        false
    }

    /// Applies one update/read request, or reports that it must wait.
    fn service(&mut self, actor: Actor, req: StateRequest) -> bool {
        // Hazard: the other actor holds its lock on this session.
        let other_lock: Option<SessionId> = match actor {
            Actor::RxPath => self.tx_app_locked,
            Actor::TxApp => self.rx_locked,
        };
        if other_lock == Some(req.session) {
            trace!("service(): deferring {:?} access to session {}", actor, req.session);
            return false;
        }

        let index: usize = table_index(req.session, self.entries.len());
        if req.write {
            let previous: TcpState = self.entries[index];
            let releases: bool = req.state == TcpState::Closed && previous != TcpState::Closed;
            if releases && self.released.is_full() {
                return false;
            }
            self.entries[index] = req.state;
            match actor {
                Actor::RxPath => self.rx_locked = None,
                Actor::TxApp => self.tx_app_locked = None,
            }
            debug!("service(): session {} {:?} -> {:?}", req.session, previous, req.state);
            if releases {
                self.notify_release(req.session);
            }
            true
        } else {
            let rsp: StateResponse = StateResponse {
                session: req.session,
                state: self.entries[index],
            };
            let out: Sender<StateResponse> = match actor {
                Actor::RxPath => self.rx_rsp.clone(),
                Actor::TxApp => self.tx_app_rsp.clone(),
            };
            if out.is_full() {
                return false;
            }
            // A read supersedes whatever session this actor previously held.
            match actor {
                Actor::RxPath => self.rx_locked = Some(req.session),
                Actor::TxApp => self.tx_app_locked = Some(req.session),
            }
            self.reply(&out, rsp);
            true
        }
    }

    /// Applies one timer-driven release, or reports that it must wait for a lock to clear.
    fn service_release(&mut self, session: SessionId) -> bool {
        if self.rx_locked == Some(session) || self.tx_app_locked == Some(session) {
            trace!("service_release(): deferring release of session {}", session);
            return false;
        }
        let index: usize = table_index(session, self.entries.len());
        if self.entries[index] != TcpState::Closed {
            if self.released.is_full() {
                return false;
            }
            self.entries[index] = TcpState::Closed;
            self.notify_release(session);
        }
        true
    }

    fn reply(&self, out: &Sender<StateResponse>, rsp: StateResponse) {
        if out.try_send(rsp).is_err() {
            warn!("reply(): response receiver for session {} is gone", rsp.session);
        }
    }

    /// Tells the external allocator that a session id may be reused. Fires exactly once per transition into `Closed`.
    fn notify_release(&self, session: SessionId) {
        trace!("notify_release(): session {}", session);
        if self.released.try_send(session).is_err() {
            warn!("notify_release(): allocator receiver is gone");
        }
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
