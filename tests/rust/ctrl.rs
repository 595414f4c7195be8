// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use ::anyhow::Result;
use ::toe_ctrl::{
    ctrl::{
        config::CtrlConfig,
        engine::{
            ControlPlane,
            Handles,
        },
        event::{
            Event,
            EventKind,
        },
        retransmitter::TimerArm,
        seq::SeqNumber,
        state::{
            StateRequest,
            TcpState,
        },
        tx_window::{
            AckUpdate,
            TxQuery,
            TxWindowView,
        },
        SessionId,
    },
    ensure_eq,
};

//======================================================================================================================
// Helper Functions
//======================================================================================================================

const MSS: u16 = 1460;

fn small_config() -> CtrlConfig {
    CtrlConfig {
        max_sessions: 8,
        mss: MSS,
        ack_delay_ticks: 2,
        time_wait_ticks: 8,
        retransmit_base_ticks: 1,
        ..Default::default()
    }
}

fn sid(id: u16) -> SessionId {
    SessionId::new(id)
}

/// Pops every outbound event, confirming receipt the way the real transmit engine would.
fn drain_outbound(handles: &Handles, into: &mut Vec<Event>) {
    while let Ok(event) = handles.tx_engine.events.try_recv() {
        let _ = handles.tx_engine.received.try_send(());
        into.push(event);
    }
}

//======================================================================================================================
// Integration Tests
//======================================================================================================================

/// A session is initialized, a segment goes out unacknowledged, the timer escalates through four retransmissions, and
/// the connection is finally aborted: one failure notice to the receive application, one release to the allocator.
#[test]
fn retransmit_escalation_ends_in_abort() -> Result<()> {
    let (mut plane, handles) = ControlPlane::new(&small_config());
    let session: SessionId = sid(7);
    let iss: SeqNumber = SeqNumber::from(1000);

    // The connection reaches Established through the Tx-application path.
    handles.tx_app.state_req.send(StateRequest::write(session, TcpState::Established))?;
    plane.run(4);

    // The transmit engine initializes the send window around the initial sequence number.
    handles.tx_engine.window_req.send(TxQuery::init(session, iss))?;
    plane.run(4);
    let notification = handles.tx_app.ack_notify.try_recv()?;
    ensure_eq!(notification.init, true);
    ensure_eq!(notification.acked_up_to, iss);

    // The peer's SYN-ACK advertised a window; the Rx engine records it.
    handles.rx_path.ack_update.send(AckUpdate {
        session,
        ackd: iss - SeqNumber::from(1),
        recv_window: u16::MAX,
        cong_window: 10 * MSS,
        count: 0,
        init: false,
    })?;
    plane.run(4);
    let _ = handles.tx_app.ack_notify.try_recv()?;

    handles.tx_engine.window_req.send(TxQuery::read(session))?;
    plane.run(4);
    let view: TxWindowView = handles.tx_engine.window_rsp.try_recv()?;
    ensure_eq!(view.ackd, iss - SeqNumber::from(1));
    ensure_eq!(view.not_ackd, iss);
    ensure_eq!(view.usable_window, 10 * MSS);

    // A data segment goes out and arms the timer; no acknowledgment will ever arrive.
    handles.tx_engine.timer_arm.send(TimerArm {
        session,
        kind: EventKind::Tx,
    })?;

    let mut outbound: Vec<Event> = Vec::new();
    let mut released: Vec<SessionId> = Vec::new();
    for _ in 0..4096 {
        plane.step();
        drain_outbound(&handles, &mut outbound);
        while let Ok(session) = handles.allocator.released.try_recv() {
            released.push(session);
        }
        if !released.is_empty() {
            break;
        }
    }

    let retransmissions: Vec<u8> = outbound
        .iter()
        .filter(|event| event.kind == EventKind::Retransmit)
        .map(|event| event.retries.unwrap_or(0))
        .collect();
    ensure_eq!(retransmissions, vec![1, 2, 3, 4]);

    ensure_eq!(released, vec![session]);
    let failure = handles.rx_app.notify.try_recv()?;
    ensure_eq!(failure.session, session);
    ensure_eq!(failure.closed, true);
    ensure_eq!(handles.tx_app.open_notify.is_empty(), true);

    // The session parks at Closed until the allocator reuses it.
    handles.tx_app.stream_req.send(session)?;
    plane.run(4);
    ensure_eq!(handles.tx_app.stream_rsp.try_recv()?.state, TcpState::Closed);

    Ok(())
}

/// Two pure ACKs raised back to back by the Rx path leave the pipeline as a single coalesced acknowledgment.
#[test]
fn back_to_back_acks_coalesce() -> Result<()> {
    let (mut plane, handles) = ControlPlane::new(&small_config());
    let session: SessionId = sid(2);

    handles.rx_path.events.send(Event::new(EventKind::Ack, session))?;
    handles.rx_path.events.send(Event::new(EventKind::Ack, session))?;

    let mut outbound: Vec<Event> = Vec::new();
    for _ in 0..64 {
        plane.step();
        drain_outbound(&handles, &mut outbound);
    }

    ensure_eq!(outbound, vec![Event::new(EventKind::Ack, session)]);

    Ok(())
}

/// A data event arriving inside the coalescing window flushes it: the data goes straight through and no stray ACK
/// follows.
#[test]
fn data_event_cancels_pending_ack() -> Result<()> {
    let (mut plane, handles) = ControlPlane::new(&small_config());
    let session: SessionId = sid(4);

    handles.rx_path.events.send(Event::new(EventKind::Ack, session))?;
    plane.run(2);
    handles.rx_path.events.send(Event::with_extent(EventKind::Tx, session, 0x1000, 512))?;

    let mut outbound: Vec<Event> = Vec::new();
    for _ in 0..64 {
        plane.step();
        drain_outbound(&handles, &mut outbound);
    }

    ensure_eq!(outbound.len(), 1);
    ensure_eq!(outbound[0].kind, EventKind::Tx);
    ensure_eq!(outbound[0].length, Some(512));

    Ok(())
}

/// A session placed in TIME_WAIT is released to the allocator exactly once after the close countdown runs out.
#[test]
fn time_wait_expiry_releases_session() -> Result<()> {
    let (mut plane, handles) = ControlPlane::new(&small_config());
    let session: SessionId = sid(3);

    handles.rx_path.state_req.send(StateRequest::write(session, TcpState::TimeWait))?;
    plane.run(4);
    handles.rx_path.time_wait_arm.send(session)?;

    let mut released: Vec<SessionId> = Vec::new();
    for _ in 0..256 {
        plane.step();
        while let Ok(session) = handles.allocator.released.try_recv() {
            released.push(session);
        }
    }

    ensure_eq!(released, vec![session]);
    handles.tx_app.stream_req.send(session)?;
    plane.run(4);
    ensure_eq!(handles.tx_app.stream_rsp.try_recv()?.state, TcpState::Closed);

    Ok(())
}

/// Application-originated events are held back until the pipeline confirms it has drained, while Rx-path events flow
/// regardless.
#[test]
fn application_events_respect_credit() -> Result<()> {
    let (mut plane, handles) = ControlPlane::new(&small_config());

    // An Rx event that nobody confirms: the pipeline now has one unconfirmed event in flight.
    handles.rx_path.events.send(Event::new(EventKind::Rst, sid(1)))?;
    plane.run(8);
    ensure_eq!(handles.tx_engine.events.try_recv()?.kind, EventKind::Rst);

    // The application wants to transmit, but the engine has not confirmed the RST yet.
    handles.tx_app.events.send(Event::new(EventKind::Tx, sid(5)))?;
    plane.run(8);
    ensure_eq!(handles.tx_engine.events.is_empty(), true);

    // Confirmation restores credit and the application event flows.
    handles.tx_engine.received.send(())?;
    plane.run(8);
    ensure_eq!(handles.tx_engine.events.try_recv()?.kind, EventKind::Tx);

    Ok(())
}
