// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Wires the control-plane components together and steps them cooperatively.
//
// Every component is an independent, non-blocking task serviced once per scheduling quantum; all traffic between them
// and across the boundary flows through bounded channels built here. Collaborators (the Rx path, the Tx engine, the
// application interfaces, the session allocator) hold the handle structs and never touch component internals.

use crate::ctrl::{
    ack_delayer::AckDelayer,
    arbiter::EventArbiter,
    config::CtrlConfig,
    event::Event,
    notify::{
        AckNotification,
        OpenNotification,
        RxAppNotification,
    },
    retransmitter::{
        RetransmitTimer,
        TimerArm,
        TimerCommand,
    },
    rx_window::{
        AppCursor,
        AppRequest,
        RxView,
        RxWindowTable,
        SegmentUpdate,
    },
    state::{
        SessionStateTable,
        StateRequest,
        StateResponse,
    },
    time_wait::CloseTimer,
    tx_window::{
        AckUpdate,
        AppPush,
        TxQuery,
        TxWindowTable,
        TxWindowView,
    },
    SessionId,
};
use crate::runtime::logging;
use ::crossbeam_channel::{
    bounded,
    Receiver,
    Sender,
};

//======================================================================================================================
// Structures
//======================================================================================================================

/// The control-plane core: per-session state, window accounting, timers, and event arbitration.
pub struct ControlPlane {
    state: SessionStateTable,
    tx_window: TxWindowTable,
    rx_window: RxWindowTable,
    retransmitter: RetransmitTimer,
    time_wait: CloseTimer,
    arbiter: EventArbiter,
    ack_delayer: AckDelayer,
}

/// Boundary of the Rx path (segment ingress processing).
pub struct RxPathHandle {
    pub state_req: Sender<StateRequest>,
    pub state_rsp: Receiver<StateResponse>,
    pub ack_update: Sender<AckUpdate>,
    pub segment_update: Sender<SegmentUpdate>,
    pub timer_cmd: Sender<TimerCommand>,
    pub time_wait_arm: Sender<SessionId>,
    pub events: Sender<Event>,
}

/// Boundary of the Tx-application interfaces (connect/send side).
pub struct TxAppHandle {
    pub state_req: Sender<StateRequest>,
    pub state_rsp: Receiver<StateResponse>,
    pub stream_req: Sender<SessionId>,
    pub stream_rsp: Receiver<StateResponse>,
    pub app_push: Sender<AppPush>,
    pub cursor_req: Sender<AppRequest>,
    pub cursor_rsp: Receiver<AppCursor>,
    pub events: Sender<Event>,
    pub ack_notify: Receiver<AckNotification>,
    pub open_notify: Receiver<OpenNotification>,
}

/// Boundary of the Tx engine (segment egress).
pub struct TxEngineHandle {
    pub window_req: Sender<TxQuery>,
    pub window_rsp: Receiver<TxWindowView>,
    pub rx_view_req: Sender<SessionId>,
    pub rx_view_rsp: Receiver<RxView>,
    /// The merged, coalesced outbound event stream.
    pub events: Receiver<Event>,
    /// Credit confirmation: signal once per event popped from `events`.
    pub received: Sender<()>,
    pub timer_arm: Sender<TimerArm>,
}

/// Boundary of the Rx-application interface (receive side).
pub struct RxAppHandle {
    pub notify: Receiver<RxAppNotification>,
}

/// Boundary of the external session allocator.
pub struct AllocatorHandle {
    pub released: Receiver<SessionId>,
}

pub struct Handles {
    pub rx_path: RxPathHandle,
    pub tx_app: TxAppHandle,
    pub tx_engine: TxEngineHandle,
    pub rx_app: RxAppHandle,
    pub allocator: AllocatorHandle,
}

//======================================================================================================================
// Associate Functions
//======================================================================================================================

impl ControlPlane {
    /// Builds the control plane and the boundary handles for its collaborators.
    pub fn new(config: &CtrlConfig) -> (Self, Handles) {
        logging::initialize();

        let sessions: u16 = config.max_sessions;
        let req: usize = config.request_queue_depth;
        let evq: usize = config.event_queue_depth;
        let sig: usize = config.signal_queue_depth;

        // Session state table.
        let (tx_app_req_tx, tx_app_req_rx) = bounded::<StateRequest>(req);
        let (tx_app_rsp_tx, tx_app_rsp_rx) = bounded::<StateResponse>(req);
        let (stream_req_tx, stream_req_rx) = bounded::<SessionId>(req);
        let (stream_rsp_tx, stream_rsp_rx) = bounded::<StateResponse>(req);
        let (rx_state_req_tx, rx_state_req_rx) = bounded::<StateRequest>(req);
        let (rx_state_rsp_tx, rx_state_rsp_rx) = bounded::<StateResponse>(req);
        let (release_req_tx, release_req_rx) = bounded::<SessionId>(evq);
        let (released_tx, released_rx) = bounded::<SessionId>(evq);
        let state: SessionStateTable = SessionStateTable::new(
            sessions,
            tx_app_req_rx,
            tx_app_rsp_tx,
            stream_req_rx,
            stream_rsp_tx,
            rx_state_req_rx,
            rx_state_rsp_tx,
            release_req_rx,
            released_tx,
        );

        // Tx window table.
        let (window_req_tx, window_req_rx) = bounded::<TxQuery>(req);
        let (window_rsp_tx, window_rsp_rx) = bounded::<TxWindowView>(req);
        let (app_push_tx, app_push_rx) = bounded::<AppPush>(req);
        let (ack_update_tx, ack_update_rx) = bounded::<AckUpdate>(req);
        let (ack_notify_tx, ack_notify_rx) = bounded::<AckNotification>(evq);
        let tx_window: TxWindowTable = TxWindowTable::new(
            sessions,
            config.mss,
            window_req_rx,
            window_rsp_tx,
            app_push_rx,
            ack_update_rx,
            ack_notify_tx,
        );

        // Rx window table.
        let (rx_view_req_tx, rx_view_req_rx) = bounded::<SessionId>(req);
        let (rx_view_rsp_tx, rx_view_rsp_rx) = bounded::<RxView>(req);
        let (cursor_req_tx, cursor_req_rx) = bounded::<AppRequest>(req);
        let (cursor_rsp_tx, cursor_rsp_rx) = bounded::<AppCursor>(req);
        let (segment_update_tx, segment_update_rx) = bounded::<SegmentUpdate>(req);
        let rx_window: RxWindowTable = RxWindowTable::new(
            sessions,
            rx_view_req_rx,
            rx_view_rsp_tx,
            cursor_req_rx,
            cursor_rsp_tx,
            segment_update_rx,
        );

        // Retransmission timer.
        let (timer_cmd_tx, timer_cmd_rx) = bounded::<TimerCommand>(req);
        let (timer_arm_tx, timer_arm_rx) = bounded::<TimerArm>(req);
        let (timer_events_tx, timer_events_rx) = bounded::<Event>(evq);
        let (open_notify_tx, open_notify_rx) = bounded::<OpenNotification>(evq);
        let (data_notify_tx, data_notify_rx) = bounded::<RxAppNotification>(evq);
        let retransmitter: RetransmitTimer = RetransmitTimer::new(
            sessions,
            config.retransmit_base_ticks,
            timer_cmd_rx,
            timer_arm_rx,
            timer_events_tx,
            release_req_tx.clone(),
            open_notify_tx,
            data_notify_tx,
        );

        // Close timer.
        let (time_wait_arm_tx, time_wait_arm_rx) = bounded::<SessionId>(req);
        let time_wait: CloseTimer =
            CloseTimer::new(sessions, config.time_wait_ticks, time_wait_arm_rx, release_req_tx);

        // Event arbiter and ACK delayer.
        let (rx_events_tx, rx_events_rx) = bounded::<Event>(evq);
        let (app_events_tx, app_events_rx) = bounded::<Event>(evq);
        let (merged_tx, merged_rx) = bounded::<Event>(evq);
        let (out_events_tx, out_events_rx) = bounded::<Event>(evq);
        let (delayer_received_tx, delayer_received_rx) = bounded::<()>(sig);
        let (delayer_forwarded_tx, delayer_forwarded_rx) = bounded::<()>(sig);
        let (engine_received_tx, engine_received_rx) = bounded::<()>(sig);
        let arbiter: EventArbiter = EventArbiter::new(
            rx_events_rx,
            timer_events_rx,
            app_events_rx,
            merged_tx,
            delayer_received_rx,
            delayer_forwarded_rx,
            engine_received_rx,
        );
        let ack_delayer: AckDelayer = AckDelayer::new(
            sessions,
            config.ack_delay_ticks,
            merged_rx,
            out_events_tx,
            delayer_received_tx,
            delayer_forwarded_tx,
        );

        let plane: ControlPlane = ControlPlane {
            state,
            tx_window,
            rx_window,
            retransmitter,
            time_wait,
            arbiter,
            ack_delayer,
        };
        let handles: Handles = Handles {
            rx_path: RxPathHandle {
                state_req: rx_state_req_tx,
                state_rsp: rx_state_rsp_rx,
                ack_update: ack_update_tx,
                segment_update: segment_update_tx,
                timer_cmd: timer_cmd_tx,
                time_wait_arm: time_wait_arm_tx,
                events: rx_events_tx,
            },
            tx_app: TxAppHandle {
                state_req: tx_app_req_tx,
                state_rsp: tx_app_rsp_rx,
                stream_req: stream_req_tx,
                stream_rsp: stream_rsp_rx,
                app_push: app_push_tx,
                cursor_req: cursor_req_tx,
                cursor_rsp: cursor_rsp_rx,
                events: app_events_tx,
                ack_notify: ack_notify_rx,
                open_notify: open_notify_rx,
            },
            tx_engine: TxEngineHandle {
                window_req: window_req_tx,
                window_rsp: window_rsp_rx,
                rx_view_req: rx_view_req_tx,
                rx_view_rsp: rx_view_rsp_rx,
                events: out_events_rx,
                received: engine_received_tx,
                timer_arm: timer_arm_tx,
            },
            rx_app: RxAppHandle { notify: data_notify_rx },
            allocator: AllocatorHandle { released: released_rx },
        };
        (plane, handles)
    }

    /// Runs one scheduling quantum: every component services at most one unit of work. Returns whether anything
    /// happened.
    pub fn step(&mut self) -> bool {
        let mut busy: bool = self.state.step();
        busy |= self.tx_window.step();
        busy |= self.rx_window.step();
        busy |= self.retransmitter.step();
        busy |= self.time_wait.step();
        busy |= self.arbiter.step();
        busy |= self.ack_delayer.step();
        busy
    }

    /// Runs a fixed number of scheduling quanta.
    pub fn run(&mut self, quanta: usize) {
        for _ in 0..quanta {
            self.step();
        }
    }
}
