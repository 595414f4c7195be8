// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Merges the three event sources into one ordered stream toward the ACK delayer.
//
// Rx-path events always win and are bounded only by output capacity. Tx-application and timer events are held back by
// an end-to-end credit check: everything this arbiter has forwarded must have been received by the delayer, and
// everything the delayer has forwarded must have been received by the transmit engine. Counting confirmations instead
// of inspecting queue depths keeps the downstream stages free to buffer however they like.

use crate::ctrl::event::Event;
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

pub struct EventArbiter {
    rx_events: Receiver<Event>,
    timer_events: Receiver<Event>,
    app_events: Receiver<Event>,
    out: Sender<Event>,

    // Confirmation streams from the downstream stages.
    delayer_received: Receiver<()>,
    delayer_forwarded: Receiver<()>,
    engine_received: Receiver<()>,

    forwarded_count: u64,
    delayer_received_count: u64,
    delayer_forwarded_count: u64,
    engine_received_count: u64,
}

impl EventArbiter {
    pub fn new(
        rx_events: Receiver<Event>,
        timer_events: Receiver<Event>,
        app_events: Receiver<Event>,
        out: Sender<Event>,
        delayer_received: Receiver<()>,
        delayer_forwarded: Receiver<()>,
        engine_received: Receiver<()>,
    ) -> Self {
        Self {
            rx_events,
            timer_events,
            app_events,
            out,
            delayer_received,
            delayer_forwarded,
            engine_received,
            forwarded_count: 0,
            delayer_received_count: 0,
            delayer_forwarded_count: 0,
            engine_received_count: 0,
        }
    }

    /// Forwards at most one event. Draining the confirmation streams is bookkeeping and does not count as work.
    pub fn step(&mut self) -> bool {
        self.drain_confirmations();

        if self.out.is_full() {
            return false;
        }

        if let Ok(event) = self.rx_events.try_recv() {
            return self.forward(event);
        }

        if self.credit_available() {
            // Retransmissions and probes beat application-originated traffic.
            if let Ok(event) = self.timer_events.try_recv() {
                return self.forward(event);
            }
            if let Ok(event) = self.app_events.try_recv() {
                return self.forward(event);
            }
        }

        false
    }

    /// The pipeline is drained end to end: safe to admit traffic that cannot be dropped downstream.
    fn credit_available(&self) -> bool {
        self.forwarded_count == self.delayer_received_count
            && self.delayer_forwarded_count == self.engine_received_count
    }

    fn drain_confirmations(&mut self) {
        while self.delayer_received.try_recv().is_ok() {
            self.delayer_received_count += 1;
        }
        while self.delayer_forwarded.try_recv().is_ok() {
            self.delayer_forwarded_count += 1;
        }
        while self.engine_received.try_recv().is_ok() {
            self.engine_received_count += 1;
        }
    }

    fn forward(&mut self, event: Event) -> bool {
        trace!("forward(): {:?}", event);
        if self.out.try_send(event).is_err() {
            warn!("forward(): event receiver is gone");
        }
        self.forwarded_count += 1;
        true
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Raises one credit confirmation. The confirmation queues are drained every arbiter step, so a full queue means the
/// arbiter is gone and the signal is moot.
pub(crate) fn push_signal(signal: &Sender<()>) {
    if signal.try_send(()).is_err() {
        warn!("push_signal(): confirmation receiver is gone or full");
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================
