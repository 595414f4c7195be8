// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

// Delays and coalesces pure acknowledgments ("Ack Delayer").
//
// A lone ACK is held back for a short coalescing window so that a burst of acknowledgment-only events for the same
// session collapses into a single outgoing ACK. Anything that carries data or a control flag inherently also
// acknowledges, so it flushes the window and passes through untouched. Each step services one pending event, or when
// none is waiting, one visit of the countdown sweep.

use crate::ctrl::{
    arbiter::push_signal,
    event::{
        Event,
        EventKind,
    },
    table_index,
    SessionId,
};
use ::crossbeam_channel::{
    Receiver,
    Sender,
};

pub struct AckDelayer {
    /// Per-session coalescing countdown; zero means no delayed ACK pending.
    countdown: Vec<u16>,
    /// Round-robin sweep position.
    sweep: usize,
    delay_ticks: u16,

    events: Receiver<Event>,
    out: Sender<Event>,

    // Credit confirmations toward the arbiter.
    received: Sender<()>,
    forwarded: Sender<()>,
}

impl AckDelayer {
    pub fn new(
        max_sessions: u16,
        delay_ticks: u16,
        events: Receiver<Event>,
        out: Sender<Event>,
        received: Sender<()>,
        forwarded: Sender<()>,
    ) -> Self {
        Self {
            countdown: vec![0; max_sessions as usize],
            sweep: 0,
            // A zero-length window still needs one sweep visit to fire.
            delay_ticks: delay_ticks.max(1),
            events,
            out,
            received,
            forwarded,
        }
    }

    /// Processes one pending event, or failing that, one sweep visit.
    pub fn step(&mut self) -> bool {
        if !self.out.is_full() {
            if let Ok(event) = self.events.try_recv() {
                self.service(event);
                return true;
            }
        }
        self.visit()
    }

    fn service(&mut self, event: Event) {
        push_signal(&self.received);
        let index: usize = table_index(event.session, self.countdown.len());
        if event.kind.is_pure_ack() {
            if self.countdown[index] == 0 {
                trace!("service(): session {} opening coalescing window", event.session);
                self.countdown[index] = self.delay_ticks;
            }
            // A window is already running: the eventual coalesced ACK subsumes this one.
        } else {
            // This event acknowledges on its own; a separately delayed ACK would be redundant.
            self.countdown[index] = 0;
            trace!("service(): pass-through {:?}", event);
            if self.out.try_send(event).is_err() {
                warn!("service(): event receiver is gone");
            }
            push_signal(&self.forwarded);
        }
    }

    /// Advances the sweep one slot and decrements its countdown; a countdown reaching zero fires the coalesced ACK.
    fn visit(&mut self) -> bool {
        self.sweep = (self.sweep + 1) % self.countdown.len();
        let remaining: u16 = self.countdown[self.sweep];
        if remaining == 0 {
            return false;
        }
        if remaining > 1 {
            self.countdown[self.sweep] = remaining - 1;
            return true;
        }
        // Hold the countdown at one while the output is congested; the fire retries on the next visit.
        if self.out.is_full() {
            return false;
        }
        self.countdown[self.sweep] = 0;
        let session: SessionId = SessionId::new(self.sweep as u16);
        let ack: Event = Event::new(EventKind::Ack, session);
        trace!("visit(): session {} coalesced ACK", session);
        if self.out.try_send(ack).is_err() {
            warn!("visit(): event receiver is gone");
        }
        push_signal(&self.forwarded);
        true
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::AckDelayer;
    use crate::ctrl::{
        event::{
            Event,
            EventKind,
        },
        SessionId,
    };
    use ::anyhow::Result;
    use ::crossbeam_channel::{
        Receiver,
        Sender,
    };

    struct Harness {
        events: Sender<Event>,
        out: Receiver<Event>,
        received: Receiver<()>,
        forwarded: Receiver<()>,
    }

    fn delayer(max_sessions: u16, delay_ticks: u16) -> (AckDelayer, Harness) {
        let (events_tx, events_rx) = crossbeam_channel::bounded(16);
        let (out_tx, out_rx) = crossbeam_channel::bounded(16);
        let (received_tx, received_rx) = crossbeam_channel::bounded(64);
        let (forwarded_tx, forwarded_rx) = crossbeam_channel::bounded(64);
        let delayer: AckDelayer =
            AckDelayer::new(max_sessions, delay_ticks, events_rx, out_tx, received_tx, forwarded_tx);
        let harness: Harness = Harness {
            events: events_tx,
            out: out_rx,
            received: received_rx,
            forwarded: forwarded_rx,
        };
        (delayer, harness)
    }

    fn event(kind: EventKind, id: u16) -> Event {
        Event::new(kind, SessionId::new(id))
    }

    /// Two back-to-back pure ACKs for one session coalesce into a single outgoing ACK.
    #[test]
    fn pure_acks_coalesce() -> Result<()> {
        let (mut delayer, h) = delayer(4, 3);

        h.events.send(event(EventKind::Ack, 1))?;
        h.events.send(event(EventKind::Ack, 1))?;
        crate::ensure_eq!(delayer.step(), true);
        crate::ensure_eq!(delayer.step(), true);
        crate::ensure_eq!(h.received.len(), 2);
        crate::ensure_eq!(h.out.is_empty(), true);

        // Sweep until the window expires; exactly one ACK comes out.
        for _ in 0..16 {
            delayer.step();
        }
        crate::ensure_eq!(h.out.try_recv()?, event(EventKind::Ack, 1));
        crate::ensure_eq!(h.out.is_empty(), true);
        crate::ensure_eq!(h.forwarded.len(), 1);

        Ok(())
    }

    /// A data event flushes the pending window and passes through immediately; no late ACK follows.
    #[test]
    fn data_event_subsumes_pending_ack() -> Result<()> {
        let (mut delayer, h) = delayer(4, 3);

        h.events.send(event(EventKind::Ack, 2))?;
        crate::ensure_eq!(delayer.step(), true);
        crate::ensure_eq!(h.out.is_empty(), true);

        h.events.send(event(EventKind::Tx, 2))?;
        crate::ensure_eq!(delayer.step(), true);
        crate::ensure_eq!(h.out.try_recv()?, event(EventKind::Tx, 2));

        for _ in 0..32 {
            delayer.step();
        }
        crate::ensure_eq!(h.out.is_empty(), true);

        Ok(())
    }

    /// An undelayable ACK is never held back.
    #[test]
    fn nodelay_ack_passes_through() -> Result<()> {
        let (mut delayer, h) = delayer(4, 3);

        h.events.send(event(EventKind::AckNodelay, 3))?;
        crate::ensure_eq!(delayer.step(), true);
        crate::ensure_eq!(h.out.try_recv()?, event(EventKind::AckNodelay, 3));

        Ok(())
    }

    /// Windows for different sessions run independently.
    #[test]
    fn sessions_do_not_share_windows() -> Result<()> {
        let (mut delayer, h) = delayer(4, 2);

        h.events.send(event(EventKind::Ack, 0))?;
        h.events.send(event(EventKind::Ack, 3))?;
        crate::ensure_eq!(delayer.step(), true);
        crate::ensure_eq!(delayer.step(), true);

        let mut fired: Vec<Event> = Vec::new();
        for _ in 0..24 {
            delayer.step();
            while let Ok(event) = h.out.try_recv() {
                fired.push(event);
            }
        }
        crate::ensure_eq!(fired.len(), 2);
        crate::ensure_eq!(fired.contains(&event(EventKind::Ack, 0)), true);
        crate::ensure_eq!(fired.contains(&event(EventKind::Ack, 3)), true);

        Ok(())
    }
}
