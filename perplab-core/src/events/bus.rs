//! Synchronous event bus.
//!
//! The bus stores handler *keys* rather than callbacks. The owner of the components
//! implements [`Dispatch`] and maps each key back to a component, so a handler can
//! publish further events with full mutable access to the kernel. Publishing is
//! depth-first: a nested `publish` runs to completion before the outer handler loop
//! moves on.

use super::{Event, EventKind};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Stopped,
    Started,
}

#[derive(Debug, Clone)]
pub struct EventBus<H> {
    state: BusState,
    handlers: BTreeMap<EventKind, Vec<H>>,
    general: Vec<H>,
    history: VecDeque<Event>,
    history_limit: Option<usize>,
    published: u64,
}

impl<H: Copy + PartialEq + fmt::Debug> Default for EventBus<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Copy + PartialEq + fmt::Debug> EventBus<H> {
    /// An unbounded-history bus in the `Stopped` state.
    pub fn new() -> Self {
        Self {
            state: BusState::Stopped,
            handlers: BTreeMap::new(),
            general: Vec::new(),
            history: VecDeque::new(),
            history_limit: None,
            published: 0,
        }
    }

    /// Keep only the most recent `limit` events in the history log.
    pub fn with_history_limit(mut self, limit: Option<usize>) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn start(&mut self) {
        self.state = BusState::Started;
    }

    pub fn stop(&mut self) {
        self.state = BusState::Stopped;
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn is_started(&self) -> bool {
        self.state == BusState::Started
    }

    /// Register `handler` for `kind`. Returns false if it was already registered.
    pub fn register(&mut self, kind: EventKind, handler: H) -> bool {
        let list = self.handlers.entry(kind).or_default();
        if list.contains(&handler) {
            return false;
        }
        list.push(handler);
        true
    }

    /// Remove `handler` from `kind`. Returns false if it was not registered.
    pub fn unregister(&mut self, kind: EventKind, handler: H) -> bool {
        let Some(list) = self.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|h| *h != handler);
        let removed = list.len() != before;
        if list.is_empty() {
            self.handlers.remove(&kind);
        }
        removed
    }

    /// Register a handler that fires on every event, after the kind handlers.
    pub fn register_general(&mut self, handler: H) -> bool {
        if self.general.contains(&handler) {
            return false;
        }
        self.general.push(handler);
        true
    }

    pub fn unregister_general(&mut self, handler: H) -> bool {
        let before = self.general.len();
        self.general.retain(|h| *h != handler);
        self.general.len() != before
    }

    pub fn handlers(&self, kind: EventKind) -> &[H] {
        self.handlers.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn general_handlers(&self) -> &[H] {
        &self.general
    }

    /// Record `event` and return the handlers to invoke, in order.
    ///
    /// Returns `None` while the bus is stopped; the event is then neither
    /// recorded nor dispatched.
    pub fn route(&mut self, event: &Event) -> Option<Vec<H>> {
        if !self.is_started() {
            return None;
        }
        self.published += 1;
        if self.history_limit != Some(0) {
            self.history.push_back(event.clone());
            if let Some(limit) = self.history_limit {
                while self.history.len() > limit {
                    self.history.pop_front();
                }
            }
        }
        let mut route: Vec<H> = self.handlers(event.kind()).to_vec();
        route.extend(self.general.iter().copied());
        Some(route)
    }

    pub fn history(&self) -> impl Iterator<Item = &Event> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Total events accepted since construction, including ones trimmed from history.
    pub fn published(&self) -> u64 {
        self.published
    }
}

/// Owner of an [`EventBus`] that knows how to deliver an event to a handler key.
pub trait Dispatch {
    type Handler: Copy + PartialEq + fmt::Debug;

    fn bus_mut(&mut self) -> &mut EventBus<Self::Handler>;

    fn dispatch(&mut self, handler: Self::Handler, event: &Event);

    /// Record the event and run every handler for it before returning.
    fn publish(&mut self, event: Event) {
        let Some(route) = self.bus_mut().route(&event) else {
            return;
        };
        for handler in route {
            self.dispatch(handler, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::StopReason;

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum TestHandler {
        A,
        B,
        Echo,
        Watcher,
    }

    struct Harness {
        bus: EventBus<TestHandler>,
        calls: Vec<(TestHandler, EventKind)>,
    }

    impl Harness {
        fn new() -> Self {
            let mut bus = EventBus::new();
            bus.start();
            Self {
                bus,
                calls: Vec::new(),
            }
        }
    }

    impl Dispatch for Harness {
        type Handler = TestHandler;

        fn bus_mut(&mut self) -> &mut EventBus<TestHandler> {
            &mut self.bus
        }

        fn dispatch(&mut self, handler: TestHandler, event: &Event) {
            self.calls.push((handler, event.kind()));
            // Echo turns a Start into a nested Stop.
            if handler == TestHandler::Echo && event.kind() == EventKind::Start {
                self.publish(stop());
            }
        }
    }

    fn start() -> Event {
        Event::Start { timestamp: None }
    }

    fn stop() -> Event {
        Event::Stop {
            timestamp: None,
            reason: StopReason::AllStreamsExhausted,
        }
    }

    #[test]
    fn handlers_run_in_registration_order_then_general() {
        let mut h = Harness::new();
        h.bus.register_general(TestHandler::Watcher);
        h.bus.register(EventKind::Start, TestHandler::B);
        h.bus.register(EventKind::Start, TestHandler::A);
        h.publish(start());
        assert_eq!(
            h.calls,
            vec![
                (TestHandler::B, EventKind::Start),
                (TestHandler::A, EventKind::Start),
                (TestHandler::Watcher, EventKind::Start),
            ]
        );
    }

    #[test]
    fn registration_is_idempotent() {
        let mut h = Harness::new();
        assert!(h.bus.register(EventKind::Start, TestHandler::A));
        assert!(!h.bus.register(EventKind::Start, TestHandler::A));
        assert!(!h.bus.register(EventKind::Start, TestHandler::A));
        h.publish(start());
        assert_eq!(h.calls.len(), 1);
    }

    #[test]
    fn unregister_drops_empty_kind() {
        let mut h = Harness::new();
        h.bus.register(EventKind::Stop, TestHandler::A);
        assert!(h.bus.unregister(EventKind::Stop, TestHandler::A));
        assert!(!h.bus.unregister(EventKind::Stop, TestHandler::A));
        assert!(h.bus.handlers(EventKind::Stop).is_empty());
        h.bus.register_general(TestHandler::Watcher);
        assert!(h.bus.unregister_general(TestHandler::Watcher));
        h.publish(stop());
        assert!(h.calls.is_empty());
    }

    #[test]
    fn publish_while_stopped_is_a_no_op() {
        let mut h = Harness::new();
        h.bus.register(EventKind::Start, TestHandler::A);
        h.bus.stop();
        h.publish(start());
        assert!(h.calls.is_empty());
        assert_eq!(h.bus.history_len(), 0);
        assert_eq!(h.bus.published(), 0);
    }

    #[test]
    fn nested_publish_is_depth_first() {
        let mut h = Harness::new();
        h.bus.register(EventKind::Start, TestHandler::Echo);
        h.bus.register(EventKind::Start, TestHandler::A);
        h.bus.register(EventKind::Stop, TestHandler::B);
        h.publish(start());
        // The nested Stop is fully handled before A sees the Start.
        assert_eq!(
            h.calls,
            vec![
                (TestHandler::Echo, EventKind::Start),
                (TestHandler::B, EventKind::Stop),
                (TestHandler::A, EventKind::Start),
            ]
        );
        let kinds: Vec<EventKind> = h.bus.history().map(Event::kind).collect();
        assert_eq!(kinds, vec![EventKind::Start, EventKind::Stop]);
    }

    #[test]
    fn history_limit_keeps_latest_events() {
        let mut bus: EventBus<TestHandler> = EventBus::new().with_history_limit(Some(2));
        bus.start();
        bus.route(&start());
        bus.route(&stop());
        bus.route(&start());
        assert_eq!(bus.history_len(), 2);
        assert_eq!(bus.published(), 3);
        let kinds: Vec<EventKind> = bus.history().map(Event::kind).collect();
        assert_eq!(kinds, vec![EventKind::Stop, EventKind::Start]);
    }
}
