//! Subscriber registry and pending-event buffer.
//!
//! Owned by the connection worker; every mutation and every dispatch runs on
//! that single task, so iteration order is stable against subscribe and
//! unsubscribe calls made from inside a handler (those arrive as commands
//! and apply after the current dispatch pass).

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::realtime::client::EventHandler;

const FRAME_SNIPPET_LEN: usize = 120;

struct SubscriberEntry {
    /// Subscription ids aliasing this handler; the first is the original
    /// registration, the rest come from idempotent re-subscribes.
    ids: Vec<u64>,
    handler: EventHandler,
}

pub(crate) struct Dispatcher {
    subscribers: Vec<SubscriberEntry>,
    pending: VecDeque<Value>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self {
            subscribers: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    /// Registers a handler and drains any pending events to it, in arrival
    /// order. Re-registering an already-known handler aliases the existing
    /// entry instead of delivering twice.
    pub(crate) fn subscribe(&mut self, id: u64, handler: EventHandler) {
        if let Some(existing) = self
            .subscribers
            .iter_mut()
            .find(|entry| Arc::ptr_eq(&entry.handler, &handler))
        {
            existing.ids.push(id);
            return;
        }

        self.subscribers.push(SubscriberEntry {
            ids: vec![id],
            handler: handler.clone(),
        });

        if self.pending.is_empty() {
            return;
        }
        let drained: Vec<Value> = self.pending.drain(..).collect();
        debug!(event = "realtime_pending_drained", count = drained.len());
        for event in drained {
            invoke(&handler, event);
        }
    }

    /// Removes the subscriber owning `id`. Unknown ids are ignored. A
    /// handler registered under several aliased ids is removed entirely.
    pub(crate) fn unsubscribe(&mut self, id: u64) {
        if let Some(index) = self
            .subscribers
            .iter()
            .position(|entry| entry.ids.contains(&id))
        {
            self.subscribers.remove(index);
        }
    }

    /// Decodes one inbound text frame and dispatches it. Undecodable frames
    /// are reported and dropped.
    pub(crate) fn dispatch_frame(&mut self, frame: &str) {
        match serde_json::from_str::<Value>(frame) {
            Ok(event) => self.dispatch(event),
            Err(err) => warn!(
                event = "realtime_decode_failed",
                error = %err,
                frame = %frame_snippet(frame)
            ),
        }
    }

    /// Delivers a decoded event to every subscriber in registration order,
    /// or buffers it when none are registered.
    pub(crate) fn dispatch(&mut self, event: Value) {
        if self.subscribers.is_empty() {
            self.pending.push_back(event);
            debug!(event = "realtime_event_buffered", pending = self.pending.len());
            return;
        }
        for entry in &self.subscribers {
            invoke(&entry.handler, event.clone());
        }
    }
}

fn invoke(handler: &EventHandler, event: Value) {
    if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
        warn!(event = "realtime_subscriber_panicked");
    }
}

fn frame_snippet(frame: &str) -> String {
    frame.chars().take(FRAME_SNIPPET_LEN).collect()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use serde_json::{json, Value};

    use super::Dispatcher;
    use crate::realtime::client::EventHandler;

    fn recorder() -> (EventHandler, Arc<Mutex<Vec<Value>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: EventHandler = Arc::new(move |event| {
            sink.lock().expect("recorder lock").push(event);
        });
        (handler, seen)
    }

    fn seen(log: &Arc<Mutex<Vec<Value>>>) -> Vec<Value> {
        log.lock().expect("recorder lock").clone()
    }

    #[test]
    fn events_without_subscribers_drain_to_first_subscriber_in_order() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(json!({"seq": 1}));
        dispatcher.dispatch(json!({"seq": 2}));
        dispatcher.dispatch(json!({"seq": 3}));

        let (handler, log) = recorder();
        dispatcher.subscribe(1, handler);

        assert_eq!(
            seen(&log),
            vec![json!({"seq": 1}), json!({"seq": 2}), json!({"seq": 3})]
        );
    }

    #[test]
    fn drained_events_are_not_replayed_to_later_subscribers() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(json!({"seq": 1}));

        let (first, first_log) = recorder();
        dispatcher.subscribe(1, first);

        let (second, second_log) = recorder();
        dispatcher.subscribe(2, second);

        dispatcher.dispatch(json!({"seq": 2}));

        assert_eq!(seen(&first_log), vec![json!({"seq": 1}), json!({"seq": 2})]);
        assert_eq!(seen(&second_log), vec![json!({"seq": 2})]);
    }

    #[test]
    fn buffer_refills_after_all_subscribers_leave() {
        let mut dispatcher = Dispatcher::new();

        let (first, first_log) = recorder();
        dispatcher.subscribe(1, first);
        dispatcher.dispatch(json!({"seq": 1}));
        dispatcher.unsubscribe(1);

        dispatcher.dispatch(json!({"seq": 2}));
        dispatcher.dispatch(json!({"seq": 3}));

        let (second, second_log) = recorder();
        dispatcher.subscribe(2, second);

        assert_eq!(seen(&first_log), vec![json!({"seq": 1})]);
        assert_eq!(seen(&second_log), vec![json!({"seq": 2}), json!({"seq": 3})]);
    }

    #[test]
    fn fan_out_preserves_registration_order_per_event() {
        let mut dispatcher = Dispatcher::new();
        let log: Arc<Mutex<Vec<(&'static str, Value)>>> = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let sink = Arc::clone(&log);
            dispatcher.subscribe(
                if tag == "a" { 1 } else { 2 },
                Arc::new(move |event| {
                    sink.lock().expect("log lock").push((tag, event));
                }),
            );
        }

        dispatcher.dispatch(json!(1));
        dispatcher.dispatch(json!(2));

        assert_eq!(
            *log.lock().expect("log lock"),
            vec![
                ("a", json!(1)),
                ("b", json!(1)),
                ("a", json!(2)),
                ("b", json!(2)),
            ]
        );
    }

    #[test]
    fn panicking_handler_does_not_block_siblings() {
        let mut dispatcher = Dispatcher::new();

        dispatcher.subscribe(1, Arc::new(|_| panic!("handler bug")));
        let (survivor, log) = recorder();
        dispatcher.subscribe(2, survivor);

        dispatcher.dispatch(json!({"seq": 1}));
        dispatcher.dispatch(json!({"seq": 2}));

        assert_eq!(seen(&log), vec![json!({"seq": 1}), json!({"seq": 2})]);
    }

    #[test]
    fn panicking_handler_does_not_poison_the_pending_drain() {
        let mut dispatcher = Dispatcher::new();
        dispatcher.dispatch(json!(1));
        dispatcher.dispatch(json!(2));

        dispatcher.subscribe(1, Arc::new(|_| panic!("handler bug")));

        // The drain completed despite the panics and the buffer is empty.
        let (late, log) = recorder();
        dispatcher.subscribe(2, late);
        assert!(seen(&log).is_empty());
    }

    #[test]
    fn resubscribing_the_same_handler_delivers_once() {
        let mut dispatcher = Dispatcher::new();
        let (handler, log) = recorder();

        dispatcher.subscribe(1, handler.clone());
        dispatcher.subscribe(2, handler.clone());
        dispatcher.dispatch(json!({"seq": 1}));

        assert_eq!(seen(&log), vec![json!({"seq": 1})]);

        // Either alias removes the handler entirely.
        dispatcher.unsubscribe(2);
        dispatcher.dispatch(json!({"seq": 2}));
        assert_eq!(seen(&log), vec![json!({"seq": 1})]);
    }

    #[test]
    fn unsubscribe_is_idempotent_and_ignores_unknown_ids() {
        let mut dispatcher = Dispatcher::new();
        let (handler, log) = recorder();
        dispatcher.subscribe(1, handler);

        dispatcher.unsubscribe(99);
        dispatcher.dispatch(json!(1));
        dispatcher.unsubscribe(1);
        dispatcher.unsubscribe(1);
        dispatcher.dispatch(json!(2));

        assert_eq!(seen(&log), vec![json!(1)]);
    }

    #[test]
    fn undecodable_frame_is_dropped_without_delivery_or_buffering() {
        let mut dispatcher = Dispatcher::new();

        dispatcher.dispatch_frame("{not json");
        let (handler, log) = recorder();
        dispatcher.subscribe(1, handler);
        assert!(seen(&log).is_empty());

        dispatcher.dispatch_frame("{broken again");
        dispatcher.dispatch_frame(r#"{"seq": 1}"#);
        assert_eq!(seen(&log), vec![json!({"seq": 1})]);
    }
}
