//! # Event Dispatcher
//!
//! Fans change events and status updates out to listeners, then signals the
//! downstream cache.
//!
//! Delivery is best-effort: every listener runs in isolation, so a panicking
//! listener is logged and counted but never stops its siblings or the
//! invalidation callback.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::warn;

use super::channel::{ChannelId, Listener, StatusUpdate};
use super::event::ChangeEvent;
use crate::observability::{Event, RealtimeMetrics};

/// Resource-keyed cache invalidation signal, supplied once at construction
pub type InvalidateCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Result of one fan-out
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchResult {
    /// Listeners that returned normally
    pub delivered: usize,
    /// Listeners that panicked
    pub failed: usize,
    /// Whether the invalidation callback completed
    pub invalidated: bool,
}

/// Routes events to listeners and the invalidation callback
pub struct EventDispatcher {
    on_invalidate: InvalidateCallback,
    metrics: Arc<RealtimeMetrics>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher").finish_non_exhaustive()
    }
}

impl EventDispatcher {
    pub fn new(on_invalidate: InvalidateCallback, metrics: Arc<RealtimeMetrics>) -> Self {
        Self {
            on_invalidate,
            metrics,
        }
    }

    /// Deliver `event` to every active listener in order, then invalidate
    /// the event's resource once.
    pub(crate) fn dispatch(
        &self,
        channel: ChannelId,
        listeners: &[Listener],
        event: &ChangeEvent,
    ) -> DispatchResult {
        self.metrics.increment_events_dispatched();

        let mut result = DispatchResult::default();
        for listener in listeners {
            // Unsubscribed after the snapshot was taken
            if !listener.is_active() {
                continue;
            }

            let on_change = &listener.on_change;
            match panic::catch_unwind(AssertUnwindSafe(|| on_change(event))) {
                Ok(()) => result.delivered += 1,
                Err(payload) => {
                    result.failed += 1;
                    warn!(
                        event = %Event::ListenerPanicked,
                        %channel,
                        subscription = %listener.subscription,
                        resource = %event.resource,
                        kind = %event.kind,
                        reason = panic_message(payload.as_ref()),
                        "change listener panicked"
                    );
                }
            }
        }

        self.metrics.add_deliveries(result.delivered as u64, result.failed as u64);
        result.invalidated = self.invalidate(&event.resource);
        result
    }

    /// Deliver a status update to every active listener in order
    pub(crate) fn notify_status(
        &self,
        listeners: &[Listener],
        update: &StatusUpdate,
    ) -> DispatchResult {
        let mut result = DispatchResult::default();
        for listener in listeners {
            if !listener.is_active() {
                continue;
            }

            let on_status = &listener.on_status;
            match panic::catch_unwind(AssertUnwindSafe(|| on_status(update))) {
                Ok(()) => result.delivered += 1,
                Err(payload) => {
                    result.failed += 1;
                    warn!(
                        event = %Event::ListenerPanicked,
                        channel = %update.channel,
                        subscription = %listener.subscription,
                        status = %update.status,
                        reason = panic_message(payload.as_ref()),
                        "status listener panicked"
                    );
                }
            }
        }

        self.metrics.add_deliveries(0, result.failed as u64);
        result
    }

    /// Tell the cache that data for `resource` may be stale.
    ///
    /// Returns false if the callback panicked.
    pub fn invalidate(&self, resource: &str) -> bool {
        let on_invalidate = &self.on_invalidate;
        match panic::catch_unwind(AssertUnwindSafe(|| on_invalidate(resource))) {
            Ok(()) => {
                self.metrics.increment_invalidations();
                true
            }
            Err(payload) => {
                warn!(
                    event = %Event::InvalidationPanicked,
                    resource,
                    reason = panic_message(payload.as_ref()),
                    "invalidation callback panicked"
                );
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::channel::{ChannelStatus, SubscriptionId};
    use crate::realtime::descriptor::SubscriptionDescriptor;
    use serde_json::json;
    use std::sync::Mutex;

    fn listener(on_change: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> Listener {
        Listener::new(
            SubscriptionId::new(),
            Arc::new(on_change),
            Arc::new(|_: &StatusUpdate| {}),
        )
    }

    fn recorder() -> (InvalidateCallback, Arc<Mutex<Vec<String>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: InvalidateCallback = Arc::new(move |resource: &str| {
            sink.lock().unwrap().push(resource.to_string());
        });
        (callback, seen)
    }

    #[test]
    fn test_dispatch_in_registration_order() {
        let (on_invalidate, invalidated) = recorder();
        let dispatcher = EventDispatcher::new(on_invalidate, Arc::new(RealtimeMetrics::new()));

        let order = Arc::new(Mutex::new(Vec::new()));
        let listeners: Vec<Listener> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                listener(move |_: &ChangeEvent| order.lock().unwrap().push(i))
            })
            .collect();

        let event = ChangeEvent::insert("bookings", json!({"id": 1}));
        let result = dispatcher.dispatch(ChannelId(1), &listeners, &event);

        assert_eq!(result.delivered, 3);
        assert!(result.invalidated);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(*invalidated.lock().unwrap(), vec!["bookings".to_string()]);
    }

    #[test]
    fn test_panicking_listener_is_isolated() {
        let (on_invalidate, invalidated) = recorder();
        let metrics = Arc::new(RealtimeMetrics::new());
        let dispatcher = EventDispatcher::new(on_invalidate, Arc::clone(&metrics));

        let received = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&received);
        let listeners = vec![
            listener(|_: &ChangeEvent| panic!("listener bug")),
            listener(move |_: &ChangeEvent| *counter.lock().unwrap() += 1),
        ];

        let event = ChangeEvent::insert("payments", json!({"id": 7}));
        let result = dispatcher.dispatch(ChannelId(2), &listeners, &event);

        assert_eq!(result.delivered, 1);
        assert_eq!(result.failed, 1);
        assert!(result.invalidated);
        assert_eq!(*received.lock().unwrap(), 1);
        assert_eq!(invalidated.lock().unwrap().len(), 1);
        assert_eq!(metrics.snapshot().listener_failures, 1);
    }

    #[test]
    fn test_inactive_listener_skipped() {
        let (on_invalidate, _) = recorder();
        let dispatcher = EventDispatcher::new(on_invalidate, Arc::new(RealtimeMetrics::new()));

        let called = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&called);
        let l = listener(move |_: &ChangeEvent| *flag.lock().unwrap() = true);
        l.deactivate();

        let result = dispatcher.dispatch(
            ChannelId(1),
            &[l],
            &ChangeEvent::delete("bookings", json!({"id": 1})),
        );

        assert_eq!(result.delivered, 0);
        assert!(!*called.lock().unwrap());
    }

    #[test]
    fn test_panicking_invalidation_is_contained() {
        let dispatcher = EventDispatcher::new(
            Arc::new(|_: &str| panic!("cache gone")),
            Arc::new(RealtimeMetrics::new()),
        );

        let result = dispatcher.dispatch(
            ChannelId(1),
            &[listener(|_: &ChangeEvent| {})],
            &ChangeEvent::insert("bookings", json!({})),
        );

        assert_eq!(result.delivered, 1);
        assert!(!result.invalidated);
    }

    #[test]
    fn test_status_listener_isolation() {
        let (on_invalidate, invalidated) = recorder();
        let dispatcher = EventDispatcher::new(on_invalidate, Arc::new(RealtimeMetrics::new()));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let listeners = vec![
            Listener::new(
                SubscriptionId::new(),
                Arc::new(|_: &ChangeEvent| {}),
                Arc::new(|_: &StatusUpdate| panic!("ui bug")),
            ),
            Listener::new(
                SubscriptionId::new(),
                Arc::new(|_: &ChangeEvent| {}),
                Arc::new(move |u: &StatusUpdate| sink.lock().unwrap().push(u.status)),
            ),
        ];

        let update = StatusUpdate {
            channel: ChannelId(1),
            descriptor: SubscriptionDescriptor::new("bookings"),
            status: ChannelStatus::Subscribed,
            error: None,
        };
        let result = dispatcher.notify_status(&listeners, &update);

        assert_eq!(result.delivered, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(*seen.lock().unwrap(), vec![ChannelStatus::Subscribed]);
        assert!(invalidated.lock().unwrap().is_empty());
    }
}
