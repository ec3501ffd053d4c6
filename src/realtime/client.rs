//! # Realtime Client
//!
//! The one object applications talk to. It owns the registry, the health
//! aggregator, the reconnection controller and the dispatcher, and wires
//! transport callbacks into them.
//!
//! ## Locking
//!
//! All mutable state sits behind a single mutex. Every registry mutation is
//! one critical section, and no listener, invalidation callback or transport
//! method is ever invoked while the lock is held: work that must call out is
//! collected under the lock and performed after it is released. Callbacks may
//! therefore re-enter the client freely.
//!
//! Transport callbacks hold only a weak reference to the client and carry
//! the channel generation they were registered for, so callbacks from a
//! replaced or closed transport channel are ignored.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::channel::{
    ChangeListener, ChannelHandle, ChannelId, ChannelInfo, ChannelStatus, Listener,
    StatusListener, StatusUpdate, SubscriptionId, Transition,
};
use super::config::RealtimeConfig;
use super::descriptor::SubscriptionDescriptor;
use super::dispatcher::{EventDispatcher, InvalidateCallback};
use super::errors::{RealtimeError, RealtimeResult};
use super::event::ChangeEvent;
use super::health::{ConnectionHealthAggregator, HealthSnapshot};
use super::network::NetworkStatus;
use super::reconnect::{ForcePassReceiver, ReconnectState, ReconnectionController, RetryDecision};
use super::registry::{Acquired, Released, SubscriptionRegistry};
use super::transport::{RealtimeTransport, TransportChannel, TransportStatus};
use crate::observability::{Event, MetricsSnapshot, RealtimeMetrics};

const OFFLINE_ERROR: &str = "network offline";
const FORCED_ERROR: &str = "reconnect requested";

/// Realtime subscription manager.
///
/// Cheap to clone; clones share the same channels.
#[derive(Clone)]
pub struct RealtimeClient {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<State>,
    transport: Arc<dyn RealtimeTransport>,
    dispatcher: EventDispatcher,
    health: ConnectionHealthAggregator,
    config: RealtimeConfig,
    metrics: Arc<RealtimeMetrics>,
    /// Runtime the client was built on; transport callbacks may arrive on
    /// threads outside it
    runtime: Option<Handle>,
}

struct State {
    registry: SubscriptionRegistry,
    controller: ReconnectionController,
    disposed: bool,
    network_task: Option<JoinHandle<()>>,
}

/// A channel moved back to `Connecting`, waiting for its new transport
/// channel to be opened outside the lock
struct Resubscribe {
    channel: ChannelId,
    descriptor: SubscriptionDescriptor,
    generation: u64,
    stale: Option<Box<dyn TransportChannel>>,
    listeners: Vec<Listener>,
    update: StatusUpdate,
}

/// Listeners to notify about a status change, collected under the lock
struct Notify {
    listeners: Vec<Listener>,
    update: StatusUpdate,
}

enum ForcePass {
    Join(ForcePassReceiver),
    Lead(
        watch::Sender<Option<HealthSnapshot>>,
        Vec<(Option<Notify>, Resubscribe)>,
    ),
}

impl std::fmt::Debug for RealtimeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RealtimeClient")
            .field("channels", &state.registry.len())
            .field("online", &state.controller.is_online())
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl RealtimeClient {
    /// Create a client with the default configuration
    pub fn new(
        transport: Arc<dyn RealtimeTransport>,
        on_invalidate: impl Fn(&str) + Send + Sync + 'static,
    ) -> Self {
        Self::build(transport, Arc::new(on_invalidate), RealtimeConfig::default())
    }

    /// Create a client with an explicit, validated configuration
    pub fn with_config(
        transport: Arc<dyn RealtimeTransport>,
        on_invalidate: impl Fn(&str) + Send + Sync + 'static,
        config: RealtimeConfig,
    ) -> RealtimeResult<Self> {
        config.validate()?;
        Ok(Self::build(transport, Arc::new(on_invalidate), config))
    }

    fn build(
        transport: Arc<dyn RealtimeTransport>,
        on_invalidate: InvalidateCallback,
        config: RealtimeConfig,
    ) -> Self {
        let metrics = Arc::new(RealtimeMetrics::new());

        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State {
                    registry: SubscriptionRegistry::new(),
                    controller: ReconnectionController::new(config.reconnect.clone()),
                    disposed: false,
                    network_task: None,
                }),
                transport,
                dispatcher: EventDispatcher::new(on_invalidate, Arc::clone(&metrics)),
                health: ConnectionHealthAggregator::new(),
                config,
                metrics,
                runtime: Handle::try_current().ok(),
            }),
        }
    }

    /// Watch `descriptor`.
    ///
    /// Identical descriptors share one transport channel. `on_status`
    /// immediately receives the channel's current status, then every change.
    /// After `dispose` this returns an id that is attached to nothing.
    pub fn subscribe(
        &self,
        descriptor: SubscriptionDescriptor,
        on_change: impl Fn(&ChangeEvent) + Send + Sync + 'static,
        on_status: impl Fn(&StatusUpdate) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let on_change: ChangeListener = Arc::new(on_change);
        let on_status: StatusListener = Arc::new(on_status);
        self.inner.subscribe(descriptor, on_change, on_status)
    }

    /// Detach a subscription. Unknown or repeated ids are ignored.
    ///
    /// Once this returns, the subscription's listeners are never invoked
    /// again. The last subscription of a descriptor closes its channel.
    pub fn unsubscribe(&self, subscription: &SubscriptionId) {
        self.inner.unsubscribe(subscription);
    }

    /// Current aggregate health
    pub fn health(&self) -> HealthSnapshot {
        self.inner.health.current()
    }

    /// Receiver that observes every published health snapshot
    pub fn watch_health(&self) -> watch::Receiver<HealthSnapshot> {
        self.inner.health.watch()
    }

    /// Report a connectivity change
    pub fn set_network_status(&self, status: NetworkStatus) {
        match status {
            NetworkStatus::Offline => self.inner.go_offline(),
            NetworkStatus::Online => self.inner.go_online(),
        }
    }

    /// Follow a connectivity source. The current value is applied at once.
    ///
    /// Replaces any previously attached source. Requires a tokio runtime.
    pub fn attach_network(
        &self,
        mut status: watch::Receiver<NetworkStatus>,
    ) -> RealtimeResult<()> {
        let runtime = self
            .inner
            .runtime()
            .ok_or_else(|| RealtimeError::Internal("no tokio runtime".to_string()))?;

        let mut state = self.inner.lock();
        if state.disposed {
            return Err(RealtimeError::Disposed);
        }

        let weak = Arc::downgrade(&self.inner);
        let task = runtime.spawn(async move {
            loop {
                let current = *status.borrow_and_update();
                match weak.upgrade() {
                    Some(inner) => match current {
                        NetworkStatus::Offline => inner.go_offline(),
                        NetworkStatus::Online => inner.go_online(),
                    },
                    None => break,
                }
                if status.changed().await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = state.network_task.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    /// Tear down and re-open every channel now.
    ///
    /// Resolves once every channel is subscribed or has exhausted its
    /// retries, or when the configured timeout elapses, with the health at
    /// that point. Calls made while a pass is running join it.
    pub async fn force_reconnect_all(&self) -> RealtimeResult<HealthSnapshot> {
        let inner = &self.inner;

        let pass = {
            let mut state = inner.lock();
            if state.disposed {
                return Err(RealtimeError::Disposed);
            }
            match state.controller.join_force_pass() {
                Some(rx) => ForcePass::Join(rx),
                None => {
                    let tx = state.controller.begin_force_pass();
                    let registry = &mut state.registry;

                    let metrics = &inner.metrics;
                    let work: Vec<(Option<Notify>, Resubscribe)> = registry
                        .channel_ids()
                        .into_iter()
                        .filter_map(|id| {
                            let handle = registry.get_mut(id)?;
                            let forced = match handle
                                .transition(ChannelStatus::Errored, Some(FORCED_ERROR.to_string()))
                            {
                                Transition::Applied { .. } => {
                                    metrics.increment_status_transitions();
                                    Some(Notify {
                                        listeners: handle.listeners(),
                                        update: handle.status_update(),
                                    })
                                }
                                _ => None,
                            };
                            begin_resubscribe(handle).map(|work| (forced, work))
                        })
                        .collect();

                    inner.health.publish(registry.handles());
                    ForcePass::Lead(tx, work)
                }
            }
        };

        let (tx, work) = match pass {
            ForcePass::Join(mut rx) => {
                debug!(event = %Event::ForceReconnectStart, "joining force reconnect in flight");
                let _ = rx.wait_for(Option::is_some).await;
                return inner.after_force_pass();
            }
            ForcePass::Lead(tx, work) => (tx, work),
        };

        inner.metrics.increment_forced_reconnects();
        info!(
            event = %Event::ForceReconnectStart,
            channels = work.len(),
            "force reconnect"
        );

        let guard = ForcePassGuard {
            inner: Arc::clone(inner),
        };
        for (forced, resubscribe) in work {
            if let Some(notify) = forced {
                inner.dispatcher.notify_status(&notify.listeners, &notify.update);
            }
            inner.finish_resubscribe(resubscribe);
        }

        let snapshot = inner.settle(inner.config.force_reconnect_timeout()).await;
        drop(guard);
        tx.send_replace(Some(snapshot.clone()));

        info!(
            event = %Event::ForceReconnectComplete,
            connected = snapshot.connected_count,
            total = snapshot.total_count,
            "force reconnect complete"
        );
        inner.after_force_pass().map(|_| snapshot)
    }

    /// Close every channel and stop all background work. Idempotent.
    ///
    /// Listeners receive a final `Closed` status.
    pub fn dispose(&self) {
        self.inner.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().disposed
    }

    /// Backoff state of the channel backing `descriptor`
    pub fn reconnect_state(&self, descriptor: &SubscriptionDescriptor) -> Option<ReconnectState> {
        let state = self.inner.lock();
        let channel = state.registry.lookup(descriptor)?;
        Some(state.controller.state(channel))
    }

    /// The channel backing `descriptor`
    pub fn channel(&self, descriptor: &SubscriptionDescriptor) -> RealtimeResult<ChannelInfo> {
        let state = self.inner.lock();
        state
            .registry
            .lookup(descriptor)
            .and_then(|id| state.registry.get(id))
            .map(ChannelHandle::info)
            .ok_or_else(|| RealtimeError::ChannelNotFound(descriptor.to_string()))
    }

    /// Live channels in creation order
    pub fn channels(&self) -> Vec<ChannelInfo> {
        self.inner
            .lock()
            .registry
            .handles()
            .map(ChannelHandle::info)
            .collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn config(&self) -> &RealtimeConfig {
        &self.inner.config
    }
}

/// Clears the in-flight marker even if the leading future is dropped
struct ForcePassGuard {
    inner: Arc<Inner>,
}

impl Drop for ForcePassGuard {
    fn drop(&mut self) {
        self.inner.lock().controller.end_force_pass();
    }
}

/// Move a handle back to `Connecting` under the lock
fn begin_resubscribe(handle: &mut ChannelHandle) -> Option<Resubscribe> {
    let (generation, stale) = handle.begin_resubscribe()?;
    Some(Resubscribe {
        channel: handle.id(),
        descriptor: handle.descriptor().clone(),
        generation,
        stale,
        listeners: handle.listeners(),
        update: handle.status_update(),
    })
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn subscribe(
        self: &Arc<Self>,
        descriptor: SubscriptionDescriptor,
        on_change: ChangeListener,
        on_status: StatusListener,
    ) -> SubscriptionId {
        let (subscription, replay, open) = {
            let mut state = self.lock();
            if state.disposed {
                warn!(
                    event = %Event::ClientDisposed,
                    %descriptor,
                    "subscribe on disposed client ignored"
                );
                return SubscriptionId::new();
            }

            let online = state.controller.is_online();
            let (subscription, acquired) =
                state.registry.acquire(descriptor, on_change, on_status);
            let created = matches!(acquired, Acquired::Created(_));
            let listener = state.registry.listener(&subscription);

            let Some(handle) = state.registry.get_mut(acquired.channel()) else {
                return subscription;
            };
            if created && !online {
                // Opened by the next online transition
                handle.transition(ChannelStatus::Errored, Some(OFFLINE_ERROR.to_string()));
            }

            let replay = listener.map(|listener| Notify {
                listeners: vec![listener],
                update: handle.status_update(),
            });
            let open = (created && online)
                .then(|| (handle.id(), handle.descriptor().clone(), handle.generation()));

            if created {
                self.health.publish(state.registry.handles());
            }
            (subscription, replay, open)
        };

        if let Some(replay) = replay {
            self.dispatcher.notify_status(&replay.listeners, &replay.update);
        }
        if let Some((channel, descriptor, generation)) = open {
            self.open_channel(channel, descriptor, generation);
        }

        subscription
    }

    fn unsubscribe(&self, subscription: &SubscriptionId) {
        let destroyed = {
            let mut state = self.lock();
            match state.registry.release(subscription) {
                Released::Unknown => {
                    debug!(%subscription, "unsubscribe of unknown subscription ignored");
                    None
                }
                Released::Detached { channel, remaining } => {
                    debug!(%channel, remaining, "subscription detached");
                    None
                }
                Released::Destroyed { handle, transport } => {
                    state.controller.forget(handle.id());
                    self.health.publish(state.registry.handles());
                    Some((handle, transport))
                }
            }
        };

        if let Some((handle, transport)) = destroyed {
            self.close_transport(transport);
            info!(
                event = %Event::ChannelClosed,
                channel = %handle.id(),
                descriptor = %handle.descriptor(),
                "channel closed"
            );
        }
    }

    fn close_transport(&self, transport: Option<Box<dyn TransportChannel>>) {
        if let Some(mut transport) = transport {
            transport.close();
            self.metrics.increment_channels_closed();
        }
    }

    /// Open a transport channel for `generation` and wire its callbacks
    fn open_channel(
        self: &Arc<Self>,
        channel: ChannelId,
        descriptor: SubscriptionDescriptor,
        generation: u64,
    ) {
        let mut transport = match self.transport.open_channel(&descriptor) {
            Ok(transport) => transport,
            Err(err) => {
                self.metrics.increment_open_failures();
                warn!(
                    event = %Event::ChannelOpenFailed,
                    %channel,
                    %descriptor,
                    error = %err,
                    "failed to open transport channel"
                );
                let error = Some(err.to_string());
                self.apply_status(channel, generation, ChannelStatus::Errored, error);
                return;
            }
        };
        self.metrics.increment_channels_opened();

        let weak: Weak<Inner> = Arc::downgrade(self);
        transport.on_event(Box::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_event(channel, generation, event);
            }
        }));

        let weak: Weak<Inner> = Arc::downgrade(self);
        transport.on_status_change(Box::new(move |status| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_status(channel, generation, status);
            }
        }));

        let rejected = {
            let mut state = self.lock();
            match state.registry.get_mut(channel) {
                Some(handle) => handle.attach_transport(generation, transport).err(),
                None => Some(transport),
            }
        };

        match rejected {
            None => info!(
                event = %Event::ChannelOpened,
                %channel,
                %descriptor,
                generation,
                "transport channel opened"
            ),
            Some(stale) => {
                debug!(
                    event = %Event::StaleCallback,
                    %channel,
                    generation,
                    "channel moved on while opening; closing new transport channel"
                );
                self.close_transport(Some(stale));
            }
        }
    }

    fn handle_status(
        self: &Arc<Self>,
        channel: ChannelId,
        generation: u64,
        status: TransportStatus,
    ) {
        let (next, error) = status.classify();
        debug!(%channel, generation, %status, "transport status");
        self.apply_status(channel, generation, next, error);
    }

    fn handle_event(&self, channel: ChannelId, generation: u64, event: ChangeEvent) {
        let listeners = {
            let state = self.lock();
            if state.disposed {
                return;
            }
            let Some(handle) = state.registry.get(channel) else {
                return;
            };
            if handle.generation() != generation {
                debug!(
                    event = %Event::StaleCallback,
                    %channel,
                    generation,
                    current = handle.generation(),
                    "event from replaced transport channel dropped"
                );
                return;
            }
            handle.listeners()
        };

        self.dispatcher.dispatch(channel, &listeners, &event);
    }

    /// Apply a status to a handle, publish health, notify listeners and
    /// schedule a retry when the channel errored
    fn apply_status(
        self: &Arc<Self>,
        channel: ChannelId,
        generation: u64,
        next: ChannelStatus,
        error: Option<String>,
    ) {
        let (notify, decision, resync) = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            let State {
                registry,
                controller,
                ..
            } = &mut *state;

            let Some(handle) = registry.get_mut(channel) else {
                return;
            };
            if handle.generation() != generation {
                debug!(
                    event = %Event::StaleCallback,
                    %channel,
                    generation,
                    current = handle.generation(),
                    "status from replaced transport channel dropped"
                );
                return;
            }

            // Only a retry or a forced pass moves an errored channel on
            let rejoin =
                next == ChannelStatus::Connecting && handle.status() == ChannelStatus::Errored;
            let transition = if rejoin {
                Transition::Rejected {
                    from: ChannelStatus::Errored,
                    to: next,
                }
            } else {
                handle.transition(next, error)
            };
            match transition {
                Transition::Applied { .. } => {}
                Transition::Unchanged => return,
                Transition::Rejected { from, to } => {
                    debug!(
                        event = %Event::TransitionRejected,
                        %channel,
                        %from,
                        %to,
                        "transition rejected"
                    );
                    return;
                }
            }
            self.metrics.increment_status_transitions();

            let notify = Notify {
                listeners: handle.listeners(),
                update: handle.status_update(),
            };
            // A channel that had to be re-opened may have missed changes
            let resync = next.is_subscribed() && generation > 0;

            let decision = match next {
                ChannelStatus::Subscribed => {
                    controller.on_subscribed(channel);
                    None
                }
                ChannelStatus::Errored => {
                    let decision = controller.on_errored(channel);
                    let armed = match decision {
                        RetryDecision::Retry { delay, .. } => {
                            self.schedule_retry(controller, channel, delay)
                        }
                        _ => true,
                    };
                    if armed {
                        Some(decision)
                    } else {
                        controller.suspend(channel);
                        None
                    }
                }
                _ => None,
            };

            self.health.publish(registry.handles());
            (notify, decision, resync)
        };

        let update = &notify.update;
        match update.status {
            ChannelStatus::Subscribed => info!(
                event = %Event::ChannelSubscribed,
                %channel,
                descriptor = %update.descriptor,
                "channel subscribed"
            ),
            ChannelStatus::Errored => warn!(
                event = %Event::ChannelErrored,
                %channel,
                descriptor = %update.descriptor,
                error = update.error.as_deref().unwrap_or_default(),
                "channel errored"
            ),
            _ => {}
        }

        match decision {
            Some(RetryDecision::Retry { attempt, delay }) => {
                self.metrics.increment_retries_scheduled();
                info!(
                    event = %Event::RetryScheduled,
                    %channel,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "retry scheduled"
                );
            }
            Some(RetryDecision::Exhausted) => warn!(
                event = %Event::RetryExhausted,
                %channel,
                max_attempts = self.config.reconnect.max_attempts,
                "retries exhausted; channel suspended"
            ),
            Some(RetryDecision::Offline) => {
                debug!(%channel, "offline; retry deferred until network returns")
            }
            None => {}
        }

        self.dispatcher.notify_status(&notify.listeners, update);
        if resync {
            self.dispatcher.invalidate(update.descriptor.resource());
        }
    }

    /// Runtime to spawn background work on: the one the client was built
    /// on, else the caller's
    fn runtime(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }

    /// Spawn the backoff timer for `channel`. Called with the lock held.
    /// Returns false if there is no runtime to run it on.
    fn schedule_retry(
        self: &Arc<Self>,
        controller: &mut ReconnectionController,
        channel: ChannelId,
        delay: Duration,
    ) -> bool {
        let Some(runtime) = self.runtime() else {
            warn!(%channel, "no tokio runtime; retry not scheduled, channel suspended");
            return false;
        };

        let token = controller.next_timer_token();
        let weak = Arc::downgrade(self);
        let timer = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                inner.retry(channel, token);
            }
        });
        controller.arm(channel, token, timer);
        true
    }

    /// Backoff timer elapsed
    fn retry(self: &Arc<Self>, channel: ChannelId, token: u64) {
        let work = {
            let mut state = self.lock();
            let State {
                registry,
                controller,
                disposed,
                ..
            } = &mut *state;

            if *disposed || !controller.fire(channel, token) || !controller.is_online() {
                return;
            }
            let Some(work) = registry.get_mut(channel).and_then(begin_resubscribe) else {
                return;
            };
            self.health.publish(registry.handles());
            work
        };

        info!(
            event = %Event::RetryFired,
            %channel,
            generation = work.generation,
            "retrying channel"
        );
        self.finish_resubscribe(work);
    }

    /// Close the replaced transport channel, notify, and open a fresh one
    fn finish_resubscribe(self: &Arc<Self>, work: Resubscribe) {
        self.metrics.increment_status_transitions();
        self.close_transport(work.stale);
        self.dispatcher.notify_status(&work.listeners, &work.update);
        self.open_channel(work.channel, work.descriptor, work.generation);
    }

    fn go_offline(&self) {
        let (notifications, transports) = {
            let mut state = self.lock();
            let State {
                registry,
                controller,
                disposed,
                ..
            } = &mut *state;

            if *disposed || !controller.go_offline() {
                return;
            }

            let mut notifications = Vec::new();
            let mut transports = Vec::new();
            for id in registry.channel_ids() {
                let Some(handle) = registry.get_mut(id) else {
                    continue;
                };
                if let Transition::Applied { .. } =
                    handle.transition(ChannelStatus::Errored, Some(OFFLINE_ERROR.to_string()))
                {
                    self.metrics.increment_status_transitions();
                    notifications.push(Notify {
                        listeners: handle.listeners(),
                        update: handle.status_update(),
                    });
                }
                transports.push(handle.detach_transport());
            }

            self.health.publish(registry.handles());
            (notifications, transports)
        };

        warn!(
            event = %Event::NetworkOffline,
            channels = transports.len(),
            "network offline; retries suspended"
        );
        for transport in transports {
            self.close_transport(transport);
        }
        for notify in notifications {
            self.dispatcher.notify_status(&notify.listeners, &notify.update);
        }
    }

    fn go_online(self: &Arc<Self>) {
        let work = {
            let mut state = self.lock();
            let State {
                registry,
                controller,
                disposed,
                ..
            } = &mut *state;

            if *disposed || !controller.go_online() {
                return;
            }

            let work: Vec<Resubscribe> = registry
                .channel_ids()
                .into_iter()
                .filter_map(|id| registry.get_mut(id).and_then(begin_resubscribe))
                .collect();

            self.health.publish(registry.handles());
            work
        };

        info!(
            event = %Event::NetworkOnline,
            channels = work.len(),
            "network online; re-subscribing"
        );
        for resubscribe in work {
            self.finish_resubscribe(resubscribe);
        }
    }

    /// Wait until every channel is subscribed or settled in `Errored`
    async fn settle(&self, timeout: Duration) -> HealthSnapshot {
        let mut rx = self.health.watch();
        let wait = async {
            while !self.is_settled() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        };

        if tokio::time::timeout(timeout, wait).await.is_err() {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "force reconnect timed out before all channels settled"
            );
        }
        self.health.current()
    }

    fn is_settled(&self) -> bool {
        let state = self.lock();
        state.disposed
            || state.registry.handles().all(|handle| match handle.status() {
                ChannelStatus::Subscribed | ChannelStatus::Closed => true,
                ChannelStatus::Errored => state.controller.is_settled(handle.id()),
                ChannelStatus::Connecting => false,
            })
    }

    fn after_force_pass(&self) -> RealtimeResult<HealthSnapshot> {
        if self.lock().disposed {
            return Err(RealtimeError::Disposed);
        }
        Ok(self.health.current())
    }

    fn dispose(&self) {
        let (drained, network_task) = {
            let mut state = self.lock();
            if state.disposed {
                return;
            }
            state.disposed = true;
            state.controller.shutdown();
            let drained = state.registry.drain();
            let network_task = state.network_task.take();
            self.health.publish(state.registry.handles());
            (drained, network_task)
        };

        if let Some(task) = network_task {
            task.abort();
        }

        info!(
            event = %Event::Dispose,
            channels = drained.len(),
            "realtime client disposed"
        );
        for (handle, transport) in drained {
            self.close_transport(transport);
            self.dispatcher
                .notify_status(&handle.listeners(), &handle.status_update());
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.controller.cancel_all();
        if let Some(task) = state.network_task.take() {
            task.abort();
        }
    }
}
