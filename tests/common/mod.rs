//! Shared helpers for realtime integration tests

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use booking_realtime::realtime::{
    ChangeEvent, ChannelStatus, MemoryTransport, RealtimeClient, RealtimeConfig, StatusUpdate,
    SubscriptionDescriptor, SubscriptionId,
};

/// Install a log subscriber once; honours `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Backoff short enough to step through with a paused clock
pub fn fast_config() -> RealtimeConfig {
    RealtimeConfig::from_json_str(
        r#"{
            "reconnect": {
                "initial_delay_ms": 100,
                "max_delay_ms": 1000,
                "multiplier": 2.0,
                "max_attempts": 0
            },
            "force_reconnect_timeout_ms": 5000
        }"#,
    )
    .unwrap()
}

/// Client over `transport` plus the list of invalidated resources
pub fn client_with(
    transport: &MemoryTransport,
    config: RealtimeConfig,
) -> (RealtimeClient, Arc<Mutex<Vec<String>>>) {
    init_tracing();
    let invalidated = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&invalidated);
    let client = RealtimeClient::with_config(
        Arc::new(transport.clone()),
        move |resource: &str| sink.lock().unwrap().push(resource.to_string()),
        config,
    )
    .unwrap();
    (client, invalidated)
}

pub fn client(transport: &MemoryTransport) -> (RealtimeClient, Arc<Mutex<Vec<String>>>) {
    client_with(transport, fast_config())
}

/// Everything one subscriber observed
#[derive(Clone, Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<ChangeEvent>>>,
    pub statuses: Arc<Mutex<Vec<StatusUpdate>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        client: &RealtimeClient,
        descriptor: &SubscriptionDescriptor,
    ) -> SubscriptionId {
        let events = Arc::clone(&self.events);
        let statuses = Arc::clone(&self.statuses);
        client.subscribe(
            descriptor.clone(),
            move |event: &ChangeEvent| events.lock().unwrap().push(event.clone()),
            move |update: &StatusUpdate| statuses.lock().unwrap().push(update.clone()),
        )
    }

    pub fn event_count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn status_history(&self) -> Vec<ChannelStatus> {
        self.statuses
            .lock()
            .unwrap()
            .iter()
            .map(|update| update.status)
            .collect()
    }

    pub fn last_status(&self) -> Option<ChannelStatus> {
        self.status_history().last().copied()
    }
}

/// Let spawned tasks (timers, network watchers, force passes) run
pub async fn drain_tasks() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}
