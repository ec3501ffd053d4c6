//! # Reconnection Controller
//!
//! Decides when channels are re-subscribed:
//!
//! - a channel entering `Errored` while online gets a per-channel exponential
//!   backoff timer, so one flaky channel neither storms nor blocks the others;
//! - going offline suspends all retries; coming back online re-subscribes every
//!   live channel once;
//! - a forced pass cancels timers and resets attempt counters, guarded so that
//!   overlapping calls share one pass.
//!
//! The controller only keeps the books. The client spawns the timers it arms
//! and performs the actual re-subscription.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::channel::ChannelId;
use super::config::ReconnectConfig;
use super::health::HealthSnapshot;

/// Backoff progress for one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconnectState {
    /// Consecutive failures since the last successful subscribe
    pub attempt: u32,
    /// Delay chosen for the most recently scheduled retry
    pub next_delay_ms: u64,
    /// Retries are on hold (offline, or attempts exhausted)
    pub suspended: bool,
}

/// What to do about a channel that just errored
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after `delay`; `attempt` is the 1-based retry number
    Retry { attempt: u32, delay: Duration },
    /// Network is offline; the online transition will re-subscribe
    Offline,
    /// Retry budget exhausted
    Exhausted,
}

/// Completion signal of a forced reconnection pass
pub type ForcePassReceiver = watch::Receiver<Option<HealthSnapshot>>;

/// Bookkeeping for retries, timers and network state
#[derive(Debug)]
pub struct ReconnectionController {
    config: ReconnectConfig,
    states: HashMap<ChannelId, ReconnectState>,
    timers: HashMap<ChannelId, (u64, JoinHandle<()>)>,
    next_timer: u64,
    online: bool,
    force_pass: Option<ForcePassReceiver>,
}

impl ReconnectionController {
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            config,
            states: HashMap::new(),
            timers: HashMap::new(),
            next_timer: 0,
            online: true,
            force_pass: None,
        }
    }

    pub fn config(&self) -> &ReconnectConfig {
        &self.config
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn state(&self, channel: ChannelId) -> ReconnectState {
        self.states.get(&channel).copied().unwrap_or_default()
    }

    /// Whether a forced pass has nothing more to wait for on this channel
    pub fn is_settled(&self, channel: ChannelId) -> bool {
        self.state(channel).suspended
    }

    /// Record a failure and decide the retry
    pub fn on_errored(&mut self, channel: ChannelId) -> RetryDecision {
        let online = self.online;
        let state = self.states.entry(channel).or_default();

        if !online {
            state.suspended = true;
            return RetryDecision::Offline;
        }

        if self.config.is_exhausted(state.attempt) {
            state.suspended = true;
            return RetryDecision::Exhausted;
        }

        let delay = self.config.delay_for_attempt(state.attempt);
        state.attempt += 1;
        state.next_delay_ms = delay.as_millis() as u64;
        state.suspended = false;

        RetryDecision::Retry {
            attempt: state.attempt,
            delay,
        }
    }

    /// A successful subscribe resets the backoff
    pub fn on_subscribed(&mut self, channel: ChannelId) {
        self.cancel(channel);
        self.states.insert(channel, ReconnectState::default());
    }

    /// Token identifying the next timer passed to `arm`
    pub fn next_timer_token(&mut self) -> u64 {
        self.next_timer += 1;
        self.next_timer
    }

    /// Track the timer for a scheduled retry, replacing any older one
    pub fn arm(&mut self, channel: ChannelId, token: u64, timer: JoinHandle<()>) {
        if let Some((_, previous)) = self.timers.insert(channel, (token, timer)) {
            previous.abort();
        }
    }

    /// Called by a timer that elapsed. Returns false if the timer was
    /// cancelled or replaced while it was waiting for the lock.
    pub fn fire(&mut self, channel: ChannelId, token: u64) -> bool {
        match self.timers.get(&channel) {
            Some((armed, _)) if *armed == token => {
                self.timers.remove(&channel);
                true
            }
            _ => false,
        }
    }

    /// A retry that could not be armed. The channel waits in `Errored`
    /// until a forced pass or a network change revives it.
    pub fn suspend(&mut self, channel: ChannelId) {
        self.cancel(channel);
        self.states.entry(channel).or_default().suspended = true;
    }

    /// Cancel a pending retry, if any
    pub fn cancel(&mut self, channel: ChannelId) {
        if let Some((_, timer)) = self.timers.remove(&channel) {
            timer.abort();
        }
    }

    /// The channel is gone: cancel its timer and drop its state
    pub fn forget(&mut self, channel: ChannelId) {
        self.cancel(channel);
        self.states.remove(&channel);
    }

    pub fn cancel_all(&mut self) {
        for (_, (_, timer)) in self.timers.drain() {
            timer.abort();
        }
    }

    /// Cancel timers and zero every attempt counter
    pub fn reset_all(&mut self) {
        self.cancel_all();
        for state in self.states.values_mut() {
            *state = ReconnectState::default();
        }
    }

    /// Returns true if this is a transition
    pub fn go_offline(&mut self) -> bool {
        if !self.online {
            return false;
        }
        self.online = false;
        self.cancel_all();
        for state in self.states.values_mut() {
            state.suspended = true;
        }
        true
    }

    /// Returns true if this is a transition
    pub fn go_online(&mut self) -> bool {
        if self.online {
            return false;
        }
        self.online = true;
        self.reset_all();
        true
    }

    pub fn pending_timers(&self) -> usize {
        self.timers.values().filter(|(_, t)| !t.is_finished()).count()
    }

    /// Receiver for the forced pass currently in flight, if any
    pub fn join_force_pass(&self) -> Option<ForcePassReceiver> {
        self.force_pass.clone()
    }

    /// Start a forced pass. Callers must check `join_force_pass` first.
    pub fn begin_force_pass(&mut self) -> watch::Sender<Option<HealthSnapshot>> {
        let (tx, rx) = watch::channel(None);
        self.force_pass = Some(rx);
        self.online = true;
        self.reset_all();
        tx
    }

    pub fn end_force_pass(&mut self) {
        self.force_pass = None;
    }

    /// Drop everything; used on dispose
    pub fn shutdown(&mut self) {
        self.cancel_all();
        self.states.clear();
        self.force_pass = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> ReconnectionController {
        ReconnectionController::new(ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            multiplier: 2.0,
            max_attempts: 0,
        })
    }

    fn delay_of(decision: RetryDecision) -> Duration {
        match decision {
            RetryDecision::Retry { delay, .. } => delay,
            other => panic!("expected retry, got {:?}", other),
        }
    }

    #[test]
    fn test_backoff_is_monotonic_and_capped() {
        let mut c = controller();
        let channel = ChannelId(1);

        let delays: Vec<Duration> = (0..8).map(|_| delay_of(c.on_errored(channel))).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[0], Duration::from_millis(100));
        assert_eq!(*delays.last().unwrap(), Duration::from_millis(1000));
        assert_eq!(c.state(channel).attempt, 8);
        assert_eq!(c.state(channel).next_delay_ms, 1000);
    }

    #[test]
    fn test_success_resets_attempts() {
        let mut c = controller();
        let channel = ChannelId(1);

        c.on_errored(channel);
        c.on_errored(channel);
        c.on_subscribed(channel);

        assert_eq!(c.state(channel), ReconnectState::default());
        assert_eq!(delay_of(c.on_errored(channel)), Duration::from_millis(100));
    }

    #[test]
    fn test_channels_back_off_independently() {
        let mut c = controller();

        c.on_errored(ChannelId(1));
        c.on_errored(ChannelId(1));
        c.on_errored(ChannelId(1));

        assert_eq!(
            delay_of(c.on_errored(ChannelId(2))),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_exhaustion_suspends() {
        let mut c = ReconnectionController::new(ReconnectConfig {
            max_attempts: 2,
            ..ReconnectConfig::default()
        });
        let channel = ChannelId(1);

        assert!(matches!(c.on_errored(channel), RetryDecision::Retry { attempt: 1, .. }));
        assert!(matches!(c.on_errored(channel), RetryDecision::Retry { attempt: 2, .. }));
        assert_eq!(c.on_errored(channel), RetryDecision::Exhausted);
        assert!(c.is_settled(channel));
    }

    #[test]
    fn test_unarmed_retry_suspends() {
        let mut c = controller();
        let channel = ChannelId(1);

        assert!(matches!(c.on_errored(channel), RetryDecision::Retry { attempt: 1, .. }));
        assert!(!c.is_settled(channel));

        c.suspend(channel);
        assert!(c.is_settled(channel));
        assert_eq!(c.state(channel).attempt, 1);
        assert_eq!(c.pending_timers(), 0);
    }

    #[test]
    fn test_offline_suspends_and_online_resets() {
        let mut c = controller();
        let channel = ChannelId(1);
        c.on_errored(channel);

        assert!(c.go_offline());
        assert!(!c.go_offline());
        assert_eq!(c.on_errored(channel), RetryDecision::Offline);
        assert!(c.state(channel).suspended);

        assert!(c.go_online());
        assert!(!c.go_online());
        assert_eq!(c.state(channel), ReconnectState::default());
    }

    #[tokio::test]
    async fn test_cancel_aborts_timer() {
        let mut c = controller();
        let channel = ChannelId(1);

        let token = c.next_timer_token();
        c.arm(
            channel,
            token,
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }),
        );
        assert_eq!(c.pending_timers(), 1);

        c.forget(channel);
        assert_eq!(c.pending_timers(), 0);
        assert_eq!(c.state(channel), ReconnectState::default());
        assert!(!c.fire(channel, token));
    }

    #[tokio::test]
    async fn test_replaced_timer_does_not_fire() {
        let mut c = controller();
        let channel = ChannelId(1);
        let sleeper = || {
            tokio::spawn(async {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            })
        };

        let first = c.next_timer_token();
        c.arm(channel, first, sleeper());
        let second = c.next_timer_token();
        c.arm(channel, second, sleeper());

        assert!(!c.fire(channel, first));
        assert!(c.fire(channel, second));
        assert!(!c.fire(channel, second));
    }

    #[test]
    fn test_force_pass_guard() {
        let mut c = controller();
        assert!(c.join_force_pass().is_none());

        let _tx = c.begin_force_pass();
        assert!(c.join_force_pass().is_some());

        c.end_force_pass();
        assert!(c.join_force_pass().is_none());
    }
}
