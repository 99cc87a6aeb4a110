//! Push subscription that purges a view whenever the server says "refresh".
//!
//! The connection lifecycle is a plain value ([`ChannelState`]) advanced by
//! pure transitions; the task in [`InvalidationChannel`] only drives it and
//! owns the socket. Status is published on a `watch` channel for the UI.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, info, trace};

use crate::config::ConsoleConfig;
use crate::constants;
use crate::push::{PushConnector, PushSocket};

/// Something that can be purged and refetched.
#[async_trait]
pub trait InvalidationTarget: Send + Sync {
    async fn invalidate(&self);
}

/// Exponential reconnect delay.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Backoff {
    initial: Duration,
    ceiling: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        let initial = initial.min(ceiling);
        Self { initial, ceiling, current: initial }
    }

    /// Delay the next reconnect would wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.initial;
    }

    /// Take the current delay and double the following one, up to the ceiling.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.ceiling);
        delay
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(constants::PUSH_BACKOFF_INITIAL, constants::PUSH_BACKOFF_MAX)
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Connection state plus reconnect policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelState {
    pub connection: ConnectionState,
    pub backoff: Backoff,
    /// Closes since the last successful open.
    pub failures: u32,
}

impl ChannelState {
    pub fn new(backoff: Backoff) -> Self {
        Self { connection: ConnectionState::Disconnected, backoff, failures: 0 }
    }

    pub fn connecting(&mut self) {
        self.connection = ConnectionState::Connecting;
    }

    pub fn opened(&mut self) {
        self.connection = ConnectionState::Connected;
        self.failures = 0;
        self.backoff.reset();
    }

    /// Connection lost or refused. Returns how long to wait before reconnecting.
    pub fn closed(&mut self) -> Duration {
        self.connection = ConnectionState::Disconnected;
        self.failures += 1;
        self.backoff.advance()
    }
}

/// Snapshot published to observers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ChannelStatus {
    pub connection: ConnectionState,
    /// Delay before the next reconnect attempt.
    pub next_delay: Duration,
    pub failures: u32,
    /// Purge cycles triggered so far.
    pub invalidations: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct ChannelOptions {
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub coalesce_window: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            backoff_initial: constants::PUSH_BACKOFF_INITIAL,
            backoff_max: constants::PUSH_BACKOFF_MAX,
            coalesce_window: constants::PUSH_COALESCE_WINDOW,
        }
    }
}

impl From<&ConsoleConfig> for ChannelOptions {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            backoff_initial: config.backoff_initial(),
            backoff_max: config.backoff_max(),
            coalesce_window: config.coalesce_window(),
        }
    }
}

pub struct InvalidationChannel {
    connector: Arc<dyn PushConnector>,
    url: String,
    target: Arc<dyn InvalidationTarget>,
    coalesce_window: Duration,
    state: ChannelState,
    invalidations: u64,
    status_tx: watch::Sender<ChannelStatus>,
}

impl InvalidationChannel {
    /// Start the subscription task. It runs until the returned handle is
    /// stopped or dropped.
    pub fn spawn(
        connector: Arc<dyn PushConnector>,
        url: impl Into<String>,
        target: Arc<dyn InvalidationTarget>,
        options: ChannelOptions,
    ) -> ChannelHandle {
        let state = ChannelState::new(Backoff::new(options.backoff_initial, options.backoff_max));
        let (status_tx, status_rx) = watch::channel(ChannelStatus {
            connection: state.connection,
            next_delay: state.backoff.current(),
            failures: 0,
            invalidations: 0,
        });
        let channel = Self {
            connector,
            url: url.into(),
            target,
            coalesce_window: options.coalesce_window,
            state,
            invalidations: 0,
            status_tx,
        };
        let task = tokio::spawn(channel.run());
        ChannelHandle { task: Some(task), status: status_rx }
    }

    fn publish(&self) {
        self.status_tx.send_replace(ChannelStatus {
            connection: self.state.connection,
            next_delay: self.state.backoff.current(),
            failures: self.state.failures,
            invalidations: self.invalidations,
        });
    }

    async fn run(mut self) {
        info!(url = %self.url, "push channel started");
        loop {
            self.state.connecting();
            self.publish();
            match self.connector.connect(&self.url).await {
                Ok(mut socket) => {
                    self.state.opened();
                    self.publish();
                    info!(url = %self.url, "push channel connected");
                    self.pump(&mut *socket).await;
                }
                Err(e) => debug!(url = %self.url, error = %e, "push connect failed"),
            }
            let delay = self.state.closed();
            self.publish();
            debug!(url = %self.url, delay_ms = delay.as_millis() as u64, failures = self.state.failures, "push channel reconnecting");
            sleep(delay).await;
        }
    }

    /// Read frames until the socket ends, collapsing bursts of notifications.
    async fn pump(&mut self, socket: &mut dyn PushSocket) {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                frame = socket.next_text() => match frame {
                    Some(Ok(text)) if text.trim() == constants::REFRESH_TOKEN => {
                        if deadline.is_none() {
                            deadline = Some(Instant::now() + self.coalesce_window);
                        }
                    }
                    Some(Ok(text)) => trace!(len = text.len(), "ignoring unrecognized push message"),
                    Some(Err(e)) => {
                        debug!(error = %e, "push socket error");
                        break;
                    }
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.fire().await;
                }
            }
        }
        if deadline.is_some() {
            self.fire().await;
        }
    }

    async fn fire(&mut self) {
        self.invalidations += 1;
        debug!(url = %self.url, cycle = self.invalidations, "invalidating view");
        self.target.invalidate().await;
        self.publish();
    }
}

/// Owns the channel task. Stopping or dropping it ends the subscription.
pub struct ChannelHandle {
    task: Option<JoinHandle<()>>,
    status: watch::Receiver<ChannelStatus>,
}

impl ChannelHandle {
    pub fn status(&self) -> ChannelStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ChannelStatus> {
        self.status.clone()
    }

    pub fn stop(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("push channel stopped");
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use std::num::{NonZeroU64, NonZeroUsize};
    use std::sync::atomic::{AtomicU64, Ordering};

    use fleetgrid_types::Collection;

    use super::*;
    use crate::testing::{FakeBackend, FakePushConnector, RecordingSink};
    use crate::view::DataView;

    #[derive(Default)]
    struct Counter(AtomicU64);

    #[async_trait]
    impl InvalidationTarget for Counter {
        async fn invalidate(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn backoff_doubles_to_ceiling_and_resets() {
        let mut state = ChannelState::new(Backoff::new(ms(1000), ms(10_000)));
        let delays: Vec<u64> = (0..6).map(|_| state.closed().as_millis() as u64).collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 8000, 10_000, 10_000]);
        assert_eq!(state.failures, 6);

        state.connecting();
        assert_eq!(state.connection, ConnectionState::Connecting);
        state.opened();
        assert_eq!(state.connection, ConnectionState::Connected);
        assert_eq!(state.closed(), ms(1000));
        assert_eq!(state.connection, ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_schedule_follows_backoff() {
        let connector = FakePushConnector::new();
        let handle = InvalidationChannel::spawn(
            connector.clone(),
            "ws://fleet/ws/vehicles",
            Arc::new(Counter::default()),
            ChannelOptions::default(),
        );

        sleep(ms(26_000)).await;
        let gaps: Vec<u64> = connector
            .attempts()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 4000, 8000, 10_000]);
        assert_eq!(handle.status().connection, ConnectionState::Disconnected);
        assert_eq!(handle.status().failures, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_open_resets_backoff() {
        let connector = FakePushConnector::new();
        connector.refuse();
        connector.refuse();
        drop(connector.accept());
        let _handle = InvalidationChannel::spawn(
            connector.clone(),
            "ws://fleet/ws/persons",
            Arc::new(Counter::default()),
            ChannelOptions::default(),
        );

        sleep(ms(5_000)).await;
        let gaps: Vec<u64> = connector
            .attempts()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .take(3)
            .collect();
        assert_eq!(gaps, vec![1000, 2000, 1000]);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_notifications_purges_once() {
        let backend = FakeBackend::with_rows(200);
        let view = DataView::new(
            Collection::Vehicles,
            backend.clone(),
            RecordingSink::new(),
            NonZeroU64::new(50).unwrap(),
            NonZeroUsize::new(2).unwrap(),
        );
        view.set_viewport(0..50);
        view.refresh_visible().await;
        let generation = view.generation();
        assert_eq!(backend.query_count(), 1);

        let connector = FakePushConnector::new();
        let server = connector.accept();
        let handle = InvalidationChannel::spawn(
            connector.clone(),
            "ws://fleet/ws/vehicles",
            view.clone(),
            ChannelOptions::default(),
        );
        sleep(ms(1)).await;
        assert_eq!(handle.status().connection, ConnectionState::Connected);

        server.send("refresh");
        sleep(ms(20)).await;
        server.send(" refresh\n");
        sleep(ms(30)).await;
        assert_eq!(view.generation(), generation);

        sleep(ms(200)).await;
        assert_eq!(view.generation(), generation + 1);
        assert_eq!(backend.query_count(), 2);
        assert_eq!(handle.status().invalidations, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_messages_are_ignored_and_pending_flushes_on_close() {
        let counter = Arc::new(Counter::default());
        let connector = FakePushConnector::new();
        let server = connector.accept();
        let _handle = InvalidationChannel::spawn(
            connector.clone(),
            "ws://fleet/ws/vehicles",
            counter.clone(),
            ChannelOptions::default(),
        );

        server.send("hello");
        sleep(ms(500)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        server.send("refresh");
        drop(server);
        sleep(ms(5)).await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stopping_the_handle_ends_reconnects() {
        let connector = FakePushConnector::new();
        let handle = InvalidationChannel::spawn(
            connector.clone(),
            "ws://fleet/ws/vehicles",
            Arc::new(Counter::default()),
            ChannelOptions::default(),
        );
        sleep(ms(1_500)).await;
        assert_eq!(connector.attempts().len(), 2);

        handle.stop();
        sleep(ms(60_000)).await;
        assert_eq!(connector.attempts().len(), 2);
    }
}
