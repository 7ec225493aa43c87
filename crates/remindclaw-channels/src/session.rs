//! Connection Lifecycle Manager — owns the one messaging connection.
//!
//! A supervisor task connects, relays pairing challenges, persists credential
//! updates and runs one dispatch cycle per `Open` event. Every close is
//! classified into a [`DisconnectReason`] and mapped by [`ReconnectPolicy`]
//! to exactly one recovery action. All waits observe the [`StopSignal`].

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use remindclaw_core::config::ReconnectConfig;
use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::events::{Event, EventBroadcaster};
use remindclaw_core::traits::{
    ConnectionEvent, CredentialStore, GatewayConnection, MessagingGateway,
};
use remindclaw_core::types::ConnectionState;

use crate::classify::{DisconnectReason, classify};
use crate::pairing::qr_data_url;
use crate::signal::StopSignal;

/// How a dispatch cycle ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    Completed,
    Stopped,
    Aborted(String),
}

/// Runs one dispatch cycle over an open connection.
///
/// Implemented by the scheduler; the manager only knows this seam.
#[async_trait]
pub trait CycleHandler: Send + Sync {
    async fn run_cycle(
        &self,
        connection: Arc<dyn GatewayConnection>,
        cancel: CancellationToken,
    ) -> CycleOutcome;
}

/// Reconnection timings.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_retries: u32,
    pub banned_cooldown: Duration,
    pub logout_timeout: Duration,
}

impl From<&ReconnectConfig> for ReconnectPolicy {
    fn from(config: &ReconnectConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_retries: config.max_retries,
            banned_cooldown: Duration::from_secs(config.banned_cooldown_secs),
            logout_timeout: Duration::from_secs(config.logout_timeout_secs),
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&ReconnectConfig::default())
    }
}

/// What to do after a close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    Reconnect { delay: Duration, attempt: u32 },
    Cooldown(Duration),
    PurgeAndStop,
    GiveUp,
}

impl ReconnectPolicy {
    /// `failed_attempts` counts reconnects since the last successful open.
    pub fn decide(&self, reason: DisconnectReason, failed_attempts: u32) -> RecoveryAction {
        match reason {
            DisconnectReason::LoggedOut => RecoveryAction::PurgeAndStop,
            DisconnectReason::RateLimited => RecoveryAction::Cooldown(self.banned_cooldown),
            DisconnectReason::Transient | DisconnectReason::Unknown => {
                let attempt = failed_attempts + 1;
                if attempt > self.max_retries {
                    RecoveryAction::GiveUp
                } else {
                    RecoveryAction::Reconnect {
                        delay: self.base_delay * attempt,
                        attempt,
                    }
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped,
    AlreadyStopped,
}

enum ConnectionEnd {
    Stopped,
    Closed { code: Option<u16>, message: String },
}

type CycleTask = (JoinHandle<CycleOutcome>, CancellationToken);

struct Inner {
    gateway: Arc<dyn MessagingGateway>,
    credentials: Arc<dyn CredentialStore>,
    handler: Arc<dyn CycleHandler>,
    events: EventBroadcaster,
    policy: ReconnectPolicy,
    stop: StopSignal,
    state: watch::Sender<ConnectionState>,
    cycles: watch::Sender<u64>,
    running: AtomicBool,
    connection: Mutex<Option<Arc<dyn GatewayConnection>>>,
    supervisor: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

/// Cheap-to-clone handle to the lifecycle manager.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    pub fn new(
        gateway: Arc<dyn MessagingGateway>,
        credentials: Arc<dyn CredentialStore>,
        handler: Arc<dyn CycleHandler>,
        events: EventBroadcaster,
        policy: ReconnectPolicy,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        let (cycles, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                gateway,
                credentials,
                handler,
                events,
                policy,
                stop: StopSignal::new(),
                state,
                cycles,
                running: AtomicBool::new(false),
                connection: Mutex::new(None),
                supervisor: tokio::sync::Mutex::new(None),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// A lifecycle is active (including reconnect backoff).
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Number of dispatch cycles finished so far.
    pub fn subscribe_cycles(&self) -> watch::Receiver<u64> {
        self.inner.cycles.subscribe()
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.inner.stop.clone()
    }

    pub fn gateway_name(&self) -> &str {
        self.inner.gateway.name()
    }

    /// Begin a lifecycle, or report that one is already running.
    pub async fn start(&self) -> StartOutcome {
        let mut supervisor = self.inner.supervisor.lock().await;
        if self.is_running() {
            tracing::info!("ℹ️ Start requested while already running");
            return StartOutcome::AlreadyRunning;
        }
        if let Some(finished) = supervisor.take() {
            let _ = finished.await;
        }

        self.inner.stop.clear();
        self.inner.running.store(true, Ordering::SeqCst);
        self.inner.info("🚀 Starting bot...");
        self.inner.set_state(ConnectionState::Connecting);

        let token = self.inner.stop.token();
        let inner = self.inner.clone();
        *supervisor = Some(tokio::spawn(inner.supervise(token)));
        StartOutcome::Started
    }

    /// Cancel dispatch, log out, close the connection and wait for teardown.
    pub async fn stop(&self) -> StopOutcome {
        let mut supervisor = self.inner.supervisor.lock().await;
        let Some(handle) = supervisor.take() else {
            return StopOutcome::AlreadyStopped;
        };

        self.inner.stop.raise();
        if self.state() != ConnectionState::Idle {
            self.inner.set_state(ConnectionState::Closing);
        }

        let connection = self
            .inner
            .connection
            .lock()
            .ok()
            .and_then(|mut current| current.take());
        if let Some(connection) = connection {
            match tokio::time::timeout(self.inner.policy.logout_timeout, connection.logout()).await {
                Ok(Ok(())) => tracing::info!("👋 Logged out of WhatsApp"),
                Ok(Err(e)) => tracing::warn!("⚠️ Logout failed: {e}"),
                Err(_) => tracing::warn!("⚠️ Logout timed out"),
            }
            connection.end().await;
        }

        if let Err(e) = handle.await {
            tracing::warn!("⚠️ Supervisor task ended abnormally: {e}");
        }

        self.inner.set_state(ConnectionState::Closed);
        self.inner.set_state(ConnectionState::Idle);
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.stop.clear();
        self.inner.info("🛑 Bot stopped");
        StopOutcome::Stopped
    }

    /// Forget the stored session so the next start pairs again.
    pub async fn clear_credentials(&self) -> Result<()> {
        if self.is_running() || self.state().is_running() {
            return Err(RemindClawError::Channel(
                "stop the bot before clearing the session".into(),
            ));
        }
        self.inner.credentials.clear().await?;
        self.inner.info("🧹 Session cleared, a new QR code will be required");
        Ok(())
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            tracing::debug!("🔁 Connection state: {prev} → {next}");
        }
    }

    fn set_connection(&self, connection: Option<Arc<dyn GatewayConnection>>) {
        if let Ok(mut current) = self.connection.lock() {
            *current = connection;
        }
    }

    fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("{message}");
        self.events.log(message);
    }

    fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.events.log(message);
    }

    fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.events.log(message);
    }

    async fn supervise(self: Arc<Self>, stop: CancellationToken) {
        let mut failed_attempts: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            let credentials = match self.credentials.load().await {
                Ok(credentials) => credentials,
                Err(e) => {
                    self.warn(format!("⚠️ Could not load stored session: {e}"));
                    None
                }
            };
            if credentials.is_none() {
                tracing::info!("🔑 No stored session, pairing required");
            }

            let connected = tokio::select! {
                biased;
                _ = stop.cancelled() => return,
                result = self.gateway.connect(credentials) => result,
            };

            let end = match connected {
                Ok((connection, events)) => {
                    self.set_connection(Some(connection.clone()));
                    let end = self
                        .drive(connection.clone(), events, &stop, &mut failed_attempts)
                        .await;
                    self.set_connection(None);
                    connection.end().await;
                    end
                }
                Err(e) => ConnectionEnd::Closed {
                    code: None,
                    message: e.to_string(),
                },
            };

            let (code, message) = match end {
                ConnectionEnd::Stopped => return,
                ConnectionEnd::Closed { code, message } => (code, message),
            };

            self.set_state(ConnectionState::Closed);
            let reason = classify(code);
            let code_text = code.map_or_else(|| "none".to_string(), |c| c.to_string());
            self.warn(format!("🔌 Connection closed: {reason} (code {code_text}) {message}"));
            if reason == DisconnectReason::Unknown {
                tracing::warn!("Unrecognised close code {code:?}: {message}");
            }

            match self.policy.decide(reason, failed_attempts) {
                RecoveryAction::Reconnect { delay, attempt } => {
                    failed_attempts = attempt;
                    self.info(format!(
                        "🔄 Reconnecting in {}s (attempt {attempt}/{})",
                        delay.as_secs_f64(),
                        self.policy.max_retries
                    ));
                    if !wait_or_stop(&stop, delay).await {
                        return;
                    }
                }
                RecoveryAction::Cooldown(cooldown) => {
                    self.warn(format!(
                        "⛔ Account temporarily blocked, retrying in {} min",
                        cooldown.as_secs() / 60
                    ));
                    if !wait_or_stop(&stop, cooldown).await {
                        return;
                    }
                }
                RecoveryAction::PurgeAndStop => {
                    if let Err(e) = self.credentials.clear().await {
                        self.error(format!("❌ Could not clear stored session: {e}"));
                    }
                    self.warn("🔒 Session logged out and cleared, start again to pair");
                    break;
                }
                RecoveryAction::GiveUp => {
                    self.error(format!(
                        "❌ Giving up after {} reconnection attempts",
                        self.policy.max_retries
                    ));
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
    }

    async fn drive(
        &self,
        connection: Arc<dyn GatewayConnection>,
        mut events: mpsc::Receiver<ConnectionEvent>,
        stop: &CancellationToken,
        failed_attempts: &mut u32,
    ) -> ConnectionEnd {
        let mut cycle: Option<CycleTask> = None;

        let end = loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break ConnectionEnd::Stopped,
                outcome = join_cycle(&mut cycle) => {
                    cycle = None;
                    self.finish_cycle(outcome);
                }
                event = events.recv() => match event {
                    Some(ConnectionEvent::Pairing(payload)) => {
                        self.set_state(ConnectionState::AwaitingPairing);
                        let qr = match qr_data_url(&payload) {
                            Ok(url) => url,
                            Err(e) => {
                                self.warn(format!("⚠️ Could not render QR code: {e}"));
                                payload
                            }
                        };
                        self.events.publish(Event::qr(qr));
                        self.info("📱 QR code received, scan it with WhatsApp");
                    }
                    Some(ConnectionEvent::CredentialsUpdated(blob)) => {
                        match self.credentials.save(&blob).await {
                            Ok(()) => tracing::debug!("🔑 Session credentials saved"),
                            Err(e) => self.warn(format!("⚠️ Could not save session: {e}")),
                        }
                    }
                    Some(ConnectionEvent::Open) => {
                        self.set_state(ConnectionState::Open);
                        *failed_attempts = 0;
                        self.info("✅ Connected to WhatsApp");
                        if cycle.is_none() {
                            let token = stop.child_token();
                            let handler = self.handler.clone();
                            let connection = connection.clone();
                            let cancel = token.clone();
                            let handle = tokio::spawn(async move {
                                handler.run_cycle(connection, cancel).await
                            });
                            cycle = Some((handle, token));
                        }
                    }
                    Some(ConnectionEvent::Closed { code, message }) => {
                        break ConnectionEnd::Closed { code, message };
                    }
                    None => {
                        break ConnectionEnd::Closed {
                            code: None,
                            message: "event stream ended".into(),
                        };
                    }
                },
            }
        };

        if let Some((handle, token)) = cycle.take() {
            token.cancel();
            let outcome = handle
                .await
                .unwrap_or_else(|e| CycleOutcome::Aborted(format!("cycle task failed: {e}")));
            self.finish_cycle(outcome);
        }
        end
    }

    fn finish_cycle(&self, outcome: CycleOutcome) {
        match &outcome {
            CycleOutcome::Completed => tracing::info!("🏁 Dispatch cycle finished"),
            CycleOutcome::Stopped => tracing::info!("⏹️ Dispatch cycle stopped"),
            CycleOutcome::Aborted(reason) => {
                self.error(format!("❌ Dispatch cycle aborted: {reason}"));
            }
        }
        self.cycles.send_modify(|n| *n += 1);
    }
}

async fn join_cycle(cycle: &mut Option<CycleTask>) -> CycleOutcome {
    match cycle {
        Some((handle, _)) => handle
            .await
            .unwrap_or_else(|e| CycleOutcome::Aborted(format!("cycle task failed: {e}"))),
        None => std::future::pending().await,
    }
}

/// Sleep unless stopped first. Returns `false` when stopped.
async fn wait_or_stop(stop: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        _ = stop.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
