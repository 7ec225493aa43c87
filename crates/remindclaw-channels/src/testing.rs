//! Scriptable in-memory gateway and credential store for tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use remindclaw_core::error::{RemindClawError, Result};
use remindclaw_core::traits::{
    ConnectionEvent, CredentialStore, GatewayConnection, MessagingGateway,
};
use remindclaw_core::types::CredentialBlob;

type SendHook = Box<dyn Fn(usize) + Send + Sync>;

#[derive(Default)]
struct MockState {
    scripts: Mutex<VecDeque<Vec<ConnectionEvent>>>,
    default_script: Mutex<Option<Vec<ConnectionEvent>>>,
    events_tx: Mutex<Option<mpsc::Sender<ConnectionEvent>>>,
    credentials_seen: Mutex<Vec<Option<CredentialBlob>>>,
    sent: Mutex<Vec<(String, String)>>,
    failing: Mutex<HashSet<String>>,
    hanging: Mutex<HashSet<String>>,
    on_send: Mutex<Option<SendHook>>,
    connects: AtomicUsize,
    logouts: AtomicUsize,
    ends: AtomicUsize,
}

/// Gateway whose connections replay a scripted event sequence.
///
/// Each `connect` pops the next script (falling back to the default script,
/// then to a bare `Open`). The event channel stays open afterwards so tests
/// can `emit` more events.
#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<MockState>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_script(&self, events: Vec<ConnectionEvent>) {
        if let Ok(mut scripts) = self.state.scripts.lock() {
            scripts.push_back(events);
        }
    }

    pub fn set_default_script(&self, events: Vec<ConnectionEvent>) {
        if let Ok(mut script) = self.state.default_script.lock() {
            *script = Some(events);
        }
    }

    /// Deliver an event on the most recent connection.
    pub async fn emit(&self, event: ConnectionEvent) {
        let tx = self.state.events_tx.lock().ok().and_then(|tx| tx.clone());
        if let Some(tx) = tx {
            let _ = tx.send(event).await;
        }
    }

    /// A connection handle sharing this gateway's recorders.
    pub fn connection(&self) -> Arc<dyn GatewayConnection> {
        Arc::new(MockConnection {
            state: self.state.clone(),
        })
    }

    /// Sends to `address` fail with a gateway error.
    pub fn fail_for(&self, address: &str) {
        if let Ok(mut failing) = self.state.failing.lock() {
            failing.insert(address.to_string());
        }
    }

    /// Sends to `address` never complete.
    pub fn hang_for(&self, address: &str) {
        if let Ok(mut hanging) = self.state.hanging.lock() {
            hanging.insert(address.to_string());
        }
    }

    /// Called with the running success count after every successful send.
    pub fn on_send(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        if let Ok(mut slot) = self.state.on_send.lock() {
            *slot = Some(Box::new(hook));
        }
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.state.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn credentials_seen(&self) -> Vec<Option<CredentialBlob>> {
        self.state
            .credentials_seen
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn connect_count(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn logout_count(&self) -> usize {
        self.state.logouts.load(Ordering::SeqCst)
    }

    pub fn end_count(&self) -> usize {
        self.state.ends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessagingGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn connect(
        &self,
        credentials: Option<CredentialBlob>,
    ) -> Result<(Arc<dyn GatewayConnection>, mpsc::Receiver<ConnectionEvent>)> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.state.credentials_seen.lock() {
            seen.push(credentials);
        }

        let script = self
            .state
            .scripts
            .lock()
            .ok()
            .and_then(|mut s| s.pop_front())
            .or_else(|| self.state.default_script.lock().ok().and_then(|d| d.clone()))
            .unwrap_or_else(|| vec![ConnectionEvent::Open]);

        let (tx, rx) = mpsc::channel(script.len() + 16);
        for event in script {
            let _ = tx.try_send(event);
        }
        if let Ok(mut current) = self.state.events_tx.lock() {
            *current = Some(tx);
        }
        Ok((self.connection(), rx))
    }
}

struct MockConnection {
    state: Arc<MockState>,
}

#[async_trait]
impl GatewayConnection for MockConnection {
    async fn send_text(&self, address: &str, text: &str) -> Result<()> {
        let hang = self
            .state
            .hanging
            .lock()
            .map(|h| h.contains(address))
            .unwrap_or(false);
        if hang {
            std::future::pending::<()>().await;
        }
        let fail = self
            .state
            .failing
            .lock()
            .map(|f| f.contains(address))
            .unwrap_or(false);
        if fail {
            return Err(RemindClawError::Channel(format!("send to {address} rejected")));
        }

        let count = match self.state.sent.lock() {
            Ok(mut sent) => {
                sent.push((address.to_string(), text.to_string()));
                sent.len()
            }
            Err(_) => return Err(RemindClawError::Channel("mock poisoned".into())),
        };
        if let Ok(hook) = self.state.on_send.lock()
            && let Some(hook) = hook.as_ref()
        {
            hook(count);
        }
        Ok(())
    }

    async fn logout(&self) -> Result<()> {
        self.state.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn end(&self) {
        self.state.ends.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut current) = self.state.events_tx.lock() {
            current.take();
        }
    }
}

/// Credential store held in memory.
#[derive(Default)]
pub struct MemoryCredentials {
    blob: Mutex<Option<CredentialBlob>>,
}

impl MemoryCredentials {
    pub fn set(&self, blob: Option<CredentialBlob>) {
        if let Ok(mut current) = self.blob.lock() {
            *current = blob;
        }
    }

    pub fn current(&self) -> Option<CredentialBlob> {
        self.blob.lock().ok().and_then(|b| b.clone())
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentials {
    async fn load(&self) -> Result<Option<CredentialBlob>> {
        Ok(self.current())
    }

    async fn save(&self, blob: &CredentialBlob) -> Result<()> {
        self.set(Some(blob.clone()));
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.set(None);
        Ok(())
    }
}
