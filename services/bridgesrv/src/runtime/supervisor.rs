//! Connection supervision
//!
//! One supervisor owns one device link and runs the health state machine:
//!
//! ```text
//!            start                      connect ok
//! Disconnected ────► Connecting ─────────────────► Healthy ──┐ truthy liveness read
//!      ▲               │  ▲                          │  ▲    │ (debounced: N in a row
//!      │    backoff    │  └── connect failed,        │  └────┘  fires on_recovered once)
//!      │               │      wait backoff           │
//!      │               ▼                             │ falsy read, read error,
//!      └───────── (backoff) ◄── Degrading ◄──────────┘ or report_failure()
//!                  disconnect (best effort)
//! ```
//!
//! Retries are unbounded. `on_disconnected` fires only when a confirmed episode
//! ends, so every `on_recovered` is paired with at most one `on_disconnected`.

use crate::core::link::DeviceLink;
use crate::core::types::{Value, VariableKind};
use crate::error::LinkError;
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Link state as seen by the rest of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Disconnected,
    Connecting,
    Healthy,
    Degrading,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Supervisor tunables
#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorPolicy {
    /// Wait between connect attempts and after a degrade
    pub backoff: Duration,
    /// Liveness read pace until the link is confirmed
    pub confirm_interval: Duration,
    /// Liveness read pace once confirmed
    pub monitor_interval: Duration,
    /// Consecutive truthy liveness reads needed to confirm
    pub debounce: u32,
    /// Upper bound for every device call
    pub io_timeout: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            confirm_interval: Duration::from_millis(200),
            monitor_interval: Duration::from_secs(1),
            debounce: 5,
            io_timeout: Duration::from_secs(3),
        }
    }
}

/// Receives episode edges of a supervised link
pub trait LinkObserver: Send + Sync {
    /// Link confirmed after the debounce count of truthy liveness reads
    fn on_recovered(&self, link: &str);

    /// A confirmed link was lost
    fn on_disconnected(&self, link: &str);
}

/// Supervision counters
#[derive(Debug, Default, Clone)]
pub struct SupervisorStats {
    pub connect_attempts: u64,
    pub failed_connects: u64,
    pub recoveries: u64,
    pub disconnects: u64,
    pub last_recovered: Option<Instant>,
}

/// Liveness variable of a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Liveness {
    pub address: String,
    pub kind: VariableKind,
}

impl Liveness {
    pub fn bit(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            kind: VariableKind::Bit,
        }
    }
}

pub struct ConnectionSupervisor {
    name: String,
    endpoint: String,
    link: tokio::sync::Mutex<Box<dyn DeviceLink>>,
    liveness: Liveness,
    policy: SupervisorPolicy,
    state: watch::Sender<LinkState>,
    confirmed: AtomicBool,
    streak: AtomicU32,
    failure_reported: AtomicBool,
    failure_notify: Notify,
    observers: RwLock<Vec<Arc<dyn LinkObserver>>>,
    stats: Mutex<SupervisorStats>,
}

impl fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("name", &self.name)
            .field("endpoint", &self.endpoint)
            .field("state", &self.state())
            .field("confirmed", &self.is_confirmed())
            .finish()
    }
}

impl ConnectionSupervisor {
    pub fn new(
        name: impl Into<String>,
        link: Box<dyn DeviceLink>,
        liveness: Liveness,
        policy: SupervisorPolicy,
    ) -> Self {
        let (state, _) = watch::channel(LinkState::Disconnected);
        Self {
            name: name.into(),
            endpoint: link.endpoint(),
            link: tokio::sync::Mutex::new(link),
            liveness,
            policy,
            state,
            confirmed: AtomicBool::new(false),
            streak: AtomicU32::new(0),
            failure_reported: AtomicBool::new(false),
            failure_notify: Notify::new(),
            observers: RwLock::new(Vec::new()),
            stats: Mutex::new(SupervisorStats::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> &SupervisorPolicy {
        &self.policy
    }

    pub fn subscribe(&self, observer: Arc<dyn LinkObserver>) {
        self.observers.write().push(observer);
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.subscribe()
    }

    /// Non-blocking; true while connected, confirmed or not
    pub fn is_healthy(&self) -> bool {
        self.state() == LinkState::Healthy
    }

    /// Healthy and past the debounce count
    pub fn is_confirmed(&self) -> bool {
        self.confirmed.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> SupervisorStats {
        self.stats.lock().clone()
    }

    /// Tell the supervisor an operation on its link failed
    ///
    /// Forces `Degrading` when healthy; ignored in any other state, so any
    /// number of callers may report the same outage.
    pub fn report_failure(&self) {
        if self.state() != LinkState::Healthy {
            return;
        }
        if !self.failure_reported.swap(true, Ordering::AcqRel) {
            debug!("Link {}: failure reported", self.name);
            self.failure_notify.notify_one();
        }
    }

    /// Read through the supervised link; refused unless healthy
    pub async fn read(
        &self,
        address: &str,
        kind: VariableKind,
        count: u16,
    ) -> Result<Value, LinkError> {
        if !self.is_healthy() {
            return Err(LinkError::NotConnected);
        }
        self.read_link(address, kind, count).await
    }

    /// Write through the supervised link; refused unless healthy
    pub async fn write(
        &self,
        address: &str,
        value: &Value,
        kind: VariableKind,
    ) -> Result<(), LinkError> {
        if !self.is_healthy() {
            return Err(LinkError::NotConnected);
        }
        let mut link = self.link.lock().await;
        self.bounded(link.write(address, value, kind)).await
    }

    async fn read_link(
        &self,
        address: &str,
        kind: VariableKind,
        count: u16,
    ) -> Result<Value, LinkError> {
        let mut link = self.link.lock().await;
        self.bounded(link.read(address, kind, count)).await
    }

    async fn bounded<T>(
        &self,
        op: impl Future<Output = Result<T, LinkError>>,
    ) -> Result<T, LinkError> {
        tokio::time::timeout(self.policy.io_timeout, op)
            .await
            .map_err(|_| LinkError::Timeout(self.policy.io_timeout))?
    }

    fn set_state(&self, next: LinkState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            debug!("Link {}: {} -> {}", self.name, prev, next);
        }
    }

    /// Run the state machine until cancelled
    pub async fn run(&self, cancel: CancellationToken) {
        info!(
            "Supervising link {} ({}), liveness {}",
            self.name, self.endpoint, self.liveness.address
        );
        let mut first_connect = true;

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let state = self.state();
            let keep_running = match state {
                LinkState::Disconnected => {
                    // Immediate at startup, one backoff after a degrade
                    let ready = first_connect || self.sleep(self.policy.backoff, &cancel).await;
                    first_connect = false;
                    if ready {
                        self.set_state(LinkState::Connecting);
                    }
                    ready
                },
                LinkState::Connecting => self.try_connect(&cancel).await,
                LinkState::Healthy => self.check_liveness(&cancel).await,
                LinkState::Degrading => {
                    self.degrade().await;
                    true
                },
            };

            if !keep_running {
                break;
            }
        }

        self.shutdown().await;
        info!("Supervisor for link {} stopped", self.name);
    }

    /// `false` when cancelled during the wait
    async fn sleep(&self, duration: Duration, cancel: &CancellationToken) -> bool {
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }

    async fn try_connect(&self, cancel: &CancellationToken) -> bool {
        self.stats.lock().connect_attempts += 1;

        let result = tokio::select! {
            () = cancel.cancelled() => return false,
            result = async {
                let mut link = self.link.lock().await;
                self.bounded(link.connect()).await
            } => result,
        };

        match result {
            Ok(()) => {
                info!("Link {} connected to {}", self.name, self.endpoint);
                self.streak.store(0, Ordering::Release);
                self.failure_reported.store(false, Ordering::Release);
                self.set_state(LinkState::Healthy);
                true
            },
            Err(e) => {
                self.stats.lock().failed_connects += 1;
                warn!(
                    "Link {} connect failed: {}; retrying in {:?}",
                    self.name, e, self.policy.backoff
                );
                self.sleep(self.policy.backoff, cancel).await
            },
        }
    }

    async fn check_liveness(&self, cancel: &CancellationToken) -> bool {
        if self.failure_reported.swap(false, Ordering::AcqRel) {
            warn!("Link {}: operation failure reported, degrading", self.name);
            self.set_state(LinkState::Degrading);
            return true;
        }

        let read = tokio::select! {
            () = cancel.cancelled() => return false,
            read = self.read_link(&self.liveness.address, self.liveness.kind, 1) => read,
        };

        match read {
            Ok(value) if value.is_truthy() => {
                if !self.is_confirmed() {
                    let streak = self.streak.fetch_add(1, Ordering::AcqRel) + 1;
                    debug!(
                        "Link {}: liveness {}/{}",
                        self.name, streak, self.policy.debounce
                    );
                    if streak >= self.policy.debounce {
                        self.confirm();
                    }
                }
            },
            Ok(value) => {
                warn!(
                    "Link {}: liveness {} reads {}, degrading",
                    self.name, self.liveness.address, value
                );
                self.streak.store(0, Ordering::Release);
                self.set_state(LinkState::Degrading);
                return true;
            },
            Err(e) => {
                warn!("Link {}: liveness read failed: {}, degrading", self.name, e);
                self.streak.store(0, Ordering::Release);
                self.set_state(LinkState::Degrading);
                return true;
            },
        }

        let pace = if self.is_confirmed() {
            self.policy.monitor_interval
        } else {
            self.policy.confirm_interval
        };
        tokio::select! {
            () = cancel.cancelled() => false,
            () = tokio::time::sleep(pace) => true,
            () = self.failure_notify.notified() => true,
        }
    }

    fn confirm(&self) {
        self.confirmed.store(true, Ordering::Release);
        {
            let mut stats = self.stats.lock();
            stats.recoveries += 1;
            stats.last_recovered = Some(Instant::now());
        }
        info!("Link {} recovered", self.name);

        let observers = self.observers.read().clone();
        for observer in observers {
            observer.on_recovered(&self.name);
        }
    }

    async fn degrade(&self) {
        self.streak.store(0, Ordering::Release);
        self.failure_reported.store(false, Ordering::Release);

        {
            let mut link = self.link.lock().await;
            if let Err(e) = self.bounded(link.disconnect()).await {
                warn!("Link {} disconnect failed: {}", self.name, e);
            }
        }

        if self.confirmed.swap(false, Ordering::AcqRel) {
            self.stats.lock().disconnects += 1;
            warn!("Link {} lost", self.name);
            let observers = self.observers.read().clone();
            for observer in observers {
                observer.on_disconnected(&self.name);
            }
        }

        self.set_state(LinkState::Disconnected);
    }

    async fn shutdown(&self) {
        if self.state() == LinkState::Disconnected {
            return;
        }
        let mut link = self.link.lock().await;
        if let Err(e) = self.bounded(link.disconnect()).await {
            debug!("Link {} disconnect on shutdown failed: {}", self.name, e);
        }
        drop(link);
        self.confirmed.store(false, Ordering::Release);
        self.set_state(LinkState::Disconnected);
    }
}
