// Leased lock client
//
// Holds one named lock on the coordination service:
// - acquire: CHECK then CLAIM, once or until it succeeds
// - maintain: one background task re-runs CHECK/CLAIM every interval
// - release: stop the maintainer and wait for it to finish
//
// The service is the source of truth. Any failed renewal is treated as a
// definitive loss; the client never retries past it.

use crate::{
    client::{CoordinationClient, HttpCoordinationClient},
    config::LeaseConfig,
    Error, Result,
};
use reqwest::StatusCode;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, trace, warn};

/// User callback fired on a lease transition
pub type Callback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseState {
    /// Never acquired, or released by the caller
    Released,
    /// Acquired and being renewed
    Held,
    /// A renewal failed; the service may have handed the lock to someone else
    Lost,
}

/// Outcome of one check-then-claim cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    Claimed,
    /// The status that stopped the cycle (from CHECK or CLAIM)
    Rejected(StatusCode),
}

impl Attempt {
    pub fn is_claimed(self) -> bool {
        self == Attempt::Claimed
    }
}

/// Run one CHECK/CLAIM cycle against the service.
///
/// CLAIM is only issued when CHECK reports the lock as missing or existing.
pub async fn attempt(client: &dyn CoordinationClient, name: &str) -> Result<Attempt> {
    let status = client.check(name).await?;
    if status != StatusCode::OK && status != StatusCode::NOT_FOUND {
        return Ok(Attempt::Rejected(status));
    }

    let status = client.claim(name).await?;
    if status == StatusCode::OK {
        Ok(Attempt::Claimed)
    } else {
        Ok(Attempt::Rejected(status))
    }
}

#[derive(Default, Clone)]
struct Handlers {
    on_acquired: Option<Callback>,
    on_lost: Option<Callback>,
}

/// The background renewal task of a held lease
struct Maintainer {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Clears the liveness flag when the maintainer future ends or is dropped
struct Alive(Arc<AtomicBool>);

impl Drop for Alive {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct LeaseClient {
    name: String,
    client: Arc<dyn CoordinationClient>,
    interval: Duration,
    handlers: Handlers,
    state: Arc<watch::Sender<LeaseState>>,
    maintaining: Arc<AtomicBool>,

    /// Serializes acquire/release. `Some` iff a maintainer was started and
    /// not yet reaped.
    maintainer: Mutex<Option<Maintainer>>,
}

impl std::fmt::Debug for LeaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseClient")
            .field("name", &self.name)
            .field("client", &self.client)
            .field("interval", &self.interval)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl LeaseClient {
    /// Lease client talking HTTP to `config.endpoint`
    pub fn new(name: impl Into<String>, config: &LeaseConfig) -> Result<Self> {
        let client = HttpCoordinationClient::new(config)?;
        Ok(Self::with_client(name, Arc::new(client), config.interval()))
    }

    pub fn with_client(
        name: impl Into<String>,
        client: Arc<dyn CoordinationClient>,
        interval: Duration,
    ) -> Self {
        let (state, _) = watch::channel(LeaseState::Released);
        Self {
            name: name.into(),
            client,
            interval,
            handlers: Handlers::default(),
            state: Arc::new(state),
            maintaining: Arc::new(AtomicBool::new(false)),
            maintainer: Mutex::new(None),
        }
    }

    /// Fired once each time the lease is acquired
    #[must_use]
    pub fn on_acquired(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.handlers.on_acquired = Some(Arc::new(callback));
        self
    }

    /// Fired once each time a held lease ends: when a renewal fails, or after
    /// [`LeaseClient::release`] has stopped the maintainer. Without it a
    /// failed renewal is only visible through [`LeaseClient::ensure_held`]
    /// and friends.
    #[must_use]
    pub fn on_lost(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.handlers.on_lost = Some(Arc::new(callback));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn state(&self) -> LeaseState {
        *self.state.borrow()
    }

    pub fn is_held(&self) -> bool {
        self.state() == LeaseState::Held
    }

    pub fn subscribe(&self) -> watch::Receiver<LeaseState> {
        self.state.subscribe()
    }

    /// `Err(LeaseLost)` if the last held lease failed renewal
    pub fn ensure_held(&self) -> Result<()> {
        match self.state() {
            LeaseState::Held => Ok(()),
            LeaseState::Lost => Err(Error::lease_lost(&self.name)),
            LeaseState::Released => Err(Error::concurrency(&self.name, "lease is not held")),
        }
    }

    /// Resolves with `LeaseLost` once the lease is lost
    pub async fn lost(&self) -> Error {
        let mut state = self.subscribe();
        // The sender lives as long as `self`, so this only ends on `Lost`
        let _ = state.wait_for(|s| *s == LeaseState::Lost).await;
        Error::lease_lost(&self.name)
    }

    /// True iff a maintainer task is currently running. Never waits on a
    /// concurrent acquire or release.
    pub fn is_maintaining(&self) -> bool {
        self.maintaining.load(Ordering::SeqCst)
    }

    /// One check-then-claim cycle without touching local state
    pub async fn attempt(&self) -> Result<Attempt> {
        attempt(self.client.as_ref(), &self.name).await
    }

    /// Obtain the lease.
    ///
    /// Non-blocking: exactly one attempt. Blocking: retry every interval until
    /// claimed, with no timeout. Transport errors are returned, not retried.
    pub async fn acquire(&self, blocking: bool) -> Result<bool> {
        let mut slot = self.maintainer.lock().await;
        self.reap(&mut slot).await?;

        loop {
            match self.attempt().await? {
                Attempt::Claimed => {
                    self.hold(&mut slot);
                    return Ok(true);
                }
                Attempt::Rejected(status) => {
                    debug!(lock = %self.name, %status, "lock not acquired");
                    if !blocking {
                        return Ok(false);
                    }
                    sleep(self.interval).await;
                }
            }
        }
    }

    /// Blocking acquire bounded by `timeout`. `Ok(false)` once it expires.
    pub async fn acquire_timeout(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.maintainer.lock().await;
        self.reap(&mut slot).await?;

        loop {
            match self.attempt().await? {
                Attempt::Claimed => {
                    self.hold(&mut slot);
                    return Ok(true);
                }
                Attempt::Rejected(status) => {
                    debug!(lock = %self.name, %status, "lock not acquired");
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return Ok(false);
                    }
                    sleep(remaining.min(self.interval)).await;
                }
            }
        }
    }

    /// Stop renewing and give up the lease.
    ///
    /// Returns only after the maintainer task has finished, so no renewal can
    /// be issued once this resolves. `on_lost` fires after the join, unless
    /// the maintainer already reported a failed renewal.
    pub async fn release(&self) -> Result<()> {
        let mut slot = self.maintainer.lock().await;
        if !self.is_held() {
            self.reap(&mut slot).await?;
            return Err(Error::concurrency(&self.name, "lease is not held"));
        }
        let Some(maintainer) = slot.take() else {
            return Err(Error::concurrency(&self.name, "lease is not held"));
        };

        // The maintainer may already have exited after a loss; ignore a closed channel
        let _ = maintainer.stop.send(());
        let joined = maintainer.handle.await;
        let previous = self.state.send_replace(LeaseState::Released);
        joined.map_err(|e| anyhow::anyhow!("maintainer for {} failed: {}", self.name, e))?;

        if previous == LeaseState::Lost {
            return Err(Error::lease_lost(&self.name));
        }
        info!(lock = %self.name, "lease released");
        if let Some(on_lost) = &self.handlers.on_lost {
            on_lost();
        }
        Ok(())
    }

    /// Acquire, run `work` while holding the lease, then release.
    ///
    /// `Ok(None)` if the lease could not be acquired. If the lease is lost
    /// while `work` runs, `work` is dropped and `LeaseLost` returned.
    pub async fn run_locked<F, Fut, T>(&self, blocking: bool, work: F) -> Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        if !self.acquire(blocking).await? {
            return Ok(None);
        }

        tokio::select! {
            output = work() => {
                self.release().await?;
                Ok(Some(output))
            }
            lost = self.lost() => {
                // Collect the finished maintainer; the release error is the loss itself
                let _ = self.release().await;
                Err(lost)
            }
        }
    }

    /// Reject re-entry and collect a maintainer that exited after a loss
    async fn reap(&self, slot: &mut Option<Maintainer>) -> Result<()> {
        if self.is_held() {
            return Err(Error::concurrency(&self.name, "locks are not reentrant"));
        }
        if let Some(maintainer) = slot.take() {
            maintainer
                .handle
                .await
                .map_err(|e| anyhow::anyhow!("maintainer for {} failed: {}", self.name, e))?;
            self.state.send_replace(LeaseState::Released);
        }
        Ok(())
    }

    fn hold(&self, slot: &mut Option<Maintainer>) {
        let (stop, stop_rx) = oneshot::channel();
        self.state.send_replace(LeaseState::Held);
        self.maintaining.store(true, Ordering::SeqCst);

        let handle = tokio::spawn(maintain(
            Alive(self.maintaining.clone()),
            self.name.clone(),
            self.client.clone(),
            self.interval,
            self.state.clone(),
            self.handlers.on_lost.clone(),
            stop_rx,
        ));
        *slot = Some(Maintainer { stop, handle });
        info!(lock = %self.name, "lease acquired");

        if let Some(on_acquired) = &self.handlers.on_acquired {
            on_acquired();
        }
    }
}

async fn maintain(
    _alive: Alive,
    name: String,
    client: Arc<dyn CoordinationClient>,
    interval: Duration,
    state: Arc<watch::Sender<LeaseState>>,
    on_lost: Option<Callback>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            // Fires on release, and when the client is dropped
            _ = &mut stop => {
                debug!(lock = %name, "maintainer stopped");
                return;
            }
            () = sleep(interval) => {}
        }

        match attempt(client.as_ref(), &name).await {
            Ok(Attempt::Claimed) => {
                trace!(lock = %name, "lease renewed");
                continue;
            }
            Ok(Attempt::Rejected(status)) => {
                warn!(lock = %name, %status, "lease renewal rejected");
            }
            Err(err) => {
                warn!(lock = %name, error = %err, "lease renewal failed");
            }
        }

        state.send_replace(LeaseState::Lost);
        match &on_lost {
            Some(on_lost) => on_lost(),
            None => error!(lock = %name, "lease lost with no on_lost handler registered"),
        }
        return;
    }
}
