// Leader election on top of a single LeaseClient
//
// Holding the lease means being master. The lease's acquired/lost
// transitions drive the user's master/lost callbacks, and `run` keeps
// competing for the lease until `shutdown` is called.

use crate::{
    client::CoordinationClient,
    config::LeaseConfig,
    lease::LeaseClient,
    Error, Result,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info};

pub struct ElectionLoop {
    lease: LeaseClient,
    running: AtomicBool,

    /// Set by `shutdown`, never cleared
    stopping: AtomicBool,

    /// Woken by `shutdown` and by a lost lease
    wake: Arc<Notify>,
}

impl std::fmt::Debug for ElectionLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElectionLoop")
            .field("lease", &self.lease)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ElectionLoop {
    /// Election over HTTP against `config.endpoint`
    pub fn new(
        name: impl Into<String>,
        config: &LeaseConfig,
        master: impl Fn() + Send + Sync + 'static,
        lost: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self> {
        let client = crate::client::HttpCoordinationClient::new(config)?;
        Ok(Self::with_client(
            name,
            Arc::new(client),
            config.interval(),
            master,
            lost,
        ))
    }

    pub fn with_client(
        name: impl Into<String>,
        client: Arc<dyn CoordinationClient>,
        interval: Duration,
        master: impl Fn() + Send + Sync + 'static,
        lost: impl Fn() + Send + Sync + 'static,
    ) -> Self {
        let wake = Arc::new(Notify::new());
        let on_lost = {
            let wake = wake.clone();
            move || {
                lost();
                // Send `run` back to acquisition
                wake.notify_one();
            }
        };

        let lease = LeaseClient::with_client(name, client, interval)
            .on_acquired(master)
            .on_lost(on_lost);

        Self {
            lease,
            running: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            wake,
        }
    }

    pub fn lease(&self) -> &LeaseClient {
        &self.lease
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn is_master(&self) -> bool {
        self.lease.is_held()
    }

    fn is_stopping(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Compete for mastership until [`ElectionLoop::shutdown`].
    ///
    /// Blocks in acquisition while another process is master, and parks once
    /// master. A lost lease sends the loop back to acquisition. The lease is
    /// released before this returns, which fires the lost callback.
    ///
    /// Returns at once, without competing, if `shutdown` came first.
    pub async fn run(&self) -> Result<()> {
        if self.is_stopping() {
            debug!(election = %self.lease.name(), "shutdown requested before run");
            return Ok(());
        }
        self.running.store(true, Ordering::SeqCst);
        info!(election = %self.lease.name(), "election started");

        let campaigned = self.campaign().await;
        self.running.store(false, Ordering::SeqCst);
        campaigned?;

        let released = if self.lease.is_held() {
            self.lease.release().await
        } else {
            Ok(())
        };
        info!(election = %self.lease.name(), "election stopped");

        match released {
            Err(Error::LeaseLost { .. }) => {
                debug!(election = %self.lease.name(), "lease lost during shutdown");
                Ok(())
            }
            other => other,
        }
    }

    async fn campaign(&self) -> Result<()> {
        while !self.is_stopping() {
            if !self.lease.is_held() {
                tokio::select! {
                    acquired = self.lease.acquire(true) => {
                        acquired?;
                    }
                    // Shutdown while still waiting for the lease
                    () = self.wake.notified() => continue,
                }
            }
            if self.is_stopping() {
                break;
            }
            self.wake.notified().await;
        }
        Ok(())
    }

    /// Stop `run`, from any task. Also takes effect if `run` has not
    /// started yet; a shut down election stays shut down.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }
}
