// Coordination service doubles for tests
//
// InMemoryCoordinator models a lock table shared by several sidecars: each
// `connect()` is one process with its own owner id. ScriptedClient replays
// canned statuses for exercising the acquire protocol step by step.

use crate::{client::CoordinationClient, Error, Result};
use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use parking_lot::Mutex;
use reqwest::StatusCode;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy)]
struct Claim {
    owner: Uuid,
    renewed: Instant,
}

#[derive(Debug)]
struct LockTable {
    locks: DashMap<String, Claim>,
    ttl: Duration,
    unreachable: AtomicBool,
}

impl LockTable {
    fn is_fresh(&self, claim: &Claim, now: Instant) -> bool {
        now.duration_since(claim.renewed) < self.ttl
    }
}

/// Lock table with lease expiry, shared by every connected client
#[derive(Debug, Clone)]
pub struct InMemoryCoordinator {
    table: Arc<LockTable>,
}

impl InMemoryCoordinator {
    /// Claims not renewed within `ttl` can be taken over by another owner
    pub fn new(ttl: Duration) -> Self {
        Self {
            table: Arc::new(LockTable {
                locks: DashMap::new(),
                ttl,
                unreachable: AtomicBool::new(false),
            }),
        }
    }

    /// A client with a fresh owner id
    pub fn connect(&self) -> Arc<MemoryClient> {
        Arc::new(MemoryClient {
            id: Uuid::new_v4(),
            table: self.table.clone(),
            checks: AtomicUsize::new(0),
            claims: AtomicUsize::new(0),
        })
    }

    /// Owner of an unexpired claim on `name`
    pub fn holder(&self, name: &str) -> Option<Uuid> {
        let now = Instant::now();
        self.table
            .locks
            .get(name)
            .filter(|claim| self.table.is_fresh(claim, now))
            .map(|claim| claim.owner)
    }

    /// Drop the claim on `name` as if it had expired
    pub fn revoke(&self, name: &str) {
        self.table.locks.remove(name);
    }

    /// While set, every request fails without a status
    pub fn set_unreachable(&self, unreachable: bool) {
        self.table.unreachable.store(unreachable, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MemoryClient {
    id: Uuid,
    table: Arc<LockTable>,
    checks: AtomicUsize,
    claims: AtomicUsize,
}

impl MemoryClient {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn checks(&self) -> usize {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn claims(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }

    /// An outage fails with `Error::Other`. It stands in for the
    /// status-less `Error::Transport` of the HTTP client, which tests cannot
    /// build because `reqwest::Error` has no public constructor.
    fn reachable(&self) -> Result<()> {
        if self.table.unreachable.load(Ordering::SeqCst) {
            return Err(Error::Other(anyhow::anyhow!(
                "coordination service unreachable"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl CoordinationClient for MemoryClient {
    async fn check(&self, name: &str) -> Result<StatusCode> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        self.reachable()?;

        if self.table.locks.contains_key(name) {
            Ok(StatusCode::OK)
        } else {
            Ok(StatusCode::NOT_FOUND)
        }
    }

    async fn claim(&self, name: &str) -> Result<StatusCode> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        self.reachable()?;

        let now = Instant::now();
        let claim = Claim {
            owner: self.id,
            renewed: now,
        };
        match self.table.locks.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if current.owner != self.id && self.table.is_fresh(&current, now) {
                    return Ok(StatusCode::CONFLICT);
                }
                entry.insert(claim);
            }
            Entry::Vacant(entry) => {
                entry.insert(claim);
            }
        }
        Ok(StatusCode::OK)
    }
}

/// Replays queued responses, then answers with a fixed fallback
#[derive(Debug)]
pub struct ScriptedClient {
    /// `None` stands for a transport failure
    checks: Mutex<VecDeque<Option<StatusCode>>>,
    claims: Mutex<VecDeque<StatusCode>>,
    fallback_check: StatusCode,
    fallback_claim: StatusCode,
    check_times: Mutex<Vec<Instant>>,
    claim_count: AtomicUsize,
}

impl ScriptedClient {
    /// Falls back to 503 for both operations once the script runs out
    pub fn new() -> Self {
        Self::with_fallback(StatusCode::SERVICE_UNAVAILABLE, StatusCode::SERVICE_UNAVAILABLE)
    }

    pub fn with_fallback(check: StatusCode, claim: StatusCode) -> Self {
        Self {
            checks: Mutex::new(VecDeque::new()),
            claims: Mutex::new(VecDeque::new()),
            fallback_check: check,
            fallback_claim: claim,
            check_times: Mutex::new(Vec::new()),
            claim_count: AtomicUsize::new(0),
        }
    }

    /// Queue one CHECK response and, if the cycle reaches it, one CLAIM response
    pub fn push(&self, check: StatusCode, claim: Option<StatusCode>) {
        self.checks.lock().push_back(Some(check));
        if let Some(claim) = claim {
            self.claims.lock().push_back(claim);
        }
    }

    /// Queue a CHECK that fails without a status. Surfaces as
    /// `Error::Other` in place of `Error::Transport`, since a
    /// `reqwest::Error` cannot be constructed outside reqwest.
    pub fn push_error(&self) {
        self.checks.lock().push_back(None);
    }

    pub fn checks(&self) -> usize {
        self.check_times.lock().len()
    }

    pub fn claims(&self) -> usize {
        self.claim_count.load(Ordering::SeqCst)
    }

    /// When each CHECK was issued
    pub fn check_times(&self) -> Vec<Instant> {
        self.check_times.lock().clone()
    }
}

impl Default for ScriptedClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationClient for ScriptedClient {
    async fn check(&self, _name: &str) -> Result<StatusCode> {
        self.check_times.lock().push(Instant::now());
        match self.checks.lock().pop_front() {
            Some(Some(status)) => Ok(status),
            Some(None) => Err(Error::Other(anyhow::anyhow!("scripted transport failure"))),
            None => Ok(self.fallback_check),
        }
    }

    async fn claim(&self, _name: &str) -> Result<StatusCode> {
        self.claim_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.claims.lock().pop_front().unwrap_or(self.fallback_claim))
    }
}
