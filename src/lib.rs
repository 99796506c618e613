//! Leased locks and leader election against an HTTP lock sidecar.
//!
//! A [`LeaseClient`] claims a named lock on the coordination service and
//! keeps renewing it from a background task until released. An
//! [`ElectionLoop`] turns the lease's acquired/lost transitions into
//! "became master" / "lost mastership" callbacks.
//!
//! ```no_run
//! use leasehold::{LeaseClient, LeaseConfig};
//!
//! # async fn example() -> leasehold::Result<()> {
//! let lease = LeaseClient::new("db-migration", &LeaseConfig::default())?
//!     .on_lost(|| eprintln!("lost the migration lock"));
//!
//! if lease.acquire(false).await? {
//!     // ... exclusive work
//!     lease.release().await?;
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod client;
pub mod config;
pub mod election;
pub mod error;
pub mod lease;

pub mod test_utils;

pub use client::{CoordinationClient, HttpCoordinationClient};
pub use config::{LeaseConfig, DEFAULT_ENDPOINT, DEFAULT_INTERVAL};
pub use election::ElectionLoop;
pub use error::{Error, Result};
pub use lease::{Attempt, Callback, LeaseClient, LeaseState};
pub use reqwest::StatusCode;
