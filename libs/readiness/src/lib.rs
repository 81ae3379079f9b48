//! Readiness primitives for provisioning loops.
//!
//! Two building blocks used throughout the pipeline:
//!
//! - [`poll_until`]: invoke an async predicate at a fixed interval until it
//!   reports ready or a deadline elapses. Used for provider action
//!   completion, droplet-active waits, and the SSH stage.
//! - [`tcp_reachable`]: a single bounded TCP connect attempt, used to decide
//!   whether a host is worth an SSH attempt at all.
//!
//! # Invariants
//!
//! - Every poll carries a deadline. There is no unbounded variant.
//! - The interval is fixed per call site; no backoff.
//! - Predicate errors propagate immediately and are never treated as
//!   "not ready yet".

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::debug;

/// Deadline applied to waits that had no bound in earlier incarnations of
/// this pipeline (droplet-active, action-completion).
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(600);

/// Connect timeout for a single reachability probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Polling errors.
#[derive(Debug, Error)]
pub enum PollError<E> {
    /// The deadline elapsed before the predicate reported ready.
    #[error("timeout after {elapsed:?} waiting for {what}")]
    Timeout { what: String, elapsed: Duration },

    /// The predicate itself failed (transport error, not "not yet").
    #[error(transparent)]
    Failed(E),
}

impl<E> PollError<E> {
    /// Returns true if this is the deadline-elapsed case.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Repeatedly invoke `predicate` until it yields a value or `deadline`
/// elapses, sleeping `interval` between attempts.
///
/// The predicate returns `Ok(Some(v))` when ready, `Ok(None)` for "not yet",
/// and `Err(e)` for a failure that should abort the poll. The first attempt
/// runs immediately; the deadline is checked after each failed attempt, so
/// the timeout fires no earlier than `deadline` and no later than
/// `deadline + interval`.
pub async fn poll_until<T, E, F, Fut>(
    what: &str,
    interval: Duration,
    deadline: Duration,
    mut predicate: F,
) -> Result<T, PollError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    let started = Instant::now();

    loop {
        if let Some(value) = predicate().await.map_err(PollError::Failed)? {
            return Ok(value);
        }

        let elapsed = started.elapsed();
        if elapsed >= deadline {
            return Err(PollError::Timeout {
                what: what.to_string(),
                elapsed,
            });
        }

        debug!(what = %what, elapsed_secs = elapsed.as_secs(), "not ready, waiting");
        tokio::time::sleep(interval).await;
    }
}

/// Attempt one TCP connect to `host:port`, bounded by `connect_timeout`.
///
/// Both a successful connect and a connection error resolve to a boolean;
/// unreachability is an expected transient condition here, not an error.
/// Only a hung attempt is cut off, by the timeout.
pub async fn tcp_reachable(host: &str, port: u16, connect_timeout: Duration) -> bool {
    match tokio::time::timeout(connect_timeout, TcpStream::connect((host, port))).await {
        Ok(Ok(_stream)) => true,
        Ok(Err(err)) => {
            debug!(host = %host, port = port, error = %err, "probe failed");
            false
        }
        Err(_) => {
            debug!(host = %host, port = port, "probe timed out");
            false
        }
    }
}
