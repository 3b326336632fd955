//! Fleet runner: drive a user-supplied async routine across many
//! `(host, port)` addresses with optional batching, progress reporting,
//! and cooperative cancellation.
//!
//! Grounded on `examples/original_source/src/luxos/utils.py::launch`
//! (batched `asyncio.gather(..., return_exceptions=True)`) for the
//! batching/ordering contract, and the `tokio::sync::Semaphore`-gated
//! worker pool in
//! `examples/CambrianTech-continuum/.../inference-grpc/src/worker_pool.rs`
//! for the concurrency-bound idiom — generalized here from a fixed worker
//! count to a per-batch concurrency cap via `tokio::task::JoinSet`.

use crate::error::LaunchFailure;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::debug;

/// A broadcastable cancellation flag: cloning shares the same signal, and
/// flipping it to `true` (via the paired `watch::Sender`) is observed by
/// every clone at its next suspension point (spec §5: "outstanding jobs
/// observe cancellation at the next suspension point").
pub type CancelSignal = watch::Receiver<bool>;

/// One per-device outcome, tagged by how the job ended.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Ok(T),
    Timeout { brief: String, trace: String },
    Err { brief: String, trace: String },
}

impl<T> Outcome<T> {
    pub fn from_result(result: Result<T, LaunchFailure>) -> Self {
        match result {
            Ok(v) => Outcome::Ok(v),
            Err(LaunchFailure::Timeout { brief, trace, .. }) => Outcome::Timeout { brief, trace },
            Err(LaunchFailure::Err { brief, trace, .. }) => Outcome::Err { brief, trace },
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    fn cancelled(reason: &str) -> Self {
        Outcome::Err {
            brief: "cancelled".to_string(),
            trace: reason.to_string(),
        }
    }
}

/// Options controlling a [`launch`] run.
pub struct LaunchOptions<P>
where
    P: FnMut(usize) + Send,
{
    /// Run at most this many jobs concurrently per batch; `None` or `Some(0)`
    /// means all jobs in the address list run concurrently.
    pub batch: Option<usize>,
    /// Called once per completed batch with the number of addresses
    /// finished in that batch.
    pub progress: Option<P>,
    /// When set and flipped to `true`, cancels every still-running job in
    /// the current batch and starts no further batches (spec §4.7/§5).
    pub cancel: Option<CancelSignal>,
}

// Hand-written rather than `#[derive(Default)]`: the derive would add a
// spurious `P: Default` bound even though `Option<P>` never needs one,
// which breaks the common `LaunchOptions::<fn(usize)>::default()` call
// site used throughout the test suite.
impl<P> Default for LaunchOptions<P>
where
    P: FnMut(usize) + Send,
{
    fn default() -> Self {
        Self {
            batch: None,
            progress: None,
            cancel: None,
        }
    }
}

/// Race `job` against `cancel` (if present), surfacing `Outcome::cancelled`
/// the moment cancellation is observed rather than waiting for `job` to
/// finish on its own.
async fn run_with_cancel<T, Fut>(job: Fut, cancel: Option<&mut CancelSignal>) -> Outcome<T>
where
    Fut: Future<Output = Result<T, LaunchFailure>>,
{
    match cancel {
        Some(cancel) => {
            tokio::select! {
                biased;
                _ = wait_for_cancel(cancel) => {
                    Outcome::cancelled("job was cancelled before completion")
                }
                result = job => Outcome::from_result(result),
            }
        }
        None => Outcome::from_result(job.await),
    }
}

/// Resolve once `cancel` is flipped to `true`. If the paired sender is
/// dropped without ever cancelling, this simply never resolves — the
/// enclosing `select!` then always takes the job's own branch.
async fn wait_for_cancel(cancel: &mut CancelSignal) {
    if *cancel.borrow() {
        return;
    }
    while cancel.changed().await.is_ok() {
        if *cancel.borrow() {
            return;
        }
    }
    std::future::pending::<()>().await;
}

/// Drive `f(host, port)` across `addresses`, returning one [`Outcome`] per
/// address in the same order as the input (spec §8: "Order preservation").
///
/// When `options.batch` is set, addresses are split into chunks of that
/// size; all jobs in one chunk run concurrently, chunks run sequentially,
/// and `options.progress` (if set) fires once per completed chunk with the
/// chunk's size. A job that panics, times out, or errors never cancels its
/// siblings — its outcome is captured as [`Outcome::Timeout`] or
/// [`Outcome::Err`] and the rest of the batch proceeds.
///
/// When `options.cancel` is set and becomes `true`, every job still running
/// in the current batch is surfaced as `Outcome::Err` with brief
/// `"cancelled"`, and no further batch is started — any address past the
/// in-flight batch is reported the same way without ever being dispatched
/// (spec §4.7: "No future batches are started").
pub async fn launch<T, Fut, F, P>(
    addresses: &[(String, u16)],
    mut f: F,
    mut options: LaunchOptions<P>,
) -> Vec<Outcome<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, LaunchFailure>> + Send + 'static,
    F: FnMut(String, u16) -> Fut,
    P: FnMut(usize) + Send,
{
    let batch_size = match options.batch {
        Some(0) | None => addresses.len().max(1),
        Some(n) => n,
    };

    let mut results: Vec<Option<Outcome<T>>> = (0..addresses.len()).map(|_| None).collect();

    for chunk_start in (0..addresses.len()).step_by(batch_size) {
        if let Some(cancel) = &options.cancel {
            if *cancel.borrow() {
                break;
            }
        }

        let chunk_end = (chunk_start + batch_size).min(addresses.len());
        let chunk = &addresses[chunk_start..chunk_end];

        let mut set: JoinSet<(usize, Outcome<T>)> = JoinSet::new();
        for (offset, (host, port)) in chunk.iter().enumerate() {
            let index = chunk_start + offset;
            let address = (host.clone(), *port);
            let job = f(host.clone(), *port);
            let mut job_cancel = options.cancel.clone();
            set.spawn(async move {
                let outcome = run_with_cancel(job, job_cancel.as_mut()).await;
                let _ = &address;
                (index, outcome)
            });
        }

        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, outcome)) => results[index] = Some(outcome),
                Err(join_err) => {
                    debug!(error = %join_err, "fleet job panicked or was cancelled");
                    // We don't know which index this was (JoinSet doesn't
                    // expose it on panic), but every remaining `None` slot
                    // in this chunk belongs to either a still-running or a
                    // just-panicked job; the loop below back-fills any slot
                    // still empty once the chunk drains.
                }
            }
        }

        // Back-fill any index in this chunk that never got a result (its
        // task panicked before producing one).
        for index in chunk_start..chunk_end {
            if results[index].is_none() {
                results[index] = Some(Outcome::Err {
                    brief: "task panicked".to_string(),
                    trace: "fleet job ended without producing a result".to_string(),
                });
            }
        }

        if let Some(progress) = options.progress.as_mut() {
            progress(chunk.len());
        }
    }

    // Any slot still empty belongs to a batch that never started because
    // cancellation was observed beforehand.
    for slot in results.iter_mut() {
        if slot.is_none() {
            *slot = Some(Outcome::cancelled(
                "fleet run was cancelled before this batch started",
            ));
        }
    }

    results.into_iter().map(|r| r.expect("every slot filled")).collect()
}

/// Concurrency-bounded variant of [`launch`]: instead of batching strictly
/// sequentially, run all addresses against a shared [`Semaphore`] limiting
/// how many are in flight at once. Used when the caller wants a soft
/// fanout cap without hard batch boundaries or per-batch progress.
///
/// `cancel` behaves as in [`launch`]: jobs already dispatched race against
/// it and surface `Outcome::Err { brief: "cancelled", .. }` the moment it
/// flips, and no address past the point cancellation was observed is ever
/// dispatched.
pub async fn launch_bounded<T, Fut, F>(
    addresses: &[(String, u16)],
    concurrency: usize,
    f: F,
    cancel: Option<CancelSignal>,
) -> Vec<Outcome<T>>
where
    T: Send + 'static,
    Fut: Future<Output = Result<T, LaunchFailure>> + Send + 'static,
    F: Fn(String, u16) -> Fut + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let f = Arc::new(f);
    let mut set: JoinSet<(usize, Outcome<T>)> = JoinSet::new();

    let mut dispatched = addresses.len();
    for (index, (host, port)) in addresses.iter().enumerate() {
        if let Some(cancel) = &cancel {
            if *cancel.borrow() {
                dispatched = index;
                break;
            }
        }

        let permit = semaphore.clone();
        let f = f.clone();
        let host = host.clone();
        let port = *port;
        let mut job_cancel = cancel.clone();
        set.spawn(async move {
            let _permit = permit.acquire_owned().await.expect("semaphore not closed");
            let outcome = run_with_cancel(f(host, port), job_cancel.as_mut()).await;
            (index, outcome)
        });
    }

    let mut results: Vec<Option<Outcome<T>>> = (0..addresses.len()).map(|_| None).collect();
    while let Some(joined) = set.join_next().await {
        if let Ok((index, outcome)) = joined {
            results[index] = Some(outcome);
        }
    }

    for index in dispatched..addresses.len() {
        results[index] = Some(Outcome::cancelled(
            "fleet job was never dispatched: cancelled beforehand",
        ));
    }

    results
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            r.unwrap_or_else(|| Outcome::Err {
                brief: "task panicked".to_string(),
                trace: format!("fleet job at index {i} ended without producing a result"),
            })
        })
        .collect()
}
