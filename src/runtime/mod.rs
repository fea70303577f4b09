//! Thin wrappers around the async runtime used by the driver's background workers.

mod acknowledged_message;
pub(crate) mod stream;
mod worker_handle;

use std::{future::Future, time::Duration};

pub(crate) use self::{
    acknowledged_message::{AcknowledgedMessage, AcknowledgmentReceiver},
    stream::AsyncStream,
    worker_handle::{WorkerHandle, WorkerHandleListener},
};
use crate::error::{Error, ErrorKind, Result};

/// Spawn a task in the background to run a future.
///
/// Tasks spawned through this function are detached: they keep running after the returned
/// handle is dropped.
pub(crate) fn spawn<F, O>(fut: F) -> tokio::task::JoinHandle<O>
where
    F: Future<Output = O> + Send + 'static,
    O: Send + 'static,
{
    tokio::task::spawn(fut)
}

/// Await a future for a maximum amount of time, surfacing expiry as a timed-out I/O error so
/// that deadline expiry shares the network-error handling paths.
pub(crate) async fn timeout<F: Future>(timeout: Duration, future: F) -> Result<F::Output> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| {
            Error::from(ErrorKind::Io(std::sync::Arc::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "operation timed out",
            ))))
        })
}

/// Sleep for the given duration.
pub(crate) async fn delay_for(delay: Duration) {
    tokio::time::sleep(delay).await
}

/// An interval timer that does not try to catch up on missed ticks.
pub(crate) fn interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
