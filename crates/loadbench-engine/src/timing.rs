//! Scoped wall-clock timing.

use std::future::Future;
use std::time::{Duration, Instant};

/// Await `future` and return its output with the elapsed wall-clock time.
pub async fn timed<F: Future>(future: F) -> (F::Output, Duration) {
    let start = Instant::now();
    let output = future.await;
    (output, start.elapsed())
}
