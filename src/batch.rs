// src/batch.rs
//
// Concurrency-bounded parallel mapper.
//
// Runs a worker over a list with at most K futures in flight; as soon as one
// finishes, the next queued item starts. Output order matches input order no
// matter which workers finish first, and a failing worker surfaces as an Err
// slot instead of aborting its siblings. The company-level fan-out uses K=3
// to stay inside per-provider rate limits.

use std::future::Future;

use futures::stream::{self, StreamExt};

#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    concurrency: usize,
}

impl BatchExecutor {
    pub fn new(concurrency: usize) -> Self {
        Self {
            // A window of zero would never start any work.
            concurrency: concurrency.max(1),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Map `worker` over `items` with a sliding window of at most
    /// `concurrency` in-flight futures. Results come back in input order;
    /// each item's failure is isolated in its own slot.
    pub async fn run<T, R, E, F, Fut>(&self, items: Vec<T>, worker: F) -> Vec<Result<R, E>>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, E>>,
    {
        stream::iter(items.into_iter().map(worker))
            .buffered(self.concurrency)
            .collect()
            .await
    }
}
