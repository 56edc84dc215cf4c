//! Bounded-concurrency executor
//!
//! Runs an ordered list of work items with at most `limit` in flight.
//! Whenever one completes the next undispatched item is started, unless the
//! stop predicate says otherwise. Items already in flight always finish.

use futures::stream::{FuturesUnordered, StreamExt};
use std::future::Future;
use tracing::debug;

pub type StopPredicate<'a> = &'a (dyn Fn() -> bool + Send + Sync);

#[derive(Debug)]
pub struct ExecutionReport<R> {
    /// One slot per input item, in input order; `None` if never dispatched
    pub slots: Vec<Option<R>>,
    /// Input indices that were never started
    pub not_dispatched: Vec<usize>,
}

impl<R> ExecutionReport<R> {
    pub fn dispatched(&self) -> usize {
        self.slots.len() - self.not_dispatched.len()
    }

    /// Completed results in input order
    pub fn results(&self) -> impl Iterator<Item = &R> {
        self.slots.iter().flatten()
    }

    pub fn into_results(self) -> Vec<R> {
        self.slots.into_iter().flatten().collect()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ParallelExecutor {
    limit: usize,
}

impl ParallelExecutor {
    /// A limit of 0 is treated as 1; there is no upper ceiling
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        should_stop: Option<StopPredicate<'_>>,
        work: F,
    ) -> ExecutionReport<R>
    where
        F: Fn(usize, T) -> Fut,
        Fut: Future<Output = R>,
    {
        let total = items.len();
        let mut slots: Vec<Option<R>> = (0..total).map(|_| None).collect();
        let mut pending = items.into_iter().enumerate();
        let mut in_flight = FuturesUnordered::new();
        let mut stopped = false;

        loop {
            while !stopped && in_flight.len() < self.limit {
                if should_stop.map(|stop| stop()).unwrap_or(false) {
                    debug!("Stop requested, no further dispatch");
                    stopped = true;
                    break;
                }
                match pending.next() {
                    Some((index, item)) => {
                        let fut = work(index, item);
                        in_flight.push(async move { (index, fut.await) });
                    }
                    None => break,
                }
            }

            match in_flight.next().await {
                Some((index, result)) => slots[index] = Some(result),
                None => break,
            }
        }

        let not_dispatched: Vec<usize> = pending.map(|(index, _)| index).collect();
        ExecutionReport {
            slots,
            not_dispatched,
        }
    }
}
