// Async fetch driver.
// Runs the reads a fetcher asks for on tokio and applies their results at commit time.

use std::collections::HashMap;

use tokio::task::{Id, JoinError, JoinSet};

use crate::error::{FetchError, Result};
use crate::state::{FetchResult, FetcherOptions, FetchTicket, OnceFetcher};
use crate::store::{DataRef, Snapshot};

/// Owns a [`OnceFetcher`] and the reads it has in flight.
///
/// Reads run concurrently on the tokio runtime, but their results only reach
/// the fetch result when the owner calls [`FetchDriver::commit`] or
/// [`FetchDriver::next_completion`]. Dropping the driver aborts pending reads.
#[derive(Debug, Default)]
pub struct FetchDriver {
    fetcher: OnceFetcher,
    tasks: JoinSet<(FetchTicket, Result<Snapshot>)>,
    pending: HashMap<Id, FetchTicket>,
}

impl FetchDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: FetcherOptions) -> Self {
        Self {
            fetcher: OnceFetcher::with_options(options),
            ..Self::default()
        }
    }

    pub fn result(&self) -> &FetchResult {
        self.fetcher.result()
    }

    pub fn fetcher(&self) -> &OnceFetcher {
        &self.fetcher
    }

    /// Reads spawned and not yet committed.
    pub fn in_flight(&self) -> usize {
        self.tasks.len()
    }

    /// Evaluate the fetch rules for one pass, spawning a read if one is due.
    /// Must be called within a tokio runtime.
    pub fn observe<R>(&mut self, data_ref: &R, refetch: bool) -> bool
    where
        R: DataRef + Clone + Send + Sync + 'static,
    {
        match self.fetcher.observe(data_ref, refetch) {
            Some(ticket) => {
                self.spawn(data_ref.clone(), ticket);
                true
            }
            None => false,
        }
    }

    /// Force a fetch cycle regardless of the observe rules.
    pub fn refetch<R>(&mut self, data_ref: &R)
    where
        R: DataRef + Clone + Send + Sync + 'static,
    {
        let ticket = self.fetcher.refetch(data_ref);
        self.spawn(data_ref.clone(), ticket);
    }

    /// Apply every read that has already finished. Never waits.
    /// Returns how many completions changed the result.
    pub fn commit(&mut self) -> usize {
        let mut applied = 0;
        while let Some(joined) = self.tasks.try_join_next_with_id() {
            if self.apply(joined) {
                applied += 1;
            }
        }
        applied
    }

    /// Wait for the next read to finish and apply it.
    /// Returns `None` when nothing is in flight.
    pub async fn next_completion(&mut self) -> Option<bool> {
        let joined = self.tasks.join_next_with_id().await?;
        Some(self.apply(joined))
    }

    /// Wait until every spawned read has finished and been applied.
    pub async fn settle(&mut self) {
        while self.next_completion().await.is_some() {}
    }

    fn spawn<R>(&mut self, data_ref: R, ticket: FetchTicket)
    where
        R: DataRef + Send + Sync + 'static,
    {
        let task_ticket = ticket.clone();
        let handle = self.tasks.spawn(async move {
            let outcome = data_ref.once().await;
            (task_ticket, outcome)
        });
        self.pending.insert(handle.id(), ticket);
    }

    fn apply(
        &mut self,
        joined: std::result::Result<(Id, (FetchTicket, Result<Snapshot>)), JoinError>,
    ) -> bool {
        match joined {
            Ok((id, (ticket, outcome))) => {
                self.pending.remove(&id);
                self.fetcher.complete(ticket, outcome)
            }
            Err(e) => {
                let Some(ticket) = self.pending.remove(&e.id()) else {
                    tracing::warn!(error = %e, "read task ended without a ticket");
                    return false;
                };
                tracing::warn!(key = ticket.key(), error = %e, "read task failed");
                self.fetcher
                    .complete(ticket, Err(FetchError::Other(format!("read task failed: {}", e))))
            }
        }
    }
}
