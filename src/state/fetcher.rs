// Fetch-once state machine.
// Decides when a ref must be read and applies completed reads to the fetch result.

use crate::error::Result;
use crate::store::{DataRef, Snapshot};

use super::fetch::FetchResult;
use super::previous::Previous;

/// How the refetch signal is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefetchMode {
    /// Fetch when the signal turns from false to true.
    #[default]
    Edge,
    /// Fetch on every observation while the signal is true.
    Level,
}

/// Fetcher behaviour settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetcherOptions {
    pub refetch_mode: RefetchMode,
}

/// Why a fetch cycle began.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchReason {
    Initial,
    RefChanged,
    Refetch,
}

/// Handle for one fetch cycle, passed back with its outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
    key: String,
    reason: FetchReason,
}

impl FetchTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn reason(&self) -> FetchReason {
        self.reason
    }
}

/// Fetches a ref once and refetches on request.
///
/// Call [`OnceFetcher::observe`] on every pass. When it returns a ticket,
/// read the ref and hand the outcome to [`OnceFetcher::complete`]. Only the
/// most recent ticket is applied; older completions are dropped.
#[derive(Debug, Default)]
pub struct OnceFetcher {
    result: FetchResult,
    options: FetcherOptions,
    /// Generation of the latest ticket issued.
    generation: u64,
    last_key: Previous<String>,
    last_refetch: Previous<bool>,
}

impl OnceFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: FetcherOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn result(&self) -> &FetchResult {
        &self.result
    }

    pub fn options(&self) -> FetcherOptions {
        self.options
    }

    /// Number of fetch cycles begun so far.
    pub fn fetch_count(&self) -> u64 {
        self.generation
    }

    /// Evaluate the fetch rules for one pass. At most one cycle begins per pass.
    pub fn observe<R: DataRef>(&mut self, data_ref: &R, refetch: bool) -> Option<FetchTicket> {
        let key = data_ref.key();

        // The first pass is covered by the initial-fetch rule.
        let first_pass = self.last_key.render().is_none();
        let ref_changed = self.last_key.changed(key.to_string()) && !first_pass;

        let refetch_requested = match self.options.refetch_mode {
            RefetchMode::Edge => self.last_refetch.rising_edge(refetch),
            RefetchMode::Level => {
                self.last_refetch.commit(refetch);
                refetch
            }
        };

        let reason = if self.needs_initial_fetch() {
            FetchReason::Initial
        } else if ref_changed {
            FetchReason::RefChanged
        } else if refetch_requested {
            FetchReason::Refetch
        } else {
            return None;
        };

        Some(self.begin_fetch(key, reason))
    }

    /// Begin a fetch cycle outside the observe rules.
    pub fn refetch<R: DataRef>(&mut self, data_ref: &R) -> FetchTicket {
        self.begin_fetch(data_ref.key(), FetchReason::Refetch)
    }

    /// Apply the outcome of a read. Returns false if the ticket was superseded.
    pub fn complete(&mut self, ticket: FetchTicket, outcome: Result<Snapshot>) -> bool {
        if ticket.generation != self.generation {
            tracing::debug!(
                key = %ticket.key,
                generation = ticket.generation,
                latest = self.generation,
                "discarding stale fetch result"
            );
            return false;
        }

        let applied = outcome.and_then(|snapshot| {
            let fetched_at = snapshot.fetched_at;
            snapshot.into_mapping().map(|mapping| (mapping, fetched_at))
        });

        match applied {
            Ok((mapping, fetched_at)) => {
                tracing::debug!(key = %ticket.key, entries = mapping.len(), "fetch complete");
                self.result.set_loaded(&ticket.key, mapping, fetched_at);
            }
            Err(e) => {
                tracing::warn!(key = %ticket.key, error = %e, "fetch failed");
                self.result.set_error(&ticket.key, e);
            }
        }
        true
    }

    /// Observe, and if a fetch is due, read the ref inline before returning.
    pub async fn use_fetch<R: DataRef>(&mut self, data_ref: &R, refetch: bool) -> &FetchResult {
        if let Some(ticket) = self.observe(data_ref, refetch) {
            let outcome = data_ref.once().await;
            self.complete(ticket, outcome);
        }
        &self.result
    }

    /// First use: nothing fetched, nothing in flight, no failure to surface.
    fn needs_initial_fetch(&self) -> bool {
        !self.result.is_fetched() && !self.result.is_loading && self.result.error.is_none()
    }

    fn begin_fetch(&mut self, key: &str, reason: FetchReason) -> FetchTicket {
        self.generation += 1;
        self.result.set_loading();
        tracing::debug!(key, generation = self.generation, ?reason, "fetch begin");

        FetchTicket {
            generation: self.generation,
            key: key.to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::state::FetchStatus;
    use crate::store::{MemoryStore, RestConfig, RestRef};
    use serde_json::json;

    fn store_with_items() -> MemoryStore {
        let store = MemoryStore::new();
        store.set("items", json!({"a": {"x": 1}, "b": {"x": 2}}));
        store
    }

    #[test]
    fn test_initial_observe_begins_fetch() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, false).unwrap();
        assert_eq!(ticket.reason(), FetchReason::Initial);
        assert_eq!(ticket.key(), r.key());

        let result = fetcher.result();
        assert!(result.is_loading);
        assert!(result.sequence.is_none());
        assert!(result.mapping.is_none());
    }

    #[test]
    fn test_no_second_initial_fetch_while_loading() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        assert!(fetcher.observe(&r, false).is_some());
        assert!(fetcher.observe(&r, false).is_none());
        assert!(fetcher.observe(&r, false).is_none());
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[test]
    fn test_complete_sets_both_views() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, false).unwrap();
        let snap = Snapshot::new("items", Some(json!({"a": {"x": 1}, "b": {"x": 2}})));
        assert!(fetcher.complete(ticket, Ok(snap)));

        let result = fetcher.result();
        assert!(!result.is_loading);
        assert_eq!(
            result.mapping.clone().map(serde_json::Value::Object),
            Some(json!({"a": {"x": 1}, "b": {"x": 2}}))
        );
        let sequence = result.sequence.as_ref().unwrap();
        assert_eq!(sequence[0].clone().into_value(), json!({"a": {"x": 1}, "x": 1}));
        assert_eq!(sequence[1].clone().into_value(), json!({"b": {"x": 2}, "x": 2}));

        // Loaded: no further fetch without a trigger
        assert!(fetcher.observe(&r, false).is_none());
    }

    #[test]
    fn test_empty_snapshot_is_defined_but_empty() {
        let store = MemoryStore::new();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::empty("items")));

        let result = fetcher.result();
        assert_eq!(result.sequence.as_deref(), Some(&[][..]));
        assert_eq!(result.mapping.as_ref().map(|m| m.len()), Some(0));
        assert!(!result.is_loading);
        assert_eq!(result.status(), FetchStatus::Loaded);
    }

    #[test]
    fn test_failure_surfaces_once_without_retry() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, false).unwrap();
        fetcher.complete(ticket, Err(FetchError::Other("permission denied".to_string())));

        let result = fetcher.result();
        assert!(!result.is_loading);
        assert!(result.sequence.is_none());
        assert!(result.mapping.is_none());
        assert_eq!(result.status(), FetchStatus::Failed);

        // No automatic retry
        assert!(fetcher.observe(&r, false).is_none());
        assert_eq!(fetcher.fetch_count(), 1);

        // A refetch edge retries and success clears the error
        let ticket = fetcher.observe(&r, true).unwrap();
        assert_eq!(ticket.reason(), FetchReason::Refetch);
        fetcher.complete(ticket, Ok(Snapshot::empty("items")));
        assert!(fetcher.result().error.is_none());
    }

    #[test]
    fn test_failure_keeps_previous_data() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::new("items", Some(json!({"a": 1})))));

        let ticket = fetcher.refetch(&r);
        fetcher.complete(ticket, Err(FetchError::Other("offline".to_string())));

        let result = fetcher.result();
        assert!(result.error.is_some());
        assert_eq!(result.get("a"), Some(&json!(1)));
        assert_eq!(result.sequence.as_ref().map(Vec::len), Some(1));
    }

    #[test]
    fn test_scalar_snapshot_is_error() {
        let store = MemoryStore::new();
        let r = store.reference("title");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::new("title", Some(json!("hello")))));

        let error = fetcher.result().error.clone().unwrap();
        assert!(matches!(*error, FetchError::UnexpectedShape(_)));
    }

    #[test]
    fn test_edge_refetch_fires_once_per_transition() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::empty("items")));

        let ticket = fetcher.observe(&r, true).unwrap();
        assert_eq!(ticket.reason(), FetchReason::Refetch);
        fetcher.complete(ticket, Ok(Snapshot::empty("items")));

        // Held true: no more fetches
        assert!(fetcher.observe(&r, true).is_none());
        assert!(fetcher.observe(&r, true).is_none());

        assert!(fetcher.observe(&r, false).is_none());
        assert!(fetcher.observe(&r, true).is_some());
        assert_eq!(fetcher.fetch_count(), 3);
    }

    #[test]
    fn test_level_refetch_repeats_while_true() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::with_options(FetcherOptions {
            refetch_mode: RefetchMode::Level,
        });

        let ticket = fetcher.observe(&r, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::empty("items")));

        for _ in 0..3 {
            let ticket = fetcher.observe(&r, true).unwrap();
            fetcher.complete(ticket, Ok(Snapshot::empty("items")));
        }
        assert!(fetcher.observe(&r, false).is_none());
        assert_eq!(fetcher.fetch_count(), 4);
    }

    #[test]
    fn test_refetch_true_on_first_observation_fetches_once() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&r, true).unwrap();
        assert_eq!(ticket.reason(), FetchReason::Initial);
        fetcher.complete(ticket, Ok(Snapshot::empty("items")));

        assert!(fetcher.observe(&r, true).is_none());
        assert_eq!(fetcher.fetch_count(), 1);
    }

    #[test]
    fn test_ref_change_begins_new_cycle() {
        let store = store_with_items();
        let items = store.reference("items");
        let other = store.reference("other");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&items, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::new("items", Some(json!({"a": 1})))));

        let ticket = fetcher.observe(&other, false).unwrap();
        assert_eq!(ticket.reason(), FetchReason::RefChanged);
        assert_eq!(ticket.key(), other.key());

        // Stale data stays visible while loading
        assert!(fetcher.result().is_loading);
        assert_eq!(fetcher.result().get("a"), Some(&json!(1)));

        assert!(fetcher.observe(&other, false).is_none());
    }

    #[test]
    fn test_same_path_on_other_database_begins_new_cycle() {
        let a = RestRef::new(&RestConfig::new("https://a.example.com"), "users").unwrap();
        let b = RestRef::new(&RestConfig::new("https://b.example.com"), "users").unwrap();
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&a, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::new("users", Some(json!({"alice": 1})))));

        let ticket = fetcher.observe(&b, false).unwrap();
        assert_eq!(ticket.reason(), FetchReason::RefChanged);
        assert_eq!(ticket.key(), "https://b.example.com/users.json");
    }

    #[test]
    fn test_same_path_in_other_store_begins_new_cycle() {
        let first = store_with_items();
        let second = MemoryStore::new();
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&first.reference("items"), false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::empty("items")));

        let ticket = fetcher.observe(&second.reference("items"), false).unwrap();
        assert_eq!(ticket.reason(), FetchReason::RefChanged);
    }

    #[test]
    fn test_failed_read_after_ref_change_drops_old_data() {
        let store = store_with_items();
        let items = store.reference("items");
        let other = store.reference("other");
        let mut fetcher = OnceFetcher::new();

        let ticket = fetcher.observe(&items, false).unwrap();
        fetcher.complete(ticket, Ok(Snapshot::new("items", Some(json!({"a": 1})))));
        assert_eq!(fetcher.result().source.as_deref(), Some(items.key()));

        let ticket = fetcher.observe(&other, false).unwrap();
        fetcher.complete(ticket, Err(FetchError::Denied("other".to_string())));

        let result = fetcher.result();
        assert_eq!(result.status(), FetchStatus::Failed);
        assert!(result.sequence.is_none());
        assert!(result.mapping.is_none());
        assert!(result.source.is_none());

        // Switching back reads the first ref again
        let ticket = fetcher.observe(&items, false).unwrap();
        assert_eq!(ticket.reason(), FetchReason::RefChanged);
    }

    #[test]
    fn test_stale_completion_is_discarded() {
        let store = store_with_items();
        let items = store.reference("items");
        let other = store.reference("other");
        let mut fetcher = OnceFetcher::new();

        let first = fetcher.observe(&items, false).unwrap();
        let second = fetcher.observe(&other, false).unwrap();
        assert_eq!(second.generation(), first.generation() + 1);

        let applied = fetcher.complete(second, Ok(Snapshot::new("other", Some(json!({"o": 1})))));
        assert!(applied);

        let applied = fetcher.complete(first, Ok(Snapshot::new("items", Some(json!({"i": 1})))));
        assert!(!applied);

        let result = fetcher.result();
        assert_eq!(result.get("o"), Some(&json!(1)));
        assert!(result.get("i").is_none());
        assert!(!result.is_loading);
    }

    #[test]
    fn test_superseded_completion_keeps_loading() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let first = fetcher.observe(&r, false).unwrap();
        let _second = fetcher.refetch(&r);

        assert!(!fetcher.complete(first, Ok(Snapshot::empty("items"))));
        assert!(fetcher.result().is_loading);
        assert!(fetcher.result().sequence.is_none());
    }

    #[tokio::test]
    async fn test_use_fetch_reads_inline() {
        let store = store_with_items();
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let result = fetcher.use_fetch(&r, false).await;
        assert!(!result.is_loading);
        assert_eq!(result.sequence.as_ref().map(Vec::len), Some(2));

        fetcher.use_fetch(&r, false).await;
        assert_eq!(store.read_count("items"), 1);

        store.set("items/c", json!({"x": 3}));
        let result = fetcher.use_fetch(&r, true).await;
        assert_eq!(result.sequence.as_ref().map(Vec::len), Some(3));
        assert_eq!(store.read_count("items"), 2);
    }

    #[tokio::test]
    async fn test_use_fetch_failure() {
        let store = store_with_items();
        store.fail_next("items", "permission denied");
        let r = store.reference("items");
        let mut fetcher = OnceFetcher::new();

        let result = fetcher.use_fetch(&r, false).await;
        assert!(!result.is_loading);
        assert!(result.sequence.is_none());
        assert_eq!(
            result.error.as_ref().map(|e| e.to_string()),
            Some("permission denied".to_string())
        );
    }
}
