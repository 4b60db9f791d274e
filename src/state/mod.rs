// State module.
// Previous-value tracking and the fetch-once state machine with its result type.

pub mod fetch;
pub mod fetcher;
pub mod previous;

pub use fetch::{Entry, FetchResult, FetchStatus, entries_from};
pub use fetcher::{FetchReason, FetchTicket, FetcherOptions, OnceFetcher, RefetchMode};
pub use previous::Previous;
