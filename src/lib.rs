// refhooks: helpers for render-loop style consumers.
// Tracks previous values across passes and fetches remote snapshots once, refetching on request.

pub mod driver;
pub mod error;
pub mod state;
pub mod store;

pub use driver::FetchDriver;
pub use error::{FetchError, Result};
pub use state::{
    Entry, FetchReason, FetchResult, FetchStatus, FetchTicket, FetcherOptions, OnceFetcher,
    Previous, RefetchMode,
};
pub use store::{DataRef, MemoryRef, MemoryStore, RestConfig, RestRef, Snapshot};
