// Remote data location module.
// Defines the one-shot read seam and the snapshot it produces.

pub mod memory;
pub mod rest;
pub mod snapshot;

use std::future::Future;

use crate::error::Result;

pub use memory::{MemoryRef, MemoryStore};
pub use rest::{RestConfig, RestRef};
pub use snapshot::Snapshot;

/// A remote location that supports a one-time read.
///
/// `key` is the identity of the location. A fetcher that observes a new key
/// starts a new fetch cycle, so implementations must keep it stable.
pub trait DataRef {
    /// Identity of the location, usually its path.
    fn key(&self) -> &str;

    /// Read the location once.
    fn once(&self) -> impl Future<Output = Result<Snapshot>> + Send;
}
