//! Synchronization between the session cache and the authoritative source.
//!
//! - `ResilientReader`: cache-first reads with timeout and stale fallback
//! - `InFlightGuard`: one fetch per key per reader at a time
//! - `PrefetchOrchestrator`: parallel warm-up after sign-in
//! - `MutationInvalidator`: purge on successful writes

mod guard;
mod invalidate;
mod prefetch;
mod reader;

pub use invalidate::{MutationInvalidator, Mutations};
pub use prefetch::{PrefetchError, PrefetchOrchestrator, PrefetchReport};
pub use reader::ResilientReader;
