//! Shared error definitions, the error taxonomy and small concurrency
//! utilities used across all toolgate crates.

pub mod clock;
pub mod error;
pub mod keyed;
pub mod kind;

pub use {
    clock::{Clock, ManualClock, SharedClock, SystemClock, saturating_add, to_chrono},
    error::{Error, FromMessage, Result},
    keyed::KeyedLocks,
    kind::{Classify, ErrorKind},
};
