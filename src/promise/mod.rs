//! Single-assignment value cells with chained continuations, plus the
//! fan-in combiner that joins many of them into one.

mod combiner;
mod core;
mod void;

pub use combiner::{CombinedResult, PromiseCombiner, PromiseKey};
pub use core::Promise;
pub use void::VoidPromise;
