//! Concrete [`crate::strategy::Strategy`] implementations, one per algorithm.

mod fixed_window;
mod gcra;
mod leaky_bucket;
mod token_bucket;

pub use fixed_window::{FixedWindowStrategy, QuotaSpec};
pub use gcra::GcraStrategy;
pub use leaky_bucket::LeakyBucketStrategy;
pub use token_bucket::TokenBucketStrategy;
