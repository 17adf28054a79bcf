#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

mod backend;

/// Entry-count and expiry-sweep metrics for [`MemoryBackend`].
pub mod metrics;

pub use backend::MemoryBackend;
