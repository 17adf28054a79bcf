#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// The four-method backend contract every storage driver implements.
pub mod backend;

/// Compact ASCII state-encoding format shared by every engine.
pub mod codec;

/// Error taxonomy for backend and CAS-loop failures.
pub mod error;

/// Observability metrics for backend and CAS-loop operations.
pub(crate) mod metrics;

/// The read-modify-CAS retry loop every engine routes its decisions through.
pub mod retry;

pub use backend::{Backend, BackendResult, CasWitness, DeleteStatus, SyncBackend, UnsyncBackend};
pub use codec::{StateCodec, StateFields};
pub use error::BackendError;
pub use retry::{CasLoopConfig, Mode, MutatorOutcome, cas_loop};
