#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

/// Clock abstraction used by every engine to read "now".
///
/// Engines never call `SystemTime::now()` directly so tests can advance
/// time deterministically without sleeping.
pub mod clock;

/// Engine identity and role capabilities (Primary / Secondary).
pub mod engine;

/// Shared error kinds reused by the backend and façade crates.
pub mod error;

/// Storage key composition and validation.
pub mod key;

pub use clock::{Clock, SystemClock, TestClock};
pub use engine::{Capability, EngineTag};
pub use error::CoreError;
pub use key::{Key, KeyBuilder, MAX_KEY_LEN};
