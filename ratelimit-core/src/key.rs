//! Storage key composition and validation.
//!
//! A [`Key`] is the deterministic byte string engines and backends use to
//! address one piece of state. It is built by [`KeyBuilder`] from a stable
//! base key, an [`EngineTag`](crate::EngineTag), an optional per-call
//! dynamic suffix, and (for multi-quota engines) a quota name:
//!
//! ```text
//! <baseKey>:<engineTag>[:<dynamicKey>][:<quotaName>]
//! ```
//!
//! Every component is validated independently before composition: ASCII
//! only, non-empty, at most [`MAX_KEY_LEN`] bytes, and built only from
//! `[A-Za-z0-9_:-]`. Validation failures fail the call before any backend
//! I/O, per §4.10 of the design document.

use std::fmt;
use std::sync::Arc;

use crate::engine::EngineTag;
use crate::error::CoreError;

/// Maximum length, in bytes, of any single key component.
pub const MAX_KEY_LEN: usize = 64;

/// A fully composed, validated storage key.
///
/// Cheap to clone: the composed string is held behind an [`Arc`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Key(Arc<str>);

impl Key {
    /// Borrow the key's bytes, as stored under the backend.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Borrow the key as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Key {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builds a [`Key`] from a stable base key, an engine tag, and optional
/// dynamic/quota components.
///
/// ```
/// use ratelimit_core::{EngineTag, KeyBuilder};
///
/// let key = KeyBuilder::new("api").engine(EngineTag::FixedWindow)
///     .dynamic(Some("user-42"))
///     .quota(Some("requests"))
///     .build()
///     .unwrap();
/// assert_eq!(key.as_str(), "api:fw:user-42:requests");
/// ```
#[derive(Debug, Clone)]
pub struct KeyBuilder<'a> {
    base_key: &'a str,
    engine: Option<EngineTag>,
    dynamic: Option<&'a str>,
    quota: Option<&'a str>,
}

impl<'a> KeyBuilder<'a> {
    /// Start building a key rooted at the given base key.
    pub fn new(base_key: &'a str) -> Self {
        Self {
            base_key,
            engine: None,
            dynamic: None,
            quota: None,
        }
    }

    /// Set the engine tag component.
    pub fn engine(mut self, engine: EngineTag) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Set the optional per-call dynamic suffix.
    pub fn dynamic(mut self, dynamic: Option<&'a str>) -> Self {
        self.dynamic = dynamic;
        self
    }

    /// Set the optional quota-name component.
    pub fn quota(mut self, quota: Option<&'a str>) -> Self {
        self.quota = quota;
        self
    }

    /// Validate every component and compose the final key.
    pub fn build(self) -> Result<Key, CoreError> {
        let engine = self
            .engine
            .expect("KeyBuilder::engine must be called before build");

        validate_segment(self.base_key)?;
        if let Some(dynamic) = self.dynamic {
            validate_segment(dynamic)?;
        }
        if let Some(quota) = self.quota {
            validate_segment(quota)?;
        }

        let mut composed = String::with_capacity(
            self.base_key.len()
                + 1
                + engine.as_str().len()
                + self.dynamic.map_or(0, |d| d.len() + 1)
                + self.quota.map_or(0, |q| q.len() + 1),
        );
        composed.push_str(self.base_key);
        composed.push(':');
        composed.push_str(engine.as_str());
        if let Some(dynamic) = self.dynamic {
            composed.push(':');
            composed.push_str(dynamic);
        }
        if let Some(quota) = self.quota {
            composed.push(':');
            composed.push_str(quota);
        }

        Ok(Key(Arc::from(composed)))
    }
}

/// Validate a single key component against the shared charset and length
/// rules (§3 / §4.10 of the design document).
pub fn validate_segment(segment: &str) -> Result<(), CoreError> {
    if segment.is_empty() {
        return Err(CoreError::InvalidKey {
            key: segment.to_owned(),
            reason: "key component must not be empty",
        });
    }
    if !segment.is_ascii() {
        return Err(CoreError::InvalidKey {
            key: segment.to_owned(),
            reason: "key component must be ASCII",
        });
    }
    if segment.len() > MAX_KEY_LEN {
        return Err(CoreError::InvalidKey {
            key: segment.to_owned(),
            reason: "key component exceeds maximum length",
        });
    }
    if !segment
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b':' | b'-'))
    {
        return Err(CoreError::InvalidKey {
            key: segment.to_owned(),
            reason: "key component contains a character outside [A-Za-z0-9_:-]",
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn composes_minimal_key() {
        let key = KeyBuilder::new("api")
            .engine(EngineTag::TokenBucket)
            .build()
            .unwrap();
        assert_eq!(key.as_str(), "api:tb");
    }

    #[test]
    fn composes_full_key() {
        let key = KeyBuilder::new("api")
            .engine(EngineTag::FixedWindow)
            .dynamic(Some("user-42"))
            .quota(Some("requests"))
            .build()
            .unwrap();
        assert_eq!(key.as_str(), "api:fw:user-42:requests");
    }

    #[test]
    fn rejects_empty_base_key() {
        let err = KeyBuilder::new("").engine(EngineTag::Gcra).build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_non_ascii() {
        let err = KeyBuilder::new("café").engine(EngineTag::Gcra).build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_invalid_characters() {
        let err = KeyBuilder::new("api")
            .engine(EngineTag::Gcra)
            .dynamic(Some("user@host"))
            .build();
        assert!(err.is_err());
    }

    #[test]
    fn rejects_overlong_segment() {
        let long = "a".repeat(MAX_KEY_LEN + 1);
        let err = KeyBuilder::new(&long).engine(EngineTag::Gcra).build();
        assert!(err.is_err());
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let a = KeyBuilder::new("api")
            .engine(EngineTag::LeakyBucket)
            .dynamic(Some("x"))
            .build()
            .unwrap();
        let b = KeyBuilder::new("api")
            .engine(EngineTag::LeakyBucket)
            .dynamic(Some("x"))
            .build()
            .unwrap();
        assert_eq!(a, b);
    }
}
