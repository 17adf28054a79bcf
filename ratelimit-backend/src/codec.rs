//! Compact ASCII state-encoding format shared by every engine.
//!
//! Every engine persists its state as an opaque ASCII string with a shared
//! header, `v2|`, followed by one or more `|`-delimited fields (§3 of the
//! design document). Fields are plain base-10 integers (negative allowed,
//! for Unix-nanosecond timestamps) or bare identifiers (quota names); there
//! is no whitespace and no trailing separator.
//!
//! A blob missing the `v2|` header, or containing a field that fails to
//! parse, MUST be rejected as corrupt — this codec never attempts to
//! repair or partially interpret a malformed blob.

use crate::error::BackendError;

const HEADER: &str = "v2";
const SEPARATOR: char = '|';

/// The `|`-delimited fields of a decoded state blob, with the `v2` header
/// already stripped and validated.
///
/// Thin borrowing wrapper around the split fields; engines pull their own
/// typed values out positionally via [`StateFields::next_i64`] /
/// [`StateFields::next_str`].
pub struct StateFields<'a> {
    key: &'a str,
    fields: std::str::Split<'a, char>,
    position: usize,
}

impl<'a> StateFields<'a> {
    /// Pull the next field and parse it as a base-10 `i64`.
    ///
    /// Rejects leading/trailing whitespace and any non-digit (beyond a
    /// leading `-`) — the wire format tolerates neither.
    pub fn next_i64(&mut self) -> Result<i64, BackendError> {
        let raw = self.next_raw()?;
        parse_strict_i64(self.key, raw)
    }

    /// Pull the next field verbatim, as a bare identifier (e.g. a quota
    /// name).
    pub fn next_str(&mut self) -> Result<&'a str, BackendError> {
        self.next_raw()
    }

    /// True if every field has been consumed.
    pub fn is_exhausted(&mut self) -> bool {
        self.fields.clone().next().is_none()
    }

    fn next_raw(&mut self) -> Result<&'a str, BackendError> {
        let field = self.fields.next().ok_or_else(|| BackendError::StateCorrupt {
            key: self.key.to_owned(),
            reason: format!("missing field at position {}", self.position),
        })?;
        self.position += 1;
        if field.is_empty() {
            return Err(BackendError::StateCorrupt {
                key: self.key.to_owned(),
                reason: format!("empty field at position {}", self.position - 1),
            });
        }
        Ok(field)
    }
}

fn parse_strict_i64(key: &str, raw: &str) -> Result<i64, BackendError> {
    let digits = raw.strip_prefix('-').unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(BackendError::StateCorrupt {
            key: key.to_owned(),
            reason: format!("field {raw:?} is not a strict base-10 integer"),
        });
    }
    raw.parse::<i64>().map_err(|e| BackendError::StateCorrupt {
        key: key.to_owned(),
        reason: format!("field {raw:?} out of range: {e}"),
    })
}

/// Encodes and decodes the shared `v2|` wire format.
pub struct StateCodec;

impl StateCodec {
    /// Validate the `v2` header and return the remaining `|`-delimited
    /// fields for the engine to interpret positionally.
    pub fn decode<'a>(key: &'a str, blob: &'a str) -> Result<StateFields<'a>, BackendError> {
        let mut parts = blob.split(SEPARATOR);
        let header = parts.next().ok_or_else(|| BackendError::StateCorrupt {
            key: key.to_owned(),
            reason: "empty blob".to_owned(),
        })?;
        if header != HEADER {
            return Err(BackendError::StateCorrupt {
                key: key.to_owned(),
                reason: format!("expected header {HEADER:?}, found {header:?}"),
            });
        }
        Ok(StateFields {
            key,
            fields: parts,
            position: 0,
        })
    }

    /// Start a fresh encode buffer, pre-seeded with the `v2` header.
    pub fn encoder() -> StateEncoder {
        StateEncoder {
            buf: String::from(HEADER),
        }
    }
}

/// Builder for a `v2|`-prefixed state blob.
///
/// Reuses one growable `String` for every field so a CAS-loop retry that
/// re-encodes the same state does not reallocate per attempt.
pub struct StateEncoder {
    buf: String,
}

impl StateEncoder {
    /// Append an integer field.
    pub fn push_i64(mut self, value: i64) -> Self {
        self.buf.push(SEPARATOR);
        self.buf.push_str(&value.to_string());
        self
    }

    /// Append a bare identifier field (e.g. a quota name).
    pub fn push_str(mut self, value: &str) -> Self {
        self.buf.push(SEPARATOR);
        self.buf.push_str(value);
        self
    }

    /// Finish encoding and return the wire-format string.
    pub fn finish(self) -> String {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_integers() {
        let blob = StateCodec::encoder().push_i64(5).push_i64(-42).finish();
        assert_eq!(blob, "v2|5|-42");

        let mut fields = StateCodec::decode("k", &blob).unwrap();
        assert_eq!(fields.next_i64().unwrap(), 5);
        assert_eq!(fields.next_i64().unwrap(), -42);
        assert!(fields.is_exhausted());
    }

    #[test]
    fn round_trips_mixed_quota_fields() {
        let blob = StateCodec::encoder()
            .push_str("requests")
            .push_i64(3)
            .push_i64(100)
            .finish();
        let mut fields = StateCodec::decode("k", &blob).unwrap();
        assert_eq!(fields.next_str().unwrap(), "requests");
        assert_eq!(fields.next_i64().unwrap(), 3);
        assert_eq!(fields.next_i64().unwrap(), 100);
    }

    #[test]
    fn rejects_missing_header() {
        let err = StateCodec::decode("k", "5|10");
        assert!(matches!(err, Err(BackendError::StateCorrupt { .. })));
    }

    #[test]
    fn rejects_wrong_version() {
        let err = StateCodec::decode("k", "v1|5|10");
        assert!(matches!(err, Err(BackendError::StateCorrupt { .. })));
    }

    #[test]
    fn rejects_whitespace_in_integer_field() {
        let err = StateCodec::decode("k", "v2| 5|10").and_then(|mut f| f.next_i64());
        assert!(matches!(err, Err(BackendError::StateCorrupt { .. })));
    }

    #[test]
    fn rejects_non_digit_integer_field() {
        let err = StateCodec::decode("k", "v2|5a|10").and_then(|mut f| f.next_i64());
        assert!(matches!(err, Err(BackendError::StateCorrupt { .. })));
    }

    #[test]
    fn rejects_missing_field() {
        let err = StateCodec::decode("k", "v2|5").and_then(|mut f| {
            f.next_i64()?;
            f.next_i64()
        });
        assert!(matches!(err, Err(BackendError::StateCorrupt { .. })));
    }

    #[test]
    fn negative_timestamp_round_trips() {
        let blob = StateCodec::encoder().push_i64(-1_700_000_000_000_000_000).finish();
        let mut fields = StateCodec::decode("k", &blob).unwrap();
        assert_eq!(fields.next_i64().unwrap(), -1_700_000_000_000_000_000);
    }
}
