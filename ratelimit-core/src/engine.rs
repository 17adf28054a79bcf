//! Engine identity and role capabilities.

use std::fmt;

/// Which algorithm engine a piece of state or a key segment belongs to.
///
/// Serializes to the short tag used in storage keys (§4.10 of the design
/// document): `fw`, `tb`, `lb`, `gcra`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineTag {
    /// Fixed window.
    FixedWindow,
    /// Token bucket.
    TokenBucket,
    /// Leaky bucket.
    LeakyBucket,
    /// GCRA (generic cell rate algorithm).
    Gcra,
}

impl EngineTag {
    /// The short ASCII tag used when composing storage keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            EngineTag::FixedWindow => "fw",
            EngineTag::TokenBucket => "tb",
            EngineTag::LeakyBucket => "lb",
            EngineTag::Gcra => "gcra",
        }
    }

    /// The capabilities this engine advertises.
    ///
    /// Every engine can act as a primary (hard-quota) strategy. GCRA is the
    /// only engine that cannot also act as a secondary (smoothing) strategy,
    /// per §4.7 of the design document.
    pub const fn capabilities(self) -> &'static [Capability] {
        match self {
            EngineTag::Gcra => &[Capability::Primary],
            _ => &[Capability::Primary, Capability::Secondary],
        }
    }

    /// True if this engine advertises the given capability.
    pub fn supports(self, cap: Capability) -> bool {
        self.capabilities().contains(&cap)
    }
}

impl fmt::Display for EngineTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A role a strategy configuration can be used in within a dual-strategy
/// limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Usable as the hard-quota, always-consulted strategy.
    Primary,
    /// Usable as the optional smoothing strategy consulted after the
    /// primary allows.
    Secondary,
}
