//! Strongly-typed identifiers for Riffle entities.
//!
//! Explicit types prevent bugs from mixing up IDs. All numeric IDs are
//! 64-bit to handle long-lived shards.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `ShardId` with `StreamId`)
/// - Debug/Display formatting
/// - Zero-cost abstraction (same as raw u64)
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the next ID in sequence.
            ///
            /// # Panics
            /// Panics if the ID would overflow.
            #[inline]
            #[must_use]
            pub const fn next(self) -> Self {
                assert!(self.0 < u64::MAX, "ID overflow");
                Self(self.0 + 1)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

// External log identification.
define_id!(StreamId, "stream", "Unique identifier for an external log stream.");
define_id!(ShardId, "shard", "Unique identifier for a shard (partition) of a stream.");

// Batch tracking. Index 0 is reserved as "nothing tracked"; the first
// flushed batch of a shard receives index 1.
define_id!(
    TrackingIndex,
    "track",
    "Monotonically increasing identifier assigned to each flushed batch within a shard."
);

/// The external log's own position identifier for a record.
///
/// Tokens are opaque to Riffle except for equality; the external log
/// defines their ordering convention. A token is what gets persisted in a
/// checkpoint store so consumption can resume after a crash.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SequenceToken(String);

impl SequenceToken {
    /// Creates a token from its external string form.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Returns the external string form of the token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the token is the empty seed (no position).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SequenceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SequenceToken {
    fn from(token: &str) -> Self {
        Self::new(token)
    }
}

impl From<String> for SequenceToken {
    fn from(token: String) -> Self {
        Self(token)
    }
}
