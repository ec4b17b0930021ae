//! Macros for defining typed numeric ids.

/// Macro to define a typed numeric id assigned by a remote system.
///
/// This generates a newtype wrapper around `u64` with:
/// - A `KIND` constant used in error messages
/// - `new()` and `value()` accessors
/// - `Display` and `FromStr` implementations
/// - `Serialize` and `Deserialize` as a plain JSON number
/// - `Ord`, `Hash`, and other standard traits
///
/// # Example
///
/// ```ignore
/// define_numeric_id!(RunnerId, "runner id");
///
/// let id = RunnerId::new(42);
/// let parsed: RunnerId = "42".parse()?;
/// ```
#[macro_export]
macro_rules! define_numeric_id {
    ($name:ident, $kind:literal) => {
        /// A typed numeric id for this remote resource.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            /// Human-readable name of this id kind.
            pub const KIND: &'static str = $kind;

            /// Wraps a raw id.
            #[must_use]
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            /// Returns the raw id.
            #[must_use]
            pub const fn value(&self) -> u64 {
                self.0
            }

            /// Parses an id from its decimal representation.
            pub fn parse(s: &str) -> Result<Self, $crate::IdError> {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    return Err($crate::IdError::Empty { kind: Self::KIND });
                }

                trimmed
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| $crate::IdError::InvalidNumber {
                        kind: Self::KIND,
                        value: s.to_string(),
                    })
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::parse(s)
            }
        }

        impl From<u64> for $name {
            fn from(id: u64) -> Self {
                Self(id)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_u64(self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let id = u64::deserialize(deserializer)?;
                Ok(Self(id))
            }
        }
    };
}
