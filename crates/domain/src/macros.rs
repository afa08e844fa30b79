//! Macro for the string forms of domain enums
//!
//! Domain enums are persisted as lowercase text columns and travel over HTTP
//! as the same strings. This macro keeps the three representations (`as_str`,
//! `Display`, `FromStr`) generated from a single mapping.
//!
//! # Example
//!
//! ```rust
//! use calsync_domain::impl_domain_enum_strings;
//!
//! #[derive(Debug, Clone, Copy, PartialEq, Eq)]
//! pub enum Color {
//!     Red,
//!     Blue,
//! }
//!
//! impl_domain_enum_strings!(Color {
//!     Red => "red",
//!     Blue => "blue",
//! });
//!
//! assert_eq!(Color::Red.as_str(), "red");
//! assert_eq!("BLUE".parse::<Color>().unwrap(), Color::Blue);
//! ```

/// Implements `as_str`, `Display` and case-insensitive `FromStr` for an enum.
///
/// Parse failures produce [`CalSyncError::InvalidInput`](crate::CalSyncError)
/// naming the enum and the rejected value.
#[macro_export]
macro_rules! impl_domain_enum_strings {
    ($enum_name:ident { $($variant:ident => $str:expr),+ $(,)? }) => {
        impl $enum_name {
            /// Canonical lowercase representation.
            pub const fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $str,)+
                }
            }
        }

        impl std::fmt::Display for $enum_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $enum_name {
            type Err = $crate::CalSyncError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().as_str() {
                    $($str => Ok(Self::$variant),)+
                    other => Err($crate::CalSyncError::InvalidInput(format!(
                        "invalid {}: {other}",
                        stringify!($enum_name)
                    ))),
                }
            }
        }
    };
}
