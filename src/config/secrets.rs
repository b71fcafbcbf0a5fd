//! Secret handling utilities.
//!
//! Re-exports secrecy types and provides helpers for working with
//! secrets in the taskhost context.

pub use secrecy::{ExposeSecret, SecretBox, SecretString};
