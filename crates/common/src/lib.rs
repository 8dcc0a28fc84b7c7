//! Common utilities shared across the verify gateway crates.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, algorithm policy, key decoding)
pub mod jwt;
