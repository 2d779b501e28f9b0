//! Common utilities and types shared across the meeting engine crates.

#![warn(clippy::pedantic)]

/// Module for strongly typed identifiers
pub mod types;

/// Module for injectable time and id sources
pub mod clock;

/// Module for secret types that prevent accidental logging
pub mod secret;
