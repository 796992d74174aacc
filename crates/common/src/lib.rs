//! Common utilities and types shared across Room Controller components.

#![warn(clippy::pedantic)]

/// Module for identifier and identity types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for identity token (JWT) validation
pub mod jwt;
