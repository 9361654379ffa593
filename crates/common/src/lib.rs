//! Common utilities and types shared across Meshroom components.

#![warn(clippy::pedantic)]

/// Module for common data types
pub mod types;
