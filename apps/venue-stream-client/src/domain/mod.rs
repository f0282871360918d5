//! Domain Layer - Core streaming types and business logic.
//!
//! This layer contains the core domain types for the venue stream client
//! with no I/O. All types here are pure Rust with serialization support.

/// Connection lifecycle and service classification.
pub mod streaming;

/// Subscription arguments, topic keys and watch keys.
pub mod subscription;
