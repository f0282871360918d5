//! Application Layer - Port definitions.
//!
//! This layer contains the port interfaces that define how the stream
//! client interacts with its collaborators: the key signer that supplies
//! login credentials, the injected logger, and the read-monitor hook.

/// Port interfaces for external collaborators.
pub mod ports;
