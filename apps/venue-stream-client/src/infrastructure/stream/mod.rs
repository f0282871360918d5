//! Stream Session
//!
//! One logical connection per venue service, built from four parts:
//!
//! - `guard`: single-flight dial and replacement of the physical connection
//! - `session`: per-connection login state, one login in flight at a time
//! - `registry`: topic and event handlers shared by callers and the reader
//! - `router`: the reader loop that parses frames and dispatches them
//!
//! [`StreamClient`] ties them together.

mod client;
mod guard;
mod registry;
mod router;
mod session;

pub use client::{StreamClient, StreamClientBuilder, StreamError};
pub use guard::{ConnectionGuard, OnConnect};
pub use registry::{DispatchRegistry, FrameHandler, RegistrationId};
pub use router::{FrameRouter, READER_WATCH};
pub use session::{LoginError, Session};
