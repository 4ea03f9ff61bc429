//! Data types shared by the rjms session core and broker glue.
//!
//! Everything here is plain serde data: acknowledgement modes, destinations,
//! outbound envelopes, confirm reports and the static provider metadata.
//! None of it knows how frames reach a broker; `rjms` builds the session
//! lifecycle on top.

pub mod confirm;
pub mod message;
pub mod metadata;
pub mod types;

pub use confirm::*;
pub use message::*;
pub use metadata::*;
pub use types::*;
