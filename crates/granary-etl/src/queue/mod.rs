//! Interface boundary to the job-dispatch message queue.
//!
//! Only the payload codec lives here; the transport itself is an external
//! collaborator.

pub mod payload;

pub use payload::Payload;
