//! # TideSync Protocol
//!
//! Envelope types exchanged between the sync engine and the server.
//!
//! This crate provides:
//! - [`QueuedUpdate`] for locally queued outbound mutations
//! - [`UpdateBatch`] for the outbound POST body
//! - [`UpdatesPage`] for the inbound GET result
//! - [`Until`] and [`SyncCursor`] for inbound progress tracking
//! - JSON encoding/decoding of the envelopes
//!
//! Payloads themselves are opaque JSON values owned by the caller.
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cursor;
mod error;
mod messages;
mod update;

pub use cursor::{SyncCursor, Until};
pub use error::{ProtocolError, ProtocolResult};
pub use messages::{PostReceipt, UpdateBatch, UpdatesPage};
pub use update::{unix_millis, QueuedUpdate};
