//! # TideSync Engine
//!
//! Bidirectional sync between a local table store and a remote server.
//!
//! This crate provides:
//! - A restartable, non-overlapping [`Scheduler`]
//! - A durable [`OutboundQueue`] that batches local mutations upstream
//! - A cursor-based [`InboundSync`] poller that applies remote mutations
//! - [`Transport`] and [`Publisher`] seams plus in-memory test doubles
//! - An HTTP transport over an abstract [`HttpClient`]
//!
//! ## Delivery Guarantees
//!
//! - Queued rows are deleted only after the server acknowledged them
//! - A failed post resends the full unacknowledged set after the retry interval
//! - The inbound cursor advances only after the page was applied locally
//! - A failed apply re-fetches the same window on the next cycle
//!
//! Both directions are therefore at-least-once. Receivers must tolerate
//! duplicates.
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use serde_json::json;
//! use tidesync_engine::{LogHooks, MemoryPublisher, MockTransport, SyncConfig, SyncEngine};
//! use tidesync_storage::InMemoryStore;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), tidesync_engine::SyncError> {
//! let store = InMemoryStore::new();
//! let engine = SyncEngine::new(
//!     SyncConfig::default(),
//!     &store,
//!     Arc::new(MockTransport::new()),
//!     Arc::new(MemoryPublisher::new()),
//!     Arc::new(LogHooks),
//! )?;
//!
//! engine.start();
//! engine.add(vec![json!({"op": "put", "key": "a"})])?;
//! assert_eq!(engine.outbound().len()?, 1);
//! engine.stop();
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod engine;
mod error;
mod hooks;
mod http;
mod inbound;
mod outbound;
mod publish;
mod scheduler;
mod transport;

pub use config::SyncConfig;
pub use engine::SyncEngine;
pub use error::{ApplyError, ErrorTag, SyncError, SyncResult};
pub use hooks::{LogHooks, RecordingHooks, SyncHooks};
pub use http::{HttpClient, HttpTransport};
pub use inbound::{CycleOutcome, InboundState, InboundStats, InboundSync, CURSOR_TABLE};
pub use outbound::{FlushOutcome, OutboundQueue, OutboundStats, QUEUED_AT_INDEX, QUEUE_TABLE};
pub use publish::{first_error, MemoryPublisher, Publisher};
pub use scheduler::Scheduler;
pub use transport::{MockTransport, Transport};
