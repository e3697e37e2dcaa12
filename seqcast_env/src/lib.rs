//! SeqCast Environment Abstraction Layer
//!
//! This crate holds everything a replica touches that is not protocol
//! logic: identifiers, the immutable [`Message`] envelope, the per-replica
//! [`Mailbox`], the [`Link`]/[`Transport`] seam that simulated networks
//! plug into, and the [`RuntimeContext`] that supplies time.
//!
//! # Core Concept
//!
//! Replicas are sans-IO: they only enqueue to their own outbound channels
//! and drain their own inbound channel. Transports move messages between
//! channels; the driver decides when. With a seeded context, every run is
//! reproducible from its seed.
//!
//! # Example
//!
//! ```ignore
//! use seqcast_env::{Mailbox, Message, ReplicaId};
//!
//! let mut mailbox = Mailbox::new(ReplicaId(1), 3);
//! mailbox.send(ReplicaId(0), Message::encode(&payload)?)?;
//! for msg in mailbox.receive() {
//!     handle(msg);
//! }
//! ```

mod context;
mod error;
mod mailbox;
mod network;
mod tokio_impl;
mod types;

pub use context::RuntimeContext;
pub use error::EnvError;
pub use mailbox::{drain_all, Mailbox, MessageReceiver, MessageSender};
pub use network::{DeliveryReport, Link, NetworkController, Transport};
pub use tokio_impl::TokioContext;
pub use types::{Message, ReplicaId};
