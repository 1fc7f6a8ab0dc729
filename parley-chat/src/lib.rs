//! Parley Chat - Conversation state over pluggable model backends.
//!
//! This crate multiplexes many simultaneous conversations onto
//! interchangeable backends:
//! - `Message`/`SessionInfo`: the in-memory conversation data model
//! - `ConversationHelper`: owner of one session's ordered history, driving
//!   one-shot and streamed generation against its bound backend
//! - `HelperRegistry`: process-wide map from (user, session) to helper with
//!   idempotent create-or-fetch, lookup, eviction, and listing
//! - `persist`: the injected best-effort persistence seam

#![warn(clippy::all)]

pub mod error;
pub mod helper;
pub mod manager;
pub mod message;
pub mod persist;

pub use error::ChatError;
pub use helper::ConversationHelper;
pub use manager::HelperRegistry;
pub use message::{Message, SessionInfo};
pub use persist::{noop_save_fn, queued_save_fn, SaveFn};
