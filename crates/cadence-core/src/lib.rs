//! # cadence-core
//!
//! Core types and primitives for the Cadence task orchestrator.
//! This crate defines the shared vocabulary used by every other crate in the workspace.

pub mod error;
pub mod event;
pub mod message;
pub mod tool;
pub mod types;

pub use error::{CadenceError, Result};
pub use event::{Event, EventBus};
pub use message::{Message, MessageContent, Role};
pub use tool::{Tool, ToolCall, ToolResult};
pub use types::*;
