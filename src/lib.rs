// Clippy allows for reasonable defaults
#![allow(clippy::new_without_default)] // Default not always appropriate for stateful types
#![allow(clippy::derivable_impls)] // Explicit Default impls can be clearer
#![allow(clippy::field_reassign_with_default)] // Builder pattern is clearer
#![allow(clippy::collapsible_if)] // Separate ifs can be more readable
#![allow(clippy::redundant_closure)] // |x| f(x) can be clearer than f
#![allow(clippy::unwrap_or_default)] // unwrap_or_else(Default::default) can be clearer

// Module declarations
pub mod agent_loop;
pub mod channel;
pub mod config;
pub mod events;
pub mod file_storage;
pub mod learning;
pub mod preview;
pub mod remote;
pub mod shutdown;
mod utils;

// Mock backend (HTTP/WebSocket API)
pub mod server;

pub use agent_loop::{AgentLoop, AgentLoopConfig, AgentServices, AgentState, AgentStatus};
pub use channel::{ChannelConfig, ChannelError, MessageChannel};
pub use learning::LearningStore;
pub use remote::{RemoteClient, TestTarget};
pub use utils::{generate_id, truncate_chars};
