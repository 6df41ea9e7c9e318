//! Shared domain types for the Parley workspace: messages, provider tags,
//! stream events, dialogue specifications, the error taxonomy, cooperative
//! cancellation, and the dot-path config store.

pub mod cancel;
pub mod config;
pub mod dialogue;
pub mod error;
pub mod message;
pub mod provider;
pub mod stream;

pub use cancel::CancelToken;
pub use config::ConfigStore;
pub use dialogue::{AgentRole, AgentSeat, DialogueEvent, DialogueMode, DialogueSpec, FinishReason};
pub use error::{Error, Result};
pub use message::{Message, Role};
pub use provider::ProviderTag;
pub use stream::{BoxStream, DeltaStream, StreamEvent};
