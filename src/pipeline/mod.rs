//! Message pipeline.
//!
//! Every message, whichever direction it travels, converges on one
//! canonical [`types::Message`]:
//! 1. `webhook`: provider payload shapes → `InboundMessage`
//! 2. `resolver`: participant set → conversation
//! 3. `processor`: orchestration, provider sends and persistence

pub mod processor;
pub mod resolver;
pub mod types;
pub mod webhook;

pub use processor::{ConversationQuery, MessagePipeline, MessageQuery};
pub use resolver::ConversationResolver;
pub use webhook::WebhookChannel;
