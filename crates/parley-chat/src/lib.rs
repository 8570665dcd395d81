pub mod config;
pub mod directory;
pub mod publisher;
pub mod service;

pub use config::ChatConfig;
pub use directory::{ChannelDirectory, MemoryDirectory, ShardDirectory};
pub use publisher::{BroadcastPublisher, EventPublisher, PublishError};
pub use service::ChatService;
