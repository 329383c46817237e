pub mod auth;
pub mod completion;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod protocol;
pub mod sse;

pub use auth::{bearer_token, AuthError, CognitoVerifier, DisabledVerifier, TokenVerifier};
pub use completion::{
    ChatRole, ChatTurn, ChunkStream, CompletionBackend, CompletionError, OpenAiClient,
};
pub use config::JournalConfig;
pub use error::JournalError;
pub use models::{Message, MessageKind, NewSummary, Role, Summary, SummarySections};
pub use protocol::{ClientEvent, ServerEvent, StreamChunk, SystemNotice};
