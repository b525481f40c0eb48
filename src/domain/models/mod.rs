pub mod message;

pub use message::{Message, MessageStatus, MessageStatusKind};
