pub mod common;
pub mod completions;
pub mod conversations;
pub mod health;

pub use completions::chat_completions;
pub use conversations::delete_conversation;
pub use health::health_check;
