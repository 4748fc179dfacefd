pub mod completions;
pub mod credential_pool;

pub use completions::{BackendRoute, CompletionServiceImpl};
pub use credential_pool::{CredentialPool, PoolHandle};
