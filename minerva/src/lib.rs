pub mod config;
pub mod providers;
pub mod registry;
pub mod schema;
pub mod types;

// Re-exports for convenience
pub use config::{ConnectionStore, ConnectionsFile};
pub use providers::{ProviderAdapter, ProviderError, ProviderKind, TokenStream};
pub use registry::{AdapterRegistry, create_adapter};
pub use schema::{GenerationParameter, ModelSchema};
pub use tokio_util::sync::CancellationToken;
pub use types::*;
