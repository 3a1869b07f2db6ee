//! SemIndex Client - shared runtime for the CLI
//!
//! Provides the `ClientRuntime` that owns both local (in-process) and
//! remote (HTTP service) modes, so the CLI doesn't leak mode branching to
//! its command handlers.

pub mod runtime;
pub mod service_client;

pub use runtime::ClientRuntime;
pub use service_client::{CollectionStatus, ServiceClient, ServiceStatus};
