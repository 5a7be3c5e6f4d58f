//! Desktop configuration loader.
//!
//! Follows the application/window lifecycle reported by a [`DesktopRuntime`]
//! and keeps a scoped [`ConfigStore`] in step with it: configuration declared
//! by an application is registered while the application (or any of its
//! descendants) runs and withdrawn once nothing needs it.

pub mod config;
pub mod error;
pub mod events;
pub mod manifest;
pub mod scope;
pub mod services;
pub mod utils;

pub use config::Settings;
pub use error::{LoaderError, Result};
pub use scope::Scope;
pub use services::{ConfigStore, DesktopRuntime, DryRunRuntime, Loader, MemoryStore};
