pub mod loader;
pub mod runtime;
pub mod store;

pub use loader::Loader;
pub use runtime::{DesktopRuntime, DryRunRuntime};
pub use store::{ConfigStore, MemoryStore};
