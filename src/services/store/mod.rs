mod memory;
mod r#trait;

pub use self::memory::{MemoryStore, ScopedConfig};
pub use self::r#trait::ConfigStore;
