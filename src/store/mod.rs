mod history;
mod kv;
mod preferences;

pub use self::history::{ConnectionHistoryEntry, HistoryStore};
pub use self::kv::{JsonFileStore, KeyValueStore, MemoryStore, default_store_path};
pub use self::preferences::Preferences;
