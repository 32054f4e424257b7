pub mod cache;
pub mod connection;
pub mod meta;

pub use cache::{CacheClient, MemoryCache, NullCache};
pub use connection::{is_duplicate_key, Dialect, Placeholders, RelationalStore, SqlArg};
pub use meta::{MetaStore, SqlMetaStore};
