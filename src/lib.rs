pub mod app;
pub mod domain;
pub mod error;
pub mod infra;
pub mod storage;

// Convenience re-exports (keeps call-sites clean)
pub use app::repository::{
    Lookup, MetaSearchOptions, ObjectRepository, SearchOptions, SearchResult, SortDir, SortField,
};
pub use domain::{
    Connector, EntityDescriptor, NamedEntity, NamedObject, PredicateCompiler, SearchPredicate,
    ValueMatch,
};
pub use error::{Result, StoreError};
pub use infra::config::StoreConfig;
pub use storage::{CacheClient, MemoryCache, MetaStore, NullCache, RelationalStore, SqlMetaStore};
