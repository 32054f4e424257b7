pub mod repository;

pub use repository::{
    Lookup, MetaSearchOptions, ObjectRepository, SearchOptions, SearchResult, SortDir, SortField,
};
