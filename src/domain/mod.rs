//! Domain types: named objects, metadata predicates and their compiler.

pub mod compiler;
pub mod object;
pub mod predicate;

pub use compiler::{CompiledPredicate, PredicateCompiler, PredicatePlan};
pub use object::{CachedRow, EntityDescriptor, MetadataDelta, NamedEntity, NamedObject};
pub use predicate::{Clause, Connector, SearchPredicate, ValueMatch};
