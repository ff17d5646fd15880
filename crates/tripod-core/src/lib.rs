//! # tripod-core
//!
//! Session-scoped object-graph mapping over a transactional triple store.
//!
//! This crate projects subject/predicate/object statements onto
//! identity-managed entities whose runtime shape is driven by the types
//! stored for them, with pluggable caching and change-driven invalidation.
//!
//! ## Layers
//!
//! - `registry`: roles, store types, memoized composite types
//! - `resources` / `type_manager`: resource lifecycle and `rdf:type` access
//! - `entity`: entity handles and the `EntityFactory`
//! - `cache`: no-cache, eager identity map, change-tracked layers
//! - `merge`: merge and designate
//! - `query`: typed projection of prepared query results
//! - `session`: the unit of work tying it all together
//!
//! ## Architectural Constraints
//!
//! - The physical store, its query evaluator and the literal codec are
//!   collaborators behind traits (`store`, `query`, `codec`)
//! - Every mutation runs through `transaction::in_transaction`
//! - A half-built entity is never returned
//! - No async, no network dependencies (pure Rust)

// =============================================================================
// MODULES
// =============================================================================

pub mod cache;
pub mod change;
pub mod codec;
pub mod config;
pub mod entity;
pub mod merge;
pub mod primitives;
pub mod query;
pub mod registry;
pub mod resources;
pub mod session;
pub mod store;
pub mod transaction;
pub mod type_manager;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    EngineError, Iri, Literal, RdfType, Resource, SessionId, Statement, StatementPattern,
    StoreError, Term, TypeSet,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use cache::{
    CacheChain, ChangeTrackedCache, EagerCache, EntityCache, EntityKey, KeyedCache, NoCache,
    SharedEntityCache, shared_entity_cache,
};
pub use change::{ChangeBus, ChangeEvent, ChangeKind, ChangeSubscription, StatementChange};
pub use codec::{LiteralCodec, NativeValue, XsdCodec};
pub use config::{CachePolicy, EngineConfig};
pub use entity::{Entity, EntityDecorator, EntityFactory, StagedGraph};
pub use merge::{Detached, DetachedKey, DetachedValue, IdentityTable};
pub use query::{
    BindingSet, Cursor, PreparedQuery, Projected, QueryLanguage, QueryResult, ResultType, Results,
    Row, TypedQuery, VecCursor,
};
pub use registry::{CompositeType, RoleDef, TypeRegistry};
pub use resources::ResourceManager;
pub use session::{Session, SessionFactory};
pub use transaction::{TransactionScope, in_transaction};
pub use type_manager::TypeManager;

// =============================================================================
// RE-EXPORTS: Store Adapters
// =============================================================================

pub use store::{MemoryRepository, RedbRepository, Repository, StoreConnection};
