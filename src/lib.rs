//! Zanzibar-style relationship-based access control (ReBAC) check engine
//!
//! This crate answers authorization queries of the form "is subject S a
//! member of relation R on object O?" against a store of relationship
//! tuples and a set of namespace definitions, providing:
//! - A closed rewrite AST (union, intersection, exclusion, computed
//!   subject sets, tuple-to-subject-set traversal, inversion)
//! - A concurrent recursive check engine with short-circuiting and
//!   cancellation
//! - Explanation trees justifying every decision
//! - Depth bounding and cycle detection for self-referential policies
//! - Narrow async contracts for the tuple store and namespace registry
//!
//! # Core Concepts
//!
//! - **Namespace**: a named scope grouping objects and their relations
//! - **Relation**: a named edge label, optionally defined by a rewrite
//! - **Tuple**: a relationship statement `ns:obj#rel@subject`
//! - **Subject set**: a subject of the form `ns:obj#rel`, meaning "all
//!   members of that relation"
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rebac_engine::{
//!     CheckEngine, InMemoryNamespaceRegistry, InMemoryTupleRepository, Membership,
//!     Namespace, Relation, RelationTuple, RewriteNode, SubjectSetRewrite,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let repository = Arc::new(InMemoryTupleRepository::new());
//!     repository.write_tuple("doc:readme#owner@alice".parse()?);
//!
//!     let registry = Arc::new(InMemoryNamespaceRegistry::new([Namespace::new(
//!         "doc",
//!         vec![
//!             Relation::direct("owner"),
//!             Relation::rewritten(
//!                 "viewer",
//!                 SubjectSetRewrite::union(vec![RewriteNode::computed("owner")]),
//!             ),
//!         ],
//!     )]));
//!
//!     let engine = CheckEngine::new(repository, registry);
//!     let query: RelationTuple = "doc:readme#viewer@alice".parse()?;
//!     let result = engine.check(&query, 100).await;
//!     assert_eq!(result.membership, Membership::IsMember);
//!     Ok(())
//! }
//! ```

pub mod check;
pub mod checkgroup;
pub mod engine;
pub mod error;
pub mod expand;
pub mod models;
pub mod repository;
pub mod schema;
pub mod tree;

pub use checkgroup::*;
pub use engine::*;
pub use error::*;
pub use expand::*;
pub use models::*;
pub use repository::*;
pub use schema::*;
pub use tree::*;
