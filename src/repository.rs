//! The narrow store interface the engine depends on, plus an in-memory
//! implementation for embedding and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;
use crate::models::{RelationTuple, TupleQuery};

/// Finite, unordered sequence of tuples matching a query. Items may fail
/// individually; a failure is observed on first consumption.
pub type TupleStream = BoxStream<'static, Result<RelationTuple>>;

/// Range query by partial key, the single operation the engine requires
/// from a tuple store. Implementations must return every stored tuple
/// matching all set fields of the query and must be safe for concurrent
/// calls. Pagination, if any, stays behind the stream.
#[async_trait]
pub trait TupleQuerier: Send + Sync {
    async fn query_tuples(&self, query: TupleQuery) -> Result<TupleStream>;
}

/// In-memory tuple store keyed by the canonical tuple string.
pub struct InMemoryTupleRepository {
    tuples: DashMap<String, RelationTuple>,
}

impl InMemoryTupleRepository {
    pub fn new() -> Self {
        Self {
            tuples: DashMap::new(),
        }
    }

    pub fn write_tuple(&self, tuple: RelationTuple) {
        self.tuples.insert(tuple.to_string(), tuple);
    }

    pub fn write_all(&self, tuples: impl IntoIterator<Item = RelationTuple>) {
        for tuple in tuples {
            self.write_tuple(tuple);
        }
    }

    pub fn delete_tuple(&self, tuple: &RelationTuple) {
        self.tuples.remove(&tuple.to_string());
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }
}

impl Default for InMemoryTupleRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TupleQuerier for InMemoryTupleRepository {
    async fn query_tuples(&self, query: TupleQuery) -> Result<TupleStream> {
        let matches: Vec<Result<RelationTuple>> = self
            .tuples
            .iter()
            .filter(|entry| query.matches(entry.value()))
            .map(|entry| Ok(entry.value().clone()))
            .collect();
        Ok(stream::iter(matches).boxed())
    }
}
