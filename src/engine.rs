//! The authorization engine facade wiring the resolver to its
//! collaborators.

use std::sync::Arc;
use tracing::debug;

use crate::check::Checker;
use crate::checkgroup::{CancellationToken, CheckResult};
use crate::models::RelationTuple;
use crate::repository::TupleQuerier;
use crate::schema::NamespaceRegistry;

/// Answers membership queries against a tuple store and a namespace
/// registry. The engine holds no per-query state; one instance serves
/// concurrent checks.
pub struct CheckEngine {
    checker: Checker,
}

impl CheckEngine {
    pub fn new(querier: Arc<dyn TupleQuerier>, registry: Arc<dyn NamespaceRegistry>) -> Self {
        Self {
            checker: Checker::new(querier, registry),
        }
    }

    /// Check whether the query's subject is a member of the relation on the
    /// object, expanding rewrites at most `max_depth` levels deep.
    /// `max_depth == 0` yields an immediate `Unknown`.
    pub async fn check(&self, query: &RelationTuple, max_depth: u32) -> CheckResult {
        self.check_with_token(query, max_depth, &CancellationToken::new())
            .await
    }

    /// Like [`check`](Self::check), but tied to a caller-provided
    /// cancellation token: a deadline or client disconnect upstream cancels
    /// every in-flight subcheck.
    pub async fn check_with_token(
        &self,
        query: &RelationTuple,
        max_depth: u32,
        token: &CancellationToken,
    ) -> CheckResult {
        debug!(query = %query, max_depth, "check started");
        let result = self.checker.check(query, max_depth, token).await;
        debug!(query = %query, membership = %result.membership, "check finished");
        result
    }

    /// Run several checks, collecting one result per query in order.
    pub async fn batch_check(
        &self,
        queries: &[RelationTuple],
        max_depth: u32,
    ) -> Vec<CheckResult> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.check(query, max_depth).await);
        }
        results
    }
}
