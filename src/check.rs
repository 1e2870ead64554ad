//! Recursive resolution of a membership query against namespace rewrites
//! and stored tuples.
//!
//! Every query fans out into a union of a direct tuple lookup, transitive
//! expansion through stored subject sets, and the relation's rewrite
//! formula when it has one. Subchecks run concurrently under a
//! [`CheckGroup`](crate::checkgroup::CheckGroup) and short-circuit; depth
//! decrements on every semantic recursion, and a per-path visited set cuts
//! reference cycles before the depth bound has to.

use futures::future::BoxFuture;
use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::checkgroup::{CancellationToken, CheckGroup, CheckResult, Membership};
use crate::error::RebacError;
use crate::models::{RelationTuple, TupleQuery};
use crate::repository::TupleQuerier;
use crate::schema::{NamespaceRegistry, Operator, RewriteNode, SubjectSetRewrite};
use crate::tree::{NodeKind, Tree};

/// The recursive resolver. Cheap to clone; every spawned subcheck owns a
/// clone so the borrow never outlives a suspension point.
#[derive(Clone)]
pub struct Checker {
    querier: Arc<dyn TupleQuerier>,
    registry: Arc<dyn NamespaceRegistry>,
}

impl Checker {
    pub fn new(querier: Arc<dyn TupleQuerier>, registry: Arc<dyn NamespaceRegistry>) -> Self {
        Self { querier, registry }
    }

    /// Decide whether the query tuple's subject is a member of the relation
    /// on the object, expanding at most `max_depth` semantic recursions.
    pub async fn check(
        &self,
        tuple: &RelationTuple,
        max_depth: u32,
        token: &CancellationToken,
    ) -> CheckResult {
        self.check_path(tuple.clone(), max_depth, HashSet::new(), token.clone())
            .await
    }

    /// One recursion step. `visited` holds the canonical tuples already on
    /// this path; re-entering one means a reference cycle and resolves
    /// `NotMember` without consuming the remaining depth.
    fn check_path(
        &self,
        tuple: RelationTuple,
        depth: u32,
        visited: HashSet<String>,
        token: CancellationToken,
    ) -> BoxFuture<'static, CheckResult> {
        let checker = self.clone();
        Box::pin(async move {
            if token.is_cancelled() {
                return CheckResult::cancelled();
            }
            if depth == 0 {
                debug!(tuple = %tuple, "depth exhausted");
                return CheckResult::unknown();
            }

            let key = tuple.to_string();
            let mut visited = visited;
            if !visited.insert(key) {
                trace!(tuple = %tuple, "cycle on current path");
                return CheckResult::not_member();
            }

            trace!(tuple = %tuple, depth, "checking");

            let namespace = match checker.registry.get(&tuple.namespace).await {
                Ok(namespace) => namespace,
                Err(error) => return CheckResult::failed(error),
            };
            let relation = match namespace.relation(&tuple.relation) {
                Some(relation) => relation.clone(),
                None => {
                    return CheckResult::failed(RebacError::RelationNotFound {
                        namespace: tuple.namespace.clone(),
                        relation: tuple.relation.clone(),
                    })
                }
            };

            let mut group = CheckGroup::new(Operator::Union, tuple.clone());
            {
                let checker = checker.clone();
                let tuple = tuple.clone();
                group.add_check(move |token| async move {
                    checker.check_direct(tuple, token).await
                });
            }
            {
                let checker = checker.clone();
                let tuple = tuple.clone();
                let visited = visited.clone();
                group.add_check(move |token| async move {
                    checker
                        .check_subject_set_expansion(tuple, depth, visited, token)
                        .await
                });
            }
            if let Some(rewrite) = relation.rewrite {
                let checker = checker.clone();
                let tuple = tuple.clone();
                let visited = visited.clone();
                group.add_check(move |token| async move {
                    checker
                        .eval_rewrite(rewrite, tuple, depth, visited, token)
                        .await
                });
            }

            let result = group.result(&token).await;
            debug!(tuple = %tuple, membership = %result.membership, "check decided");

            let children: Vec<Tree> = result.tree.into_iter().collect();
            CheckResult {
                membership: result.membership,
                error: result.error,
                tree: Some(Tree::node(NodeKind::Union, tuple, children)),
            }
        })
    }

    /// Leaf check: does the queried tuple exist in the store as-is?
    async fn check_direct(&self, tuple: RelationTuple, token: CancellationToken) -> CheckResult {
        let query = TupleQuery::new()
            .with_namespace(&tuple.namespace)
            .with_object(&tuple.object)
            .with_relation(&tuple.relation)
            .with_subject(tuple.subject.clone());

        let mut stream = match self.querier.query_tuples(query).await {
            Ok(stream) => stream,
            Err(error) => return CheckResult::failed(error),
        };
        while let Some(item) = stream.next().await {
            if token.is_cancelled() {
                return CheckResult::cancelled();
            }
            match item {
                Ok(found) => {
                    trace!(tuple = %found, "stored tuple hit");
                    return CheckResult::is_member_with(Tree::leaf(found));
                }
                Err(error) => return CheckResult::failed(error),
            }
        }
        CheckResult::not_member()
    }

    /// Transitive membership: any stored tuple on the queried relation
    /// whose subject is itself a subject set pulls in that set's members.
    async fn check_subject_set_expansion(
        &self,
        tuple: RelationTuple,
        depth: u32,
        visited: HashSet<String>,
        token: CancellationToken,
    ) -> CheckResult {
        let query = TupleQuery::new()
            .with_namespace(&tuple.namespace)
            .with_object(&tuple.object)
            .with_relation(&tuple.relation);

        let mut stream = match self.querier.query_tuples(query).await {
            Ok(stream) => stream,
            Err(error) => return CheckResult::failed(error),
        };

        let mut group = CheckGroup::new(Operator::Union, tuple.clone());
        while let Some(item) = stream.next().await {
            if token.is_cancelled() {
                return CheckResult::cancelled();
            }
            let stored = match item {
                Ok(stored) => stored,
                Err(error) => return CheckResult::failed(error),
            };
            let Some(set) = stored.subject.as_set() else {
                continue;
            };
            if set.is_whole_object() {
                // `ns:obj#` holds no members beyond the object itself; the
                // direct branch already covers an exact subject match
                continue;
            }

            let target = RelationTuple::new(
                set.namespace.clone(),
                set.object.clone(),
                set.relation.clone(),
                tuple.subject.clone(),
            );
            let checker = self.clone();
            let visited = visited.clone();
            group.add_check(move |token| checker.check_path(target, depth - 1, visited, token));
        }

        if group.is_empty() {
            return CheckResult::not_member();
        }
        group.result(&token).await
    }

    /// Evaluate an operator node: one group with the node's operator, one
    /// subcheck per child. Structural descent does not consume depth.
    fn eval_rewrite(
        &self,
        rewrite: SubjectSetRewrite,
        tuple: RelationTuple,
        depth: u32,
        visited: HashSet<String>,
        token: CancellationToken,
    ) -> BoxFuture<'static, CheckResult> {
        let checker = self.clone();
        Box::pin(async move {
            let mut group = CheckGroup::new(rewrite.operator, tuple.clone());
            for child in rewrite.children {
                let checker = checker.clone();
                let tuple = tuple.clone();
                let visited = visited.clone();
                group.add_check(move |token| checker.eval_node(child, tuple, depth, visited, token));
            }
            group.result(&token).await
        })
    }

    fn eval_node(
        self,
        node: RewriteNode,
        tuple: RelationTuple,
        depth: u32,
        visited: HashSet<String>,
        token: CancellationToken,
    ) -> BoxFuture<'static, CheckResult> {
        Box::pin(async move {
            match node {
                RewriteNode::Rewrite(rewrite) => {
                    self.eval_rewrite(rewrite, tuple, depth, visited, token).await
                }
                RewriteNode::ComputedSubjectSet { relation } => {
                    let target = tuple.with_relation(relation);
                    let result = self.check_path(target, depth - 1, visited, token).await;
                    CheckResult {
                        membership: result.membership,
                        error: result.error,
                        tree: result
                            .tree
                            .map(|tree| tree.with_kind(NodeKind::ComputedSubjectSet)),
                    }
                }
                RewriteNode::TupleToSubjectSet {
                    relation,
                    computed_subject_set_relation,
                } => {
                    self.check_tuple_to_subject_set(
                        tuple,
                        relation,
                        computed_subject_set_relation,
                        depth,
                        visited,
                        token,
                    )
                    .await
                }
                RewriteNode::InvertResult { child } => {
                    let result = self
                        .clone()
                        .eval_node(*child, tuple.clone(), depth, visited, token)
                        .await;
                    invert(result, tuple)
                }
            }
        })
    }

    /// Traverse stored `relation` tuples on the object; every subject-set
    /// subject becomes a recursion into the computed relation on the
    /// pointed-at object. Bare subjects cannot be followed and are
    /// skipped. An unknown namespace or relation behind a traversed tuple
    /// means the pointed-at userset is empty, not a failed check.
    async fn check_tuple_to_subject_set(
        self,
        tuple: RelationTuple,
        relation: String,
        computed_subject_set_relation: String,
        depth: u32,
        visited: HashSet<String>,
        token: CancellationToken,
    ) -> CheckResult {
        let query = TupleQuery::new()
            .with_namespace(&tuple.namespace)
            .with_object(&tuple.object)
            .with_relation(&relation);

        let mut stream = match self.querier.query_tuples(query).await {
            Ok(stream) => stream,
            Err(error) => return CheckResult::failed(error),
        };

        let mut group = CheckGroup::new(Operator::Union, tuple.clone());
        while let Some(item) = stream.next().await {
            if token.is_cancelled() {
                return CheckResult::cancelled();
            }
            let stored = match item {
                Ok(stored) => stored,
                Err(error) => return CheckResult::failed(error),
            };
            let Some(set) = stored.subject.as_set() else {
                trace!(tuple = %stored, "skipping bare subject during traversal");
                continue;
            };

            let target = RelationTuple::new(
                set.namespace.clone(),
                set.object.clone(),
                computed_subject_set_relation.clone(),
                tuple.subject.clone(),
            );
            let checker = self.clone();
            let visited = visited.clone();
            group.add_check(move |token| async move {
                let result = checker.check_path(target, depth - 1, visited, token).await;
                match result.error {
                    Some(RebacError::NamespaceNotFound(_))
                    | Some(RebacError::RelationNotFound { .. }) => CheckResult::not_member(),
                    _ => result,
                }
            });
        }

        if group.is_empty() {
            return CheckResult::not_member();
        }
        let result = group.result(&token).await;
        CheckResult {
            membership: result.membership,
            error: result.error,
            tree: result
                .tree
                .map(|tree| tree.with_kind(NodeKind::TupleToSubjectSet)),
        }
    }
}

fn invert(result: CheckResult, label: RelationTuple) -> CheckResult {
    let membership = match result.membership {
        Membership::IsMember => Membership::NotMember,
        Membership::NotMember => Membership::IsMember,
        Membership::Unknown => Membership::Unknown,
    };
    let children: Vec<Tree> = result.tree.into_iter().collect();
    CheckResult {
        membership,
        error: result.error,
        tree: Some(Tree::node(NodeKind::Not, label, children)),
    }
}
