//! Concurrent short-circuiting combinator over subchecks.
//!
//! A check-group runs every registered subcheck as its own task. Each task
//! yields its result into a bounded channel; the group is a reducer over
//! that stream which finalises on the first short-circuiting signal and
//! requests cancellation of the remaining siblings. Cancellation flows
//! through a token chained from the caller, so a short-circuit reaches the
//! whole abandoned subtree.

use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::{mpsc, watch};
use tracing::{trace, warn};

use crate::error::RebacError;
use crate::models::RelationTuple;
use crate::schema::Operator;
use crate::tree::{NodeKind, Tree};

/// Outcome of a membership check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Membership {
    IsMember,
    NotMember,
    /// The check could not be decided: depth exhaustion, cancellation, or a
    /// tolerated lookup failure.
    Unknown,
}

impl fmt::Display for Membership {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::IsMember => "is_member",
            Self::NotMember => "not_member",
            Self::Unknown => "unknown",
        })
    }
}

/// Decision plus the explanation tree that justifies it. `Unknown` with no
/// error means the depth bound was reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckResult {
    pub membership: Membership,
    pub tree: Option<Tree>,
    pub error: Option<RebacError>,
}

impl CheckResult {
    pub fn is_member() -> Self {
        Self {
            membership: Membership::IsMember,
            tree: None,
            error: None,
        }
    }

    pub fn is_member_with(tree: Tree) -> Self {
        Self {
            membership: Membership::IsMember,
            tree: Some(tree),
            error: None,
        }
    }

    pub fn not_member() -> Self {
        Self {
            membership: Membership::NotMember,
            tree: None,
            error: None,
        }
    }

    pub fn unknown() -> Self {
        Self {
            membership: Membership::Unknown,
            tree: None,
            error: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            membership: Membership::Unknown,
            tree: None,
            error: Some(RebacError::Cancelled),
        }
    }

    pub fn failed(error: RebacError) -> Self {
        Self {
            membership: Membership::Unknown,
            tree: None,
            error: Some(error),
        }
    }

    pub fn allowed(&self) -> bool {
        self.membership == Membership::IsMember
    }
}

/// Cancellation signal chained from parent to child. A child token observes
/// every ancestor trigger, so cancelling a group reaches its whole subtree
/// without the subtree holding references back up the chain.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    watchers: Vec<watch::Receiver<bool>>,
}

impl CancellationToken {
    /// A token that is never cancelled; the root of a chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a child token and the trigger that cancels it. The child is
    /// also cancelled whenever this token is.
    pub fn child(&self) -> (CancellationTrigger, CancellationToken) {
        let (tx, rx) = watch::channel(false);
        let mut watchers = self.watchers.clone();
        watchers.push(rx);
        (CancellationTrigger { tx }, CancellationToken { watchers })
    }

    pub fn is_cancelled(&self) -> bool {
        self.watchers
            .iter()
            .any(|watcher| *watcher.borrow() || watcher.has_changed().is_err())
    }

    /// Resolves when any ancestor trigger fires. A dropped trigger counts
    /// as cancelled: the owning group is gone and its subtree must not
    /// outlive it.
    pub async fn cancelled(&self) {
        if self.watchers.is_empty() {
            return future::pending::<()>().await;
        }
        let waiters: Vec<BoxFuture<'static, ()>> = self
            .watchers
            .iter()
            .cloned()
            .map(|mut watcher| {
                Box::pin(async move {
                    loop {
                        if *watcher.borrow() {
                            return;
                        }
                        if watcher.changed().await.is_err() {
                            return;
                        }
                    }
                }) as BoxFuture<'static, ()>
            })
            .collect();
        future::select_all(waiters).await;
    }
}

/// Fires the cancellation of one token subtree.
#[derive(Debug)]
pub struct CancellationTrigger {
    tx: watch::Sender<bool>,
}

impl CancellationTrigger {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

type CheckFunc = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, CheckResult> + Send>;

/// Concurrent aggregator over subchecks with short-circuiting operator
/// semantics. The label is the tuple the group justifies; it becomes the
/// label of operator nodes in the explanation tree.
pub struct CheckGroup {
    operator: Operator,
    label: RelationTuple,
    checks: Vec<CheckFunc>,
}

impl CheckGroup {
    pub fn new(operator: Operator, label: RelationTuple) -> Self {
        Self {
            operator,
            label,
            checks: Vec::new(),
        }
    }

    pub fn set_operator(&mut self, operator: Operator) {
        self.operator = operator;
    }

    /// Register a subcheck. The closure receives the group's child token
    /// and must resolve promptly once that token is cancelled.
    pub fn add_check<F, Fut>(&mut self, check: F)
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = CheckResult> + Send + 'static,
    {
        self.checks
            .push(Box::new(move |token| Box::pin(check(token))));
    }

    pub fn len(&self) -> usize {
        self.checks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Run every subcheck concurrently and block until the group decides.
    /// Deciding (or cancellation of `token`) cancels outstanding siblings.
    pub async fn result(self, token: &CancellationToken) -> CheckResult {
        let Self {
            operator,
            label,
            checks,
        } = self;

        if checks.is_empty() {
            // operator identity: an empty union holds nobody, an empty
            // intersection everybody
            return match operator {
                Operator::Intersection => CheckResult::is_member(),
                Operator::Union | Operator::Exclusion => CheckResult::not_member(),
            };
        }

        let count = checks.len();
        let (trigger, child_token) = token.child();
        let (tx, mut rx) = mpsc::channel::<(usize, CheckResult)>(count);

        let mut handles = Vec::with_capacity(count);
        for (index, check) in checks.into_iter().enumerate() {
            let tx = tx.clone();
            let subcheck = check(child_token.clone());
            handles.push(tokio::spawn(async move {
                let result = subcheck.await;
                let _ = tx.send((index, result)).await;
            }));
        }
        drop(tx);

        let mut reducer = Reducer::new(operator, label, count);
        let decision = loop {
            tokio::select! {
                _ = token.cancelled() => break CheckResult::cancelled(),
                received = rx.recv() => match received {
                    Some((index, result)) => {
                        trace!(index, membership = %result.membership, "subcheck finished");
                        if let Some(decided) = reducer.absorb(index, result) {
                            break decided;
                        }
                    }
                    None => break reducer.finish(),
                },
            }
        };

        trigger.cancel();
        for handle in &handles {
            handle.abort();
        }
        decision
    }
}

/// Per-operator reduction state. Short-circuit decisions come out of
/// `absorb`; `finish` settles groups whose every subcheck completed.
struct Reducer {
    operator: Operator,
    label: RelationTuple,
    memberships: Vec<Option<Membership>>,
    trees: Vec<Option<Tree>>,
    error: Option<RebacError>,
}

impl Reducer {
    fn new(operator: Operator, label: RelationTuple, count: usize) -> Self {
        Self {
            operator,
            label,
            memberships: vec![None; count],
            trees: vec![None; count],
            error: None,
        }
    }

    fn absorb(&mut self, index: usize, result: CheckResult) -> Option<CheckResult> {
        let CheckResult {
            membership,
            tree,
            error,
        } = result;

        if let Some(error) = error {
            // a sibling failure must not abort the group; keep the first
            // one in case no decision is reachable
            if error != RebacError::Cancelled && self.error.is_none() {
                self.error = Some(error);
            }
        }
        self.memberships[index] = Some(membership);
        self.trees[index] = tree;

        match (self.operator, membership) {
            (Operator::Union, Membership::IsMember) => Some(CheckResult {
                membership: Membership::IsMember,
                tree: self.trees[index].take(),
                error: None,
            }),
            (Operator::Intersection, Membership::NotMember) => {
                let children: Vec<Tree> = self.trees[index].take().into_iter().collect();
                Some(CheckResult {
                    membership: Membership::NotMember,
                    tree: Some(Tree::node(
                        NodeKind::Intersection,
                        self.label.clone(),
                        children,
                    )),
                    error: None,
                })
            }
            (Operator::Exclusion, Membership::IsMember) if index > 0 => {
                // the subject is in a subtracted set
                let mut children = Vec::new();
                if let Some(base) = self.trees[0].take() {
                    children.push(base);
                }
                if let Some(subtracted) = self.trees[index].take() {
                    children.push(Tree::node(
                        NodeKind::Not,
                        self.label.clone(),
                        vec![subtracted],
                    ));
                }
                Some(CheckResult {
                    membership: Membership::NotMember,
                    tree: Some(Tree::node(NodeKind::Exclusion, self.label.clone(), children)),
                    error: None,
                })
            }
            (Operator::Exclusion, Membership::NotMember) if index == 0 => {
                let children: Vec<Tree> = self.trees[0].take().into_iter().collect();
                Some(CheckResult {
                    membership: Membership::NotMember,
                    tree: Some(Tree::node(NodeKind::Exclusion, self.label.clone(), children)),
                    error: None,
                })
            }
            _ => None,
        }
    }

    fn finish(mut self) -> CheckResult {
        let decided = match self.operator {
            Operator::Union => self.all(Membership::NotMember).then(|| CheckResult {
                membership: Membership::NotMember,
                tree: Some(self.collect_node()),
                error: None,
            }),
            Operator::Intersection => self.all(Membership::IsMember).then(|| CheckResult {
                membership: Membership::IsMember,
                tree: Some(self.collect_node()),
                error: None,
            }),
            Operator::Exclusion => {
                let base_holds = self.memberships[0] == Some(Membership::IsMember);
                let rest_excluded = self.memberships[1..]
                    .iter()
                    .all(|membership| *membership == Some(Membership::NotMember));
                (base_holds && rest_excluded).then(|| CheckResult {
                    membership: Membership::IsMember,
                    tree: Some(self.collect_node()),
                    error: None,
                })
            }
        };

        if let Some(result) = decided {
            return result;
        }
        if let Some(error) = self.error {
            warn!(label = %self.label, %error, "check group undecided, surfacing subcheck failure");
            return CheckResult::failed(error);
        }
        CheckResult::unknown()
    }

    fn all(&self, membership: Membership) -> bool {
        self.memberships
            .iter()
            .all(|entry| *entry == Some(membership))
    }

    fn collect_node(&mut self) -> Tree {
        let children: Vec<Tree> = self.trees.iter_mut().filter_map(Option::take).collect();
        Tree::node(NodeKind::from(self.operator), self.label.clone(), children)
    }
}
