//! Expansion of a subject set into the tree of subjects it contains.
//!
//! Expansion follows stored tuples only: bare subjects become leaves and
//! subject-set subjects recurse, depth-capped and cycle-guarded. Rewrite
//! formulas are the check engine's concern and are not replayed here.

use futures::future::BoxFuture;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::trace;

use crate::error::Result;
use crate::models::{Subject, SubjectSet, TupleQuery};
use crate::repository::TupleQuerier;

/// Tree of subjects reachable from a subject set. A node without children
/// is either a bare subject, a whole-object reference, or a subtree cut
/// off by the depth bound or a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectTree {
    pub subject: Subject,
    pub children: Vec<SubjectTree>,
}

impl SubjectTree {
    fn leaf(subject: Subject) -> Self {
        Self {
            subject,
            children: Vec::new(),
        }
    }
}

/// Walks stored tuples to list every subject holding a relation on an
/// object, directly or through nested subject sets.
pub struct SubjectExpander {
    querier: Arc<dyn TupleQuerier>,
}

impl SubjectExpander {
    pub fn new(querier: Arc<dyn TupleQuerier>) -> Self {
        Self { querier }
    }

    pub async fn expand(&self, set: &SubjectSet, max_depth: u32) -> Result<SubjectTree> {
        self.expand_set(set.clone(), max_depth, HashSet::new()).await
    }

    /// The distinct bare subjects in the expansion, in discovery order.
    pub async fn list_subjects(&self, set: &SubjectSet, max_depth: u32) -> Result<Vec<Subject>> {
        let tree = self.expand(set, max_depth).await?;
        let mut seen = HashSet::new();
        let mut subjects = Vec::new();
        collect_ids(&tree, &mut seen, &mut subjects);
        Ok(subjects)
    }

    fn expand_set(
        &self,
        set: SubjectSet,
        depth: u32,
        visited: HashSet<String>,
    ) -> BoxFuture<'_, Result<SubjectTree>> {
        Box::pin(async move {
            let root = Subject::Set(set.clone());
            if depth == 0 {
                trace!(set = %set, "expansion depth exhausted");
                return Ok(SubjectTree::leaf(root));
            }

            let key = set.to_string();
            let mut visited = visited;
            if !visited.insert(key) {
                trace!(set = %set, "expansion cycle");
                return Ok(SubjectTree::leaf(root));
            }

            let query = TupleQuery::new()
                .with_namespace(&set.namespace)
                .with_object(&set.object)
                .with_relation(&set.relation);
            let mut stream = self.querier.query_tuples(query).await?;

            let mut children = Vec::new();
            while let Some(item) = stream.next().await {
                let stored = item?;
                match stored.subject {
                    Subject::Id(_) => children.push(SubjectTree::leaf(stored.subject)),
                    Subject::Set(inner) if inner.is_whole_object() => {
                        children.push(SubjectTree::leaf(Subject::Set(inner)));
                    }
                    Subject::Set(inner) => {
                        children.push(self.expand_set(inner, depth - 1, visited.clone()).await?);
                    }
                }
            }

            Ok(SubjectTree {
                subject: root,
                children,
            })
        })
    }
}

fn collect_ids(tree: &SubjectTree, seen: &mut HashSet<String>, out: &mut Vec<Subject>) {
    if let Subject::Id(ref id) = tree.subject {
        if seen.insert(id.clone()) {
            out.push(tree.subject.clone());
        }
    }
    for child in &tree.children {
        collect_ids(child, seen, out);
    }
}
