//! Namespace definitions and the userset rewrite AST.
//!
//! A namespace groups objects and declares named relations. A relation
//! without a rewrite is *direct*: membership comes purely from stored
//! tuples. A rewrite defines membership as a formula over other relations
//! and traversed tuples, expressed as a closed sum type so the evaluator
//! can match exhaustively.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{RebacError, Result};

/// A named scope of objects and their relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    pub relations: Vec<Relation>,
}

impl Namespace {
    pub fn new(name: impl Into<String>, relations: Vec<Relation>) -> Self {
        Self {
            name: name.into(),
            relations,
        }
    }

    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.iter().find(|relation| relation.name == name)
    }

    /// Advisory well-formedness check, run at registry construction rather
    /// than per query. Relations traversed by tuple-to-subject-set nodes
    /// are not required to be declared: those read stored tuples directly
    /// and never resolve through the registry.
    pub fn validate(&self) -> Result<()> {
        for relation in &self.relations {
            if let Some(ref rewrite) = relation.rewrite {
                self.validate_rewrite(&relation.name, rewrite)?;
            }
        }
        Ok(())
    }

    fn validate_rewrite(&self, relation: &str, rewrite: &SubjectSetRewrite) -> Result<()> {
        if rewrite.children.is_empty() {
            return Err(RebacError::InvalidNamespace(format!(
                "rewrite of {}#{relation} has no children",
                self.name
            )));
        }
        for child in &rewrite.children {
            self.validate_node(relation, child)?;
        }
        Ok(())
    }

    fn validate_node(&self, relation: &str, node: &RewriteNode) -> Result<()> {
        match node {
            RewriteNode::Rewrite(rewrite) => self.validate_rewrite(relation, rewrite),
            RewriteNode::ComputedSubjectSet { relation: target } => {
                if self.relation(target).is_none() {
                    return Err(RebacError::InvalidNamespace(format!(
                        "rewrite of {}#{relation} references undeclared relation {target:?}",
                        self.name
                    )));
                }
                Ok(())
            }
            RewriteNode::TupleToSubjectSet { .. } => Ok(()),
            RewriteNode::InvertResult { child } => self.validate_node(relation, child),
        }
    }
}

/// A named edge label within a namespace, optionally defined by a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub rewrite: Option<SubjectSetRewrite>,
}

impl Relation {
    /// A relation whose membership is decided by stored tuples alone.
    pub fn direct(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rewrite: None,
        }
    }

    pub fn rewritten(name: impl Into<String>, rewrite: SubjectSetRewrite) -> Self {
        Self {
            name: name.into(),
            rewrite: Some(rewrite),
        }
    }
}

/// Set operator combining the children of a rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Union,
    Intersection,
    Exclusion,
}

/// The interior node of the rewrite AST: an operator over one or more
/// children. Under `Exclusion` the first child is the base set and every
/// later child is subtracted from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectSetRewrite {
    pub operator: Operator,
    pub children: Vec<RewriteNode>,
}

impl SubjectSetRewrite {
    pub fn new(operator: Operator, children: Vec<RewriteNode>) -> Self {
        Self { operator, children }
    }

    pub fn union(children: Vec<RewriteNode>) -> Self {
        Self::new(Operator::Union, children)
    }
}

/// One rewrite formula node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewriteNode {
    /// A nested operator node.
    Rewrite(SubjectSetRewrite),
    /// Members of another relation on the same object.
    ComputedSubjectSet { relation: String },
    /// Traverse stored tuples of `relation` on the object; for every
    /// subject-set subject found, membership is checked against
    /// `computed_subject_set_relation` on the pointed-at object.
    TupleToSubjectSet {
        relation: String,
        computed_subject_set_relation: String,
    },
    /// Membership negation of the child's evaluation.
    InvertResult { child: Box<RewriteNode> },
}

impl RewriteNode {
    pub fn computed(relation: impl Into<String>) -> Self {
        Self::ComputedSubjectSet {
            relation: relation.into(),
        }
    }

    pub fn tuple_to_subject_set(
        relation: impl Into<String>,
        computed_subject_set_relation: impl Into<String>,
    ) -> Self {
        Self::TupleToSubjectSet {
            relation: relation.into(),
            computed_subject_set_relation: computed_subject_set_relation.into(),
        }
    }

    pub fn invert(child: RewriteNode) -> Self {
        Self::InvertResult {
            child: Box::new(child),
        }
    }
}

/// Read-side contract for namespace definitions. Lookups are by name only
/// and must be cheap and safe to call concurrently; the engine captures the
/// returned `Arc` for the duration of one check.
#[async_trait]
pub trait NamespaceRegistry: Send + Sync {
    async fn get(&self, name: &str) -> Result<Arc<Namespace>>;
}

/// In-memory registry backed by a concurrent map, suitable for embedding
/// and tests. Definitions may be swapped between checks; a running check
/// keeps the definitions it started with.
pub struct InMemoryNamespaceRegistry {
    namespaces: DashMap<String, Arc<Namespace>>,
}

impl InMemoryNamespaceRegistry {
    pub fn new(namespaces: impl IntoIterator<Item = Namespace>) -> Self {
        let registry = Self {
            namespaces: DashMap::new(),
        };
        for namespace in namespaces {
            registry.insert(namespace);
        }
        registry
    }

    pub fn insert(&self, namespace: Namespace) {
        self.namespaces
            .insert(namespace.name.clone(), Arc::new(namespace));
    }

    pub fn remove(&self, name: &str) {
        self.namespaces.remove(name);
    }

    pub fn namespaces(&self) -> Vec<Arc<Namespace>> {
        self.namespaces
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl Default for InMemoryNamespaceRegistry {
    fn default() -> Self {
        Self::new([])
    }
}

#[async_trait]
impl NamespaceRegistry for InMemoryNamespaceRegistry {
    async fn get(&self, name: &str) -> Result<Arc<Namespace>> {
        self.namespaces
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RebacError::NamespaceNotFound(name.to_string()))
    }
}
