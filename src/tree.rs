//! Explanation trees returned alongside check decisions.
//!
//! The tree is advisory: it faithfully reflects how the decision was
//! reached, but child ordering may vary between runs because siblings are
//! checked concurrently.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::models::RelationTuple;
use crate::schema::Operator;

/// What a tree node represents: a rewrite operator, a traversal, or a
/// stored tuple that decided a leaf check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Union,
    Intersection,
    Exclusion,
    Not,
    ComputedSubjectSet,
    TupleToSubjectSet,
    Leaf,
}

impl From<Operator> for NodeKind {
    fn from(operator: Operator) -> Self {
        match operator {
            Operator::Union => Self::Union,
            Operator::Intersection => Self::Intersection,
            Operator::Exclusion => Self::Exclusion,
        }
    }
}

impl NodeKind {
    fn tag(&self) -> &'static str {
        match self {
            Self::Union => "or",
            Self::Intersection => "and",
            Self::Exclusion => "except",
            Self::Not => "not",
            Self::ComputedSubjectSet => "computed",
            Self::TupleToSubjectSet => "indirect",
            Self::Leaf => "leaf",
        }
    }
}

/// One node of the explanation tree. Interior nodes are labeled with the
/// tuple being justified at that point of the evaluation; leaves carry the
/// concrete stored tuple that satisfied (or refuted) the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tree {
    pub kind: NodeKind,
    pub label: RelationTuple,
    pub children: Vec<Tree>,
}

impl Tree {
    pub fn node(kind: NodeKind, label: RelationTuple, children: Vec<Tree>) -> Self {
        Self {
            kind,
            label,
            children,
        }
    }

    pub fn leaf(label: RelationTuple) -> Self {
        Self::node(NodeKind::Leaf, label, Vec::new())
    }

    pub fn with_kind(mut self, kind: NodeKind) -> Self {
        self.kind = kind;
        self
    }

    /// Whether a chain of parent-to-child labels exists starting at this
    /// node. `"*"` matches any label.
    pub fn contains_path(&self, path: &[&str]) -> bool {
        let Some((first, rest)) = path.split_first() else {
            return true;
        };
        if *first != "*" && self.label.to_string() != *first {
            return false;
        }
        if rest.is_empty() {
            return true;
        }
        self.children.iter().any(|child| child.contains_path(rest))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>, depth: usize) -> fmt::Result {
        writeln!(
            f,
            "{:indent$}{} {}",
            "",
            self.kind.tag(),
            self.label,
            indent = depth * 2
        )?;
        for child in &self.children {
            child.render(f, depth + 1)?;
        }
        Ok(())
    }
}

impl fmt::Display for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.render(f, 0)
    }
}
