//! Relationship tuples and the partial-key query the tuple store answers.
//!
//! The canonical text form is `ns:obj#rel@subject`, where the subject is
//! either a bare identifier or a subject set `ns:obj#rel` (the inner
//! relation may be empty, denoting the whole object). `Display` and
//! `FromStr` round-trip every well-formed tuple.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RebacError;

const RESERVED: [char; 3] = [':', '#', '@'];

/// A set of subjects described by a relation on an object, e.g. "all
/// members of `group:editors`". An empty relation refers to the object
/// itself rather than one of its relations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubjectSet {
    pub namespace: String,
    pub object: String,
    pub relation: String,
}

impl SubjectSet {
    pub fn new(
        namespace: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            object: object.into(),
            relation: relation.into(),
        }
    }

    /// Whether this set denotes the whole object (`ns:obj#`).
    pub fn is_whole_object(&self) -> bool {
        self.relation.is_empty()
    }
}

impl fmt::Display for SubjectSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}#{}", self.namespace, self.object, self.relation)
    }
}

/// The subject of a relationship tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Subject {
    /// A bare identifier, e.g. a user id.
    Id(String),
    /// All members of a relation on some object.
    Set(SubjectSet),
}

impl Subject {
    pub fn id(id: impl Into<String>) -> Self {
        Self::Id(id.into())
    }

    pub fn set(
        namespace: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
    ) -> Self {
        Self::Set(SubjectSet::new(namespace, object, relation))
    }

    pub fn as_set(&self) -> Option<&SubjectSet> {
        match self {
            Self::Set(set) => Some(set),
            Self::Id(_) => None,
        }
    }
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Set(set) => write!(f, "{set}"),
        }
    }
}

impl FromStr for Subject {
    type Err = RebacError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value.contains(':') {
            let (namespace, rest) = value
                .split_once(':')
                .ok_or_else(|| malformed(value, "subject set"))?;
            let (object, relation) = rest
                .split_once('#')
                .ok_or_else(|| malformed(value, "subject set"))?;
            segment(namespace, value)?;
            segment(object, value)?;
            if !relation.is_empty() {
                segment(relation, value)?;
            }
            Ok(Self::Set(SubjectSet::new(namespace, object, relation)))
        } else {
            segment(value, value)?;
            Ok(Self::Id(value.to_string()))
        }
    }
}

/// A single relationship statement: the subject is related to the object
/// within a namespace. Tuples are immutable values; identity is the full
/// four-field key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationTuple {
    pub namespace: String,
    pub object: String,
    pub relation: String,
    pub subject: Subject,
}

impl RelationTuple {
    pub fn new(
        namespace: impl Into<String>,
        object: impl Into<String>,
        relation: impl Into<String>,
        subject: Subject,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            object: object.into(),
            relation: relation.into(),
            subject,
        }
    }

    /// The tuple addressing `relation` on the same namespace and object,
    /// keeping the subject. Userset rewrites resolve computed relations
    /// through this.
    pub fn with_relation(&self, relation: impl Into<String>) -> Self {
        Self {
            namespace: self.namespace.clone(),
            object: self.object.clone(),
            relation: relation.into(),
            subject: self.subject.clone(),
        }
    }
}

impl fmt::Display for RelationTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}#{}@{}",
            self.namespace, self.object, self.relation, self.subject
        )
    }
}

impl FromStr for RelationTuple {
    type Err = RebacError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let (namespace, rest) = value
            .split_once(':')
            .ok_or_else(|| malformed(value, "tuple"))?;
        let (object, rest) = rest
            .split_once('#')
            .ok_or_else(|| malformed(value, "tuple"))?;
        let (relation, subject) = rest
            .split_once('@')
            .ok_or_else(|| malformed(value, "tuple"))?;
        segment(namespace, value)?;
        segment(object, value)?;
        segment(relation, value)?;
        Ok(Self::new(
            namespace,
            object,
            relation,
            subject.parse::<Subject>()?,
        ))
    }
}

fn malformed(value: &str, what: &str) -> RebacError {
    RebacError::MalformedTuple(format!("{value:?} is not a valid {what}"))
}

fn segment(part: &str, value: &str) -> Result<(), RebacError> {
    if part.is_empty() || part.chars().any(|c| RESERVED.contains(&c)) {
        return Err(malformed(value, "tuple"));
    }
    Ok(())
}

/// Partial tuple key for range queries against the store. Unset fields act
/// as wildcards; set fields must all match.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleQuery {
    pub namespace: Option<String>,
    pub object: Option<String>,
    pub relation: Option<String>,
    pub subject: Option<Subject>,
}

impl TupleQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_subject(mut self, subject: Subject) -> Self {
        self.subject = Some(subject);
        self
    }

    pub fn matches(&self, tuple: &RelationTuple) -> bool {
        if let Some(ref namespace) = self.namespace {
            if tuple.namespace != *namespace {
                return false;
            }
        }
        if let Some(ref object) = self.object {
            if tuple.object != *object {
                return false;
            }
        }
        if let Some(ref relation) = self.relation {
            if tuple.relation != *relation {
                return false;
            }
        }
        if let Some(ref subject) = self.subject {
            if tuple.subject != *subject {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(raw: &str) -> RelationTuple {
        let tuple: RelationTuple = raw.parse().expect(raw);
        assert_eq!(tuple.to_string(), raw);
        assert_eq!(tuple.to_string().parse::<RelationTuple>().unwrap(), tuple);
        tuple
    }

    #[test]
    fn parses_bare_subject() {
        let tuple = roundtrip("doc:readme#owner@alice");
        assert_eq!(tuple.namespace, "doc");
        assert_eq!(tuple.object, "readme");
        assert_eq!(tuple.relation, "owner");
        assert_eq!(tuple.subject, Subject::id("alice"));
    }

    #[test]
    fn parses_subject_set() {
        let tuple = roundtrip("doc:readme#viewer@group:editors#member");
        assert_eq!(tuple.subject, Subject::set("group", "editors", "member"));
    }

    #[test]
    fn parses_whole_object_subject_set() {
        let tuple = roundtrip("doc:child#parent@doc:folder#");
        let set = tuple.subject.as_set().unwrap();
        assert!(set.is_whole_object());
        assert_eq!(set.namespace, "doc");
        assert_eq!(set.object, "folder");
    }

    #[test]
    fn rejects_malformed_tuples() {
        for raw in [
            "",
            "doc:readme#owner",
            "doc:readme@alice",
            "readme#owner@alice",
            ":readme#owner@alice",
            "doc:#owner@alice",
            "doc:readme#@alice",
            "doc:readme#owner@",
            "doc:readme#owner@a@b",
            "doc:readme#owner@group:editors",
            "doc:readme#owner@bad#subject",
        ] {
            assert!(raw.parse::<RelationTuple>().is_err(), "accepted {raw:?}");
        }
    }

    #[test]
    fn query_matches_conjunctively() {
        let tuple: RelationTuple = "doc:readme#viewer@group:editors#member".parse().unwrap();

        assert!(TupleQuery::new().matches(&tuple));
        assert!(TupleQuery::new()
            .with_namespace("doc")
            .with_relation("viewer")
            .matches(&tuple));
        assert!(TupleQuery::new()
            .with_subject(Subject::set("group", "editors", "member"))
            .matches(&tuple));

        assert!(!TupleQuery::new().with_object("other").matches(&tuple));
        assert!(!TupleQuery::new()
            .with_namespace("doc")
            .with_subject(Subject::id("alice"))
            .matches(&tuple));
    }
}
