//! End-to-end userset rewrite scenarios: direct grants, computed subject
//! sets, tuple-to-subject-set traversal over folder hierarchies, and
//! intersections with inverted (deny) branches.

use std::sync::Arc;

use rebac_engine::{
    CheckEngine, InMemoryNamespaceRegistry, InMemoryTupleRepository, Membership, Namespace,
    NodeKind, Relation, RelationTuple, RewriteNode, SubjectSetRewrite, Tree,
};
use rebac_engine::schema::Operator;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn tuple(raw: &str) -> RelationTuple {
    raw.parse().expect(raw)
}

fn fixture_namespaces() -> Vec<Namespace> {
    vec![
        Namespace::new(
            "doc",
            vec![
                Relation::direct("owner"),
                Relation::rewritten(
                    "editor",
                    SubjectSetRewrite::union(vec![RewriteNode::computed("owner")]),
                ),
                Relation::rewritten(
                    "viewer",
                    SubjectSetRewrite::union(vec![
                        RewriteNode::computed("editor"),
                        RewriteNode::tuple_to_subject_set("parent", "viewer"),
                    ]),
                ),
            ],
        ),
        Namespace::new("group", vec![Relation::direct("member")]),
        Namespace::new("level", vec![Relation::direct("member")]),
        Namespace::new(
            "resource",
            vec![
                Relation::rewritten(
                    "owner",
                    SubjectSetRewrite::union(vec![RewriteNode::tuple_to_subject_set(
                        "owner", "member",
                    )]),
                ),
                Relation::rewritten(
                    "update",
                    SubjectSetRewrite::union(vec![RewriteNode::computed("owner")]),
                ),
                Relation::rewritten(
                    "delete",
                    SubjectSetRewrite::new(
                        Operator::Intersection,
                        vec![
                            RewriteNode::computed("owner"),
                            RewriteNode::tuple_to_subject_set("level", "member"),
                        ],
                    ),
                ),
            ],
        ),
        Namespace::new(
            "acl",
            vec![
                Relation::direct("allow"),
                Relation::direct("deny"),
                Relation::rewritten(
                    "access",
                    SubjectSetRewrite::new(
                        Operator::Intersection,
                        vec![
                            RewriteNode::computed("allow"),
                            RewriteNode::invert(RewriteNode::computed("deny")),
                        ],
                    ),
                ),
            ],
        ),
    ]
}

const FIXTURE_TUPLES: &[&str] = &[
    "doc:document#owner@user",
    "doc:doc_in_folder#parent@doc:folder#",
    "doc:folder#owner@user",
    // folder_a -> folder_b -> folder_c -> file, with folder_a owned by
    // user, so user reaches file through four parent hops
    "doc:file#parent@doc:folder_c#",
    "doc:folder_c#parent@doc:folder_b#",
    "doc:folder_b#parent@doc:folder_a#",
    "doc:folder_a#owner@user",
    "group:editors#member@mark",
    "level:superadmin#member@mark",
    "resource:topsecret#owner@group:editors#",
    "resource:topsecret#level@level:superadmin#",
    "resource:topsecret#owner@mike",
    "acl:document#allow@alice",
    "acl:document#allow@bob",
    "acl:document#allow@mallory",
    "acl:document#deny@mallory",
];

fn fixture_engine() -> CheckEngine {
    init_tracing();
    let repository = Arc::new(InMemoryTupleRepository::new());
    repository.write_all(FIXTURE_TUPLES.iter().map(|raw| tuple(raw)));

    let namespaces = fixture_namespaces();
    for namespace in &namespaces {
        namespace.validate().unwrap();
    }
    let registry = Arc::new(InMemoryNamespaceRegistry::new(namespaces));
    CheckEngine::new(repository, registry)
}

fn leaf_labels(tree: &Tree, out: &mut Vec<String>) {
    if tree.kind == NodeKind::Leaf {
        out.push(tree.label.to_string());
    }
    for child in &tree.children {
        leaf_labels(child, out);
    }
}

fn contains_label(tree: &Tree, label: &str) -> bool {
    tree.label.to_string() == label || tree.children.iter().any(|child| contains_label(child, label))
}

fn contains_kind(tree: &Tree, kind: NodeKind) -> bool {
    tree.kind == kind || tree.children.iter().any(|child| contains_kind(child, kind))
}

#[tokio::test]
async fn userset_rewrites_decide_membership() {
    let engine = fixture_engine();

    let cases: &[(&str, Membership)] = &[
        // direct
        ("doc:document#owner@user", Membership::IsMember),
        // userset rewrite
        ("doc:document#editor@user", Membership::IsMember),
        // transitive userset rewrite
        ("doc:document#viewer@user", Membership::IsMember),
        ("doc:document#editor@nobody", Membership::NotMember),
        ("doc:folder#viewer@user", Membership::IsMember),
        // tuple to subject set
        ("doc:doc_in_folder#viewer@user", Membership::IsMember),
        ("doc:doc_in_folder#viewer@nobody", Membership::NotMember),
        ("doc:another_doc#viewer@user", Membership::NotMember),
        // four levels of parent traversal
        ("doc:file#viewer@user", Membership::IsMember),
        ("level:superadmin#member@mark", Membership::IsMember),
        ("resource:topsecret#owner@mark", Membership::IsMember),
        // mark owns the resource through the editors group and carries the
        // required level
        ("resource:topsecret#delete@mark", Membership::IsMember),
        ("resource:topsecret#update@mark", Membership::IsMember),
        // mike owns the resource directly but lacks the level
        ("resource:topsecret#update@mike", Membership::IsMember),
        ("level:superadmin#member@mike", Membership::NotMember),
        ("resource:topsecret#delete@mike", Membership::NotMember),
        // sandy is not an owner at all
        ("resource:topsecret#delete@sandy", Membership::NotMember),
        ("acl:document#access@alice", Membership::IsMember),
        ("acl:document#access@bob", Membership::IsMember),
        ("acl:document#allow@mallory", Membership::IsMember),
        // the deny-list entry overrides mallory's allow
        ("acl:document#access@mallory", Membership::NotMember),
    ];

    for (query, expected) in cases {
        let result = engine.check(&tuple(query), 100).await;
        assert_eq!(
            result.error, None,
            "unexpected error for {query}: {:?}",
            result.error
        );
        assert_eq!(
            result.membership, *expected,
            "{query} decided {} instead of {}\ntree:\n{}",
            result.membership,
            expected,
            result
                .tree
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        );
    }
}

#[tokio::test]
async fn member_decisions_are_justified_by_stored_tuples() {
    let engine = fixture_engine();

    for (query, _) in [
        ("doc:document#owner@user", ()),
        ("doc:document#editor@user", ()),
        ("doc:document#viewer@user", ()),
        ("doc:doc_in_folder#viewer@user", ()),
        ("doc:file#viewer@user", ()),
        ("resource:topsecret#delete@mark", ()),
        ("acl:document#access@alice", ()),
    ] {
        let result = engine.check(&tuple(query), 100).await;
        assert_eq!(result.membership, Membership::IsMember, "{query}");

        let root = result.tree.expect(query);
        assert_eq!(root.label, tuple(query), "root must be labeled {query}");

        let mut leaves = Vec::new();
        leaf_labels(&root, &mut leaves);
        assert!(
            leaves
                .iter()
                .any(|leaf| FIXTURE_TUPLES.contains(&leaf.as_str())),
            "no stored tuple justifies {query}; leaves: {leaves:?}",
        );
    }
}

#[tokio::test]
async fn delete_tree_shows_both_intersection_legs() {
    let engine = fixture_engine();

    let result = engine.check(&tuple("resource:topsecret#delete@mark"), 100).await;
    assert_eq!(result.membership, Membership::IsMember);

    let root = result.tree.unwrap();
    assert!(root.contains_path(&[
        "*",
        "resource:topsecret#delete@mark",
        "level:superadmin#member@mark",
    ]));
    assert!(root.contains_path(&[
        "*",
        "resource:topsecret#delete@mark",
        "resource:topsecret#owner@mark",
        "group:editors#member@mark",
    ]));
}

#[tokio::test]
async fn access_tree_shows_the_granting_allow() {
    let engine = fixture_engine();

    let result = engine.check(&tuple("acl:document#access@alice"), 100).await;
    assert_eq!(result.membership, Membership::IsMember);

    let root = result.tree.unwrap();
    assert!(root.contains_path(&[
        "*",
        "acl:document#access@alice",
        "acl:document#allow@alice",
    ]));
}

#[tokio::test]
async fn denied_access_tree_shows_the_deny_branch() {
    let engine = fixture_engine();

    let result = engine.check(&tuple("acl:document#access@mallory"), 100).await;
    assert_eq!(result.membership, Membership::NotMember);

    let root = result.tree.unwrap();
    assert!(contains_kind(&root, NodeKind::Not), "tree:\n{root}");
    assert!(
        contains_label(&root, "acl:document#deny@mallory"),
        "tree:\n{root}"
    );
}

#[tokio::test]
async fn adding_tuples_never_revokes_union_membership() {
    init_tracing();
    let repository = Arc::new(InMemoryTupleRepository::new());
    repository.write_all(FIXTURE_TUPLES.iter().map(|raw| tuple(raw)));
    let registry = Arc::new(InMemoryNamespaceRegistry::new(fixture_namespaces()));
    let engine = CheckEngine::new(repository.clone(), registry);

    let query = tuple("doc:document#viewer@user");
    assert!(engine.check(&query, 100).await.allowed());

    repository.write_all([
        tuple("doc:document#owner@stranger"),
        tuple("doc:document#parent@doc:somewhere_else#"),
        tuple("doc:somewhere_else#owner@stranger"),
    ]);
    assert!(engine.check(&query, 100).await.allowed());
}

#[tokio::test]
async fn exclusion_subtracts_later_children_from_the_base() {
    init_tracing();
    let repository = Arc::new(InMemoryTupleRepository::new());
    repository.write_all([
        tuple("repo:core#collaborator@alice"),
        tuple("repo:core#collaborator@eve"),
        tuple("repo:core#banned@eve"),
    ]);
    let registry = Arc::new(InMemoryNamespaceRegistry::new([Namespace::new(
        "repo",
        vec![
            Relation::direct("collaborator"),
            Relation::direct("banned"),
            Relation::rewritten(
                "push",
                SubjectSetRewrite::new(
                    Operator::Exclusion,
                    vec![
                        RewriteNode::computed("collaborator"),
                        RewriteNode::computed("banned"),
                    ],
                ),
            ),
        ],
    )]));
    let engine = CheckEngine::new(repository, registry);

    let alice = engine.check(&tuple("repo:core#push@alice"), 100).await;
    assert_eq!(alice.membership, Membership::IsMember);

    let eve = engine.check(&tuple("repo:core#push@eve"), 100).await;
    assert_eq!(eve.membership, Membership::NotMember);

    let outsider = engine.check(&tuple("repo:core#push@carol"), 100).await;
    assert_eq!(outsider.membership, Membership::NotMember);
}

#[tokio::test]
async fn exhausted_depth_is_unknown_not_an_error() {
    let engine = fixture_engine();

    // the file -> folder_c -> folder_b -> folder_a chain needs more than
    // three expansions to reach the owning tuple
    let shallow = engine.check(&tuple("doc:file#viewer@user"), 3).await;
    assert_eq!(shallow.membership, Membership::Unknown);
    assert_eq!(shallow.error, None);

    let deep = engine.check(&tuple("doc:file#viewer@user"), 10).await;
    assert_eq!(deep.membership, Membership::IsMember);

    let zero = engine.check(&tuple("doc:file#viewer@user"), 0).await;
    assert_eq!(zero.membership, Membership::Unknown);
    assert_eq!(zero.error, None);
}
