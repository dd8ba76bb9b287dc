//! Tests for the in-memory link store and the graph/index projections

use super::*;
use crate::{
    config::IndexOptions,
    properties::{DocId, Document, EdgeKind, EdgeRecord, OutgoingLink, PublishStatus, TagCount},
    query::{CorpusSnapshot, LinkStore},
    TrellisError,
};
use std::collections::BTreeSet;

fn doc(id: i64, slug: &str) -> Document {
    Document::new(id, &slug.to_uppercase(), "").with_slug(slug)
}

fn links(targets: &[&str]) -> Vec<OutgoingLink> {
    targets.iter().map(|t| OutgoingLink::internal(t)).collect()
}

fn ids(summaries: &[crate::properties::DocumentSummary]) -> Vec<i64> {
    summaries.iter().map(|s| s.id.0).collect()
}

/// a -> b, a -> c, b -> c, c -> d, d -> e; f isolated. Tags on a and c.
async fn chain_store() -> MemoryLinkStore {
    let store = MemoryLinkStore::from_documents(
        ["a", "b", "c", "d", "e", "f"]
            .iter()
            .enumerate()
            .map(|(i, slug)| doc(i as i64 + 1, slug)),
    )
    .expect("store");
    store
        .recompute(DocId(1), &links(&["b", "c"]), &["project".to_string()])
        .await
        .expect("recompute a");
    store
        .recompute(DocId(2), &links(&["c"]), &[])
        .await
        .expect("recompute b");
    store
        .recompute(DocId(3), &links(&["d"]), &["project".to_string(), "idea".to_string()])
        .await
        .expect("recompute c");
    store
        .recompute(DocId(4), &links(&["e"]), &[])
        .await
        .expect("recompute d");
    store
}

#[test_log::test(tokio::test)]
async fn recompute_is_idempotent() {
    let store = MemoryLinkStore::from_documents([doc(1, "a"), doc(2, "b"), doc(3, "c")]).expect("store");
    let out = vec![
        OutgoingLink::internal("b"),
        OutgoingLink::internal("b"),
        OutgoingLink {
            target: "c".to_string(),
            kind: EdgeKind::Embed,
            exists: true,
        },
        OutgoingLink::internal("missing"),
    ];
    let tags = vec!["x".to_string(), "x".to_string(), "y".to_string()];
    store.recompute(DocId(1), &out, &tags).await.expect("first");
    let first = store.snapshot().await.expect("snapshot");
    store.recompute(DocId(1), &out, &tags).await.expect("second");
    let second = store.snapshot().await.expect("snapshot");
    assert_eq!(first, second);
    assert_eq!(store.edge_count(), 2);
    assert_eq!(store.edge_kinds(DocId(1), DocId(3)), vec![EdgeKind::Embed]);
    assert_eq!(store.tags_of(DocId(1)).await.expect("tags"), vec!["x", "y"]);
}

#[test_log::test(tokio::test)]
async fn recompute_replaces_prior_set() {
    let store = MemoryLinkStore::from_documents([doc(1, "a"), doc(2, "b"), doc(3, "c")]).expect("store");
    store
        .recompute(DocId(1), &links(&["b"]), &["old".to_string()])
        .await
        .expect("first");
    store
        .recompute(DocId(1), &links(&["c"]), &["new".to_string()])
        .await
        .expect("second");
    assert_eq!(ids(&store.forward_links(DocId(1)).await.expect("fwd")), vec![3]);
    assert!(store.backlinks(DocId(2)).await.expect("back").is_empty());
    assert_eq!(store.tags_of(DocId(1)).await.expect("tags"), vec!["new"]);
    assert_eq!(
        store.recompute(DocId(9), &[], &[]).await,
        Err(TrellisError::NotFound("document 9".to_string()))
    );
}

#[test_log::test(tokio::test)]
async fn backlinks_and_forward_links_are_inverse() {
    let store = chain_store().await;
    store
        .upsert_document(doc(5, "e").with_status(PublishStatus::Draft))
        .await
        .expect("unpublish e");
    let all: Vec<DocId> = (1..=6).map(DocId).collect();
    for x in all.iter() {
        let back = ids(&store.backlinks(*x).await.expect("back"));
        for y in all.iter() {
            let fwd = ids(&store.forward_links(*y).await.expect("fwd"));
            assert_eq!(
                back.contains(&y.0),
                fwd.contains(&x.0),
                "backlinks({x}) vs forward_links({y})"
            );
        }
    }
    // d still owns the edge to e, but e is hidden from navigation.
    assert!(store.forward_links(DocId(4)).await.expect("fwd").is_empty());
    assert!(store.backlinks(DocId(5)).await.expect("back").is_empty());
    assert_eq!(store.edge_kinds(DocId(4), DocId(5)), vec![EdgeKind::Internal]);
}

#[test_log::test(tokio::test)]
async fn tag_listings() {
    let store = chain_store().await;
    assert_eq!(
        store.all_tags().await.expect("tags"),
        vec![
            TagCount {
                tag: "project".to_string(),
                count: 2
            },
            TagCount {
                tag: "idea".to_string(),
                count: 1
            },
        ]
    );
    assert_eq!(
        ids(&store.documents_by_tag("project").await.expect("by tag")),
        vec![1, 3]
    );
    store
        .upsert_document(doc(3, "c").deleted())
        .await
        .expect("delete c");
    assert_eq!(
        store.all_tags().await.expect("tags"),
        vec![TagCount {
            tag: "project".to_string(),
            count: 1
        }]
    );
    let slugs = store.corpus_slugs().await.expect("slugs");
    assert_eq!(slugs.iter().collect::<Vec<_>>(), vec!["a", "b", "d", "e", "f"]);
}

#[test_log::test(tokio::test)]
async fn live_slugs_stay_unique() {
    let store = MemoryLinkStore::from_documents([doc(1, "a")]).expect("store");
    assert!(matches!(
        store.upsert_document(doc(2, "a")).await,
        Err(TrellisError::Store(_))
    ));
    store
        .upsert_document(doc(2, "a").deleted())
        .await
        .expect("deleted duplicates are allowed");
    assert_eq!(store.len(), 2);

    let clash = MemoryLinkStore::from_documents([doc(1, "a"), doc(2, "b"), doc(3, "a")]);
    assert!(matches!(clash, Err(TrellisError::Store(_))));
    let seeded = MemoryLinkStore::from_documents([doc(1, "a"), doc(2, "a").deleted()])
        .expect("deleted duplicates are allowed");
    assert_eq!(seeded.len(), 2);
}

fn chain_snapshot() -> CorpusSnapshot {
    let pairs = [(1, 2), (1, 3), (2, 3), (3, 4), (4, 5), (3, 3)];
    CorpusSnapshot {
        documents: ["a", "b", "c", "d", "e", "f"]
            .iter()
            .enumerate()
            .map(|(i, slug)| doc(i as i64 + 1, slug))
            .chain([doc(7, "hidden").with_status(PublishStatus::Archived)])
            .collect(),
        edges: pairs
            .iter()
            .map(|(s, t)| EdgeRecord {
                source: DocId(*s),
                target: DocId(*t),
                kind: EdgeKind::Internal,
            })
            .chain([EdgeRecord {
                source: DocId(1),
                target: DocId(7),
                kind: EdgeKind::Internal,
            }])
            .collect(),
        tags: vec![
            (DocId(1), "project".to_string()),
            (DocId(3), "project".to_string()),
            (DocId(7), "secret".to_string()),
        ],
    }
}

fn node_set(graph: &LinkGraph) -> BTreeSet<NodeId> {
    graph.node_ids()
}

#[test]
fn graph_drops_hidden_nodes_and_self_loops() {
    let graph = build_graph(&chain_snapshot(), true);
    assert_eq!(graph.nodes.len(), 7);
    assert!(graph.contains(&NodeId::tag("project")));
    assert!(!graph.contains(&NodeId::Document(DocId(7))));
    assert!(!graph.contains(&NodeId::tag("secret")));
    assert!(graph.links.iter().all(|edge| edge.source != edge.target));
    assert_eq!(graph.links.len(), 5 + 2);

    let without_tags = build_graph(&chain_snapshot(), false);
    assert_eq!(without_tags.nodes.len(), 6);
    assert!(without_tags.nodes.iter().all(|n| n.kind == NodeKind::Document));
}

#[test]
fn depth_zero_is_just_the_focal_node() {
    let graph = build_graph(&chain_snapshot(), true);
    for id in graph.node_ids() {
        let hood = neighborhood(&graph, &id, 0, None);
        assert_eq!(node_set(&hood), BTreeSet::from([id.clone()]));
        assert!(hood.links.is_empty());
    }
}

#[test]
fn neighborhoods_grow_monotonically() {
    let graph = build_graph(&chain_snapshot(), true);
    let focal = NodeId::Document(DocId(1));
    let mut previous = BTreeSet::new();
    for depth in 0..6 {
        let nodes = node_set(&neighborhood(&graph, &focal, depth, None));
        assert!(previous.is_subset(&nodes), "depth {depth}");
        previous = nodes;
    }
    let one = node_set(&neighborhood(&graph, &focal, 1, None));
    assert_eq!(
        one,
        BTreeSet::from([
            NodeId::Document(DocId(1)),
            NodeId::Document(DocId(2)),
            NodeId::Document(DocId(3)),
            NodeId::tag("project"),
        ])
    );
}

#[test]
fn unbounded_depth_returns_everything() {
    let graph = build_graph(&chain_snapshot(), true);
    let isolated = NodeId::Document(DocId(6));
    let hood = neighborhood(&graph, &isolated, -1, None);
    assert_eq!(hood, graph);
    let alone = neighborhood(&graph, &isolated, 3, None);
    assert_eq!(node_set(&alone), BTreeSet::from([isolated]));
}

#[test]
fn node_budget_keeps_focal_and_neighbors() {
    let graph = build_graph(&chain_snapshot(), true);
    let focal = NodeId::Document(DocId(3));
    let direct = BTreeSet::from([
        NodeId::Document(DocId(1)),
        NodeId::Document(DocId(2)),
        NodeId::Document(DocId(3)),
        NodeId::Document(DocId(4)),
        NodeId::tag("project"),
    ]);
    for max in [0, 2, 5] {
        let hood = neighborhood(&graph, &focal, -1, Some(max));
        let nodes = node_set(&hood);
        assert!(direct.is_subset(&nodes), "max {max}");
        assert_eq!(nodes.len(), 5);
        let kept = hood
            .links
            .iter()
            .all(|edge| nodes.contains(&edge.source) && nodes.contains(&edge.target));
        assert!(kept);
    }
    let roomy = neighborhood(&graph, &focal, -1, Some(6));
    assert_eq!(roomy.nodes.len(), 6);
    assert!(roomy.contains(&NodeId::Document(DocId(5))));
}

#[test]
fn focal_node_outside_the_graph_comes_back_detached() {
    let graph = build_graph(&chain_snapshot(), true);
    let hidden = NodeId::Document(DocId(7));
    for depth in [0, 1, 3] {
        let hood = neighborhood(&graph, &hidden, depth, None);
        assert_eq!(node_set(&hood), BTreeSet::from([hidden.clone()]), "depth {depth}");
        assert!(hood.links.is_empty());
        assert_eq!(hood.nodes[0].kind, NodeKind::Document);
        assert_eq!(hood.nodes[0].title, "7");
    }

    let everything = neighborhood(&graph, &hidden, -1, None);
    assert_eq!(everything.nodes.len(), graph.nodes.len() + 1);
    assert!(everything.contains(&hidden));
    assert_eq!(everything.links, graph.links);

    let tight = neighborhood(&graph, &hidden, -1, Some(3));
    assert_eq!(tight.nodes.len(), 3);
    assert!(tight.contains(&hidden));

    let secret = NodeId::tag("secret");
    let tag = neighborhood(&graph, &secret, 1, None);
    assert_eq!(tag.nodes.len(), 1);
    assert_eq!(tag.nodes[0].kind, NodeKind::Tag);
    assert_eq!(tag.nodes[0].title, "#secret");
    assert_eq!(tag.nodes[0].slug, "tags/secret");
}

#[test]
fn node_ids_serialize_flat() {
    let json = serde_json::to_string(&GraphEdge {
        source: NodeId::Document(DocId(1)),
        target: NodeId::tag("project"),
    })
    .expect("json");
    assert_eq!(json, r#"{"source":1,"target":"tags/project"}"#);
}

#[test]
fn content_index_projection() {
    let index = build_content_index(&chain_snapshot(), &IndexOptions::default());
    assert_eq!(index.len(), 6);
    let a = &index["a"];
    assert_eq!(a.file_path, "articles/a");
    assert_eq!(a.links, vec!["b", "c"]);
    assert_eq!(a.tags, vec!["project"]);
    assert_eq!(a.content, "");
    assert_eq!(a.id, Some(1));
    assert!(index::validate(&index).is_ok());

    let json = serde_json::to_value(a).expect("json");
    assert_eq!(json["filePath"], "articles/a");
    assert!(json.get("file_path").is_none());
}

#[test]
fn exporter_falls_back_to_stale_copy() {
    let exporter = ContentIndexExporter::new(IndexOptions::default());
    let failure = || Err(TrellisError::Store("database is locked".to_string()));
    assert!(exporter.export(failure()).is_err());

    let fresh = exporter.export(Ok(chain_snapshot())).expect("fresh");
    assert!(!fresh.stale);

    let stale = exporter.export(failure()).expect("stale");
    assert!(stale.stale);
    assert_eq!(stale.entries, fresh.entries);
    assert!(!exporter.last_good().expect("kept").stale);
}
