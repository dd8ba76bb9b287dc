//! Integration tests for LinkService over the in-memory store.
//!
//! These follow one corpus through the whole pipeline: update or rebuild, then every read surface
//! (backlinks, forward links, tags, graph, content index).

mod common;

use common::{corpus_documents, DOC_A, DOC_B, DRAFT, IDEA, OLD};
use std::{collections::BTreeSet, sync::Arc};
use trellis_core::{
    batch::BatchRenderer,
    cache::ContentCache,
    codec::{PipelineOptions, Processor},
    config::{ExistencePolicy, TrellisConfig},
    linkbase::{MemoryLinkStore, NodeId},
    links::CorpusSlugs,
    properties::{DocId, DocumentSummary, EdgeKind, TagCount},
    query::LinkStore,
    service::LinkService,
};

fn service_with(config: &TrellisConfig) -> LinkService<MemoryLinkStore> {
    let store = MemoryLinkStore::from_documents(corpus_documents()).expect("unique slugs");
    LinkService::new(store, config)
}

fn service() -> LinkService<MemoryLinkStore> {
    service_with(&TrellisConfig::default())
}

fn renderer(config: &TrellisConfig) -> BatchRenderer {
    let pipeline = PipelineOptions::new(config.transform.clone(), config.links);
    BatchRenderer::new(config.batch, Processor::new(pipeline))
}

async fn rebuilt() -> LinkService<MemoryLinkStore> {
    let service = service();
    let report = service
        .rebuild(&renderer(&TrellisConfig::default()))
        .await
        .expect("rebuild");
    assert_eq!(report.counts(), (4, 0, 0));
    service
}

fn slugs(summaries: &[DocumentSummary]) -> Vec<&str> {
    summaries.iter().map(|s| s.slug.as_str()).collect()
}

#[test_log::test(tokio::test)]
async fn end_to_end_scenario() {
    let service = service();
    service
        .update_links(DOC_A, "See [[Document B]] and #project")
        .await
        .expect("update A");

    let forward = service.get_forward_links(DOC_A).await.expect("forward");
    assert_eq!(forward.iter().map(|s| s.id).collect::<Vec<_>>(), vec![DOC_B]);
    let back = service.get_backlinks(DOC_B).await.expect("backlinks");
    assert_eq!(back.iter().map(|s| s.id).collect::<Vec<_>>(), vec![DOC_A]);
    assert_eq!(service.get_tags(DOC_A).await.expect("tags"), vec!["project"]);

    let export = service.content_index().await.expect("index");
    assert!(!export.stale);
    let entry = &export.entries["document-a"];
    assert_eq!(entry.links, vec!["document-b"]);
    assert_eq!(entry.tags, vec!["project"]);
    assert_eq!(entry.content, "");
    assert_eq!(entry.id, Some(1));
}

#[test_log::test(tokio::test)]
async fn recompute_idempotence() {
    let service = service();
    let content = "[[Document B]] [[Document B|again]] ![[Document B]] #x #x";
    service.update_links(DOC_A, content).await.expect("first");
    let first = service.store().snapshot().await.expect("snapshot");
    service.update_links(DOC_A, content).await.expect("second");
    let second = service.store().snapshot().await.expect("snapshot");
    assert_eq!(first, second);
    assert_eq!(
        service.store().edge_kinds(DOC_A, DOC_B),
        vec![EdgeKind::Internal]
    );
    assert_eq!(service.get_tags(DOC_A).await.expect("tags"), vec!["x"]);
}

#[test_log::test(tokio::test)]
async fn backlinks_invert_forward_links() {
    let service = rebuilt().await;
    let ids: Vec<DocId> = [DOC_A, DOC_B, IDEA, DRAFT, OLD].into();
    for x in ids.iter() {
        let back: BTreeSet<DocId> = service
            .get_backlinks(*x)
            .await
            .expect("backlinks")
            .iter()
            .map(|s| s.id)
            .collect();
        for y in ids.iter() {
            let forward: BTreeSet<DocId> = service
                .get_forward_links(*y)
                .await
                .expect("forward")
                .iter()
                .map(|s| s.id)
                .collect();
            assert_eq!(back.contains(y), forward.contains(x), "{x} / {y}");
        }
    }
    assert_eq!(
        slugs(&service.get_backlinks(DOC_A).await.expect("backlinks")),
        vec!["document-b", "notes/first-idea"]
    );
    // The draft's edge to B is stored but hidden.
    assert_eq!(
        service.store().edge_kinds(DRAFT, DOC_B),
        vec![EdgeKind::Internal]
    );
    assert!(service.get_forward_links(DRAFT).await.expect("forward").is_empty());
}

#[test_log::test(tokio::test)]
async fn tag_dedup_and_listing() {
    let service = rebuilt().await;
    let processed = service
        .update_links(DOC_B, "#foo #foo #Foo")
        .await
        .expect("update");
    assert_eq!(processed.tags, vec!["foo"]);
    assert_eq!(service.get_tags(DOC_B).await.expect("tags"), vec!["foo"]);

    assert_eq!(
        service.get_all_tags().await.expect("all tags"),
        vec![
            TagCount {
                tag: "project".to_string(),
                count: 2
            },
            TagCount {
                tag: "foo".to_string(),
                count: 1
            },
            TagCount {
                tag: "idea".to_string(),
                count: 1
            },
        ]
    );
    assert_eq!(
        slugs(&service.get_articles_by_tag("project").await.expect("by tag")),
        vec!["document-a", "notes/first-idea"]
    );
}

#[test_log::test(tokio::test)]
async fn broken_link_flag() {
    let mut config = TrellisConfig::default();
    config.transform.disable_broken_links = true;
    let service = service_with(&config);
    let processed = service
        .update_links(DOC_A, "[[nonexistent]] and [[Document B]]")
        .await
        .expect("update");
    let existence: Vec<(&str, bool)> = processed
        .links
        .iter()
        .map(|link| (link.target.as_str(), link.exists))
        .collect();
    assert_eq!(existence, vec![("nonexistent", false), ("document-b", true)]);
    assert!(processed.html.contains("class=\"internal broken\""));
    assert!(!processed.html.contains("href=\"/nonexistent\""));
    assert!(processed.html.contains("href=\"/document-b\""));
    assert_eq!(
        service.store().snapshot().await.expect("snapshot").edges.len(),
        1
    );
}

#[test_log::test]
fn empty_corpus_existence_policy() {
    let mut config = TrellisConfig::default();
    let optimistic = Processor::new(PipelineOptions::new(config.transform.clone(), config.links));
    let empty = CorpusSlugs::default();
    let doc = optimistic.process("[[anything]]", "a", &empty).expect("process");
    assert!(doc.links[0].exists);

    config.links.existence = ExistencePolicy::Strict;
    let strict = Processor::new(PipelineOptions::new(config.transform, config.links));
    let doc = strict.process("[[anything]]", "a", &empty).expect("process");
    assert!(!doc.links[0].exists);
}

#[test_log::test(tokio::test)]
async fn markup_properties() {
    let service = service();
    let arrows = service
        .update_links(DOC_A, "A --> B")
        .await
        .expect("arrows");
    assert_eq!(arrows.html, "<p>A \u{21D2} B</p>\n");

    let callout = service
        .update_links(DOC_A, "> [!warning]\n> body")
        .await
        .expect("callout");
    assert!(callout
        .html
        .contains("<div class=\"callout-title-inner\"><p>Warning</p></div>"));
    assert!(callout.html.contains("data-callout=\"warning\""));
}

#[test_log::test(tokio::test)]
async fn graph_views() {
    let service = rebuilt().await;
    let graph = service.get_graph_data().await.expect("graph");
    let ids = graph.node_ids();
    assert!(ids.contains(&NodeId::tag("project")));
    assert!(!ids.contains(&NodeId::Document(DRAFT)));
    assert!(!ids.contains(&NodeId::Document(OLD)));
    assert!(!ids.contains(&NodeId::tag("legacy")));

    let focal = NodeId::Document(DOC_B);
    let zero = service.get_neighborhood(&focal, 0).await.expect("depth 0");
    assert_eq!(zero.node_ids(), BTreeSet::from([focal.clone()]));
    assert!(zero.links.is_empty());

    let mut previous = zero.node_ids();
    for depth in 1..4 {
        let nodes = service
            .get_neighborhood(&focal, depth)
            .await
            .expect("neighborhood")
            .node_ids();
        assert!(previous.is_subset(&nodes));
        previous = nodes;
    }

    let everything = service.get_neighborhood(&focal, -1).await.expect("unbounded");
    assert_eq!(everything, graph);

    let local = service.get_local_graph(DOC_B).await.expect("local");
    assert_eq!(
        local.node_ids(),
        BTreeSet::from([NodeId::Document(DOC_A), NodeId::Document(DOC_B)])
    );
}

#[test_log::test(tokio::test)]
async fn node_budget_keeps_neighbors() {
    let mut config = TrellisConfig::default();
    config.graph.max_nodes = Some(1);
    let service = service_with(&config);
    service
        .rebuild(&renderer(&config))
        .await
        .expect("rebuild");
    let focal = NodeId::Document(DOC_A);
    let hood = service.get_neighborhood(&focal, -1).await.expect("neighborhood");
    let expected = BTreeSet::from([
        NodeId::Document(DOC_A),
        NodeId::Document(DOC_B),
        NodeId::Document(IDEA),
        NodeId::tag("project"),
    ]);
    assert_eq!(hood.node_ids(), expected);
}

#[test_log::test(tokio::test)]
async fn unknown_documents() {
    let service = service();
    assert!(service.update_links(DocId(99), "text").await.is_err());
    assert!(service.get_backlinks(DocId(99)).await.expect("empty").is_empty());
    let unknown = service
        .get_neighborhood(&NodeId::Document(DocId(99)), 1)
        .await
        .expect("unknown focal");
    assert_eq!(unknown.node_ids(), BTreeSet::from([NodeId::Document(DocId(99))]));
    assert!(unknown.links.is_empty());
}

#[test_log::test(tokio::test)]
async fn hidden_documents_get_a_one_node_local_graph() {
    let service = rebuilt().await;
    for (id, title, slug) in [(DRAFT, "Draft", "draft"), (OLD, "Old", "old")] {
        let local = service.get_local_graph(id).await.expect("local graph");
        assert_eq!(local.node_ids(), BTreeSet::from([NodeId::Document(id)]));
        assert!(local.links.is_empty());
        assert_eq!(local.nodes[0].title, title);
        assert_eq!(local.nodes[0].slug, slug);
    }

    let global = service.get_global_graph(DRAFT).await.expect("global graph");
    let graph = service.get_graph_data().await.expect("graph");
    assert_eq!(global.nodes.len(), graph.nodes.len() + 1);
    assert!(global.contains(&NodeId::Document(DRAFT)));
}

#[test_log::test(tokio::test)]
async fn shared_cache_is_swept_on_the_configured_interval() {
    let mut config = TrellisConfig::default();
    config.cache.ttl_secs = 0;
    config.cache.cleanup_interval_secs = 1;
    let cache = Arc::new(ContentCache::new());
    let service = service().with_cache(cache.clone(), &config);
    assert!(service.is_sweeping());
    service
        .update_links(DOC_A, "See [[Document B]]")
        .await
        .expect("update");
    assert_eq!(cache.len(), 1);
    tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
    assert!(cache.is_empty());
    drop(service);
}

#[test_log::test(tokio::test)]
async fn shared_cache_memoizes_updates() {
    let config = TrellisConfig::default();
    let cache = Arc::new(ContentCache::new());
    let service = service().with_cache(cache.clone(), &config);
    let first = service
        .update_links(DOC_A, "See [[Document B]]")
        .await
        .expect("first");
    let second = service
        .update_links(DOC_A, "See [[Document B]]")
        .await
        .expect("second");
    assert_eq!(first, second);
    assert_eq!(cache.len(), 1);
    service
        .update_links(DOC_A, "See [[Document A]]")
        .await
        .expect("third");
    assert_eq!(cache.len(), 2);
}
