//! The full consolidation lifecycle: migrate, cluster, compress, forget.
//!
//! Compression runs before forgetting. A representative whose importance
//! was never boosted is just as old and unimportant as its peers, so the
//! forget step removes the whole cluster.

use orchestrator_e2e::fixtures::{conversation, TestStack};

const SIMILAR: &str = "the nightly backup job exceeded its window because the \
                       snapshot volume was throttled";
const UNRELATED: &str = "quarterly accessibility review findings for the web \
                         dashboard typography";

async fn seed_old_memories(stack: &TestStack) -> (Vec<String>, String) {
    let when = chrono::Utc::now() - chrono::Duration::days(31);

    let mut similar_ids = Vec::new();
    for _ in 0..10 {
        let mut input = conversation(SIMILAR, "widened the window and raised the IOPS cap");
        input.timestamp = Some(when);
        similar_ids.push(stack.ingest.ingest(input).await.unwrap());
    }
    let mut input = conversation(UNRELATED, "tracked in the accessibility backlog");
    input.timestamp = Some(when);
    let unrelated_id = stack.ingest.ingest(input).await.unwrap();

    // Ingestion assigns a neutral importance; these memories never earned
    // any
    for id in similar_ids.iter().chain(std::iter::once(&unrelated_id)) {
        stack
            .vector
            .mutate_memory(id, |m| m.importance = 0.1)
            .unwrap();
    }
    (similar_ids, unrelated_id)
}

#[tokio::test]
async fn cluster_compress_then_forget_everything() {
    let stack = TestStack::new();
    let (similar_ids, unrelated_id) = seed_old_memories(&stack).await;

    let stats = stack.consolidation.run().await.unwrap();

    // All eleven migrated out of working memory first
    assert_eq!(stats.migrated, 11);
    // The ten near-identical memories formed one cluster with one
    // representative; nine peers compressed
    assert_eq!(stats.clusters_formed, 1);
    assert_eq!(stats.representatives, 1);
    assert_eq!(stats.compressed, 9);
    // Then the forget step removed every memory: older than the age
    // threshold, below the importance threshold, never accessed.
    // Forgotten representatives carry their cluster with them.
    assert_eq!(stats.forgotten, 11);

    for id in similar_ids.iter().chain(std::iter::once(&unrelated_id)) {
        assert!(stack.vector.get_memory(id).unwrap().is_none());
        assert!(stack.vector.chunk_ids_for_memory(id).unwrap().is_empty());
    }
    assert!(stack.indexer.lexical().is_empty().unwrap());
}

#[tokio::test]
async fn boosted_representative_cluster_survives_forgetting() {
    let stack = TestStack::new();
    let (similar_ids, _) = seed_old_memories(&stack).await;

    // Importance above the threshold protects a memory from forgetting
    for id in &similar_ids {
        stack
            .vector
            .mutate_memory(id, |m| m.importance = 0.6)
            .unwrap();
    }

    let stats = stack.consolidation.run().await.unwrap();
    assert_eq!(stats.compressed, 9);
    // Only the unrelated low-importance memory is forgotten
    assert_eq!(stats.forgotten, 1);

    // Compressed peers still resolve; their content now points at the
    // representative
    let compressed: Vec<_> = similar_ids
        .iter()
        .filter_map(|id| stack.vector.get_memory(id).unwrap())
        .filter(|m| m.compressed_into.is_some())
        .collect();
    assert_eq!(compressed.len(), 9);
    for peer in compressed {
        assert!(peer.content.starts_with("[compressed into"));
    }
}

#[tokio::test]
async fn forgotten_representative_evicts_a_peer_that_would_survive_alone() {
    let stack = TestStack::new();
    let when = chrono::Utc::now() - chrono::Duration::days(31);

    // Identical user text keeps the summaries (and their embeddings)
    // identical; the much longer assistant text makes this member the
    // cluster representative.
    let long_assistant = "the snapshot volume was saturated for the whole \
                          nightly window and the retention ledger drifted "
        .repeat(10);
    let mut input = conversation(SIMILAR, &long_assistant);
    input.timestamp = Some(when);
    let rep_id = stack.ingest.ingest(input).await.unwrap();

    let mut peer_ids = Vec::new();
    for _ in 0..2 {
        let mut input = conversation(SIMILAR, "noted");
        input.timestamp = Some(when);
        peer_ids.push(stack.ingest.ingest(input).await.unwrap());
    }

    for id in std::iter::once(&rep_id).chain(peer_ids.iter()) {
        stack
            .vector
            .mutate_memory(id, |m| m.importance = 0.1)
            .unwrap();
    }
    // One peer is individually exempt from forgetting
    let exempt_peer = peer_ids[0].clone();
    stack
        .vector
        .mutate_memory(&exempt_peer, |m| m.access_count = 25)
        .unwrap();

    let stats = stack.consolidation.run().await.unwrap();
    assert_eq!(stats.clusters_formed, 1);
    assert_eq!(stats.compressed, 2);

    // The representative and the plain peer qualify for forgetting on
    // their own; the boosted peer does not - yet it goes too, because a
    // compressed peer follows its forgotten representative
    assert_eq!(stats.forgotten, 3);
    assert!(stack.vector.get_memory(&rep_id).unwrap().is_none());
    assert!(stack.vector.get_memory(&exempt_peer).unwrap().is_none());
    assert!(stack.vector.get_memory(&peer_ids[1]).unwrap().is_none());
}

#[tokio::test]
async fn second_pass_is_a_no_op() {
    let stack = TestStack::new();
    seed_old_memories(&stack).await;

    stack.consolidation.run().await.unwrap();
    let second = stack.consolidation.run().await.unwrap();

    assert_eq!(second.migrated, 0);
    assert_eq!(second.clusters_formed, 0);
    assert_eq!(second.compressed, 0);
    assert_eq!(second.forgotten, 0);
    assert_eq!(second.orphans_removed, 0);
}
