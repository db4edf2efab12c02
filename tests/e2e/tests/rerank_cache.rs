//! Cross-encoder cache behaviour over the full search path.

use orchestrator_e2e::fixtures::{conversation, request, TestStack};

#[tokio::test]
async fn second_identical_search_hits_l1_for_every_pair() {
    let stack = TestStack::with_config(|config| {
        config.reranker.cross_encoder_top_k = 5;
    });

    for i in 0..5 {
        stack
            .ingest
            .ingest(conversation(
                &format!("database migration rollback question {}", i),
                "run the down migration and verify the schema version",
            ))
            .await
            .unwrap();
    }

    let first = stack
        .search
        .search(request("database migration rollback", 5))
        .await
        .unwrap();
    assert_eq!(first.results.len(), 5);
    let after_first = stack.search.cross_encoder().metrics().snapshot();
    assert_eq!(after_first.pairs_scored, 5);
    assert_eq!(after_first.l1_hits, 0);

    // Let the background access refresh settle so both calls see the
    // same storage state
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    let second = stack
        .search
        .search(request("database migration rollback", 5))
        .await
        .unwrap();
    let after_second = stack.search.cross_encoder().metrics().snapshot();

    // L1 hit count increases by exactly the top-5 pairs; nothing is
    // re-scored
    assert_eq!(after_second.l1_hits, 5);
    assert_eq!(after_second.pairs_scored, 5);

    // Cached rerank scores are byte-equal
    for (a, b) in first.results.iter().zip(second.results.iter()) {
        assert_eq!(a.memory_id, b.memory_id);
        assert_eq!(a.rerank_score, b.rerank_score);
    }
}

#[tokio::test]
async fn cross_encoder_disabled_still_orders_results() {
    let stack = TestStack::with_config(|config| {
        config.reranker.cross_encoder_enabled = false;
    });
    for i in 0..4 {
        stack
            .ingest
            .ingest(conversation(
                &format!("kubernetes ingress routing note {}", i),
                "path-based routing with a single load balancer",
            ))
            .await
            .unwrap();
    }

    let response = stack
        .search
        .search(request("kubernetes ingress routing", 4))
        .await
        .unwrap();
    assert_eq!(response.results.len(), 4);
    assert!(response.results.iter().all(|r| r.rerank_score.is_none()));
    for pair in response.results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
    assert_eq!(
        stack.search.cross_encoder().metrics().snapshot().pairs_scored,
        0
    );
}
