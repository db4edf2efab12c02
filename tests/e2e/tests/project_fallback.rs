//! Project-scoped retrieval: pool-first with full-corpus fallback.

use orchestrator_e2e::fixtures::{conversation, request, TestStack};

#[tokio::test]
async fn insufficient_pool_falls_back_to_full_corpus() {
    let stack = TestStack::new();

    // Three memories in project alpha
    for i in 0..3 {
        let mut input = conversation(
            &format!("alpha service deployment note {}", i),
            "the alpha service deploys from the release branch",
        );
        input.project_id = Some("alpha".to_string());
        stack.ingest.ingest(input).await.unwrap();
    }
    // Fifty without a project
    for i in 0..50 {
        stack
            .ingest
            .ingest(conversation(
                &format!("general engineering note number {}", i),
                "assorted general knowledge",
            ))
            .await
            .unwrap();
    }

    let mut req = request("totally unrelated phrase", 5);
    req.project_id = Some("alpha".to_string());
    let response = stack.search.search(req).await.unwrap();

    // The pool alone cannot satisfy top_k=5, so the full corpus fills in
    assert!(response.full_corpus_fallback);
    assert!(response.results.len() >= 3);
    // Only three alpha memories exist, so at least two results came from
    // the fallback pass
    let outside_pool = response
        .results
        .iter()
        .filter(|r| {
            r.metadata.get("project_id").and_then(|v| v.as_str()) != Some("alpha")
        })
        .count();
    assert!(outside_pool >= 2);

    let snapshot = stack.search.cross_encoder().metrics().snapshot();
    assert_eq!(snapshot.full_corpus_fallbacks, 1);
}

#[tokio::test]
async fn sufficient_pool_never_touches_the_corpus() {
    let stack = TestStack::new();
    for i in 0..6 {
        let mut input = conversation(
            &format!("beta cache eviction policy discussion {}", i),
            "beta uses an LRU with a TTL layered on top",
        );
        input.project_id = Some("beta".to_string());
        stack.ingest.ingest(input).await.unwrap();
    }

    let mut req = request("beta cache eviction policy", 3);
    req.project_id = Some("beta".to_string());
    let response = stack.search.search(req).await.unwrap();

    assert!(!response.full_corpus_fallback);
    assert_eq!(response.results.len(), 3);
    assert_eq!(
        stack
            .search
            .cross_encoder()
            .metrics()
            .snapshot()
            .full_corpus_fallbacks,
        0
    );
}

#[tokio::test]
async fn empty_pool_still_returns_results() {
    let stack = TestStack::new();
    stack
        .ingest
        .ingest(conversation(
            "the tracing sampler drops spans under load",
            "raise the sampling rate in staging",
        ))
        .await
        .unwrap();

    let mut req = request("tracing sampler spans", 5);
    req.project_id = Some("never-seen-project".to_string());
    let response = stack.search.search(req).await.unwrap();

    // Filtering never yields an artificially empty page
    assert!(response.full_corpus_fallback);
    assert!(!response.results.is_empty());
}
