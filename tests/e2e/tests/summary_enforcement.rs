//! Structured-summary enforcement: a summariser that emits numbered
//! KeyActions fails validation, gets one stricter retry, and the stored
//! summary comes from the deterministic fallback.

#![cfg(unix)]

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use orchestrator_e2e::fixtures::{conversation, TestStack};
use orchestrator_core::StructuredSummary;

/// Write an executable stub that consumes stdin and emits a summary with
/// numbered KeyActions - the classic validation failure.
fn misbehaving_summariser(dir: &std::path::Path) -> String {
    let path = dir.join("bad-summariser.sh");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "cat > /dev/null").unwrap();
    writeln!(
        file,
        "printf 'Topic: stub topic\\nDocType: guide\\nProject: Unknown\\nKeyActions:\\n1. first numbered action\\n2. second numbered action\\n'"
    )
    .unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path.to_string_lossy().to_string()
}

#[tokio::test]
async fn numbered_key_actions_trigger_retry_then_fallback() {
    let script_dir = tempfile::tempdir().unwrap();
    let command = misbehaving_summariser(script_dir.path());
    let stack = TestStack::with_external_summariser(&command);

    // Long enough that summarisation routes through the external
    // reasoner
    let long_user: String = std::iter::repeat("the cache invalidation step keeps racing the writer ")
        .take(40)
        .collect();
    let memory_id = stack
        .ingest
        .ingest(conversation(
            &long_user,
            "Fix the ordering by taking the writer lock first.",
        ))
        .await
        .unwrap();

    // One initial attempt plus one stricter retry
    let router_stats = stack.router.metrics().snapshot();
    assert_eq!(router_stats.external_calls, 2);

    // The stored summary is the deterministic fallback and parses under
    // the grammar
    let memory = stack.vector.get_memory(&memory_id).unwrap().unwrap();
    let reparsed = StructuredSummary::parse(&memory.summary.to_string()).unwrap();
    assert_ne!(reparsed.topic, "stub topic");
    assert!(!reparsed.key_actions.is_empty());
    assert!(reparsed.key_actions.iter().all(|a| !a.starts_with("1.")));
}

#[tokio::test]
async fn well_behaved_summariser_needs_no_retry() {
    let script_dir = tempfile::tempdir().unwrap();
    let path = script_dir.path().join("good-summariser.sh");
    let mut file = std::fs::File::create(&path).unwrap();
    writeln!(file, "#!/bin/sh").unwrap();
    writeln!(file, "cat > /dev/null").unwrap();
    writeln!(
        file,
        "printf 'Topic: cache invalidation race\\nDocType: incident\\nProject: Unknown\\nKeyActions:\\n- Take the writer lock first\\n'"
    )
    .unwrap();
    drop(file);
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

    let stack = TestStack::with_external_summariser(&path.to_string_lossy());
    let long_user: String = std::iter::repeat("the cache invalidation step keeps racing the writer ")
        .take(40)
        .collect();
    let memory_id = stack
        .ingest
        .ingest(conversation(&long_user, "Take the lock first."))
        .await
        .unwrap();

    assert_eq!(stack.router.metrics().snapshot().external_calls, 1);
    let memory = stack.vector.get_memory(&memory_id).unwrap().unwrap();
    assert_eq!(memory.summary.topic, "cache invalidation race");
}
