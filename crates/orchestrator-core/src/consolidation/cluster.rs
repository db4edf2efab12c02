//! Similarity clustering over summary embeddings.
//!
//! Pairwise cosine with a threshold, connected components via union-find,
//! and a representative per cluster chosen by a combined detail / recency /
//! importance score. Output is fully deterministic.

use chrono::{DateTime, Utc};

use crate::embedding::cosine_similarity;
use crate::memory::Memory;
use crate::search::recency;

/// Weight of content detail in representative selection.
const W_DETAIL: f64 = 0.4;
const W_RECENCY: f64 = 0.3;
const W_IMPORTANCE: f64 = 0.3;

/// Group items into clusters of pairwise-similar members. Returns index
/// sets, each of size >= `min_size`, members sorted ascending, clusters
/// ordered by their smallest member index.
pub fn cluster_by_similarity(
    items: &[(Memory, Vec<f32>)],
    threshold: f32,
    min_size: usize,
) -> Vec<Vec<usize>> {
    let n = items.len();
    let mut parent: Vec<usize> = (0..n).collect();

    fn find(parent: &mut Vec<usize>, i: usize) -> usize {
        if parent[i] != i {
            let root = find(parent, parent[i]);
            parent[i] = root;
        }
        parent[i]
    }

    for i in 0..n {
        for j in (i + 1)..n {
            if items[i].1.is_empty() || items[j].1.is_empty() {
                continue;
            }
            if cosine_similarity(&items[i].1, &items[j].1) >= threshold {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[rj] = ri;
                }
            }
        }
    }

    let mut groups: std::collections::BTreeMap<usize, Vec<usize>> = Default::default();
    for i in 0..n {
        let root = find(&mut parent, i);
        groups.entry(root).or_default().push(i);
    }

    groups
        .into_values()
        .filter(|members| members.len() >= min_size.max(1))
        .collect()
}

/// Pick the member carrying the cluster forward: maximise a blend of
/// detail (longer content), recency and importance; ties break on newer
/// timestamp, then lexicographic memory id.
pub fn choose_representative(
    cluster: &[usize],
    items: &[(Memory, Vec<f32>)],
    now: DateTime<Utc>,
) -> usize {
    let max_len = cluster
        .iter()
        .map(|&i| items[i].0.content.len())
        .max()
        .unwrap_or(1)
        .max(1) as f64;

    let score = |index: usize| -> f64 {
        let memory = &items[index].0;
        let detail = memory.content.len() as f64 / max_len;
        let age_days = (now - memory.timestamp).num_seconds() as f64 / 86_400.0;
        W_DETAIL * detail
            + W_RECENCY * f64::from(recency(age_days, memory.tier))
            + W_IMPORTANCE * memory.importance
    };

    let mut best = cluster[0];
    let mut best_score = score(best);
    for &candidate in &cluster[1..] {
        let candidate_score = score(candidate);
        let better = candidate_score > best_score
            || (candidate_score == best_score
                && (items[candidate].0.timestamp > items[best].0.timestamp
                    || (items[candidate].0.timestamp == items[best].0.timestamp
                        && items[candidate].0.id < items[best].0.id)));
        if better {
            best = candidate;
            best_score = candidate_score;
        }
    }
    best
}

// ============================================================================
// TESTS
// ============================================================================
