//! Benchmarks for the retrieval hot path: candidate merge scoring and the
//! keyword extractor feeding the L2 cache.

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use orchestrator_core::{cosine_similarity, count_tokens, Chunker, Embedder, HashEmbedder};

fn bench_hash_embedding(c: &mut Criterion) {
    let embedder = HashEmbedder::new(256);
    let text = "security group egress was missing port 443 on the ECS task \
                so outbound HTTPS timed out until the rule was added"
        .repeat(4);
    c.bench_function("hash_embed_256d", |b| {
        b.iter(|| embedder.embed(black_box(&text)).unwrap())
    });
}

fn bench_cosine(c: &mut Criterion) {
    let embedder = HashEmbedder::new(256);
    let a = embedder.embed("database migration rollback").unwrap();
    let b_vec = embedder.embed("rolling back a failed migration").unwrap();
    c.bench_function("cosine_256d", |b| {
        b.iter(|| cosine_similarity(black_box(&a), black_box(&b_vec)))
    });
}

fn bench_chunker(c: &mut Criterion) {
    let chunker = Chunker::default();
    let text: String = (0..200)
        .map(|i| format!("## Section {}\n\nparagraph with some words number {}\n\n", i, i))
        .collect();
    c.bench_function("chunk_200_sections", |b| {
        b.iter(|| chunker.split(black_box(&text)))
    });
}

fn bench_token_count(c: &mut Criterion) {
    let text = "one two three four five six seven eight nine ten".repeat(100);
    c.bench_function("count_tokens_1k", |b| {
        b.iter(|| count_tokens(black_box(&text)))
    });
}

criterion_group!(
    benches,
    bench_hash_embedding,
    bench_cosine,
    bench_chunker,
    bench_token_count
);
criterion_main!(benches);
