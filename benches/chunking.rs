use criterion::{Criterion, criterion_group, criterion_main};
use std::fmt::Write as _;
use std::hint::black_box;
use yucca_kb::embeddings::{ChunkingConfig, split_text};

/// Roughly 200 KB of prose with paragraph, line and sentence breaks
fn sample_document() -> String {
    let mut text = String::new();
    for paragraph in 0..400 {
        for sentence in 0..6 {
            let _ = write!(
                text,
                "Paragraph {paragraph} sentence {sentence} describes how yucca plants store water in their roots. "
            );
            if sentence == 3 {
                text.push('\n');
            }
        }
        text.push_str("\n\n");
    }
    text
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let document = sample_document();
    let unbroken = "x".repeat(document.len());
    let config = ChunkingConfig::default();

    c.bench_function("split_text", |b| {
        b.iter(|| split_text(black_box(&document), black_box(&config)))
    });
    c.bench_function("split_text_hard_cuts", |b| {
        b.iter(|| split_text(black_box(&unbroken), black_box(&config)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
