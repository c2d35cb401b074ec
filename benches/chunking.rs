use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lexextract::chunking::{ChunkStrategy, LegalChunker};
use lexextract::config::ChunkingSettings;

/// Generate a realistic legal document with sections, citations, and quotes.
fn generate_document(target_bytes: usize) -> String {
    let paragraphs = [
        "The district court granted summary judgment for the defendant, holding that \
         the plaintiff failed to establish a genuine dispute of material fact. We review \
         a grant of summary judgment de novo, viewing the evidence in the light most \
         favorable to the nonmoving party.",

        "In Smith v. Jones, 123 F.3d 456 (9th Cir. 1997), we held that a party seeking \
         relief under 42 U.S.C. § 1983 must demonstrate deprivation of a federal right \
         by a person acting under color of state law. The same standard governs here.",

        "SECTION 4. The contractor shall indemnify and hold harmless the owner against \
         all claims arising from performance of the work, \"including but not limited to \
         claims for bodily injury and property damage caused in whole or in part by any \
         negligent act or omission of the contractor\".",

        "The hearing was held on June 21, 2024, before the Honorable Jane Doe. Counsel \
         for appellant argued that the statute of limitations barred the claim under \
         28 U.S.C. § 2401, and that the district court lacked jurisdiction.",

        "WHEREAS the parties desire to memorialize their agreement, and NOW, THEREFORE, \
         in consideration of the mutual covenants contained herein, the parties agree \
         that all disputes shall be resolved by binding arbitration.",
    ];

    let mut text = String::with_capacity(target_bytes + 500);
    let mut i = 0;
    while text.len() < target_bytes {
        if i > 0 && i % 4 == 0 {
            text.push_str(&format!("\n\nARTICLE {}\n\n", ["I", "II", "III", "IV", "V"][i / 4 % 5]));
        }
        text.push_str(paragraphs[i % paragraphs.len()]);
        text.push_str("\n\n");
        i += 1;
    }
    text
}

fn chunker(strategy_label: &str) -> (LegalChunker, Option<ChunkStrategy>) {
    let settings = ChunkingSettings {
        chunk_max_chars: 8_000,
        chunk_min_chars: 1_000,
        chunk_overlap_chars: 500,
        ..ChunkingSettings::default()
    };
    let strategy = match strategy_label {
        "legal_aware" => Some(ChunkStrategy::LegalAware),
        "paragraph_aware" => Some(ChunkStrategy::ParagraphAware),
        "sentence_aware" => Some(ChunkStrategy::SentenceAware),
        "fixed_size" => Some(ChunkStrategy::FixedSize),
        _ => None,
    };
    (LegalChunker::new(settings, 4.0), strategy)
}

fn bench_chunking_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking_strategies");
    group.sample_size(20);

    let doc = generate_document(200_000);
    for label in ["legal_aware", "paragraph_aware", "sentence_aware", "fixed_size"] {
        let (chunker, strategy) = chunker(label);
        group.bench_with_input(BenchmarkId::new("strategy", label), &doc, |b, doc| {
            b.iter(|| chunker.chunk(black_box(doc), strategy, None));
        });
    }
    group.finish();
}

fn bench_chunking_doc_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("chunking_doc_sizes");
    group.sample_size(20);

    for &doc_size in &[50_000, 200_000, 500_000] {
        let doc = generate_document(doc_size);
        let (chunker, strategy) = chunker("legal_aware");
        group.bench_with_input(
            BenchmarkId::new("doc_size", format!("{}kb", doc_size / 1000)),
            &doc,
            |b, doc| {
                b.iter(|| chunker.chunk(black_box(doc), strategy, None));
            },
        );
    }
    group.finish();
}

fn bench_preserved_span_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("preserved_spans");
    let doc = generate_document(200_000);
    let (chunker, _) = chunker("legal_aware");
    group.bench_function("detect_and_merge", |b| {
        b.iter(|| chunker.preserved_spans(black_box(&doc)));
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_chunking_strategies,
    bench_chunking_doc_sizes,
    bench_preserved_span_detection
);
criterion_main!(benches);
