//! Criterion benchmarks for remap-core.
//!
//! ## Benchmark groups
//!
//! 1. **similarity**: Pairwise class similarity on extracted fingerprints.
//! 2. **indexing**: Fingerprint, evidence and usage extraction per snapshot.
//! 3. **class_matching**: The full class pipeline on renamed snapshots.
//! 4. **field_matching**: Field candidate scoring over a finished class mapping.
//!
//! ## Running
//!
//! ```sh
//! cargo bench --manifest-path crates/remap-core/Cargo.toml
//! # Run only the class matching group:
//! cargo bench --manifest-path crates/remap-core/Cargo.toml -- class_matching
//! ```

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use _remap_core::analysis::fingerprint::ClassFingerprint;
use _remap_core::matching::names::NameClassifier;
use _remap_core::matching::similarity::class_similarity;
use _remap_core::models::{ClassKind, ClassNode, FieldNode, Instruction, MethodNode, Snapshot};
use _remap_core::opcodes::*;
use _remap_core::{MatcherConfig, MethodMapping, SymbolResolver};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Two-letter obfuscated name for slot `i`, shifted by `salt` so two
/// releases of the same synthetic program use different names.
fn short_name(i: usize, salt: usize) -> String {
    let slot = (i * 7 + salt) % (26 * 26);
    let first = (b'a' + (slot / 26) as u8) as char;
    let second = (b'a' + (slot % 26) as u8) as char;
    format!("{first}{second}")
}

/// One class of the synthetic program. Shape depends only on `i`, names on
/// `salt`, so the same `i` in two releases is the correct match.
fn synthetic_class(i: usize, n: usize, salt: usize) -> ClassNode {
    let name = short_name(i, salt);
    let next = short_name((i + 1) % n, salt);
    let field_count = i % 9 + 1;
    let mut class = ClassNode::new(&name, ClassKind::Class)
        .field(FieldNode::new("link", &format!("L{next};")));
    for f in 0..field_count {
        let field = format!("f{f}");
        let desc = if f % 3 == 0 { "J" } else { "I" };
        class = class.field(FieldNode::new(&field, desc));
        let mut code = vec![
            Instruction::op(ALOAD_0),
            Instruction::field(GETFIELD, &name, &field, desc),
            Instruction::op(POP),
            Instruction::ldc_string(&format!("msg-{i}-{f}")),
            Instruction::op(POP),
        ];
        if f == 0 {
            code.push(Instruction::op(ALOAD_0));
            code.push(Instruction::field(GETFIELD, &name, "link", &format!("L{next};")));
            code.push(Instruction::method(INVOKEVIRTUAL, &next, "m0", "()V"));
        }
        code.push(Instruction::op(RETURN));
        class = class.method(MethodNode::new(&format!("m{f}"), &format!("({})V", "I".repeat(f))).with_code(code));
    }
    class
}

fn synthetic_snapshot(n: usize, salt: usize) -> Snapshot {
    let classes = (0..n).map(|i| synthetic_class(i, n, salt)).collect();
    Snapshot::new(classes).unwrap()
}

// ---------------------------------------------------------------------------
// Benchmark: pairwise similarity
// ---------------------------------------------------------------------------

fn bench_similarity(c: &mut Criterion) {
    let classifier = NameClassifier::new(MatcherConfig::default().max_obfuscated_name_len);
    let old = synthetic_snapshot(64, 0);
    let new = synthetic_snapshot(64, 5);
    let old_prints: Vec<ClassFingerprint> = old
        .classes()
        .map(|class| ClassFingerprint::extract(class, &classifier).unwrap())
        .collect();
    let new_prints: Vec<ClassFingerprint> = new
        .classes()
        .map(|class| ClassFingerprint::extract(class, &classifier).unwrap())
        .collect();

    let mut group = c.benchmark_group("similarity");
    group.bench_function("single_pair", |b| {
        b.iter(|| class_similarity(black_box(&old_prints[3]), black_box(&new_prints[3])))
    });
    group.bench_function("all_pairs_64", |b| {
        b.iter(|| {
            let mut total = 0.0;
            for a in &old_prints {
                for n in &new_prints {
                    total += class_similarity(a, n);
                }
            }
            black_box(total)
        })
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: indexing
// ---------------------------------------------------------------------------

fn bench_indexing(c: &mut Criterion) {
    let resolver = SymbolResolver::default();
    let mut group = c.benchmark_group("indexing");
    for &n in &[50, 200, 500] {
        let snapshot = synthetic_snapshot(n, 0);
        group.bench_with_input(BenchmarkId::new("build_index", n), &snapshot, |b, snapshot| {
            b.iter(|| black_box(resolver.index(snapshot).unwrap()))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: class matching
// ---------------------------------------------------------------------------

fn bench_class_matching(c: &mut Criterion) {
    let resolver = SymbolResolver::default();
    let mut group = c.benchmark_group("class_matching");
    group.sample_size(10);
    for &n in &[50, 200] {
        let old = resolver.index(&synthetic_snapshot(n, 0)).unwrap();
        let new = resolver.index(&synthetic_snapshot(n, 11)).unwrap();
        group.bench_with_input(BenchmarkId::new("match_classes", n), &n, |b, _| {
            b.iter(|| black_box(resolver.match_classes(&old, &new).unwrap()))
        });
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Benchmark: field matching
// ---------------------------------------------------------------------------

fn bench_field_matching(c: &mut Criterion) {
    let resolver = SymbolResolver::default();
    let old = resolver.index(&synthetic_snapshot(100, 0)).unwrap();
    let new = resolver.index(&synthetic_snapshot(100, 11)).unwrap();
    let report = resolver.match_classes(&old, &new).unwrap();
    let methods = MethodMapping::new();

    let mut group = c.benchmark_group("field_matching");
    group.sample_size(10);
    group.bench_function("match_fields_100", |b| {
        b.iter(|| {
            black_box(
                resolver
                    .match_fields(&old, &new, &report.mapping, &methods)
                    .unwrap(),
            )
        })
    });
    group.finish();
}

// ---------------------------------------------------------------------------
// Register all benchmark groups
// ---------------------------------------------------------------------------

criterion_group!(
    benches,
    bench_similarity,
    bench_indexing,
    bench_class_matching,
    bench_field_matching,
);
criterion_main!(benches);
