//! Validation run benchmarks
//!
//! Measures single chains and whole-record runs over compiled pipelines.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rulechain::{
    link_fn, CompiledValidator, MemoryRecord, RecordValidator, Schema, ValidationChain,
    ValidationConfig,
};
use serde_json::json;
use std::sync::Arc;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread().build().unwrap()
}

/// Benchmark chains of trivial links of increasing length
fn bench_chain_length(c: &mut Criterion) {
    let rt = runtime();
    let record = MemoryRecord::new();
    let mut group = c.benchmark_group("chain_length");

    for len in [1usize, 10, 100, 1000] {
        let links: Vec<Arc<dyn CompiledValidator>> = (0..len)
            .map(|_| {
                link_fn("inc", |value, _, chain| {
                    let n = value.as_i64().unwrap_or(0);
                    chain.update(json!(n + 1)).next();
                })
            })
            .collect();
        let pipeline: rulechain::Pipeline = links.into();

        group.bench_with_input(BenchmarkId::from_parameter(len), &pipeline, |b, pipeline| {
            b.iter(|| {
                rt.block_on(
                    ValidationChain::new(&record, "n", pipeline.clone()).start(Some(json!(0))),
                )
            })
        });
    }

    group.finish();
}

/// Benchmark whole-record validation
fn bench_record(c: &mut Criterion) {
    let rt = runtime();
    let schema = Schema::new("users", ["name", "email", "password", "password_confirmation", "age"]);
    let config = ValidationConfig::new()
        .rule("name", "trim|required|between:2,40")
        .rule("email", "trim|required|email")
        .rule("password", "required|min:8")
        .rule("password_confirmation", "if_valid:password|confirmed:password")
        .rule("age", "numeric|between:13,120");
    let validator = RecordValidator::new(schema, &config).unwrap();
    let mut group = c.benchmark_group("record");

    let valid = MemoryRecord::from_value(json!({
        "name": "Ada Lovelace",
        "email": "ada@example.com",
        "password": "analytical",
        "password_confirmation": "analytical",
        "age": "36"
    }));
    group.bench_function("valid", |b| {
        b.iter(|| rt.block_on(validator.validate(black_box(&valid))))
    });

    let invalid = MemoryRecord::from_value(json!({
        "name": "A",
        "email": "not-an-email",
        "password": "short",
        "password_confirmation": "other",
        "age": "7"
    }));
    group.bench_function("invalid", |b| {
        b.iter(|| rt.block_on(validator.validate(black_box(&invalid))))
    });

    group.finish();
}

criterion_group!(benches, bench_chain_length, bench_record);

criterion_main!(benches);
