//! Rule compilation benchmarks
//!
//! Measures DSL parsing and pipeline compilation for typical field specs.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rulechain::params::split_escaped;
use rulechain::{Aliases, Compiler, RecordValidator, RuleRegistry, RuleSpec, Schema, ValidationConfig};
use serde_json::json;

fn schema() -> Schema {
    Schema::new("users", ["name", "email", "password", "password_confirmation", "age", "role"])
}

/// Benchmark splitting of rule strings
fn bench_split(c: &mut Criterion) {
    let mut group = c.benchmark_group("split");

    group.bench_function("plain", |b| {
        let spec = "trim|required|email|between:3,100";
        b.iter(|| split_escaped(black_box(spec), '|'))
    });

    group.bench_function("escaped", |b| {
        let spec = r"regex:/^(a\|b\|c)+$/i|required|not_in:x\,y,z";
        b.iter(|| split_escaped(black_box(spec), '|'))
    });

    group.finish();
}

/// Benchmark compiling single field pipelines
fn bench_compile_field(c: &mut Criterion) {
    let registry = RuleRegistry::standard();
    let compiler = Compiler::new(&registry, schema(), Aliases::default());
    let mut group = c.benchmark_group("compile_field");

    let text: RuleSpec = "trim|required|email|between:3,100".into();
    group.bench_function("text_spec", |b| {
        b.iter(|| compiler.compile(black_box(&text), "email", None).unwrap())
    });

    let map = RuleSpec::try_from(json!({
        "required": "Pick a role",
        "in": ["admin", "editor", "viewer"],
        "if": ["age", "min:18"]
    }))
    .unwrap();
    group.bench_function("map_spec", |b| {
        b.iter(|| compiler.compile(black_box(&map), "role", None).unwrap())
    });

    let dates: RuleSpec = "after:today|before:+30days".into();
    group.bench_function("date_expressions", |b| {
        b.iter(|| compiler.compile(black_box(&dates), "age", None).unwrap())
    });

    group.finish();
}

/// Benchmark compiling a whole schema configuration
fn bench_compile_record(c: &mut Criterion) {
    let config = ValidationConfig::new()
        .rule("name", "trim|required|between:2,40")
        .rule("email", "trim|required|email")
        .rule("password", "required|min:8")
        .rule("password_confirmation", "if_valid:password|confirmed:password")
        .rule("age", "numeric|between:13,120")
        .rule("role", "required_if:age,18|in:admin,editor,viewer");

    c.bench_function("compile_record", |b| {
        b.iter(|| RecordValidator::new(schema(), black_box(&config)).unwrap())
    });
}

criterion_group!(benches, bench_split, bench_compile_field, bench_compile_record);

criterion_main!(benches);
