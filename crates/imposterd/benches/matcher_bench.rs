//! Benchmarks for the stub matcher: how linear-scan declaration-order
//! matching (spec §4.8, §8) scales with stub count, match position, and
//! predicate shape.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use imposterd::imposter::{Imposter, ImposterConfig, Stub, StubResponse};
use serde_json::json;

fn is_response(body: &str) -> StubResponse {
    serde_json::from_value(json!({
        "is": { "statusCode": 200, "body": body }
    }))
    .expect("valid is-response literal")
}

fn stub_with_equals_path(path: &str) -> Stub {
    Stub {
        scenario_name: None,
        id: None,
        predicates: vec![json!({ "equals": { "method": "GET", "path": path } })],
        responses: vec![is_response("ok")],
    }
}

fn stub_with_regex_path(pattern: &str) -> Stub {
    Stub {
        scenario_name: None,
        id: None,
        predicates: vec![json!({ "matches": { "path": pattern } })],
        responses: vec![is_response("ok")],
    }
}

fn stub_with_body_predicate(field: &str, expected: &str) -> Stub {
    Stub {
        scenario_name: None,
        id: None,
        predicates: vec![json!({
            "and": [
                { "equals": { "method": "POST" } },
                { "equals": { "body": { field: expected } } },
            ]
        })],
        responses: vec![is_response("ok")],
    }
}

fn build_imposter(stubs: Vec<Stub>) -> Imposter {
    let config = ImposterConfig {
        stubs,
        ..Default::default()
    };
    Imposter::new(config)
}

fn bench_equals_path_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("equals_path_matching");

    for stub_count in [10usize, 50, 100, 500, 1000] {
        let stubs: Vec<Stub> = (0..stub_count)
            .map(|i| stub_with_equals_path(&format!("/api/v1/endpoint{i}")))
            .collect();
        let imposter = build_imposter(stubs);
        let headers = hyper::HeaderMap::new();

        group.throughput(Throughput::Elements(1));

        group.bench_with_input(
            BenchmarkId::new("match_first", stub_count),
            &stub_count,
            |b, _| {
                b.iter(|| {
                    imposter.find_matching_stub(
                        black_box("GET"),
                        black_box("/api/v1/endpoint0"),
                        black_box(&headers),
                        black_box(None),
                        black_box(None),
                    )
                });
            },
        );

        let middle = stub_count / 2;
        let middle_path = format!("/api/v1/endpoint{middle}");
        group.bench_with_input(
            BenchmarkId::new("match_middle", stub_count),
            &stub_count,
            |b, _| {
                b.iter(|| {
                    imposter.find_matching_stub(
                        black_box("GET"),
                        black_box(middle_path.as_str()),
                        black_box(&headers),
                        black_box(None),
                        black_box(None),
                    )
                });
            },
        );

        group.bench_with_input(
            BenchmarkId::new("match_none", stub_count),
            &stub_count,
            |b, _| {
                b.iter(|| {
                    imposter.find_matching_stub(
                        black_box("GET"),
                        black_box("/not/found"),
                        black_box(&headers),
                        black_box(None),
                        black_box(None),
                    )
                });
            },
        );
    }

    group.finish();
}

fn bench_regex_path_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("regex_path_matching");

    for stub_count in [10usize, 50, 100] {
        let stubs: Vec<Stub> = (0..stub_count)
            .map(|i| stub_with_regex_path(&format!("^/api/v\\d+/endpoint{i}$")))
            .collect();
        let imposter = build_imposter(stubs);
        let headers = hyper::HeaderMap::new();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("regex_match_middle", stub_count),
            &stub_count,
            |b, _| {
                let path = format!("/api/v1/endpoint{}", stub_count / 2);
                b.iter(|| {
                    imposter.find_matching_stub(
                        black_box("GET"),
                        black_box(path.as_str()),
                        black_box(&headers),
                        black_box(None),
                        black_box(None),
                    )
                });
            },
        );
    }

    group.finish();
}

fn bench_body_predicate_matching(c: &mut Criterion) {
    let mut group = c.benchmark_group("body_predicate_matching");

    for stub_count in [10usize, 50, 100, 500] {
        let stubs: Vec<Stub> = (0..stub_count)
            .map(|i| stub_with_body_predicate("id", &format!("item-{i}")))
            .collect();
        let imposter = build_imposter(stubs);
        let headers = hyper::HeaderMap::new();
        let body = format!(r#"{{"id":"item-{}"}}"#, stub_count / 2);

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("deep_equals_json_body", stub_count),
            &stub_count,
            |b, _| {
                b.iter(|| {
                    imposter.find_matching_stub(
                        black_box("POST"),
                        black_box("/"),
                        black_box(&headers),
                        black_box(None),
                        black_box(Some(body.as_str())),
                    )
                });
            },
        );
    }

    group.finish();
}

fn bench_single_stub_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_stub_eval");

    let imposter = build_imposter(vec![stub_with_equals_path("/api/v1/test")]);
    let headers = hyper::HeaderMap::new();

    group.throughput(Throughput::Elements(1));
    group.bench_function("single_match", |b| {
        b.iter(|| {
            imposter.find_matching_stub(
                black_box("GET"),
                black_box("/api/v1/test"),
                black_box(&headers),
                black_box(None),
                black_box(None),
            )
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_equals_path_matching,
    bench_regex_path_matching,
    bench_body_predicate_matching,
    bench_single_stub_evaluation,
);
criterion_main!(benches);
