//! Benchmarks for endpoint planning.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use lambdaform::config::EndpointSpec;
use lambdaform::endpoints::{path_prefixes, plan};
use lambdaform::state::{EndpointRecord, IntegrationTarget};

fn target() -> IntegrationTarget {
    IntegrationTarget::Function {
        arn: "arn:aws:lambda:us-east-1:123456789012:function:bench-function:default".into(),
    }
}

fn desired(count: usize) -> Vec<EndpointSpec> {
    (0..count)
        .map(|i| EndpointSpec::new("GET", format!("/group{}/item{i}/{{id}}", i % 16)))
        .collect()
}

fn recorded(count: usize) -> Vec<EndpointRecord> {
    (0..count)
        .filter(|i| i % 3 != 0)
        .map(|i| EndpointRecord {
            path: format!("/group{}/item{i}/{{id}}", i % 16),
            method: "GET".into(),
            resource_id: format!("res{i}"),
            target: target(),
            authorizer: None,
            api_key_required: false,
            usage_plan_id: None,
            url: String::new(),
        })
        .collect()
}

fn plan_benchmark(c: &mut Criterion) {
    let default_target = target();
    for count in [10, 200] {
        let want = desired(count);
        let have = recorded(count + count / 2);
        c.bench_function(&format!("plan_{count}"), |b| {
            b.iter(|| plan(black_box(&want), black_box(&have), &default_target))
        });
    }

    c.bench_function("path_prefixes", |b| {
        b.iter(|| path_prefixes(black_box("/a/b/c/d/e/{id}")))
    });
}

criterion_group!(benches, plan_benchmark);
criterion_main!(benches);
