//! Benchmarks for the hot synchronous path of a request: difficulty
//! estimation, query expansion, cache keying, and routing dispatch.
//!
//! These run per request before any model call, so they must stay cheap
//! relative to network latency (micro- not milliseconds).

// Criterion macros generate items without docs - this is expected for benchmarks
// Benchmarks use expect/unwrap for simplicity - panics are acceptable in benchmarks
#![allow(missing_docs)]
#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use axon::cache::{CacheKey, CachedAnswer, ResponseCache};
use axon::config::{CacheSettings, RunConfig};
use axon::embedding::{Embedder, HashEmbedder};
use axon::estimator::DifficultyEstimator;
use axon::models::{DifficultyAssessment, Tier};
use axon::retrieval::QueryExpander;
use axon::router::{ModelRouter, TierSwitches};
use axon::tier::{ModelTier, TierRequest, TierResponse};
use async_trait::async_trait;

const QUERIES: &[(&str, &str)] = &[
    ("short", "what is 2+2"),
    (
        "medium",
        "explain the difference between stack and heap allocation in systems programming",
    ),
    (
        "long",
        "prove that the reciprocal rank fusion of two rankings is invariant under \
         appending items below rank k, and derive the convergence behavior of an \
         iterative refinement loop whose confidence scores form a bounded monotone \
         sequence under repeated evaluation with a fixed scoring function",
    ),
];

struct NullTier(Tier);

#[async_trait]
impl ModelTier for NullTier {
    fn tier(&self) -> Tier {
        self.0
    }

    fn name(&self) -> &'static str {
        "null"
    }

    fn estimated_cost_usd(&self, _request: &TierRequest) -> f64 {
        0.001
    }

    async fn complete(&self, _request: &TierRequest) -> axon::Result<TierResponse> {
        Ok(TierResponse {
            text: String::new(),
            tokens_used: 1,
        })
    }
}

fn bench_estimation(c: &mut Criterion) {
    let estimator = DifficultyEstimator::new();
    let mut group = c.benchmark_group("estimate");
    for (name, query) in QUERIES {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, q| {
            b.iter(|| estimator.estimate(black_box(q), "bench").expect("estimate"));
        });
    }
    group.finish();
}

fn bench_expansion(c: &mut Criterion) {
    let expander = QueryExpander::new();
    let mut group = c.benchmark_group("expand");
    for (name, query) in QUERIES {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, q| {
            b.iter(|| expander.expand(black_box(q), 4));
        });
    }
    group.finish();
}

fn bench_embedding(c: &mut Criterion) {
    let embedder = HashEmbedder::new();
    let mut group = c.benchmark_group("embed");
    for (name, query) in QUERIES {
        group.bench_with_input(BenchmarkId::from_parameter(name), query, |b, q| {
            b.iter(|| embedder.embed(black_box(q)).expect("embed"));
        });
    }
    group.finish();
}

fn bench_dispatch(c: &mut Criterion) {
    let router = ModelRouter::new(
        Some(Arc::new(NullTier(Tier::Teacher))),
        Some(Arc::new(NullTier(Tier::Student))),
        0.6,
    );
    let request = TierRequest::new("bench prompt", 256);
    let switches = TierSwitches {
        teacher: true,
        student: true,
    };

    c.bench_function("dispatch", |b| {
        b.iter(|| {
            for difficulty in [0.1, 0.5, 0.9] {
                let mut assessment = DifficultyAssessment::assume_hard();
                assessment.difficulty = difficulty;
                router
                    .dispatch(black_box(&request), &assessment, switches, 0.5)
                    .expect("dispatch");
            }
        });
    });
}

fn bench_cache_key(c: &mut Criterion) {
    let config_fields = RunConfig::default().cache_key_fields();
    c.bench_function("cache_key", |b| {
        b.iter(|| {
            CacheKey::for_query(
                black_box("what is the difference between stack and heap"),
                "bench",
                &config_fields,
            )
        });
    });
}

fn bench_cache_hit(c: &mut Criterion) {
    let cache = ResponseCache::new(&CacheSettings::default());
    let key = CacheKey::for_query("warm query", "bench", "cfg");
    tokio_test::block_on(async {
        cache
            .get_or_compute(&key, &[], || async {
                Ok(CachedAnswer {
                    answer: "warm".to_string(),
                    quality_score: 0.9,
                    converged: true,
                    cost_usd: 0.0,
                })
            })
            .await
            .expect("seed cache");
    });

    c.bench_function("cache_hit", |b| {
        b.iter(|| {
            tokio_test::block_on(async {
                // The entry is warm, so the compute closure is never run.
                cache
                    .get_or_compute(black_box(&key), &[], || async {
                        Ok(CachedAnswer {
                            answer: String::new(),
                            quality_score: 0.0,
                            converged: false,
                            cost_usd: 0.0,
                        })
                    })
                    .await
                    .expect("cache hit")
            })
        });
    });
}

criterion_group!(
    benches,
    bench_estimation,
    bench_expansion,
    bench_embedding,
    bench_dispatch,
    bench_cache_key,
    bench_cache_hit
);
criterion_main!(benches);
