//! Benchmarks for the branch-versioned store.
//!
//! Performance-critical paths:
//! - `VersionedStore::transact`: every catalog write records a commit
//! - `VersionedStore::merge_base`: walked by every merge and rebase
//! - `VersionedStore::diff`: served by the changeset diff endpoint

#![allow(missing_docs)]

use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use serde_json::json;
use stackforge_kernel::catalog::Catalog;
use stackforge_kernel::changeset::ChangesetManager;
use stackforge_kernel::domain::{BranchName, ModuleVersionId};
use stackforge_kernel::repository::NewComponent;
use stackforge_kernel::store::VersionedStore;
use tokio::runtime::Runtime;

fn runtime() -> Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

/// A changeset named `bench` carrying `components` committed components.
async fn branch_with_components(components: usize) -> (VersionedStore, ModuleVersionId) {
    let store = VersionedStore::connect("sqlite::memory:", 1).await.unwrap();
    let catalog = Catalog::new(store.clone());
    let module = catalog.create_module("network", "./modules/network").await.unwrap();
    let version = catalog.create_module_version(module.id, "1.0.0").await.unwrap();

    ChangesetManager::new(store.clone()).create("bench").await.unwrap();
    for i in 0..components {
        catalog
            .create_component(
                "bench",
                NewComponent {
                    module_version_id: version.id,
                    name: format!("component-{i}"),
                    variables: json!({ "index": i }).as_object().cloned().unwrap_or_default(),
                },
            )
            .await
            .unwrap();
    }
    (store, version.id)
}

fn bench_commit(c: &mut Criterion) {
    let rt = runtime();
    let (store, version) = rt.block_on(branch_with_components(0));
    let catalog = Catalog::new(store);
    let mut next = 0_u64;

    c.bench_function("versioned_store/create_component_commit", |b| {
        b.to_async(&rt).iter(|| {
            next += 1;
            let catalog = catalog.clone();
            let name = format!("c-{next}");
            async move {
                catalog
                    .create_component(
                        "bench",
                        NewComponent {
                            module_version_id: version,
                            name,
                            variables: serde_json::Map::new(),
                        },
                    )
                    .await
                    .unwrap()
            }
        });
    });
}

fn bench_merge_base(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("versioned_store/merge_base");
    let trunk = BranchName::trunk();
    let branch = BranchName::new("bench");

    for depth in [10_usize, 100, 500] {
        let (store, _) = rt.block_on(branch_with_components(depth));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &store, |b, store| {
            b.to_async(&rt)
                .iter(|| async { black_box(store.merge_base(&branch, &trunk).await.unwrap()) });
        });
    }
    group.finish();
}

fn bench_diff(c: &mut Criterion) {
    let rt = runtime();
    let mut group = c.benchmark_group("versioned_store/diff");
    let branch = BranchName::new("bench");

    for rows in [10_usize, 100] {
        let (store, _) = rt.block_on(branch_with_components(rows));
        group.bench_with_input(BenchmarkId::from_parameter(rows), &store, |b, store| {
            b.to_async(&rt)
                .iter(|| async { black_box(store.diff(&branch).await.unwrap().len()) });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_commit, bench_merge_base, bench_diff);
criterion_main!(benches);
