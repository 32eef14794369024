use criterion::{Criterion, black_box, criterion_group, criterion_main};
use rand::Rng;
use std::sync::Arc;

use attrstore::attribute::factory::AttributeFactory;
use attrstore::attribute::{AttributeVector, CommitParam};
use attrstore::core::config::{AttributeConfig, BasicType};
use attrstore::core::types::FieldValue;
use attrstore::search::iterator::collect_hits;
use attrstore::search::term::SearchParams;

fn fill_int32(fast_search: bool, docs: u32) -> Arc<dyn AttributeVector> {
    let factory = AttributeFactory::new();
    let mut config = AttributeConfig::single(BasicType::Int32);
    if fast_search {
        config = config.with_fast_search();
    }
    let attr = factory.create("price", &config).unwrap();
    factory.setup_empty(attr.as_ref(), 1).unwrap();
    let mut rng = rand::thread_rng();
    for _ in 0..docs {
        let lid = attr.add_doc().unwrap();
        attr.put(lid, &FieldValue::Int(rng.gen_range(0..10_000))).unwrap();
    }
    attr.commit(CommitParam::new(2));
    attr
}

fn bench_put_commit(c: &mut Criterion) {
    c.bench_function("put_commit_10k_int32", |b| {
        b.iter(|| {
            let attr = fill_int32(false, 10_000);
            black_box(attr.committed_docid_limit());
        });
    });
}

fn bench_range_search(c: &mut Criterion) {
    let scan = fill_int32(false, 50_000);
    let posting = fill_int32(true, 50_000);
    c.bench_function("range_search_scan", |b| {
        b.iter(|| {
            let ctx = scan
                .create_search_context("[100;200]", &SearchParams::default())
                .unwrap();
            let mut it = ctx.create_iterator(true);
            black_box(collect_hits(it.as_mut(), scan.committed_docid_limit()).len());
        });
    });
    c.bench_function("range_search_postings", |b| {
        b.iter(|| {
            let ctx = posting
                .create_search_context("[100;200]", &SearchParams::default())
                .unwrap();
            let mut it = ctx.create_iterator(true);
            black_box(collect_hits(it.as_mut(), posting.committed_docid_limit()).len());
        });
    });
}

criterion_group!(benches, bench_put_commit, bench_range_search);
criterion_main!(benches);
