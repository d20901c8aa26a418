use criterion::{criterion_group, criterion_main, Criterion};

use pagesnap::assets::{AssetInliner, InlineStrategy};
use pagesnap::dom::DocumentTree;
use pagesnap::snapshot::{rebuild, serialize_html, snapshot, RebuildContext, SnapshotOptions};

fn build_page(rows: usize) -> String {
    let mut body = String::new();
    for i in 0..rows {
        body.push_str(&format!(
            "<tr><td id=\"cell-{}\">row {}</td><td class=\"v\">value</td></tr>",
            i, i
        ));
    }
    format!(
        "<!DOCTYPE html><html><head><title>Bench</title></head>\
         <body><table>{}</table></body></html>",
        body
    )
}

fn bench_snapshot_rebuild(c: &mut Criterion) {
    let doc = DocumentTree::parse(&build_page(200));
    let client = reqwest::Client::new();
    let strategy = InlineStrategy::Base64Embed;
    let inliner = AssetInliner::new(&client, &strategy);
    let base = url::Url::parse("http://localhost/").unwrap();
    // No remote references in the page, so the snapshotter never fetches.
    let opts = SnapshotOptions::default();
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("snapshot_200_rows", |b| {
        b.iter(|| {
            let snap = rt
                .block_on(snapshot(&doc, &base, &opts, &inliner, &[]))
                .unwrap();
            assert!(snap.len() > 200);
        })
    });

    let snap = rt
        .block_on(snapshot(&doc, &base, &opts, &inliner, &[]))
        .unwrap();
    c.bench_function("rebuild_and_serialize_200_rows", |b| {
        b.iter(|| {
            let rebuilt = rebuild(&snap, RebuildContext::new()).unwrap();
            let html = serialize_html(&rebuilt);
            assert!(html.len() > 1000);
        })
    });
}

criterion_group!(benches, bench_snapshot_rebuild);
criterion_main!(benches);
