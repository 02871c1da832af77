//! Benchmarks for peer directory lookups.
//!
//! Measures how quickly a query name is matched against the configured
//! wildcard patterns.

use criterion::{BenchmarkId, Criterion, Throughput, black_box};

use jitroute::net::Link;
use jitroute::routes::{DomainPattern, PeerDirectory, PeerKind, PeerRoute};

fn peer(index: usize, domains: &[String]) -> PeerRoute {
    PeerRoute {
        name: format!("peer{index}"),
        resolvers: vec![format!("10.0.{index}.1:53").parse().unwrap()],
        link: Link {
            name: format!("wg{index}"),
            index: index as u32 + 2,
        },
        endpoint: Some(format!("10.0.{index}.1").parse().unwrap()),
        kind: PeerKind::Gateway,
        patterns: domains
            .iter()
            .map(|d| DomainPattern::compile(d).unwrap())
            .collect(),
    }
}

fn directory() -> PeerDirectory {
    let peers = (0..16)
        .map(|i| {
            let domains: Vec<String> = (0..8)
                .map(|j| format!("*.svc{j}.site{i}.example"))
                .collect();
            peer(i, &domains)
        })
        .collect();
    PeerDirectory::new(peers)
}

fn bench_lookup(c: &mut Criterion) {
    let directory = directory();

    let mut group = c.benchmark_group("directory");
    group.throughput(Throughput::Elements(1));

    // First pattern of the first peer
    group.bench_function(BenchmarkId::new("lookup", "first_match"), |b| {
        b.iter(|| directory.lookup(black_box("db.svc0.site0.example")))
    });

    // Last pattern of the last peer
    group.bench_function(BenchmarkId::new("lookup", "last_match"), |b| {
        b.iter(|| directory.lookup(black_box("db.svc7.site15.example")))
    });

    // Every pattern is tried
    group.bench_function(BenchmarkId::new("lookup", "miss"), |b| {
        b.iter(|| directory.lookup(black_box("www.unrelated.com")))
    });

    group.finish();
}

fn main() {
    let mut criterion = Criterion::default().configure_from_args();
    bench_lookup(&mut criterion);
    criterion.final_summary();
}
