use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use guest_lifecycle::{scan_process_listing, ServiceProfile};
use std::hint::black_box;

fn process_listing(lines: usize, with_service: bool) -> String {
    let mut listing = String::from("USER PID %CPU %MEM VSZ RSS TTY STAT START TIME COMMAND\n");
    for pid in 0..lines {
        listing.push_str(&format!(
            "root {pid} 0.0 0.1 16896 9216 ? Ss 10:00 0:01 /usr/sbin/worker-{pid} --flag\n"
        ));
    }
    if with_service {
        listing.push_str("redis 812 0.3 1.2 51200 10240 ? Ssl 10:00 1:02 /usr/bin/redis-server *:6379\n");
    }
    listing
}

/// Every reconciliation tick scans the full process listing
fn benchmark_process_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_scan");

    for lines in [50, 500, 5_000] {
        let running = process_listing(lines, true);
        let stopped = process_listing(lines, false);
        group.throughput(Throughput::Bytes(running.len() as u64));

        group.bench_with_input(BenchmarkId::new("running", lines), &running, |b, listing| {
            b.iter(|| scan_process_listing(black_box(listing), "redis-server"))
        });
        group.bench_with_input(BenchmarkId::new("stopped", lines), &stopped, |b, listing| {
            b.iter(|| scan_process_listing(black_box(listing), "redis-server"))
        });
    }

    group.finish();
}

fn benchmark_command_policy(c: &mut Criterion) {
    let profile = ServiceProfile::redis();
    c.bench_function("profile_path", |b| {
        b.iter(|| profile.profile_path(black_box(1024)))
    });
    c.bench_function("restart_command", |b| b.iter(|| profile.restart_service()));
}

criterion_group!(benches, benchmark_process_scan, benchmark_command_policy);
criterion_main!(benches);
