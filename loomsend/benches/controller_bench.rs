// Loomsend controller benchmarks using criterion.
//
// Measures:
//   - Admission throughput through the full window pipeline
//   - Acknowledgement processing across ring sizes
//   - Sequence-range-set construction and lookup

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::time::Duration;

use bytes::Bytes;
use loomsend::{SendConfig, SendController, SequenceRange, SequenceRangeSet};

const LONG: Duration = Duration::from_secs(60);

fn controller(max_window: usize) -> SendController {
    SendController::new(
        SendConfig {
            max_window_size: max_window,
            // Keep the retry timer out of the measurement.
            initial_rtt: Duration::from_secs(30),
            ..SendConfig::default()
        },
        |_| Ok(()),
        |_| {},
    )
}

// ---------------------------------------------------------------------------
// Admission throughput
// ---------------------------------------------------------------------------

fn bench_admission(c: &mut Criterion) {
    let sizes: &[usize] = &[64, 1024, 8192];

    let mut group = c.benchmark_group("admission");
    for &size in sizes {
        let payload = Bytes::from(vec![0xABu8; size]);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(format!("{size}B")),
            &payload,
            |b, payload| {
                let ctl = controller(64);
                let mut seq = 0u64;
                b.iter(|| {
                    let d = ctl.add(payload.clone(), LONG, ()).unwrap();
                    seq = d.sequence_number;
                    // Ack immediately so the window never fills.
                    ctl.process_transferred(&[SequenceRange::new(1, seq)], None)
                        .unwrap();
                    black_box(d.sequence_number)
                });
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Acknowledgement processing
// ---------------------------------------------------------------------------

fn bench_process_transferred(c: &mut Criterion) {
    let windows: &[usize] = &[8, 32, 128];

    let mut group = c.benchmark_group("process_transferred");
    for &window in windows {
        group.throughput(Throughput::Elements(window as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(window),
            &window,
            |b, &window| {
                let payload = Bytes::from_static(b"bench");
                b.iter_with_setup(
                    || {
                        let ctl = controller(window);
                        for _ in 0..window {
                            ctl.add(payload.clone(), LONG, ()).unwrap();
                        }
                        ctl
                    },
                    |ctl| {
                        ctl.process_transferred(
                            &[SequenceRange::new(1, window as u64)],
                            None,
                        )
                        .unwrap();
                        black_box(ctl.window_start())
                    },
                );
            },
        );
    }
    group.finish();
}

// ---------------------------------------------------------------------------
// Sequence range sets
// ---------------------------------------------------------------------------

fn bench_range_set(c: &mut Criterion) {
    let counts: &[u64] = &[4, 16, 64];

    let mut group = c.benchmark_group("range_set");
    for &count in counts {
        // Alternating acknowledged / missing pattern, worst case for merging.
        let ranges: Vec<SequenceRange> = (0..count)
            .map(|i| SequenceRange::new(i * 4 + 1, i * 4 + 2))
            .collect();
        group.throughput(Throughput::Elements(count));
        group.bench_with_input(
            BenchmarkId::new("build_and_probe", count),
            &ranges,
            |b, ranges| {
                b.iter(|| {
                    let set = SequenceRangeSet::from_ranges(ranges).unwrap();
                    black_box(set.contains(count * 2))
                });
            },
        );
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_admission,
    bench_process_transferred,
    bench_range_set
);
criterion_main!(benches);
