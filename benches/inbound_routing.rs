use criterion::{Criterion, black_box, criterion_group, criterion_main};

use telemetry_ws::protocol::decode_frame;
use telemetry_ws::{MessageRouter, StateStore};

fn metrics_frame(i: usize) -> String {
    format!(
        r#"{{"message_type":"metrics_update","data":{{"system":{{"cpu":{{"percent":{cpu},"cores":8,"frequency":3200.0}},"memory":{{"total":17179869184,"used":{used},"percent":41.2}},"disk":{{"total":512000000000,"used":128000000000,"percent":25.0}},"network":{{"bytes_sent":{sent},"bytes_recv":{recv}}}}},"timestamp":"2026-10-15T12:00:{sec:02}Z"}}}}"#,
        cpu = (i % 100) as f64 + 0.5,
        used = 8_000_000_000u64 + i as u64,
        sent = i * 1500,
        recv = i * 3000,
        sec = i % 60,
    )
}

fn connections_frame(i: usize) -> String {
    let connections: Vec<String> = (0..50)
        .map(|n| {
            format!(
                r#"{{"host":"198.51.100.{n}","port":{port},"protocol":"tcp","status":"ESTABLISHED","bytes_sent":{i},"bytes_received":{n},"latency":1.5,"process":"nginx"}}"#,
                port = 40_000 + n,
            )
        })
        .collect();
    format!(
        r#"{{"message_type":"connections_update","data":{{"active_connections":[{}],"blocked_ips":["192.0.2.{}"]}}}}"#,
        connections.join(","),
        i % 250
    )
}

fn bench_route_1000_metrics_frames(c: &mut Criterion) {
    let frames: Vec<String> = (0..1000).map(metrics_frame).collect();
    let router = MessageRouter::new(StateStore::new());
    c.bench_function("route_1000_metrics_frames", |b| {
        b.iter(|| {
            for frame in &frames {
                black_box(router.route(frame.as_bytes()));
            }
        })
    });
}

fn bench_route_repeated_frame_suppressed(c: &mut Criterion) {
    let frame = metrics_frame(7);
    let router = MessageRouter::new(StateStore::new());
    router.route(frame.as_bytes());
    c.bench_function("route_repeated_metrics_frame", |b| {
        b.iter(|| black_box(router.route(black_box(frame.as_bytes()))))
    });
}

fn bench_connections_decode_vs_route(c: &mut Criterion) {
    let frames: Vec<String> = (0..100).map(connections_frame).collect();
    c.bench_function("decode_100_connections_frames", |b| {
        b.iter(|| {
            for frame in &frames {
                black_box(decode_frame(frame.as_bytes()).ok());
            }
        })
    });

    let router = MessageRouter::new(StateStore::new());
    c.bench_function("route_100_connections_frames", |b| {
        b.iter(|| {
            for frame in &frames {
                black_box(router.route(frame.as_bytes()));
            }
        })
    });
}

fn bench_unknown_tag_skips_payload(c: &mut Criterion) {
    let frame = connections_frame(3).replace("connections_update", "threat_forecast");
    let router = MessageRouter::new(StateStore::new());
    c.bench_function("route_unknown_tag", |b| {
        b.iter(|| black_box(router.route(black_box(frame.as_bytes()))))
    });
}

criterion_group!(
    benches,
    bench_route_1000_metrics_frames,
    bench_route_repeated_frame_suppressed,
    bench_connections_decode_vs_route,
    bench_unknown_tag_skips_payload
);
criterion_main!(benches);
