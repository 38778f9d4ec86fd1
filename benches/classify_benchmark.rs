//! Classification benchmarks

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use kagami_uploadr::classify::{classify_filename, classify_for_prediction, sanitize_filename};

fn benchmark_sanitize(c: &mut Criterion) {
    let mut group = c.benchmark_group("sanitize_filename");

    for name in ["track.mp3", "  my   song  final (v2) .wav ", "../../a/b/c/cover art.png"] {
        group.throughput(Throughput::Bytes(name.len() as u64));
        group.bench_function(name.trim(), |b| {
            b.iter(|| sanitize_filename(black_box(name)));
        });
    }

    group.finish();
}

fn benchmark_classify(c: &mut Criterion) {
    let names = ["Track.MP3", "cover.jpeg", "beatmap.txt", "notes.pdf", "noextension"];

    c.bench_function("classify_filename", |b| {
        b.iter(|| {
            for name in names {
                black_box(classify_filename(black_box(name)));
            }
        });
    });

    let jpeg = [0xffu8, 0xd8, 0xff, 0xe0, b'J', b'F', b'I', b'F'];
    c.bench_function("classify_for_prediction_sniffed", |b| {
        b.iter(|| classify_for_prediction(black_box(Some("application/octet-stream")), black_box(&jpeg)));
    });
}

criterion_group!(benches, benchmark_sanitize, benchmark_classify);
criterion_main!(benches);
