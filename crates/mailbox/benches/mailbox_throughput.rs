use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};
use mailbox::{Frame, FrameShape, Mailbox, Namespace};
use tempfile::tempdir;

const SIZES: [(usize, &str); 4] = [
    (1024, "1KB"),         // control values, small telemetry
    (100 * 1024, "100KB"), // small debug frame
    (1024 * 1024, "1MB"),  // VGA raw frame (640x480x3)
    (6 * 1024 * 1024, "6MB"), // Full HD raw frame (1920x1080x3)
];

fn benchmark_mailbox_write(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox_write");

    for (size, label) in SIZES.iter() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut writer = Mailbox::create(&ns, "bench", *size).unwrap();
        let shape = FrameShape::bytes(*size).unwrap();
        let data = vec![0u8; *size];

        group.bench_with_input(BenchmarkId::new("write", label), size, |b, _| {
            b.iter(|| {
                writer.write(0, shape, black_box(&data)).unwrap();
            });
        });
    }

    group.finish();
}

fn benchmark_mailbox_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("mailbox_roundtrip");

    for (size, label) in SIZES.iter() {
        let dir = tempdir().unwrap();
        let ns = Namespace::at(dir.path());

        let mut writer = Mailbox::create(&ns, "bench", *size).unwrap();
        let reader = Mailbox::try_open(&ns, "bench").unwrap();
        let shape = FrameShape::bytes(*size).unwrap();
        let data = vec![42u8; *size];
        let mut frame = Frame::new();

        group.bench_with_input(BenchmarkId::new("roundtrip", label), size, |b, _| {
            b.iter(|| {
                writer.write(0, shape, black_box(&data)).unwrap();
                let status = reader.read(&mut frame, false).unwrap();
                black_box((status, frame.bytes()));
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_mailbox_write, benchmark_mailbox_roundtrip);
criterion_main!(benches);
