use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rgrab::event::{Payload, ReadEncoding};
use rgrab::grabber::render_payload;
use rgrab::target::TargetDecoder;

fn target_decoding_benchmark(c: &mut Criterion) {
    let input: String = (0..1000)
        .map(|i| format!("10.{}.{}.{},host{}.example.com\n", i / 65536, (i / 256) % 256, i % 256, i))
        .collect();

    c.bench_function("decode_1000_targets", |b| {
        b.iter(|| {
            let decoded = TargetDecoder::new(black_box(input.as_bytes()))
                .filter(Result::is_ok)
                .count();
            assert_eq!(decoded, 1000);
        })
    });
}

fn payload_template_benchmark(c: &mut Criterion) {
    let template = "GET / HTTP/1.1\r\nHost: %d\r\nX-Forwarded-For: %s\r\nUser-Agent: rgrab\r\n\r\n";

    c.bench_function("render_payload", |b| {
        b.iter(|| render_payload(black_box(template), black_box("198.51.100.9"), black_box("x.com")))
    });
}

fn payload_encoding_benchmark(c: &mut Criterion) {
    let banner: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();

    for encoding in [ReadEncoding::String, ReadEncoding::Base64, ReadEncoding::Hex] {
        let payload = Payload::new(banner.clone(), encoding);
        c.bench_function(&format!("encode_banner_{:?}", encoding).to_lowercase(), |b| {
            b.iter(|| black_box(&payload).to_string())
        });
    }
}

criterion_group!(
    benches,
    target_decoding_benchmark,
    payload_template_benchmark,
    payload_encoding_benchmark
);
criterion_main!(benches);
