use criterion::{black_box, criterion_group, criterion_main, Criterion};
use smoke_oracle::storage::dom_store::query_html_by_selector;
use smoke_oracle::storage::screenshot_store::ScreenshotStore;
use smoke_oracle::types::{ConsoleLevel, ConsoleLogEntry, DomAssertion};
use smoke_oracle::{content_hash, format_bytes, format_duration, generate_id};
use std::time::Duration;

fn configure_fast_group(group: &mut criterion::BenchmarkGroup<criterion::measurement::WallTime>) {
    group.warm_up_time(Duration::from_millis(500));
    group.measurement_time(Duration::from_millis(500));
    group.sample_size(20);
}

fn sample_html(card_count: usize) -> String {
    let cards: String = (0..card_count)
        .map(|i| format!("<div class=\"card\" data-i=\"{i}\">card {i}</div>"))
        .collect();
    format!("<html><head><title>Sample</title></head><body>{cards}</body></html>")
}

fn benchmark_id_generation(c: &mut Criterion) {
    let mut group = c.benchmark_group("id_generation");
    configure_fast_group(&mut group);

    group.bench_function("generate_id", |b| {
        b.iter(|| black_box(generate_id("dom")));
    });

    group.bench_function("content_hash", |b| {
        let payload = sample_html(50);
        b.iter(|| black_box(content_hash(payload.as_bytes())));
    });

    group.finish();
}

fn benchmark_pixel_comparison(c: &mut Criterion) {
    let mut group = c.benchmark_group("pixel_comparison");
    configure_fast_group(&mut group);

    // Two flat 64x64 RGB buffers, one pixel perturbed in the second.
    let width = 64usize;
    let height = 64usize;
    let mut a = vec![0u8; width * height * 3];
    for (i, px) in a.iter_mut().enumerate() {
        *px = (i % 256) as u8;
    }
    let mut b_buf = a.clone();
    b_buf[0] = b_buf[0].wrapping_add(50);

    let png_a = encode_png(&a, width as u32, height as u32);
    let png_b = encode_png(&b_buf, width as u32, height as u32);

    group.bench_function("compare_64x64", |b| {
        b.iter(|| {
            let diff = ScreenshotStore::compare(&png_a, &png_b, 0.1).unwrap();
            black_box(diff);
        });
    });

    group.finish();
}

fn encode_png(rgb: &[u8], width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_raw(width, height, rgb.to_vec()).unwrap();
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

fn benchmark_dom_chunking_and_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("dom_store");
    configure_fast_group(&mut group);

    let html = sample_html(4321);

    group.bench_function("query_by_selector", |b| {
        b.iter(|| {
            let elements = query_html_by_selector(&html, "div.card").unwrap();
            black_box(elements.len());
        });
    });

    group.finish();
}

fn benchmark_assertion_evaluation(c: &mut Criterion) {
    let mut group = c.benchmark_group("assertions");
    configure_fast_group(&mut group);

    let html = sample_html(500);
    let assertion = DomAssertion::Count {
        selector: "div.card".into(),
        op: "eq".into(),
        n: 500,
    };

    group.bench_function("evaluate_dom_count", |b| {
        b.iter(|| {
            let result = smoke_oracle::assertions::evaluate_dom(&html, &assertion).unwrap();
            black_box(result.passed);
        });
    });

    let entries: Vec<ConsoleLogEntry> = (0..200)
        .map(|i| ConsoleLogEntry {
            timestamp: chrono::Utc::now(),
            level: if i % 17 == 0 { ConsoleLevel::Error } else { ConsoleLevel::Log },
            message: format!("entry {i}"),
            args: vec![],
            stack: None,
            source: None,
        })
        .collect();
    let console_assertions = smoke_oracle::types::ConsoleAssertions {
        no_errors: true,
        allowed: vec!["/entry 0/i".into()],
        ..Default::default()
    };

    group.bench_function("evaluate_console_no_errors", |b| {
        b.iter(|| {
            let results = smoke_oracle::assertions::evaluate_console(&entries, &console_assertions);
            black_box(results.len());
        });
    });

    group.finish();
}

fn benchmark_format_utilities(c: &mut Criterion) {
    let mut group = c.benchmark_group("format_utilities");
    configure_fast_group(&mut group);

    let test_durations = vec![Duration::from_millis(100), Duration::from_secs(5)];
    let test_byte_sizes = vec![1024u64, 1048576];

    group.bench_function("format_duration", |b| {
        b.iter(|| {
            for duration in &test_durations {
                black_box(format_duration(*duration));
            }
        });
    });

    group.bench_function("format_bytes", |b| {
        b.iter(|| {
            for size in &test_byte_sizes {
                black_box(format_bytes(*size));
            }
        });
    });

    group.finish();
}

criterion_group!(
    unit_benches,
    benchmark_id_generation,
    benchmark_pixel_comparison,
    benchmark_dom_chunking_and_query,
    benchmark_assertion_evaluation,
    benchmark_format_utilities,
);
criterion_main!(unit_benches);
