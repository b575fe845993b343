use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use rust_decimal::Decimal;
use tally_documents::{LineItemInput, calculate_totals, invoice_line_total};

fn lines(count: usize) -> Vec<LineItemInput> {
    (0..count)
        .map(|i| {
            LineItemInput::new(
                format!("line {i}"),
                Decimal::from((i % 7 + 1) as u32),
                Decimal::new(3333 + i as i64, 2),
                Decimal::new(81, 1),
            )
        })
        .collect()
}

fn bench_document_totals(c: &mut Criterion) {
    let mut group = c.benchmark_group("document_totals");

    for size in [1usize, 10, 100, 1_000] {
        let input = lines(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| calculate_totals(black_box(input)));
        });
    }

    group.finish();
}

fn bench_per_line_rounding(c: &mut Criterion) {
    let mut group = c.benchmark_group("invoice_line_totals");
    let input = lines(100);
    group.throughput(Throughput::Elements(input.len() as u64));

    group.bench_function("per_line_rounding_100", |b| {
        b.iter(|| {
            black_box(&input)
                .iter()
                .map(|line| invoice_line_total(line))
                .fold(Decimal::ZERO, |acc, t| acc + t)
        });
    });

    group.finish();
}

criterion_group!(benches, bench_document_totals, bench_per_line_rounding);
criterion_main!(benches);
