//! Schema delta benchmark: measures run aggregation and delta planning for
//! wide tables.
//!
//! Run with: `cargo bench --bench delta_bench -p tidemark-core`

use std::collections::HashMap;
use std::hint::black_box;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tidemark_core::{
    compute_delta, incoming_columns, ColumnType, Command, CommandColumn, DataType, Op, TableId,
};

fn merge_batch(rows: usize, columns: usize) -> Vec<Command> {
    let table = TableId::new("bench", "wide");
    (0..rows)
        .map(|r| {
            let mut cmd = Command::new(Op::Merge, table.clone(), Utc::now());
            cmd.columns = (0..columns)
                .map(|c| {
                    let value = format!("value-{r}-{c}");
                    let len = i64::try_from(value.len()).unwrap_or(i64::MAX);
                    CommandColumn::new(format!("c{c}"), ColumnType::varchar(len), Some(value))
                })
                .collect();
            cmd
        })
        .collect()
}

fn bench_delta(c: &mut Criterion) {
    let mut group = c.benchmark_group("delta");
    for columns in [8usize, 64, 256] {
        let batch = merge_batch(500, columns);
        let existing: HashMap<String, ColumnType> = (0..columns)
            .step_by(2)
            .map(|i| (format!("c{i}"), ColumnType::new(DataType::Varchar, 4)))
            .collect();
        let table = TableId::new("bench", "wide");

        group.throughput(Throughput::Elements(batch.len() as u64));
        group.bench_with_input(BenchmarkId::new("plan", columns), &batch, |b, batch| {
            b.iter(|| {
                let incoming = incoming_columns(batch.iter());
                let delta = compute_delta(&table, &incoming, |n| existing.get(n).copied());
                black_box(delta)
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_delta);
criterion_main!(benches);
