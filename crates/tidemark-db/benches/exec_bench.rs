//! Executor benchmark: run partitioning and statement generation for
//! mixed command lists against the recording store.
//!
//! Run with: `cargo bench --bench exec_bench -p tidemark-db`

use std::hint::black_box;
use std::sync::Arc;

use chrono::Utc;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use tidemark_core::testing::RecordingStore;
use tidemark_core::{ColumnType, Command, CommandColumn, DataType, Op, TableId};
use tidemark_db::exec::partition_runs;
use tidemark_db::{Catalog, Executor};

fn command_list(len: usize, tables: usize) -> Vec<Command> {
    (0..len)
        .map(|i| {
            let table = TableId::new("bench", format!("t{}", i % tables));
            let op = if i % 10 == 9 { Op::Delete } else { Op::Merge };
            let mut cmd = Command::new(op, table, Utc::now());
            cmd.source = "bench".into();
            cmd.columns.push(
                CommandColumn::new(
                    "id",
                    ColumnType::new(DataType::Integer, 8),
                    Some(i.to_string()),
                )
                .with_primary_key(1),
            );
            if op == Op::Merge {
                let note = format!("note-{i}");
                let len = i64::try_from(note.len()).unwrap_or(i64::MAX);
                cmd.columns
                    .push(CommandColumn::new("note", ColumnType::varchar(len), Some(note)));
            }
            cmd
        })
        .collect()
}

fn bench_partition(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition_runs");
    for tables in [1usize, 4, 64] {
        let commands = command_list(10_000, tables);
        group.throughput(Throughput::Elements(commands.len() as u64));
        group.bench_with_input(BenchmarkId::from_parameter(tables), &commands, |b, cmds| {
            b.iter(|| black_box(partition_runs(cmds).len()));
        });
    }
    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");
    let store = RecordingStore::new();
    let executor = rt.block_on(async {
        let catalog = Catalog::open(Arc::new(store.clone())).await.expect("catalog");
        Executor::new(Arc::new(catalog))
    });

    let mut group = c.benchmark_group("execute");
    for len in [100usize, 1_000] {
        let commands = command_list(len, 1);
        // Create the table and columns outside the measured loop.
        rt.block_on(executor.execute(&commands)).expect("warmup");
        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &commands, |b, cmds| {
            b.iter(|| {
                store.clear();
                black_box(rt.block_on(executor.execute(cmds)).expect("execute"))
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_partition, bench_execute);
criterion_main!(benches);
