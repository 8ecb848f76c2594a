//! Performance benchmarks for habit-sync-engine

use chrono::{NaiveDate, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use habit_sync_engine::{
    EntryOp, HabitChanges, HabitOp, LocalState, NewEntry, NewHabit, Operation, PendingOperation,
    Selector,
};
use serde_json::json;

fn pending(i: u64) -> PendingOperation {
    let at = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
    let operation = match i % 3 {
        0 => Operation::Habit(HabitOp::Create(NewHabit::new(
            format!("habit_{}", i),
            format!("Habit {}", i),
        ))),
        1 => Operation::Habit(HabitOp::Update {
            id: format!("habit_{}", i - 1),
            changes: HabitChanges::rename(format!("Renamed {}", i)),
        }),
        _ => Operation::Entry(EntryOp::Create(NewEntry::completed(
            format!("entry_{}", i),
            format!("habit_{}", i - 2),
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        ))),
    };
    PendingOperation::new(operation, at)
}

fn populated(size: u64) -> LocalState {
    let mut state = LocalState::default();
    for i in 0..size {
        state.push_pending(pending(i));
    }
    state
}

fn bench_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("queue");

    group.bench_function("push_pending", |b| {
        let mut state = LocalState::default();
        let mut i = 0u64;

        b.iter(|| {
            i += 1;
            state.push_pending(black_box(pending(i)))
        })
    });

    for size in [100u64, 1000].iter() {
        group.bench_with_input(BenchmarkId::new("remove_head", size), size, |b, &size| {
            b.iter_batched(
                || populated(size),
                |mut state| {
                    let id = state.pending[0].id;
                    state.remove_pending(black_box(id))
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

fn bench_state_persistence(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_persistence");

    for size in [100u64, 500, 1000].iter() {
        let state = populated(*size);

        group.bench_with_input(BenchmarkId::new("to_json", size), &state, |b, state| {
            b.iter(|| state.to_json())
        });

        let json = state.to_json().unwrap();
        group.bench_with_input(BenchmarkId::new("from_json", size), &json, |b, json| {
            b.iter(|| LocalState::from_json(black_box(json)))
        });
    }

    group.finish();
}

fn bench_selector(c: &mut Criterion) {
    let mut group = c.benchmark_group("selector");

    let rows: Vec<_> = (0..1000u32)
        .map(|i| {
            json!({
                "id": format!("entry_{}", i),
                "habit_id": format!("habit_{}", i % 10),
                "date": format!("2024-03-{:02}", i % 28 + 1),
            })
            .as_object()
            .cloned()
            .unwrap()
        })
        .collect();

    let selector = Selector::new()
        .eq("habit_id", "habit_3")
        .since("date", NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());

    group.bench_function("filter_1000_rows", |b| {
        b.iter(|| {
            rows.iter()
                .filter(|row| black_box(&selector).matches(row))
                .count()
        })
    });

    group.finish();
}

criterion_group!(benches, bench_queue, bench_state_persistence, bench_selector);
criterion_main!(benches);
