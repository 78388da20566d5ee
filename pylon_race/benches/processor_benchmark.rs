//! Scoring throughput benchmarks.
//!
//! Measures lap ingestion and ranking-cache rebuild cost for the
//! bundled processors at a realistic heat size.

use criterion::{criterion_group, criterion_main, BatchSize, Criterion};

use pylon_common::format::RaceSchedule;
use pylon_common::record::LapRecord;
use pylon_race::processors::{fastest_consecutive, most_laps};
use pylon_race::RaceProcessor;

const SLOTS: usize = 8;
const LAPS_PER_SLOT: usize = 40;

fn schedule(processor_id: &str) -> RaceSchedule {
    RaceSchedule {
        stage_time_sec: 3,
        random_stage_delay_ms: 0,
        unlimited_time: false,
        race_time_sec: 600,
        overtime_sec: -1,
        processor_id: processor_id.to_string(),
    }
}

fn lap(slot: usize, timedelta: f64) -> LapRecord {
    LapRecord {
        timedelta,
        node_index: slot,
        timer_identifier: "bench".to_string(),
        timer_index: 0,
    }
}

fn fill(processor: &mut dyn RaceProcessor) {
    for slot in 0..SLOTS {
        for n in 0..LAPS_PER_SLOT {
            let timedelta = (n + 1) as f64 * (3.0 + slot as f64 * 0.01);
            processor.add_lap_record(slot, lap(slot, timedelta));
        }
    }
}

fn bench_most_laps(c: &mut Criterion) {
    c.bench_function("most_laps/ingest_heat", |b| {
        b.iter_batched(
            || most_laps::MostLapsProcessor::new(schedule(most_laps::UID)),
            |mut processor| fill(&mut processor),
            BatchSize::SmallInput,
        )
    });

    c.bench_function("most_laps/rank_after_mutation", |b| {
        let mut processor = most_laps::MostLapsProcessor::new(schedule(most_laps::UID));
        fill(&mut processor);
        let mut toggle = None;
        b.iter(|| {
            // Mutate so every iteration rebuilds the ranking cache.
            match toggle.take() {
                Some(key) => processor.remove_lap_record(0, key).unwrap(),
                None => toggle = processor.add_lap_record(0, lap(0, 0.5)),
            }
            processor.get_race_results()
        })
    });
}

fn bench_fastest_consecutive(c: &mut Criterion) {
    c.bench_function("fastest_consecutive/rank_after_mutation", |b| {
        let mut processor = fastest_consecutive::FastestConsecutiveProcessor::new(schedule(
            fastest_consecutive::UID,
        ));
        fill(&mut processor);
        let mut toggle = None;
        b.iter(|| {
            match toggle.take() {
                Some(key) => processor.remove_lap_record(0, key).unwrap(),
                None => toggle = processor.add_lap_record(0, lap(0, 0.5)),
            }
            processor.get_race_results()
        })
    });
}

criterion_group!(benches, bench_most_laps, bench_fastest_consecutive);
criterion_main!(benches);
