use std::collections::BTreeMap;

use propline_core::compact::{rows_to_batch, upsert};
use propline_core::{
    Compactor, GridResolution, OutputBatch, OutputRow, SeriesLayout, Value, grid_key,
};

const SUBURBS: [&str; 8] = [
    "PARRAMATTA",
    "NEWTOWN",
    "BONDI",
    "MANLY",
    "PENRITH",
    "HORNSBY",
    "CRONULLA",
    "CHATSWOOD",
];

fn synthetic_rows(n: usize) -> Vec<OutputRow> {
    (0..n)
        .map(|i| {
            let lat = -33.5 - (i % 1000) as f64 * 0.001;
            let lon = 150.8 + (i % 700) as f64 * 0.001;
            let mut fields = BTreeMap::new();
            fields.insert("suburb".to_string(), Value::Str(SUBURBS[i % 8].into()));
            fields.insert("postcode".to_string(), Value::Str(format!("2{:03}", i % 250)));
            fields.insert("confidence".to_string(), Value::Int((i % 100) as i64));
            fields.insert("land_area".to_string(), Value::Float(450.0 + (i % 97) as f64 * 0.5));
            fields.insert("is_primary".to_string(), Value::Bool(i % 3 != 0));
            OutputRow {
                key: format!("GA{i:08}"),
                period: None,
                latitude: Some(lat),
                longitude: Some(lon),
                grid: grid_key(lat, lon, GridResolution::DEFAULT),
                fields,
            }
        })
        .collect()
}

#[divan::bench(args = [1_000, 10_000])]
fn infer_and_build(bencher: divan::Bencher, n: usize) {
    let rows = synthetic_rows(n);
    bencher.bench(|| rows_to_batch(&rows, false).unwrap());
}

#[divan::bench(args = [10_000])]
fn upsert_half_overlap(bencher: divan::Bencher, n: usize) {
    let existing = synthetic_rows(n);
    let incoming: Vec<_> = synthetic_rows(n).into_iter().skip(n / 2).collect();
    bencher
        .with_inputs(|| (existing.clone(), incoming.clone()))
        .bench_values(|(existing, incoming)| upsert(existing, incoming));
}

#[divan::bench(args = [1, 3, 9])]
fn flush_zstd(bencher: divan::Bencher, zstd_level: i32) {
    let rows = synthetic_rows(5_000);
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("bench.parquet");
    let compactor = Compactor::new(output, zstd_level, SeriesLayout::Wide);
    bencher.bench(|| {
        let batch = OutputBatch {
            rows: rows.clone(),
            cursor: rows.len() as u64,
        };
        compactor.flush(batch, false).unwrap()
    });
}

fn main() {
    divan::main();
}
