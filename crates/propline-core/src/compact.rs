//! Columnar compaction: upsert-merge, type downcasting, zstd parquet output.
//!
//! Every flush rewrites the whole output through [`ParquetSink`], so the
//! previous good file is replaced atomically or left untouched.
//!
//! Attribute column types are inferred from the values present:
//!
//! | values | stored as |
//! |---|---|
//! | ints only | smallest of Int8/16/32/64 holding min..=max |
//! | ints and floats | Float32 if every value round-trips, else Float64 |
//! | strings, distinct × 2 ≤ non-null | `Dictionary(Int32, Utf8)` |
//! | strings otherwise | Utf8 |
//! | bools only | Boolean |
//! | any other mix | Utf8 |
//! | all null | Utf8 |
//!
//! Reading back widens to Int64/Float64/Utf8, so inference is stable across
//! repeated merges.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BooleanArray, DictionaryArray, Float32Array, Float64Array,
    Int8Array, Int16Array, Int32Array, Int64Array, RecordBatch, StringArray,
};
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, Float64Type, Int32Type, Int64Type, Schema};
use arrow::error::ArrowError;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::file::reader::{FileReader, SerializedFileReader};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::error::PersistenceError;
use crate::record::{
    LAT_GRID, LATITUDE, LON_GRID, LONGITUDE, OutputBatch, OutputRow, PERIOD, SeriesLayout,
    UNIT_KEY, Value, is_structural,
};
use crate::sink::ParquetSink;
use crate::spatial::SpatialKey;

/// What a flush produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompactStats {
    pub rows: usize,
    pub columns: usize,
    pub uncompressed_bytes: u64,
    pub compressed_bytes: u64,
}

impl std::fmt::Display for CompactStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} rows x {} cols, {} bytes ({} uncompressed)",
            self.rows, self.columns, self.compressed_bytes, self.uncompressed_bytes
        )
    }
}

#[derive(Debug, Clone)]
pub struct Compactor {
    output_path: PathBuf,
    zstd_level: i32,
    layout: SeriesLayout,
}

impl Compactor {
    pub fn new(output_path: impl Into<PathBuf>, zstd_level: i32, layout: SeriesLayout) -> Self {
        Self {
            output_path: output_path.into(),
            zstd_level,
            layout,
        }
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// Merge `batch` into the output (or replace it when `merge_existing` is false)
    pub fn flush(
        &self,
        batch: OutputBatch,
        merge_existing: bool,
    ) -> Result<CompactStats, PersistenceError> {
        let exists = self.output_path.exists();
        if batch.rows.is_empty() && merge_existing && exists {
            log::debug!("Flush through cursor {}: no new rows", batch.cursor);
            return output_stats(&self.output_path);
        }

        let existing = if merge_existing && exists {
            read_output(&self.output_path)?.0
        } else {
            Vec::new()
        };
        let incoming = batch.rows.len();
        let rows = upsert(existing, batch.rows);
        let stats = self.write(&rows, self.layout == SeriesLayout::Long)?;
        log::debug!(
            "Flush through cursor {}: +{incoming} rows, output {stats}",
            batch.cursor
        );
        Ok(stats)
    }

    /// Layout the existing output was written with, or `None` when there is no output yet
    pub fn existing_layout(&self) -> Result<Option<SeriesLayout>, PersistenceError> {
        let path = &self.output_path;
        if !path.exists() {
            return Ok(None);
        }
        let file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| PersistenceError::parquet(path, e))?;
        Ok(Some(layout_of(builder.schema())))
    }

    /// Re-run type inference and compression over the existing output
    pub fn recompact(&self) -> Result<CompactStats, PersistenceError> {
        let (rows, long) = read_output(&self.output_path)?;
        self.write(&rows, long)
    }

    fn write(&self, rows: &[OutputRow], long: bool) -> Result<CompactStats, PersistenceError> {
        let path = &self.output_path;
        let batch = rows_to_batch(rows, long).map_err(|e| PersistenceError::parquet(path, e))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistenceError::io(parent, e))?;
        }
        let mut sink = ParquetSink::create(path, batch.schema(), self.zstd_level)
            .map_err(|e| PersistenceError::io(path, e))?;
        if batch.num_rows() > 0 {
            sink.write_batch(&batch)
                .map_err(|e| PersistenceError::io(path, e))?;
        }
        sink.finalize().map_err(|e| PersistenceError::io(path, e))?;
        output_stats(path)
    }
}

// =============================================================================
// Merge
// =============================================================================

/// Insert runs of same-key rows; a new run for a key replaces the previous one
fn group_into(
    groups: &mut FxHashMap<String, BTreeMap<Option<i32>, OutputRow>>,
    rows: Vec<OutputRow>,
) {
    let mut current: Option<String> = None;
    for row in rows {
        if current.as_deref() != Some(row.key.as_str()) {
            current = Some(row.key.clone());
            groups.insert(row.key.clone(), BTreeMap::new());
        }
        if let Some(group) = groups.get_mut(&row.key) {
            group.insert(row.period, row);
        }
    }
}

/// Upsert by unit key: every unit in `incoming` replaces all of its existing rows.
///
/// Output is sorted by `(key, period)`.
pub fn upsert(existing: Vec<OutputRow>, incoming: Vec<OutputRow>) -> Vec<OutputRow> {
    let mut groups = FxHashMap::default();
    group_into(&mut groups, existing);
    group_into(&mut groups, incoming);

    let mut keys: Vec<String> = groups.keys().cloned().collect();
    keys.sort_unstable();
    keys.into_iter()
        .filter_map(|k| groups.remove(&k))
        .flat_map(BTreeMap::into_values)
        .collect()
}

// =============================================================================
// Write
// =============================================================================

fn int_column(values: &[Option<&Value>], min: i64, max: i64) -> ArrayRef {
    let ints = values.iter().map(|v| match v {
        Some(Value::Int(i)) => Some(*i),
        _ => None,
    });
    let fits = |lo: i64, hi: i64| min >= lo && max <= hi;
    if fits(i8::MIN.into(), i8::MAX.into()) {
        Arc::new(ints.map(|v| v.map(|i| i as i8)).collect::<Int8Array>())
    } else if fits(i16::MIN.into(), i16::MAX.into()) {
        Arc::new(ints.map(|v| v.map(|i| i as i16)).collect::<Int16Array>())
    } else if fits(i32::MIN.into(), i32::MAX.into()) {
        Arc::new(ints.map(|v| v.map(|i| i as i32)).collect::<Int32Array>())
    } else {
        Arc::new(ints.collect::<Int64Array>())
    }
}

fn float_column(values: &[Option<&Value>]) -> ArrayRef {
    let floats: Vec<Option<f64>> = values.iter().map(|v| v.and_then(Value::as_f64)).collect();
    let f32_exact = floats
        .iter()
        .flatten()
        .all(|f| f.is_nan() || f64::from(*f as f32) == *f);
    if f32_exact {
        Arc::new(
            floats
                .iter()
                .map(|v| v.map(|f| f as f32))
                .collect::<Float32Array>(),
        )
    } else {
        Arc::new(Float64Array::from(floats))
    }
}

fn string_column(values: &[Option<&Value>], non_null: usize) -> ArrayRef {
    let strs: Vec<Option<&str>> = values
        .iter()
        .map(|v| match v {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        })
        .collect();
    let distinct: FxHashSet<&str> = strs.iter().flatten().copied().collect();
    if distinct.len() * 2 <= non_null {
        Arc::new(strs.into_iter().collect::<DictionaryArray<Int32Type>>())
    } else {
        Arc::new(StringArray::from(strs))
    }
}

/// Infer the narrowest column type holding `values` (None = field absent in that row)
fn infer_column(values: &[Option<&Value>]) -> ArrayRef {
    let (mut bools, mut ints, mut floats, mut strs) = (0usize, 0usize, 0usize, 0usize);
    let (mut min, mut max) = (i64::MAX, i64::MIN);
    for v in values.iter().flatten() {
        match v {
            Value::Null => {}
            Value::Bool(_) => bools += 1,
            Value::Int(i) => {
                ints += 1;
                min = min.min(*i);
                max = max.max(*i);
            }
            Value::Float(_) => floats += 1,
            Value::Str(_) => strs += 1,
        }
    }
    let non_null = bools + ints + floats + strs;

    if non_null == 0 {
        Arc::new(StringArray::new_null(values.len()))
    } else if bools == non_null {
        Arc::new(
            values
                .iter()
                .map(|v| match v {
                    Some(Value::Bool(b)) => Some(*b),
                    _ => None,
                })
                .collect::<BooleanArray>(),
        )
    } else if ints == non_null {
        int_column(values, min, max)
    } else if ints + floats == non_null {
        float_column(values)
    } else if strs == non_null {
        string_column(values, non_null)
    } else {
        Arc::new(
            values
                .iter()
                .map(|v| v.filter(|v| !v.is_null()).map(Value::to_string))
                .collect::<StringArray>(),
        )
    }
}

/// Build the output batch: structural columns first, then attributes sorted by name
pub fn rows_to_batch(rows: &[OutputRow], long: bool) -> Result<RecordBatch, ArrowError> {
    let mut fields = vec![Field::new(UNIT_KEY, DataType::Utf8, false)];
    let mut columns: Vec<ArrayRef> = vec![Arc::new(StringArray::from_iter_values(
        rows.iter().map(|r| r.key.as_str()),
    ))];

    if long {
        fields.push(Field::new(PERIOD, DataType::Int32, true));
        columns.push(Arc::new(
            rows.iter().map(|r| r.period).collect::<Int32Array>(),
        ));
    }

    fields.push(Field::new(LATITUDE, DataType::Float64, true));
    columns.push(Arc::new(Float64Array::from_iter(
        rows.iter().map(|r| r.latitude),
    )));
    fields.push(Field::new(LONGITUDE, DataType::Float64, true));
    columns.push(Arc::new(Float64Array::from_iter(
        rows.iter().map(|r| r.longitude),
    )));
    fields.push(Field::new(LAT_GRID, DataType::Int32, true));
    columns.push(Arc::new(
        rows.iter()
            .map(|r| r.grid.cells().map(|c| c.0))
            .collect::<Int32Array>(),
    ));
    fields.push(Field::new(LON_GRID, DataType::Int32, true));
    columns.push(Arc::new(
        rows.iter()
            .map(|r| r.grid.cells().map(|c| c.1))
            .collect::<Int32Array>(),
    ));

    let names: BTreeSet<&str> = rows
        .iter()
        .flat_map(|r| r.fields.keys().map(String::as_str))
        .filter(|n| !is_structural(n))
        .collect();
    for name in names {
        let values: Vec<Option<&Value>> = rows.iter().map(|r| r.fields.get(name)).collect();
        let array = infer_column(&values);
        fields.push(Field::new(name, array.data_type().clone(), true));
        columns.push(array);
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), columns)
}

// =============================================================================
// Read
// =============================================================================

/// Type an attribute column is widened to when read back
fn read_type(stored: &DataType) -> DataType {
    match stored {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32 => DataType::Int64,
        DataType::Float16 | DataType::Float32 | DataType::Float64 => DataType::Float64,
        DataType::Boolean => DataType::Boolean,
        _ => DataType::Utf8,
    }
}

fn value_at(col: &ArrayRef, i: usize) -> Value {
    if col.is_null(i) {
        return Value::Null;
    }
    match col.data_type() {
        DataType::Int64 => col
            .as_primitive_opt::<Int64Type>()
            .map_or(Value::Null, |a| Value::Int(a.value(i))),
        DataType::Float64 => col
            .as_primitive_opt::<Float64Type>()
            .map_or(Value::Null, |a| Value::Float(a.value(i))),
        DataType::Boolean => col
            .as_boolean_opt()
            .map_or(Value::Null, |a| Value::Bool(a.value(i))),
        _ => col
            .as_string_opt::<i32>()
            .map_or(Value::Null, |a| Value::Str(a.value(i).to_string())),
    }
}

fn cast_column(
    batch: &RecordBatch,
    name: &str,
    to: &DataType,
) -> Result<Option<ArrayRef>, ArrowError> {
    batch.column_by_name(name).map(|c| cast(c, to)).transpose()
}

fn opt_i32(col: Option<&ArrayRef>, i: usize) -> Option<i32> {
    let arr = col?.as_primitive_opt::<Int32Type>()?;
    arr.is_valid(i).then(|| arr.value(i))
}

fn opt_f64(col: Option<&ArrayRef>, i: usize) -> Option<f64> {
    let arr = col?.as_primitive_opt::<Float64Type>()?;
    arr.is_valid(i).then(|| arr.value(i))
}

fn rows_from_batch(batch: &RecordBatch, out: &mut Vec<OutputRow>) -> Result<(), ArrowError> {
    let keys = cast_column(batch, UNIT_KEY, &DataType::Utf8)?
        .ok_or_else(|| ArrowError::SchemaError(format!("missing {UNIT_KEY} column")))?;
    let keys = keys
        .as_string_opt::<i32>()
        .ok_or_else(|| ArrowError::SchemaError(format!("{UNIT_KEY} is not utf8")))?;
    let period = cast_column(batch, PERIOD, &DataType::Int32)?;
    let lat = cast_column(batch, LATITUDE, &DataType::Float64)?;
    let lon = cast_column(batch, LONGITUDE, &DataType::Float64)?;
    let lat_grid = cast_column(batch, LAT_GRID, &DataType::Int32)?;
    let lon_grid = cast_column(batch, LON_GRID, &DataType::Int32)?;

    let schema = batch.schema();
    let mut attrs: Vec<(&str, ArrayRef)> = Vec::new();
    for (field, col) in schema.fields().iter().zip(batch.columns()) {
        if !is_structural(field.name()) {
            attrs.push((field.name().as_str(), cast(col, &read_type(field.data_type()))?));
        }
    }

    for i in 0..batch.num_rows() {
        let grid = match (opt_i32(lat_grid.as_ref(), i), opt_i32(lon_grid.as_ref(), i)) {
            (Some(lat_grid), Some(lon_grid)) => SpatialKey { lat_grid, lon_grid },
            _ => SpatialKey::UNINDEXED,
        };
        out.push(OutputRow {
            key: keys.value(i).to_string(),
            period: opt_i32(period.as_ref(), i),
            latitude: opt_f64(lat.as_ref(), i),
            longitude: opt_f64(lon.as_ref(), i),
            grid,
            fields: attrs
                .iter()
                .map(|(name, col)| (name.to_string(), value_at(col, i)))
                .collect(),
        });
    }
    Ok(())
}

/// Rows of an output file, and whether it uses the long layout
/// Only long outputs carry a `period` column
fn layout_of(schema: &Schema) -> SeriesLayout {
    if schema.field_with_name(PERIOD).is_ok() {
        SeriesLayout::Long
    } else {
        SeriesLayout::Wide
    }
}

fn read_output(path: &Path) -> Result<(Vec<OutputRow>, bool), PersistenceError> {
    let file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| PersistenceError::parquet(path, e))?;
    let long = layout_of(builder.schema()) == SeriesLayout::Long;
    let reader = builder
        .build()
        .map_err(|e| PersistenceError::parquet(path, e))?;

    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| PersistenceError::parquet(path, e))?;
        rows_from_batch(&batch, &mut rows).map_err(|e| PersistenceError::parquet(path, e))?;
    }
    Ok((rows, long))
}

/// All rows of an output file, widened to Int64/Float64/Utf8 values
pub fn read_rows(path: &Path) -> Result<Vec<OutputRow>, PersistenceError> {
    read_output(path).map(|(rows, _)| rows)
}

/// Row/column counts and sizes of an output file, from its footer
pub fn output_stats(path: &Path) -> Result<CompactStats, PersistenceError> {
    let file = File::open(path).map_err(|e| PersistenceError::io(path, e))?;
    let compressed_bytes = file
        .metadata()
        .map_err(|e| PersistenceError::io(path, e))?
        .len();
    let reader = SerializedFileReader::new(file).map_err(|e| PersistenceError::parquet(path, e))?;
    let meta = reader.metadata();
    Ok(CompactStats {
        rows: usize::try_from(meta.file_metadata().num_rows()).unwrap_or(0),
        columns: meta.file_metadata().schema_descr().num_columns(),
        uncompressed_bytes: meta
            .row_groups()
            .iter()
            .map(|rg| u64::try_from(rg.total_byte_size()).unwrap_or(0))
            .sum(),
        compressed_bytes,
    })
}
