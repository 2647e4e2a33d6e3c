//! Atomic file output: parquet writer and small-file writes, both tmp→rename

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use arrow::array::RecordBatch;
use arrow::datatypes::SchemaRef;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, ZstdLevel};
use parquet::file::properties::WriterProperties;

/// Sibling temp path: `<path>.tmp`
pub fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

/// Make a completed rename durable (directory entry fsync; no-op off unix)
fn sync_parent_dir(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        File::open(parent)?.sync_all()?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

/// Write `bytes` to `path` so readers see either the old or the new content, never a mix
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = tmp_path(path);
    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    sync_parent_dir(path)
}

/// Buffered parquet writer with atomic tmp→rename
pub struct ParquetSink {
    writer: ArrowWriter<File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    row_count: usize,
}

impl std::fmt::Debug for ParquetSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParquetSink")
            .field("final_path", &self.final_path)
            .field("row_count", &self.row_count)
            .finish_non_exhaustive()
    }
}

impl ParquetSink {
    /// Create a sink writing to `<final_path>.tmp`
    pub fn create(
        final_path: &Path,
        schema: SchemaRef,
        zstd_level: i32,
    ) -> Result<Self, std::io::Error> {
        let tmp_path = tmp_path(final_path);

        // Clean up stale tmp file
        if tmp_path.exists() {
            fs::remove_file(&tmp_path)?;
        }

        let file = File::create(&tmp_path)?;
        let level = ZstdLevel::try_new(zstd_level)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(level))
            .set_max_row_group_size(1024 * 1024) // 1M rows per row group
            .build();

        let writer =
            ArrowWriter::try_new(file, schema, Some(props)).map_err(std::io::Error::other)?;

        Ok(Self {
            writer,
            tmp_path,
            final_path: final_path.to_path_buf(),
            row_count: 0,
        })
    }

    /// Write a record batch
    pub fn write_batch(&mut self, batch: &RecordBatch) -> Result<(), std::io::Error> {
        self.row_count += batch.num_rows();
        self.writer.write(batch).map_err(std::io::Error::other)
    }

    /// Finalize: write footer, fsync, atomically rename tmp → final
    pub fn finalize(self) -> Result<usize, std::io::Error> {
        let row_count = self.row_count;
        let file = self.writer.into_inner().map_err(std::io::Error::other)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&self.tmp_path, &self.final_path)?;
        sync_parent_dir(&self.final_path)?;
        Ok(row_count)
    }
}

/// Remove stale `.tmp` siblings left by an interrupted write of any of `paths`
pub fn cleanup_tmp_files(paths: &[&Path]) -> std::io::Result<()> {
    for path in paths {
        let tmp = tmp_path(path);
        if tmp.exists() {
            log::warn!("Removing stale tmp file: {}", tmp.display());
            fs::remove_file(&tmp)?;
        }
    }
    Ok(())
}
