#![allow(dead_code)]

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use csv_to_parquet::{
    data::TypedRecord,
    parquet_io::{self, ParquetRecordReader},
    resolver::TypeResolver,
    schema::Schema,
};
use tempfile::{TempDir, tempdir};

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

pub fn orders_schema() -> Schema {
    Schema::load(&fixture_path("orders.avsc")).expect("load orders schema")
}

/// Reads every record of a Parquet file written for `schema`.
pub fn read_records(path: &Path, schema: &Schema) -> Vec<TypedRecord> {
    let columns = parquet_io::column_specs(schema, &mut TypeResolver::new()).expect("columns");
    ParquetRecordReader::open(path, columns)
        .expect("open parquet")
        .collect::<Result<Vec<_>, _>>()
        .expect("read parquet")
}

/// Key text of column `index` for every record, in file order.
pub fn keys(records: &[TypedRecord], index: usize) -> Vec<String> {
    records.iter().map(|record| record.key_text(index)).collect()
}

/// Scratch directory helper that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates a fresh scratch directory for the current test case.
    pub fn new() -> Self {
        Self {
            temp_dir: tempdir().expect("temp dir"),
        }
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` into a file under the workspace, creating parent
    /// directories as needed, and returns the path.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        let mut file = File::create(&path).expect("create temp file");
        file.write_all(contents.as_bytes())
            .expect("write temp file contents");
        path
    }

    /// Copies the orders schema fixture into the workspace.
    pub fn orders_schema_path(&self) -> PathBuf {
        let path = self.temp_dir.path().join("orders.avsc");
        fs::copy(fixture_path("orders.avsc"), &path).expect("copy schema fixture");
        path
    }
}
