//! Deduplication and merge of new rows with a prior output file.
//!
//! A [`MergeController`] drives one job through two phases:
//!
//! 1. **Converting**: raw rows are shape-checked, admitted or rejected by key,
//!    converted, and written to the sink in input order.
//! 2. **Merging** (optional): typed records from a prior output file are
//!    checked against the keys collected in phase one; records whose key was
//!    seen in the new input are dropped as superseded, the rest are written
//!    after all new rows.
//!
//! [`MergeController::finish`] closes the sink and refuses jobs that saw no
//! rows at all.

use std::collections::HashSet;

use log::debug;

use crate::{
    coerce::ValueCoercer,
    data::TypedRecord,
    error::{ConvertError, Result},
    resolver::TypeResolver,
    rows::{convert_row, ensure_row_shape},
    schema::Schema,
    stats::Statistics,
};

/// Destination for typed records, written in the order presented.
pub trait RecordSink {
    fn write(&mut self, record: TypedRecord) -> Result<()>;

    /// Flushes and closes the destination. Called once, at the end of a job.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

impl RecordSink for Vec<TypedRecord> {
    fn write(&mut self, record: TypedRecord) -> Result<()> {
        self.push(record);
        Ok(())
    }
}

/// Row admission rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Admission {
    /// Zero-based column holding the unique key.
    pub field_key: Option<usize>,
    pub allow_duplicates: bool,
}

impl Admission {
    pub fn keyed(field_key: usize) -> Self {
        Self {
            field_key: Some(field_key),
            allow_duplicates: false,
        }
    }

    /// Column to deduplicate on, or `None` when every row is admitted.
    pub fn key_index(&self) -> Option<usize> {
        if self.allow_duplicates {
            None
        } else {
            self.field_key
        }
    }
}

/// Keys seen during a job. First occurrence wins; keys are never removed.
#[derive(Debug, Default)]
pub struct UniqueKeys {
    keys: HashSet<String>,
}

impl UniqueKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when the key was already present.
    pub fn insert(&mut self, key: &str) -> bool {
        if self.keys.contains(key) {
            return false;
        }
        self.keys.insert(key.to_string())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Converting,
    Merging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOutcome {
    /// New row admitted and written.
    Inserted,
    /// New row rejected because its key was already seen.
    Duplicate,
    /// Prior record written unchanged.
    Retained,
    /// Prior record dropped in favour of a new row with the same key.
    Superseded,
}

pub struct MergeController<'a, S> {
    schema: &'a Schema,
    resolver: TypeResolver,
    coercer: ValueCoercer,
    admission: Admission,
    keys: UniqueKeys,
    stats: Statistics,
    sink: S,
    phase: Phase,
}

impl<'a, S: RecordSink> MergeController<'a, S> {
    pub fn new(schema: &'a Schema, coercer: ValueCoercer, admission: Admission, sink: S) -> Self {
        Self {
            schema,
            resolver: TypeResolver::new(),
            coercer,
            admission,
            keys: UniqueKeys::new(),
            stats: Statistics::new(),
            sink,
            phase: Phase::Converting,
        }
    }

    /// Reuses a resolver that already holds answers for this schema.
    pub fn with_resolver(mut self, resolver: TypeResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn statistics(&self) -> &Statistics {
        &self.stats
    }

    pub fn keys(&self) -> &UniqueKeys {
        &self.keys
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Converts every row of one input, skipping its first row when
    /// `skip_header` is set. Returns the number of rows admitted.
    pub fn convert_rows<I>(&mut self, rows: I, skip_header: bool) -> Result<u64>
    where
        I: IntoIterator<Item = Result<Vec<String>>>,
    {
        let mut admitted = 0u64;
        for (idx, row) in rows.into_iter().enumerate() {
            let row = row?;
            if skip_header && idx == 0 {
                continue;
            }
            if self.convert_row(&row)? == RowOutcome::Inserted {
                admitted += 1;
            }
        }
        Ok(admitted)
    }

    pub fn convert_row(&mut self, raw: &[String]) -> Result<RowOutcome> {
        if self.phase != Phase::Converting {
            return Err(ConvertError::ConvertAfterMerge);
        }
        ensure_row_shape(raw, self.schema)?;
        self.stats.increment_rows_seen();

        if let Some(index) = self.admission.key_index() {
            let key = raw.get(index).map(String::as_str).unwrap_or("");
            if !self.keys.insert(key) {
                debug!("Duplicated key in file: [{key}]");
                self.stats.increment_duplicated_rows();
                return Ok(RowOutcome::Duplicate);
            }
        }

        self.stats.increment_input_rows();
        let record = convert_row(raw, self.schema, &mut self.resolver, &self.coercer)?;
        self.sink.write(record)?;
        Ok(RowOutcome::Inserted)
    }

    /// Streams prior records into the sink. Returns the number retained.
    pub fn merge_records<I>(&mut self, records: I) -> Result<u64>
    where
        I: IntoIterator<Item = Result<TypedRecord>>,
    {
        let mut retained = 0u64;
        for record in records {
            if self.merge_record(record?)? == RowOutcome::Retained {
                retained += 1;
            }
        }
        Ok(retained)
    }

    /// Prior records are tested for membership only; they never add keys,
    /// so repeated keys inside the prior file all survive.
    pub fn merge_record(&mut self, record: TypedRecord) -> Result<RowOutcome> {
        self.phase = Phase::Merging;
        self.stats.increment_output_rows();
        self.stats.increment_rows_seen();

        let superseded = self
            .admission
            .key_index()
            .is_some_and(|index| self.keys.contains(&record.key_text(index)));
        if superseded {
            self.stats.increment_updated_rows();
            return Ok(RowOutcome::Superseded);
        }
        self.sink.write(record)?;
        Ok(RowOutcome::Retained)
    }

    /// Closes the sink, then fails if no row was seen in either phase.
    pub fn finish(mut self, source_name: &str) -> Result<(S, Statistics)> {
        self.sink.finish()?;
        if self.stats.rows_seen() == 0 {
            return Err(ConvertError::EmptyInput {
                source_name: source_name.to_string(),
            });
        }
        Ok((self.sink, self.stats))
    }
}
