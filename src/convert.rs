use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
};

use anyhow::{Context, Result, anyhow, bail};
use encoding_rs::Encoding;
use log::{debug, error, info, warn};

use crate::{
    cli::ConvertArgs,
    coerce::{TimeZoneSetting, ValueCoercer},
    error::ConvertError,
    io_utils::{self, CsvFormat, OutputPaths, RawRows},
    merge::{Admission, MergeController},
    parquet_io::{self, OutputCompression, ParquetRecordReader, ParquetSink},
    printable_delimiter,
    resolver::TypeResolver,
    schema::Schema,
    stats::Statistics,
    storage::{LocalObjectStore, PriorOutputRetriever},
};

/// Settings shared by every job of one invocation.
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub compression: OutputCompression,
    pub format: CsvFormat,
    pub encoding: &'static Encoding,
    pub header: bool,
    pub replace: bool,
    pub admission: Admission,
    pub merge: bool,
    pub bucket: Option<PathBuf>,
    pub mode: String,
    pub time_zone: TimeZoneSetting,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            compression: OutputCompression::default(),
            format: CsvFormat::default(),
            encoding: encoding_rs::UTF_8,
            header: false,
            replace: false,
            admission: Admission::default(),
            merge: false,
            bucket: None,
            mode: String::new(),
            time_zone: TimeZoneSetting::default(),
        }
    }
}

impl ConvertOptions {
    pub fn from_args(args: &ConvertArgs) -> Result<Self> {
        let time_zone = TimeZoneSetting::from_str(&args.timezone).map_err(|err| anyhow!(err))?;
        let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
        Ok(Self {
            compression: OutputCompression::from_label(&args.compression),
            format: CsvFormat {
                delimiter: args.delimiter,
                quote: args.quote,
                quote_escape: args.quote_escape,
                trim: !args.keep_whitespace,
            },
            encoding,
            header: args.header,
            replace: args.replace,
            admission: Admission {
                field_key: args.field_key,
                allow_duplicates: args.duplicated,
            },
            merge: args.merge,
            bucket: args.bucket.clone(),
            mode: args.mode.clone(),
            time_zone,
        })
    }

    /// Checks the options against the schema they will be applied to.
    pub fn validate(&self, schema: &Schema) -> Result<()> {
        let field_key = self.admission.field_key;
        if let Some(key) = field_key.filter(|key| *key >= schema.len()) {
            bail!(
                "Field key {key} is out of range: schema '{}' has {} field(s)",
                schema.name,
                schema.len()
            );
        }
        if self.merge && self.bucket.is_none() {
            bail!("Merging requires a bucket holding the previous outputs");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct JobReport {
    pub output: PathBuf,
    pub rows_written: u64,
    pub statistics: Statistics,
}

/// One input (file or directory) converted into one output file.
pub struct ConvertJob<'a> {
    input: PathBuf,
    schema: &'a Schema,
    options: &'a ConvertOptions,
    paths: OutputPaths,
    retriever: Option<&'a dyn PriorOutputRetriever>,
}

impl<'a> ConvertJob<'a> {
    pub fn new(input: impl Into<PathBuf>, schema: &'a Schema, options: &'a ConvertOptions) -> Self {
        let input = input.into();
        let paths = OutputPaths::for_input(&input, options.compression);
        Self {
            input,
            schema,
            options,
            paths,
            retriever: None,
        }
    }

    pub fn with_retriever(mut self, retriever: &'a dyn PriorOutputRetriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    pub fn run(&self) -> Result<JobReport> {
        info!(
            "Converting {:?} into {:?} using delimiter '{}' and {} compression",
            self.input,
            self.paths.output,
            printable_delimiter(self.options.format.delimiter),
            self.options.compression.label()
        );
        remove_if_exists(&self.paths.output)?;
        remove_if_exists(&self.paths.staging)?;

        let outcome = self.convert();
        if let Err(err) = remove_if_exists(&self.paths.staging) {
            warn!("{err:#}");
        }
        let report = match outcome {
            Ok(report) => report,
            Err(err) => {
                if let Err(cleanup) = remove_if_exists(&self.paths.output) {
                    warn!("{cleanup:#}");
                }
                return Err(err);
            }
        };

        info!("{}", report.statistics.summary(&self.paths.object_name()));

        if self.options.replace {
            remove_input(&self.input)?;
            debug!("Removed input {:?}", self.input);
        }
        Ok(report)
    }

    fn convert(&self) -> Result<JobReport> {
        let mut resolver = TypeResolver::new();
        let columns = parquet_io::column_specs(self.schema, &mut resolver)
            .with_context(|| format!("Preparing columns for schema '{}'", self.schema.name))?;
        let sink = ParquetSink::create(&self.paths.output, columns.clone(), self.options.compression)
            .with_context(|| format!("Creating output {:?}", self.paths.output))?;
        let coercer = ValueCoercer::new(self.options.time_zone);
        let mut controller =
            MergeController::new(self.schema, coercer, self.options.admission, sink)
                .with_resolver(resolver);

        for file in io_utils::input_files(&self.input)
            .with_context(|| format!("Listing input {:?}", self.input))?
        {
            debug!("Reading {file:?}");
            let rows = RawRows::from_path(&file, &self.options.format, self.options.encoding)
                .with_context(|| format!("Opening input {file:?}"))?;
            controller
                .convert_rows(rows, self.options.header)
                .with_context(|| format!("Converting {file:?}"))?;
        }

        if self.options.merge && self.stage_prior_output() {
            let reader = ParquetRecordReader::open(&self.paths.staging, columns)
                .with_context(|| format!("Opening previous output {:?}", self.paths.staging))?;
            let retained = controller
                .merge_records(reader)
                .with_context(|| format!("Merging previous output {:?}", self.paths.staging))?;
            debug!("Retained {retained} record(s) from the previous output");
        }

        let source_name = self.input.display().to_string();
        let (sink, statistics) = controller
            .finish(&source_name)
            .with_context(|| format!("Finishing {:?}", self.paths.output))?;
        Ok(JobReport {
            output: self.paths.output.clone(),
            rows_written: sink.rows_written(),
            statistics,
        })
    }

    /// Fetches the previous output into the staging path. Any failure only
    /// disables the merge.
    fn stage_prior_output(&self) -> bool {
        let object = self.paths.object_name();
        let Some(retriever) = self.retriever else {
            warn!("No object store configured; skipping merge of {object}");
            return false;
        };
        match retriever.retrieve(&object, &self.options.mode, &self.paths.staging) {
            Ok(true) => {
                info!("Merging with previous output {object}");
                true
            }
            Ok(false) => {
                info!("No previous output {object} to merge");
                false
            }
            Err(err) => {
                warn!("Retrieving previous output {object} failed: {err:#}");
                false
            }
        }
    }
}

/// Runs the `convert` subcommand: one job per input, each on its own thread.
pub fn execute(args: &ConvertArgs) -> Result<()> {
    let options = ConvertOptions::from_args(args)?;
    let schema = Schema::load(&args.schema)
        .with_context(|| format!("Loading schema from {:?}", args.schema))?;
    options.validate(&schema)?;

    let store = options.bucket.as_ref().map(LocalObjectStore::new);
    let reports = run_jobs(&args.inputs, &schema, &options, store.as_ref())?;
    for report in &reports {
        debug!(
            "Wrote {} row(s) to {:?}",
            report.rows_written, report.output
        );
    }
    Ok(())
}

/// Runs independent jobs concurrently. Fails if any job failed.
pub fn run_jobs(
    inputs: &[PathBuf],
    schema: &Schema,
    options: &ConvertOptions,
    store: Option<&LocalObjectStore>,
) -> Result<Vec<JobReport>> {
    let outcomes = thread::scope(|scope| {
        let handles = inputs
            .iter()
            .map(|input| {
                let mut job = ConvertJob::new(input, schema, options);
                if let Some(store) = store {
                    job = job.with_retriever(store);
                }
                scope.spawn(move || job.run())
            })
            .collect::<Vec<_>>();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("Conversion thread panicked")))
            })
            .collect::<Vec<_>>()
    });

    let mut reports = Vec::with_capacity(outcomes.len());
    let mut failures = Vec::new();
    for (input, outcome) in inputs.iter().zip(outcomes) {
        match outcome {
            Ok(report) => reports.push(report),
            Err(err) => failures.push((input, err)),
        }
    }
    match failures.len() {
        0 => Ok(reports),
        1 => Err(failures.remove(0).1),
        count => {
            for (input, err) in &failures {
                error!("{input:?}: {err:#}");
            }
            bail!("{count} of {} conversion job(s) failed", inputs.len())
        }
    }
}

/// True when the error chain carries an empty-input failure.
pub fn is_empty_input(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<ConvertError>(),
        Some(ConvertError::EmptyInput { .. })
    )
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!("Removed {path:?}");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("Removing {path:?}")),
    }
}

fn remove_input(path: &Path) -> Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
    .with_context(|| format!("Removing input {path:?}"))
}
