use std::fmt;

/// Job counters. Every counter only ever grows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    rows_seen: u64,
    input_rows: u64,
    duplicated_rows: u64,
    output_rows: u64,
    updated_rows: u64,
}

impl Statistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_rows_seen(&mut self) {
        self.rows_seen += 1;
    }

    pub fn increment_input_rows(&mut self) {
        self.input_rows += 1;
    }

    pub fn increment_duplicated_rows(&mut self) {
        self.duplicated_rows += 1;
    }

    pub fn increment_output_rows(&mut self) {
        self.output_rows += 1;
    }

    pub fn increment_updated_rows(&mut self) {
        self.updated_rows += 1;
    }

    /// Data rows read from the input and the prior output, headers excluded.
    pub fn rows_seen(&self) -> u64 {
        self.rows_seen
    }

    /// New rows admitted and written.
    pub fn input_rows(&self) -> u64 {
        self.input_rows
    }

    /// New rows rejected for repeating a key.
    pub fn duplicated_rows(&self) -> u64 {
        self.duplicated_rows
    }

    /// Records read from the prior output file.
    pub fn output_rows(&self) -> u64 {
        self.output_rows
    }

    /// Prior records dropped because new input carried the same key.
    pub fn updated_rows(&self) -> u64 {
        self.updated_rows
    }

    pub fn inserted_rows(&self) -> u64 {
        self.input_rows.saturating_sub(self.updated_rows)
    }

    pub fn delta_rows(&self) -> u64 {
        self.input_rows + self.duplicated_rows
    }

    pub fn final_rows(&self) -> u64 {
        self.output_rows + self.inserted_rows()
    }

    pub fn summary(&self, output_name: &str) -> String {
        format!("[{output_name}] {self}")
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "records: {}, Delta: {}, ( Updated: {}, Inserted: {}, Duplicated: {} ) Final: {}",
            self.output_rows,
            self.delta_rows(),
            self.updated_rows,
            self.inserted_rows(),
            self.duplicated_rows,
            self.final_rows()
        )
    }
}
