//! CSV appending consumer
//!
//! Writes one CSV row per unit. Columns come from an explicit selection or,
//! by default, from the sorted keys of the first delivered unit; the header
//! row is written once per file. The column set is locked at the first write
//! and reused for the rest of the consumer's life, so appended runs line up.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use csv::WriterBuilder;
use flow_engine::{
    Consumer, Context, ExecMode, FlowError, FlowResult, Node, NodeCore, BATCH_LEN_KEY,
};
use serde_json::Value;

/// Consumer appending units as CSV rows
pub struct CsvAppenderConsumer {
    core: NodeCore,
    path: PathBuf,
    columns: Option<Vec<String>>,
    append: bool,
    index: bool,
    active: Option<Vec<String>>,
    needs_header: bool,
    rows: u64,
    writer: Option<csv::Writer<File>>,
}

impl CsvAppenderConsumer {
    /// Name of the optional running index column
    pub const INDEX_COLUMN: &'static str = "index";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            core: NodeCore::for_type::<Self>(ExecMode::Batch),
            path: path.into(),
            columns: None,
            append: true,
            index: false,
            active: None,
            needs_header: false,
            rows: 0,
            writer: None,
        }
    }

    /// Write only these columns, in this order
    pub fn with_columns(mut self, columns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.columns = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Start the file over on open instead of appending
    pub fn truncating(mut self) -> Self {
        self.append = false;
        self
    }

    /// Prepend a running row index column
    pub fn with_index_column(mut self) -> Self {
        self.index = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn rows_written(&self) -> u64 {
        self.rows
    }

    fn cell(value: Option<&Value>) -> String {
        match value {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(text)) => text.clone(),
            Some(other) => other.to_string(),
        }
    }

    fn write_record(&mut self, record: &[String]) -> FlowResult<()> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| FlowError::config("csv consumer is not open"))?;
        writer
            .write_record(record)
            .map_err(|err| FlowError::task(format!("csv write failed: {err}")))
    }

    /// Resolve the active column set, writing a header whenever the file
    /// starts empty. The set locks at first resolution and never changes.
    fn columns_for(&mut self, unit: &Context) -> FlowResult<Vec<String>> {
        let resolved: Vec<String> = match (&self.active, &self.columns) {
            (Some(active), _) => active.clone(),
            (None, Some(configured)) => configured.clone(),
            (None, None) => unit
                .sorted_keys()
                .into_iter()
                .filter(|key| *key != BATCH_LEN_KEY)
                .map(str::to_string)
                .collect(),
        };
        if self.needs_header {
            let mut header = Vec::with_capacity(resolved.len() + 1);
            if self.index {
                header.push(Self::INDEX_COLUMN.to_string());
            }
            header.extend(resolved.iter().cloned());
            self.write_record(&header)?;
            self.needs_header = false;
        }
        if self.active.is_none() {
            self.active = Some(resolved.clone());
        }
        Ok(resolved)
    }
}

#[async_trait]
impl Node for CsvAppenderConsumer {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    async fn open(&mut self) -> FlowResult<()> {
        let mut options = OpenOptions::new();
        options.create(true).write(true);
        if self.append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options.open(&self.path)?;
        self.needs_header = file.metadata()?.len() == 0;
        if self.needs_header {
            // fresh file, fresh row numbering
            self.rows = 0;
        }
        self.writer = Some(WriterBuilder::new().has_headers(false).from_writer(file));
        log::debug!("'{}' writing {}", self.core.name(), self.path.display());
        Ok(())
    }

    async fn close(&mut self) -> FlowResult<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

#[async_trait]
impl Consumer for CsvAppenderConsumer {
    async fn consume(&mut self, unit: &Context) -> FlowResult<()> {
        let columns = self.columns_for(unit)?;
        let mut row = Vec::with_capacity(columns.len() + 1);
        if self.index {
            row.push(self.rows.to_string());
        }
        for column in &columns {
            row.push(Self::cell(unit.get(column)));
        }
        self.write_record(&row)?;
        self.rows += 1;
        self.core.advance(1);
        Ok(())
    }

    async fn consume_batch(&mut self, batch: &Context) -> FlowResult<()> {
        let columns = self.columns_for(batch)?;
        for position in 0..batch.unit_count() {
            let mut row = Vec::with_capacity(columns.len() + 1);
            if self.index {
                row.push(self.rows.to_string());
            }
            for column in &columns {
                row.push(Self::cell(batch.unit_value(column, position)));
            }
            self.write_record(&row)?;
            self.rows += 1;
        }
        self.core.advance(batch.unit_count() as u64);
        Ok(())
    }
}
