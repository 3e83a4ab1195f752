// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Writing to a real MeasurementSet through casacore.
//!
//! The MS and its subtables must already exist with the standard columns.
//! Subtables are opened the first time they are written. Array cells are
//! handed over as-is, so our `ndarray` must be the one casatables uses.

use rubbl_casatables::{Table, TableOpenMode};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::sink::{CellValue, MsTable, OutputSink, SinkError};

fn backend<E: std::fmt::Display>(context: &str) -> impl FnOnce(E) -> SinkError + '_ {
    move |e| SinkError::Backend(format!("{context}: {e}"))
}

pub struct CasaSink {
    path: PathBuf,
    tables: HashMap<MsTable, Table>,
}

impl CasaSink {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SinkError> {
        let path = path.as_ref().to_owned();
        let main = Table::open(&path, TableOpenMode::ReadWrite)
            .map_err(backend(&format!("cannot open {}", path.display())))?;

        let mut tables = HashMap::new();
        tables.insert(MsTable::Main, main);
        Ok(CasaSink { path, tables })
    }

    fn table(&mut self, which: MsTable) -> Result<&mut Table, SinkError> {
        if !self.tables.contains_key(&which) {
            let sub_path = self.path.join(which.name());

            if !sub_path.exists() {
                return Err(SinkError::MissingTable(which));
            }

            let t = Table::open(&sub_path, TableOpenMode::ReadWrite)
                .map_err(backend(&format!("cannot open {}", sub_path.display())))?;
            self.tables.insert(which, t);
        }

        self.tables.get_mut(&which).ok_or(SinkError::MissingTable(which))
    }
}

impl OutputSink for CasaSink {
    fn append_row(&mut self, table: MsTable) -> Result<u64, SinkError> {
        let t = self.table(table)?;
        let row = t.n_rows();
        t.add_rows(1).map_err(backend("cannot add row"))?;
        Ok(row)
    }

    fn put_column(
        &mut self,
        table: MsTable,
        row: u64,
        column: &str,
        value: CellValue,
    ) -> Result<(), SinkError> {
        let t = self.table(table)?;

        match value {
            CellValue::Bool(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::Int(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::Double(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::String(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::BoolVec(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::IntVec(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::FloatVec(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::DoubleVec(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::StringVec(v) => t.put_cell(column, row, &v).map_err(backend(column)),
            CellValue::DoubleMatrix(a) => t.put_cell(column, row, &a).map_err(backend(column)),
            CellValue::IntMatrix(a) => t.put_cell(column, row, &a).map_err(backend(column)),
            CellValue::BoolMatrix(a) => t.put_cell(column, row, &a).map_err(backend(column)),
            CellValue::ComplexMatrix(a) => t.put_cell(column, row, &a).map_err(backend(column)),
            CellValue::BoolCube(a) => t.put_cell(column, row, &a).map_err(backend(column)),
        }
    }

    fn put_column_keyword(
        &mut self,
        table: MsTable,
        column: &str,
        keyword: &str,
        value: CellValue,
    ) -> Result<(), SinkError> {
        let t = self.table(table)?;
        let mut rec = t
            .get_column_keyword_record(column)
            .map_err(backend(column))?;

        match value {
            CellValue::String(v) => rec.put_field(keyword, &v).map_err(backend(keyword))?,
            CellValue::StringVec(v) => rec.put_field(keyword, &v).map_err(backend(keyword))?,
            CellValue::Double(v) => rec.put_field(keyword, &v).map_err(backend(keyword))?,
            CellValue::DoubleVec(v) => rec.put_field(keyword, &v).map_err(backend(keyword))?,
            CellValue::Int(v) => rec.put_field(keyword, &v).map_err(backend(keyword))?,
            other => {
                return Err(SinkError::Backend(format!(
                    "unsupported keyword value for {column}::{keyword}: {other:?}"
                )))
            }
        }

        t.put_column_keywords(column, &mut rec).map_err(backend(column))
    }

    // casacore's incremental storage manager is not what the standard MS
    // columns use, so every cell must be written.
    fn retains_unwritten_cells(&self, _table: MsTable, _column: &str) -> bool {
        false
    }
}
