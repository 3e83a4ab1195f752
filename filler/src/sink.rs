// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Where the converted data go.

The engine talks to its output through `OutputSink`, which knows nothing
about schemas: tables are assumed to already exist with the standard
MeasurementSet columns. `MemorySink` keeps everything in memory, which is
what the tests and dry runs use. The casacore-backed sink lives in the
`casa` module.

 */

use mirfill_core::{Array2, Array3, Complex};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

/// The tables of a MeasurementSet that the filler writes.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum MsTable {
    Main,
    Antenna,
    DataDescription,
    Doppler,
    Feed,
    Field,
    History,
    Observation,
    Polarization,
    Source,
    SpectralWindow,
    SysCal,
}

impl MsTable {
    /// The subtable's name, which is also its directory inside the MS. The
    /// main table has none.
    pub fn name(self) -> &'static str {
        match self {
            MsTable::Main => "",
            MsTable::Antenna => "ANTENNA",
            MsTable::DataDescription => "DATA_DESCRIPTION",
            MsTable::Doppler => "DOPPLER",
            MsTable::Feed => "FEED",
            MsTable::Field => "FIELD",
            MsTable::History => "HISTORY",
            MsTable::Observation => "OBSERVATION",
            MsTable::Polarization => "POLARIZATION",
            MsTable::Source => "SOURCE",
            MsTable::SpectralWindow => "SPECTRAL_WINDOW",
            MsTable::SysCal => "SYSCAL",
        }
    }
}

impl std::fmt::Display for MsTable {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            MsTable::Main => f.write_str("main table"),
            t => f.write_str(t.name()),
        }
    }
}

/// A value to store in one table cell or keyword.
#[derive(Clone, Debug, PartialEq)]
pub enum CellValue {
    Bool(bool),
    Int(i32),
    Double(f64),
    String(String),
    BoolVec(Vec<bool>),
    IntVec(Vec<i32>),
    FloatVec(Vec<f32>),
    DoubleVec(Vec<f64>),
    StringVec(Vec<String>),
    DoubleMatrix(Array2<f64>),
    IntMatrix(Array2<i32>),
    BoolMatrix(Array2<bool>),
    ComplexMatrix(Array2<Complex<f32>>),
    BoolCube(Array3<bool>),
}

macro_rules! impl_cell_value_from {
    ($ty:ty, $variant:ident) => {
        impl From<$ty> for CellValue {
            fn from(v: $ty) -> Self {
                CellValue::$variant(v)
            }
        }
    };
}

impl_cell_value_from!(bool, Bool);
impl_cell_value_from!(i32, Int);
impl_cell_value_from!(f64, Double);
impl_cell_value_from!(String, String);
impl_cell_value_from!(Vec<bool>, BoolVec);
impl_cell_value_from!(Vec<i32>, IntVec);
impl_cell_value_from!(Vec<f32>, FloatVec);
impl_cell_value_from!(Vec<f64>, DoubleVec);
impl_cell_value_from!(Vec<String>, StringVec);
impl_cell_value_from!(Array2<f64>, DoubleMatrix);
impl_cell_value_from!(Array2<i32>, IntMatrix);
impl_cell_value_from!(Array2<bool>, BoolMatrix);
impl_cell_value_from!(Array2<Complex<f32>>, ComplexMatrix);
impl_cell_value_from!(Array3<bool>, BoolCube);

impl From<&str> for CellValue {
    fn from(v: &str) -> Self {
        CellValue::String(v.to_owned())
    }
}

impl CellValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            CellValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            CellValue::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            CellValue::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            CellValue::String(s) => Some(s),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("the output has no {0}")]
    MissingTable(MsTable),

    #[error("row {row} of the {table} does not exist (it has {n_rows})")]
    RowOutOfRange { table: MsTable, row: u64, n_rows: u64 },

    #[error("output table error: {0}")]
    Backend(String),
}

pub trait OutputSink {
    /// Add a row to *table*, returning its index.
    fn append_row(&mut self, table: MsTable) -> Result<u64, SinkError>;

    fn put_column(
        &mut self,
        table: MsTable,
        row: u64,
        column: &str,
        value: CellValue,
    ) -> Result<(), SinkError>;

    fn put_column_keyword(
        &mut self,
        table: MsTable,
        column: &str,
        keyword: &str,
        value: CellValue,
    ) -> Result<(), SinkError>;

    /// Whether a cell that is never written reads back as the value most
    /// recently written to the cell above it. Only then can a column that
    /// rarely changes be written only when it does.
    fn retains_unwritten_cells(&self, _table: MsTable, _column: &str) -> bool {
        false
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

#[derive(Clone, Debug, Default)]
struct MemoryTable {
    n_rows: u64,
    cells: BTreeMap<String, BTreeMap<u64, CellValue>>,
    keywords: BTreeMap<(String, String), CellValue>,
    writes: HashMap<String, usize>,
}

/// A sink that keeps every table in memory.
///
/// It stores columns incrementally: reading a cell that was never written
/// yields the closest written cell above it.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    tables: HashMap<MsTable, MemoryTable>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_rows(&self, table: MsTable) -> u64 {
        self.tables.get(&table).map_or(0, |t| t.n_rows)
    }

    /// The value of a cell as a reader would see it.
    pub fn cell(&self, table: MsTable, column: &str, row: u64) -> Option<&CellValue> {
        let t = self.tables.get(&table)?;

        if row >= t.n_rows {
            return None;
        }

        t.cells
            .get(column)?
            .range(..=row)
            .next_back()
            .map(|(_, v)| v)
    }

    /// The value written to exactly this cell, if any.
    pub fn written_cell(&self, table: MsTable, column: &str, row: u64) -> Option<&CellValue> {
        self.tables.get(&table)?.cells.get(column)?.get(&row)
    }

    /// How many times cells of a column have been written.
    pub fn write_count(&self, table: MsTable, column: &str) -> usize {
        self.tables
            .get(&table)
            .and_then(|t| t.writes.get(column))
            .copied()
            .unwrap_or(0)
    }

    pub fn column_keyword(&self, table: MsTable, column: &str, keyword: &str) -> Option<&CellValue> {
        self.tables
            .get(&table)?
            .keywords
            .get(&(column.to_owned(), keyword.to_owned()))
    }
}

impl OutputSink for MemorySink {
    fn append_row(&mut self, table: MsTable) -> Result<u64, SinkError> {
        let t = self.tables.entry(table).or_default();
        t.n_rows += 1;
        Ok(t.n_rows - 1)
    }

    fn put_column(
        &mut self,
        table: MsTable,
        row: u64,
        column: &str,
        value: CellValue,
    ) -> Result<(), SinkError> {
        let t = self.tables.entry(table).or_default();

        if row >= t.n_rows {
            return Err(SinkError::RowOutOfRange {
                table,
                row,
                n_rows: t.n_rows,
            });
        }

        t.cells.entry(column.to_owned()).or_default().insert(row, value);
        *t.writes.entry(column.to_owned()).or_default() += 1;
        Ok(())
    }

    fn put_column_keyword(
        &mut self,
        table: MsTable,
        column: &str,
        keyword: &str,
        value: CellValue,
    ) -> Result<(), SinkError> {
        self.tables
            .entry(table)
            .or_default()
            .keywords
            .insert((column.to_owned(), keyword.to_owned()), value);
        Ok(())
    }

    fn retains_unwritten_cells(&self, _table: MsTable, _column: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_cells_carry_forward() {
        let mut sink = MemorySink::new();

        for _ in 0..4 {
            sink.append_row(MsTable::Main).unwrap();
        }

        sink.put_column(MsTable::Main, 0, "FLAG_ROW", false.into()).unwrap();
        sink.put_column(MsTable::Main, 2, "FLAG_ROW", true.into()).unwrap();

        let flag_row: Vec<_> = (0..4)
            .map(|r| sink.cell(MsTable::Main, "FLAG_ROW", r).and_then(|v| v.as_bool()))
            .collect();
        assert_eq!(flag_row, vec![Some(false), Some(false), Some(true), Some(true)]);

        assert!(sink.written_cell(MsTable::Main, "FLAG_ROW", 1).is_none());
        assert!(sink.cell(MsTable::Main, "FLAG_ROW", 4).is_none());
        assert_eq!(sink.write_count(MsTable::Main, "FLAG_ROW"), 2);
        assert_eq!(sink.write_count(MsTable::Main, "DATA"), 0);
    }

    #[test]
    fn rows_must_exist() {
        let mut sink = MemorySink::new();
        assert!(matches!(
            sink.put_column(MsTable::Field, 0, "NAME", "x".into()),
            Err(SinkError::RowOutOfRange { row: 0, n_rows: 0, .. })
        ));

        assert_eq!(sink.append_row(MsTable::Field).unwrap(), 0);
        assert_eq!(sink.append_row(MsTable::Field).unwrap(), 1);
        assert_eq!(sink.n_rows(MsTable::Field), 2);
        assert_eq!(sink.n_rows(MsTable::Source), 0);
    }

    #[test]
    fn keywords() {
        let mut sink = MemorySink::new();
        sink.put_column_keyword(MsTable::Main, "TIME", "MEASURE_REFERENCE", "TAI".into())
            .unwrap();
        assert_eq!(
            sink.column_keyword(MsTable::Main, "TIME", "MEASURE_REFERENCE")
                .and_then(|v| v.as_str()),
            Some("TAI")
        );
        assert_eq!(MsTable::SpectralWindow.to_string(), "SPECTRAL_WINDOW");
        assert_eq!(MsTable::Main.to_string(), "main table");
    }
}
