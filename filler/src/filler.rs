// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Driving a whole conversion.

A `Filler` makes two passes over its archive. The pre-scan reads the first
record to learn the channel counts, the initial window layout, and the
observation metadata. The main pass then walks every record, refreshing the
derived state whenever a watched variable changes and handing each record
to the row emitter. The subtables are written last.

 */

use mirfill_core::notify::NotificationBackend;
use mirfill_core::{rn_note, rn_severe, rn_warning};

use crate::archive::{ArchiveVariablesExt, VisibilityArchive, VisibilityRecord};
use crate::config::FillerConfig;
use crate::emitter::RowEmitter;
use crate::error::{FillerError, Result};
use crate::sink::OutputSink;
use crate::tables::{write_subtables, ObservationInfo, SubtableInputs};
use crate::tracker::{layout_from_archive, StreamState, VariableTracker};
use crate::window::WindowLayout;

/// Calibration tables that MIRIAD tasks apply on the fly. The filler
/// copies the raw data and ignores them.
const CALIBRATION_ITEMS: &[&str] = &["gains", "bandpass", "leakage"];

/// What a completed conversion produced.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FillSummary {
    pub records: u64,
    pub rows: u64,
    pub groups_discarded: u64,
    pub zero_tsys_rows: u64,
    pub pointings: usize,
    pub fields: usize,
    pub sources: usize,
    pub arrays: usize,
    pub windows: usize,
}

#[derive(Clone, Debug)]
struct Prescan {
    n_chan_fine: usize,
    n_chan_wide: usize,
    layout: WindowLayout,
}

pub struct Filler<A: VisibilityArchive> {
    archive: A,
    config: FillerConfig,
    info: ObservationInfo,
    prescan: Option<Prescan>,
}

impl<A: VisibilityArchive> Filler<A> {
    pub fn new(archive: A, config: FillerConfig) -> Self {
        Filler {
            archive,
            config,
            info: ObservationInfo::default(),
            prescan: None,
        }
    }

    /// Record where the data came from, for the HISTORY table.
    pub fn with_origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.info.origin = origin.into();
        self
    }

    pub fn info(&self) -> &ObservationInfo {
        &self.info
    }

    pub fn into_archive(self) -> A {
        self.archive
    }

    fn text_or_unknown(&self, name: &str) -> Result<String> {
        Ok(self
            .archive
            .text_value(name)?
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "unknown".to_owned()))
    }

    /// Read the first record and the metadata that accompanies it, then
    /// rewind.
    pub fn prescan(&mut self, nb: &mut dyn NotificationBackend) -> Result<()> {
        self.archive.rewind()?;

        let mut record = VisibilityRecord::default();

        if !self.archive.read_record(&mut record)? {
            return Err(FillerError::NoVisibilityData);
        }

        let n_chan_fine = record.corr.len();
        let n_chan_wide = record.wcorr.len();
        let layout = layout_from_archive(&self.archive, n_chan_fine, n_chan_wide, &self.config)?;

        self.info = ObservationInfo {
            telescope: self.text_or_unknown("telescop")?,
            observer: self.text_or_unknown("observer")?,
            project: self.text_or_unknown("project")?,
            epoch: self.archive.f64_value("epoch")?,
            longitude: self.archive.f64_value("longitu")?,
            n_pols: self.archive.count_value("npol")?.unwrap_or(1),
            origin: std::mem::take(&mut self.info.origin),
        };

        rn_note!(
            nb,
            "{} spectral and {} wideband channels per record, in {} windows",
            n_chan_fine,
            n_chan_wide,
            layout.windows().len()
        );

        for item in CALIBRATION_ITEMS {
            if self.archive.has_item(item)? {
                rn_warning!(
                    nb,
                    "the data set has a \"{}\" calibration table; it will not be applied",
                    item
                );
            }
        }

        self.prescan = Some(Prescan {
            n_chan_fine,
            n_chan_wide,
            layout,
        });
        self.archive.rewind()?;
        Ok(())
    }

    /// Convert everything, writing into *sink*.
    ///
    /// If the stream breaks its own structure partway through, the rows
    /// written so far are kept, the subtables are still written to describe
    /// them, and the error is returned.
    pub fn run(
        &mut self,
        sink: &mut dyn OutputSink,
        nb: &mut dyn NotificationBackend,
    ) -> Result<FillSummary> {
        if self.prescan.is_none() {
            self.prescan(nb)?;
        }

        let pre = self.prescan.clone().ok_or(FillerError::NoVisibilityData)?;
        let mut state = StreamState::new(&self.config, pre.layout, pre.n_chan_fine, pre.n_chan_wide);
        let mut emitter = RowEmitter::new(&self.config);

        let outcome = self.main_pass(&mut state, &mut emitter, sink, nb);

        let integrity_error = match outcome {
            Ok(()) => None,
            Err(e) if e.is_stream_integrity() => {
                rn_severe!(nb, "stopping the conversion early: {}", e);
                Some(e)
            }
            Err(e) => return Err(e),
        };

        let history = self.archive.history()?;
        let inputs = SubtableInputs {
            state: &state,
            info: &self.info,
            stats: emitter.stats(),
            history: &history,
            config: &self.config,
        };
        write_subtables(&inputs, sink, nb)?;

        if let Some(e) = integrity_error {
            return Err(e);
        }

        let stats = emitter.stats();
        let summary = FillSummary {
            records: stats.records,
            rows: stats.rows,
            groups_discarded: stats.groups_discarded,
            zero_tsys_rows: stats.zero_tsys_rows,
            pointings: state.n_pointings,
            fields: state.directory.fields().len(),
            sources: state.directory.sources().len(),
            arrays: state.arrays.generations().len(),
            windows: state.layout.n_retained(),
        };

        rn_note!(
            nb,
            "converted {} visibilities into {} rows; {} pointings, {} fields, {} sources, {} array configurations",
            summary.records,
            summary.rows,
            summary.pointings,
            summary.fields,
            summary.sources,
            summary.arrays
        );

        if summary.groups_discarded > 0 {
            rn_note!(nb, "dropped {} fully flagged record groups", summary.groups_discarded);
        }

        if summary.zero_tsys_rows > 0 {
            rn_warning!(
                nb,
                "{} rows had no usable system temperature and were given zero weight",
                summary.zero_tsys_rows
            );
        }

        Ok(summary)
    }

    fn main_pass(
        &mut self,
        state: &mut StreamState,
        emitter: &mut RowEmitter,
        sink: &mut dyn OutputSink,
        nb: &mut dyn NotificationBackend,
    ) -> Result<()> {
        let mut tracker = VariableTracker::new();
        tracker.register_watched();

        let mut record = VisibilityRecord::default();
        let mut index = 0u64;
        let mut n_pols = self.info.n_pols;
        let mut npol_version = None;

        while self.archive.read_record(&mut record)? {
            if index == 0 || tracker.stream_changed(&self.archive) {
                tracker.refresh(index, &self.archive, state, &self.config, nb)?;
            }

            let v = self.archive.variable_version("npol");

            if v != npol_version {
                npol_version = v;
                n_pols = self.archive.count_value("npol")?.unwrap_or(n_pols);
            }

            emitter.process(index, &record, n_pols, state, sink)?;
            index += 1;
        }

        Ok(())
    }
}
