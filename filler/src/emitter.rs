// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Turning uv records into main-table rows.

MIRIAD stores one polarization per record, while a MeasurementSet row holds
all four correlations of one baseline, time, and spectral window. Records
are therefore gathered into a polarization group until the expected number
of polarizations has arrived. The complete group is then cut into one row
per retained window.

 */

use mirfill_core::{Array2, Array3, Complex};

use crate::archive::VisibilityRecord;
use crate::config::FillerConfig;
use crate::error::{FillerError, Result};
use crate::polarization::{canonical_index, CANONICAL_ORDER};
use crate::sink::{CellValue, MsTable, OutputSink};
use crate::site::METRES_PER_NS;
use crate::tracker::StreamState;

const N_CORR: usize = CANONICAL_ORDER.len();

/// The flag categories of FLAG_CATEGORY; FLAG is stored as the first.
pub const FLAG_CATEGORIES: [&str; 3] = ["FLAG_CMD", "ORIGINAL", "USER"];

/// The MJD of Julian date zero, in days.
const MJD_OFFSET: f64 = 2400000.5;

const SECONDS_PER_DAY: f64 = 86400.;

/// Convert a Julian date to MJD seconds, the MS time scale.
pub fn jd_to_mjd_seconds(jd: f64) -> f64 {
    (jd - MJD_OFFSET) * SECONDS_PER_DAY
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GroupState {
    /// More polarizations are expected.
    Accumulating,

    /// Every expected polarization has arrived.
    Ready,
}

/// The polarizations of one baseline and time.
#[derive(Clone, Debug)]
pub struct PolarizationGroup {
    remaining: usize,

    /// Indexed by (channel, correlation).
    data: Array2<Complex<f32>>,

    /// True means flagged, as in the MS.
    flags: Array2<bool>,

    uvw: [f64; 3],
    time: f64,
    ant1: usize,
    ant2: usize,
}

impl Default for PolarizationGroup {
    fn default() -> Self {
        PolarizationGroup {
            remaining: 0,
            data: Array2::zeros((0, N_CORR)),
            flags: Array2::from_elem((0, N_CORR), true),
            uvw: [0.; 3],
            time: 0.,
            ant1: 0,
            ant2: 0,
        }
    }
}

impl PolarizationGroup {
    /// Whether a new group has to be started before the next record.
    pub fn is_idle(&self) -> bool {
        self.remaining == 0
    }

    /// Start a group that expects *n_pols* records, beginning with
    /// *first*. The group's time, baseline, and UVW are those of its first
    /// record. Correlations that never arrive stay flagged.
    pub fn begin(&mut self, first: &VisibilityRecord, n_pols: usize) {
        let n_channels = first.n_channels();
        self.remaining = n_pols;
        self.uvw = first.uvw;
        self.time = first.time;
        self.ant1 = first.ant1;
        self.ant2 = first.ant2;

        if self.data.nrows() != n_channels {
            self.data = Array2::zeros((n_channels, N_CORR));
            self.flags = Array2::from_elem((n_channels, N_CORR), true);
        } else {
            self.data.fill(Complex::new(0., 0.));
            self.flags.fill(true);
        }
    }

    /// Store one polarization's samples in correlation *slot*.
    ///
    /// MIRIAD's baseline convention is the reverse of the MS one, so the
    /// visibilities are conjugated.
    pub fn accumulate(&mut self, record: &VisibilityRecord, slot: usize) -> GroupState {
        for (chan, (v, good)) in record.samples().enumerate() {
            self.data[(chan, slot)] = v.conj();
            self.flags[(chan, slot)] = !good;
        }

        self.remaining = self.remaining.saturating_sub(1);

        if self.remaining == 0 {
            GroupState::Ready
        } else {
            GroupState::Accumulating
        }
    }

    pub fn all_flagged(&self) -> bool {
        self.flags.iter().all(|f| *f)
    }
}

/// Counters reported at the end of a run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EmitterStats {
    pub records: u64,
    pub rows: u64,
    pub groups_discarded: u64,
    pub zero_tsys_rows: u64,

    /// The first and last row times, MJD seconds.
    pub first_time: Option<f64>,
    pub last_time: Option<f64>,
}

#[derive(Clone, Debug)]
pub struct RowEmitter {
    group: PolarizationGroup,
    apply_tsys: bool,
    scan_number: i32,
    last_field: Option<usize>,
    last_flag_row: Option<bool>,
    categories_written: bool,
    stats: EmitterStats,
}

impl RowEmitter {
    pub fn new(config: &FillerConfig) -> Self {
        RowEmitter {
            group: PolarizationGroup::default(),
            apply_tsys: config.apply_tsys,
            scan_number: config.scan_number_base,
            last_field: None,
            last_flag_row: None,
            categories_written: false,
            stats: EmitterStats::default(),
        }
    }

    pub fn stats(&self) -> &EmitterStats {
        &self.stats
    }

    /// Take in one record, writing rows if it completes a group.
    ///
    /// *n_pols* is the number of polarizations per group, used when this
    /// record starts a new group.
    pub fn process(
        &mut self,
        record_index: u64,
        record: &VisibilityRecord,
        n_pols: usize,
        state: &mut StreamState,
        sink: &mut dyn OutputSink,
    ) -> Result<()> {
        if record.corr.len() != state.n_chan_fine || record.wcorr.len() != state.n_chan_wide {
            return Err(FillerError::ChannelCountChanged {
                record: record_index,
                expected: state.n_chan_fine + state.n_chan_wide,
                found: record.n_channels(),
            });
        }

        state.arrays.note_antennas(record.ant1, record.ant2)?;
        self.stats.records += 1;

        if self.group.is_idle() {
            if n_pols == 0 || n_pols > N_CORR {
                return Err(FillerError::malformed(
                    "npol",
                    format!("{n_pols} polarizations per record group; expected 1 to {N_CORR}"),
                ));
            }

            self.group.begin(record, n_pols);
        }

        let slot = canonical_index(record.pol)?;

        if self.group.accumulate(record, slot) == GroupState::Ready {
            if self.group.all_flagged() {
                self.stats.groups_discarded += 1;
            } else {
                self.write_rows(state, sink)?;
            }
        }

        Ok(())
    }

    fn weight(&mut self, state: &StreamState) -> f32 {
        if !self.apply_tsys {
            return 1.;
        }

        match (state.tsys_of(self.group.ant1), state.tsys_of(self.group.ant2)) {
            (Some(t1), Some(t2)) if t1 != 0. && t2 != 0. => (1. / (t1 * t2).sqrt()) as f32,
            _ => {
                self.stats.zero_tsys_rows += 1;
                0.
            }
        }
    }

    fn write_rows(&mut self, state: &StreamState, sink: &mut dyn OutputSink) -> Result<()> {
        let time = jd_to_mjd_seconds(self.group.time);
        let uvw: Vec<f64> = self.group.uvw.iter().map(|c| -c * METRES_PER_NS).collect();
        let field = state.current_field.unwrap_or(0);
        let array_id = state.arrays.current_id() as i32;
        let suppress_flag_row = sink.retains_unwritten_cells(MsTable::Main, "FLAG_ROW");

        if self.last_field.is_some_and(|f| f != field) {
            self.scan_number += 1;
        }

        self.last_field = Some(field);

        if !self.categories_written {
            let names = FLAG_CATEGORIES.iter().map(|s| s.to_string()).collect::<Vec<_>>();
            sink.put_column_keyword(MsTable::Main, "FLAG_CATEGORY", "CATEGORY", names.into())?;
            self.categories_written = true;
        }

        for (dd_id, window) in state.layout.retained().enumerate() {
            let weight = self.weight(state);
            let range = window.channel_range();
            let data = self.group.data.slice(ndarray::s![range.clone(), ..]).to_owned();
            let flags = self.group.flags.slice(ndarray::s![range, ..]).to_owned();
            let flag_row = flags.iter().all(|f| *f);

            let mut flag_category = Array3::from_elem((FLAG_CATEGORIES.len(), flags.nrows(), N_CORR), false);
            flag_category
                .index_axis_mut(ndarray::Axis(0), 0)
                .assign(&flags);

            let row = sink.append_row(MsTable::Main)?;
            let mut put = |column: &str, value: CellValue| sink.put_column(MsTable::Main, row, column, value);

            put("UVW", uvw.clone().into())?;
            put("TIME", time.into())?;
            put("TIME_CENTROID", time.into())?;
            put("INTERVAL", state.inttime.into())?;
            put("EXPOSURE", state.inttime.into())?;
            put("ANTENNA1", (self.group.ant1 as i32 - 1).into())?;
            put("ANTENNA2", (self.group.ant2 as i32 - 1).into())?;
            put("FEED1", 0.into())?;
            put("FEED2", 0.into())?;
            put("FIELD_ID", (field as i32).into())?;
            put("ARRAY_ID", array_id.into())?;
            put("DATA_DESC_ID", (dd_id as i32).into())?;
            put("SCAN_NUMBER", self.scan_number.into())?;
            put("OBSERVATION_ID", 0.into())?;
            put("PROCESSOR_ID", (-1).into())?;
            put("STATE_ID", (-1).into())?;
            put("DATA", data.into())?;
            put("FLAG", flags.into())?;
            put("FLAG_CATEGORY", flag_category.into())?;
            put("WEIGHT", vec![weight; N_CORR].into())?;
            put("SIGMA", vec![1f32; N_CORR].into())?;

            if !suppress_flag_row || self.last_flag_row != Some(flag_row) {
                put("FLAG_ROW", flag_row.into())?;
                self.last_flag_row = Some(flag_row);
            }

            self.stats.rows += 1;
            self.stats.first_time.get_or_insert(time);
            self.stats.last_time = Some(time);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::test_common::{layout_updates, record, ScriptedArchive};
    use crate::tracker::{layout_from_archive, VariableTracker};
    use approx::assert_abs_diff_eq;
    use mirfill_core::notify::BufferingNotificationBackend;
    use mirfill_miriad::AnyMiriadValue;

    fn state_for(n_fine: usize, n_wide: usize, config: &FillerConfig) -> StreamState {
        let mut a = ScriptedArchive::new();

        for (name, value) in layout_updates(n_fine, n_wide) {
            a.set(name, value);
        }

        a.set("source", AnyMiriadValue::Text("src".to_owned()));
        let layout = layout_from_archive(&a, n_fine, n_wide, config).unwrap();
        let mut state = StreamState::new(config, layout, n_fine, n_wide);
        let mut tracker = VariableTracker::new();
        tracker.register_watched();
        tracker
            .refresh(0, &a, &mut state, config, &mut BufferingNotificationBackend::new())
            .unwrap();
        state
    }

    #[test]
    fn group_flushes_on_last_polarization() {
        let config = FillerConfig::default();
        let mut state = state_for(4, 0, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        em.process(0, &record(1, 2, 2455000.5, -5, 4, 0), 2, &mut state, &mut sink).unwrap();
        assert_eq!(sink.n_rows(MsTable::Main), 0);

        em.process(1, &record(1, 2, 2455000.5, -6, 4, 0), 2, &mut state, &mut sink).unwrap();
        assert_eq!(sink.n_rows(MsTable::Main), 1);
        assert_eq!(em.stats().rows, 1);

        let data = match sink.cell(MsTable::Main, "DATA", 0) {
            Some(CellValue::ComplexMatrix(d)) => d.clone(),
            other => panic!("unexpected DATA cell {other:?}"),
        };

        assert_eq!(data.dim(), (4, 4));
        // XX in slot 0, YY in slot 3, conjugated
        assert_eq!(data[(2, 0)], Complex::new(2., 5.));
        assert_eq!(data[(2, 3)], Complex::new(2., 6.));

        let flags = match sink.cell(MsTable::Main, "FLAG", 0) {
            Some(CellValue::BoolMatrix(f)) => f.clone(),
            other => panic!("unexpected FLAG cell {other:?}"),
        };

        // XY and YX never arrived
        assert!(!flags[(0, 0)] && flags[(0, 1)] && flags[(0, 2)] && !flags[(0, 3)]);

        assert_eq!(sink.cell(MsTable::Main, "ANTENNA2", 0).and_then(|v| v.as_int()), Some(1));
        assert_eq!(
            sink.cell(MsTable::Main, "TIME", 0).and_then(|v| v.as_double()),
            Some(55000. * 86400.)
        );

        match sink.cell(MsTable::Main, "UVW", 0) {
            Some(CellValue::DoubleVec(uvw)) => assert_abs_diff_eq!(uvw[0], -10. * 0.299792458, epsilon = 1e-9),
            other => panic!("unexpected UVW cell {other:?}"),
        }
    }

    #[test]
    fn group_takes_metadata_from_first_record() {
        let config = FillerConfig::default();
        let mut state = state_for(4, 0, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        let mut later = record(1, 3, 2455000.6, -6, 4, 0);
        later.uvw = [99., 99., 99.];

        em.process(0, &record(1, 2, 2455000.5, -5, 4, 0), 2, &mut state, &mut sink).unwrap();
        em.process(1, &later, 2, &mut state, &mut sink).unwrap();
        assert_eq!(sink.n_rows(MsTable::Main), 1);

        assert_eq!(
            sink.cell(MsTable::Main, "TIME", 0).and_then(|v| v.as_double()),
            Some(55000. * 86400.)
        );
        assert_eq!(sink.cell(MsTable::Main, "ANTENNA2", 0).and_then(|v| v.as_int()), Some(1));

        match sink.cell(MsTable::Main, "UVW", 0) {
            Some(CellValue::DoubleVec(uvw)) => assert_abs_diff_eq!(uvw[0], -10. * 0.299792458, epsilon = 1e-9),
            other => panic!("unexpected UVW cell {other:?}"),
        }
    }

    #[test]
    fn fully_flagged_groups_are_dropped() {
        let config = FillerConfig::default();
        let mut state = state_for(4, 0, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        for pol in [-5, -6] {
            let mut rec = record(1, 2, 2455000.5, pol, 4, 0);
            rec.flags.fill(false);
            em.process(0, &rec, 2, &mut state, &mut sink).unwrap();
        }

        assert_eq!(sink.n_rows(MsTable::Main), 0);
        assert_eq!(em.stats().groups_discarded, 1);
    }

    #[test]
    fn one_row_per_retained_window() {
        let config = FillerConfig::default();
        let mut state = state_for(4, 2, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        em.process(0, &record(1, 2, 2455000.5, -5, 4, 2), 1, &mut state, &mut sink).unwrap();
        assert_eq!(sink.n_rows(MsTable::Main), 3);

        let dd: Vec<_> = (0..3)
            .map(|r| sink.cell(MsTable::Main, "DATA_DESC_ID", r).and_then(|v| v.as_int()))
            .collect();
        assert_eq!(dd, vec![Some(0), Some(1), Some(2)]);

        match sink.cell(MsTable::Main, "DATA", 2) {
            Some(CellValue::ComplexMatrix(d)) => {
                assert_eq!(d.dim(), (1, 4));
                assert_eq!(d[(0, 0)].re, 5.);
            }
            other => panic!("unexpected DATA cell {other:?}"),
        }

        match sink.cell(MsTable::Main, "FLAG_CATEGORY", 2) {
            Some(CellValue::BoolCube(c)) => {
                assert_eq!(c.dim(), (3, 1, 4));
                assert!(c[(0, 0, 1)]);
                assert!(!c[(1, 0, 1)]);
            }
            other => panic!("unexpected FLAG_CATEGORY cell {other:?}"),
        }

        let mut config = FillerConfig::default();
        config.keep_wide_windows = false;
        let mut state = state_for(4, 2, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);
        em.process(0, &record(1, 2, 2455000.5, -5, 4, 2), 1, &mut state, &mut sink).unwrap();
        assert_eq!(sink.n_rows(MsTable::Main), 1);
    }

    #[test]
    fn flag_row_written_only_on_change() {
        let config = FillerConfig::default();
        let mut state = state_for(2, 1, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        // the spectral channels are all bad but the wideband one is good,
        // so the group survives with one fully flagged row
        let mut mixed = record(1, 3, 2455000.5, -5, 2, 1);
        mixed.flags = vec![false, false];

        em.process(0, &record(1, 2, 2455000.5, -5, 2, 1), 1, &mut state, &mut sink).unwrap();
        em.process(1, &mixed, 1, &mut state, &mut sink).unwrap();

        assert_eq!(sink.n_rows(MsTable::Main), 4);
        assert_eq!(sink.write_count(MsTable::Main, "DATA"), 4);
        assert_eq!(sink.write_count(MsTable::Main, "FLAG_ROW"), 3);
        assert!(sink.written_cell(MsTable::Main, "FLAG_ROW", 1).is_none());

        let flag_row: Vec<_> = (0..4)
            .map(|r| sink.cell(MsTable::Main, "FLAG_ROW", r).and_then(|v| v.as_bool()))
            .collect();
        assert_eq!(flag_row, vec![Some(false), Some(false), Some(true), Some(false)]);

        assert_eq!(
            sink.column_keyword(MsTable::Main, "FLAG_CATEGORY", "CATEGORY"),
            Some(&CellValue::StringVec(vec![
                "FLAG_CMD".to_owned(),
                "ORIGINAL".to_owned(),
                "USER".to_owned()
            ]))
        );
    }

    #[test]
    fn tsys_weights() {
        let mut config = FillerConfig::default();
        config.apply_tsys = true;
        let mut state = state_for(2, 0, &config);
        state.tsys = vec![100., 400., 0.];
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        em.process(0, &record(1, 2, 2455000.5, -5, 2, 0), 1, &mut state, &mut sink).unwrap();
        em.process(1, &record(1, 3, 2455000.5, -5, 2, 0), 1, &mut state, &mut sink).unwrap();
        em.process(2, &record(1, 4, 2455000.5, -5, 2, 0), 1, &mut state, &mut sink).unwrap();

        let weights: Vec<_> = (0..3)
            .map(|r| match sink.cell(MsTable::Main, "WEIGHT", r) {
                Some(CellValue::FloatVec(w)) => w[0],
                other => panic!("unexpected WEIGHT cell {other:?}"),
            })
            .collect();

        assert_abs_diff_eq!(weights[0], 0.005, epsilon = 1e-9);
        assert_eq!(weights[1], 0.);
        assert_eq!(weights[2], 0.);
        assert_eq!(em.stats().zero_tsys_rows, 2);
        assert_eq!(em.stats().rows, 3);
    }

    #[test]
    fn scans_advance_with_fields() {
        let config = FillerConfig {
            scan_number_base: 10,
            ..Default::default()
        };
        let mut state = state_for(2, 0, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        em.process(0, &record(1, 2, 2455000.5, -5, 2, 0), 1, &mut state, &mut sink).unwrap();
        em.process(1, &record(1, 2, 2455000.6, -5, 2, 0), 1, &mut state, &mut sink).unwrap();
        let src = state.current_source.unwrap();
        state.current_field = Some(state.directory.resolve_field((1e-4, 0.), src, 0., 0.).unwrap());
        em.process(2, &record(1, 2, 2455000.7, -5, 2, 0), 1, &mut state, &mut sink).unwrap();

        let scans: Vec<_> = (0..3)
            .map(|r| sink.cell(MsTable::Main, "SCAN_NUMBER", r).and_then(|v| v.as_int()))
            .collect();
        assert_eq!(scans, vec![Some(10), Some(10), Some(11)]);
    }

    #[test]
    fn integrity_and_polarization_errors() {
        let config = FillerConfig::default();
        let mut state = state_for(4, 0, &config);
        let mut sink = MemorySink::new();
        let mut em = RowEmitter::new(&config);

        assert!(matches!(
            em.process(7, &record(1, 2, 2455000.5, -5, 3, 0), 1, &mut state, &mut sink),
            Err(FillerError::ChannelCountChanged { record: 7, expected: 4, found: 3 })
        ));

        assert!(matches!(
            em.process(0, &record(1, 2, 2455000.5, 1, 4, 0), 1, &mut state, &mut sink),
            Err(FillerError::UnknownPolarization(1))
        ));

        let mut em = RowEmitter::new(&config);
        assert!(matches!(
            em.process(0, &record(1, 2, 2455000.5, -5, 4, 0), 5, &mut state, &mut sink),
            Err(FillerError::MalformedVariable { .. })
        ));
    }
}
