// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Convert small MIRIAD data sets written to disk.

use approx::assert_abs_diff_eq;
use mirfill::{CellValue, Filler, FillerConfig, FillerError, MemorySink, MiriadArchive, MsTable};
use mirfill_core::notify::{BufferingNotificationBackend, NotificationKind};
use mirfill_core::Complex;
use mirfill_miriad::mask::MaskEncoder;
use mirfill_miriad::visdata::{encode_baseline, Encoder, ObsType};
use mirfill_miriad::{DataSet, Type, WriteStream};
use std::io::Write;
use std::path::Path;

const N_FINE: usize = 4;

struct Author {
    enc: Encoder,
    flags: MaskEncoder<WriteStream>,
    wflags: MaskEncoder<WriteStream>,
}

impl Author {
    fn new(ds: &mut DataSet) -> Self {
        Author {
            enc: ds.new_uv(ObsType::Cross).unwrap(),
            flags: MaskEncoder::new(ds.create_large_item("flags", Type::Int32).unwrap()),
            wflags: MaskEncoder::new(ds.create_large_item("wflags", Type::Int32).unwrap()),
        }
    }

    fn header(&mut self) {
        let e = &mut self.enc;
        e.write_scalar("telescop", "CARMA".to_owned()).unwrap();
        e.write_scalar("observer", "someone".to_owned()).unwrap();
        e.write_scalar("epoch", 2000f32).unwrap();
        e.write_scalar("longitu", -2.0637f64).unwrap();
        e.write_scalar("npol", 2i32).unwrap();
        e.write_scalar("nants", 2i32).unwrap();
        e.write("antpos", &[0f64, 10., 0., 20., 0., 30.]).unwrap();
        e.write_scalar("mount", 0i32).unwrap();
        e.write("systemp", &[50f32, 200.]).unwrap();
        e.write_scalar("inttime", 10f32).unwrap();
        e.write_scalar("nspect", 1i32).unwrap();
        e.write("nschan", &[N_FINE as i32]).unwrap();
        e.write("ischan", &[1i32]).unwrap();
        e.write("sdf", &[0.01f64]).unwrap();
        e.write("sfreq", &[230f64]).unwrap();
        e.write("restfreq", &[230.5f64]).unwrap();
        e.write_scalar("nwide", 1i32).unwrap();
        e.write("wfreq", &[230.02f32]).unwrap();
        e.write("wwidth", &[0.04f32]).unwrap();
        e.write_scalar("ra", 3.26f64).unwrap();
        e.write_scalar("dec", 0.04f64).unwrap();
    }

    /// Write one record; sample k of the spectral channels is
    /// `(k + 1, pol)`.
    fn record(&mut self, time: f64, pol: i32, good: &[bool], wide_good: bool) {
        let corr: Vec<Complex<f32>> = (0..N_FINE)
            .map(|k| Complex::new(k as f32 + 1., pol as f32))
            .collect();

        let e = &mut self.enc;
        e.write_scalar("time", time).unwrap();
        e.write_scalar("baseline", encode_baseline(1, 2)).unwrap();
        e.write("coord", &[100f64, -50., 2.]).unwrap();
        e.write_scalar("pol", pol).unwrap();
        e.write("corr", &corr).unwrap();
        e.write("wcorr", &[Complex::new(9f32, 1.)]).unwrap();
        e.finish_record().unwrap();

        self.flags.append_mask(good).unwrap();
        self.wflags.append_mask(&[wide_good]).unwrap();
    }

    fn close(mut self, ds: &mut DataSet) {
        self.flags.close().unwrap();
        self.wflags.close().unwrap();
        self.enc.close(ds).unwrap();
    }
}

fn write_observation(path: &Path) {
    let mut ds = DataSet::create(path).unwrap();
    let mut a = Author::new(&mut ds);
    let all = [true; N_FINE];

    a.header();
    a.enc.write_scalar("source", "3C273".to_owned()).unwrap();
    a.record(2455000.5, -5, &all, true);
    a.record(2455000.5, -6, &all, true);

    a.enc.write_scalar("source", "mars".to_owned()).unwrap();
    a.record(2455000.6, -5, &all, true);
    a.record(2455000.6, -6, &[true, false, false, true], true);
    a.close(&mut ds);

    let mut history = ds.create_large_item("history", Type::Text).unwrap();
    writeln!(history, "UVCAT: miriad-uvcat").unwrap();
    writeln!(history, "UVCAT: select=-auto").unwrap();
    history.flush().unwrap();
}

fn convert(path: &Path, config: FillerConfig) -> (MemorySink, BufferingNotificationBackend, mirfill::Result<mirfill::FillSummary>) {
    let archive = MiriadArchive::open(path, config.max_channels).unwrap();
    let mut filler = Filler::new(archive, config).with_origin(path.display().to_string());
    let mut sink = MemorySink::new();
    let mut nb = BufferingNotificationBackend::new();
    let result = filler.run(&mut sink, &mut nb);
    (sink, nb, result)
}

#[test]
fn small_observation() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("obs.uv");
    write_observation(&path);

    let (sink, nb, result) = convert(&path, FillerConfig::default());
    let summary = result.unwrap();

    assert_eq!(summary.records, 4);
    assert_eq!(summary.rows, 4);
    assert_eq!(summary.windows, 2);
    assert_eq!(summary.sources, 2);
    assert_eq!(summary.fields, 2);
    assert_eq!(summary.arrays, 1);
    assert_eq!(nb.count(NotificationKind::Warning), 0);

    assert_eq!(sink.n_rows(MsTable::Main), 4);

    // row 0: the first group's spectral window
    match sink.cell(MsTable::Main, "DATA", 0) {
        Some(CellValue::ComplexMatrix(d)) => {
            assert_eq!(d.dim(), (N_FINE, 4));
            assert_eq!(d[(1, 0)], Complex::new(2., 5.));
            assert_eq!(d[(1, 3)], Complex::new(2., 6.));
        }
        other => panic!("unexpected DATA cell {other:?}"),
    }

    // row 1: the wideband window
    match sink.cell(MsTable::Main, "DATA", 1) {
        Some(CellValue::ComplexMatrix(d)) => {
            assert_eq!(d.dim(), (1, 4));
            assert_eq!(d[(0, 0)], Complex::new(9., -1.));
        }
        other => panic!("unexpected DATA cell {other:?}"),
    }

    match sink.cell(MsTable::Main, "FLAG", 2) {
        Some(CellValue::BoolMatrix(f)) => {
            assert!(!f[(1, 0)]);
            assert!(f[(1, 3)]);
            assert!(!f[(3, 3)]);
            assert!(f[(0, 1)]);
        }
        other => panic!("unexpected FLAG cell {other:?}"),
    }

    match sink.cell(MsTable::Main, "UVW", 0) {
        Some(CellValue::DoubleVec(uvw)) => {
            assert_abs_diff_eq!(uvw[0], -100. * 0.299792458, epsilon = 1e-9);
            assert_abs_diff_eq!(uvw[1], 50. * 0.299792458, epsilon = 1e-9);
        }
        other => panic!("unexpected UVW cell {other:?}"),
    }

    assert_eq!(
        sink.cell(MsTable::Main, "TIME", 0).and_then(|v| v.as_double()),
        Some(55000. * 86400.)
    );
    assert_eq!(sink.cell(MsTable::Main, "INTERVAL", 3).and_then(|v| v.as_double()), Some(10.));

    let int = |col: &str, row: u64| sink.cell(MsTable::Main, col, row).and_then(|v| v.as_int());
    assert_eq!(int("ANTENNA1", 0), Some(0));
    assert_eq!(int("ANTENNA2", 0), Some(1));
    assert_eq!(int("DATA_DESC_ID", 3), Some(1));
    assert_eq!(int("FIELD_ID", 1), Some(0));
    assert_eq!(int("FIELD_ID", 2), Some(1));
    assert_eq!(int("SCAN_NUMBER", 1), Some(0));
    assert_eq!(int("SCAN_NUMBER", 2), Some(1));

    // subtables
    assert_eq!(sink.n_rows(MsTable::Antenna), 2);
    assert_eq!(sink.n_rows(MsTable::Feed), 2);
    assert_eq!(sink.n_rows(MsTable::SpectralWindow), 2);
    assert_eq!(sink.n_rows(MsTable::DataDescription), 2);
    assert_eq!(sink.n_rows(MsTable::Field), 2);
    assert_eq!(sink.n_rows(MsTable::Source), 2);
    assert_eq!(sink.n_rows(MsTable::SysCal), 2);
    assert_eq!(sink.n_rows(MsTable::History), 3);

    assert_eq!(
        sink.cell(MsTable::Field, "NAME", 1).and_then(|v| v.as_str()),
        Some("mars_C")
    );
    assert_eq!(
        sink.cell(MsTable::Observation, "TELESCOPE_NAME", 0).and_then(|v| v.as_str()),
        Some("CARMA")
    );
    assert_eq!(
        sink.cell(MsTable::Observation, "OBSERVER", 0).and_then(|v| v.as_str()),
        Some("someone")
    );
    assert_eq!(
        sink.cell(MsTable::History, "MESSAGE", 1).and_then(|v| v.as_str()),
        Some("UVCAT: select=-auto")
    );
    assert_eq!(
        sink.cell(MsTable::SpectralWindow, "REF_FREQUENCY", 0).and_then(|v| v.as_double()),
        Some(230.5e9)
    );
    assert_eq!(sink.cell(MsTable::SysCal, "TSYS", 1), Some(&CellValue::FloatVec(vec![200.])));
}

#[test]
fn tsys_weighting_and_skipped_wideband() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("obs.uv");
    write_observation(&path);

    let config = FillerConfig {
        apply_tsys: true,
        keep_wide_windows: false,
        ..Default::default()
    };
    let (sink, _nb, result) = convert(&path, config);
    let summary = result.unwrap();

    assert_eq!(summary.rows, 2);
    assert_eq!(sink.n_rows(MsTable::SpectralWindow), 1);

    match sink.cell(MsTable::Main, "WEIGHT", 0) {
        Some(CellValue::FloatVec(w)) => assert_abs_diff_eq!(w[0], 0.01, epsilon = 1e-7),
        other => panic!("unexpected WEIGHT cell {other:?}"),
    }
}

#[test]
fn empty_data_set() {
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("empty.uv");

    {
        let mut ds = DataSet::create(&path).unwrap();
        let enc = ds.new_uv(ObsType::Cross).unwrap();
        enc.close(&mut ds).unwrap();
    }

    let (sink, _nb, result) = convert(&path, FillerConfig::default());
    assert!(matches!(result, Err(FillerError::NoVisibilityData)));
    assert_eq!(sink.n_rows(MsTable::Main), 0);
}
