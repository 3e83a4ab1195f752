// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Filling in the subtables.

Everything here runs once, after the main pass, from what the tracker and
the emitter accumulated along the way. The rows follow the layout of the
standard MeasurementSet subtables.

 */

use mirfill_core::notify::NotificationBackend;
use mirfill_core::{rn_note, rn_warning, Array2, Complex};
use mirfill_visdata::FeedPol;

use crate::config::FillerConfig;
use crate::emitter::EmitterStats;
use crate::error::Result;
use crate::polarization::CANONICAL_ORDER;
use crate::sink::{CellValue, MsTable, OutputSink};
use crate::site;
use crate::tracker::StreamState;
use crate::window::WindowKind;

/// MJD of the J2000 and B1950 epochs, in days.
const J2000_MJD: f64 = 51544.5;
const B1950_MJD: f64 = 33281.92345905;

/// The casacore frequency frame code for topocentric frequencies.
const MEAS_FREQ_REF_TOPO: i32 = 5;

const SECONDS_PER_DAY: f64 = 86400.;

/// Facts about the whole observation, read from the first record.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservationInfo {
    pub telescope: String,
    pub observer: String,
    pub project: String,

    /// Equinox of the coordinates, in years.
    pub epoch: Option<f64>,

    /// Site longitude in radians.
    pub longitude: Option<f64>,

    /// Polarizations per record group.
    pub n_pols: usize,

    /// Where the data came from, for the HISTORY table.
    pub origin: String,
}

impl Default for ObservationInfo {
    fn default() -> Self {
        ObservationInfo {
            telescope: "unknown".to_owned(),
            observer: "unknown".to_owned(),
            project: "unknown".to_owned(),
            epoch: None,
            longitude: None,
            n_pols: 1,
            origin: String::new(),
        }
    }
}

/// The epoch reference of the FIELD directions, as MJD seconds.
pub fn epoch_reference_time(epoch: f64) -> Option<f64> {
    if (epoch - 2000.).abs() < 0.01 {
        Some(J2000_MJD * SECONDS_PER_DAY)
    } else if (epoch - 1950.).abs() < 0.01 {
        Some(B1950_MJD * SECONDS_PER_DAY)
    } else {
        None
    }
}

/// Everything the subtables are built from.
pub struct SubtableInputs<'a> {
    pub state: &'a StreamState,
    pub info: &'a ObservationInfo,
    pub stats: &'a EmitterStats,
    pub history: &'a [String],
    pub config: &'a FillerConfig,
}

/// A helper for writing one row at a time.
struct RowWriter<'s> {
    sink: &'s mut dyn OutputSink,
    table: MsTable,
    row: u64,
}

impl<'s> RowWriter<'s> {
    fn append(sink: &'s mut dyn OutputSink, table: MsTable) -> Result<Self> {
        let row = sink.append_row(table)?;
        Ok(RowWriter { sink, table, row })
    }

    fn put<V: Into<CellValue>>(&mut self, column: &str, value: V) -> Result<&mut Self> {
        self.sink
            .put_column(self.table, self.row, column, value.into())?;
        Ok(self)
    }
}

pub fn write_subtables(
    inputs: &SubtableInputs,
    sink: &mut dyn OutputSink,
    nb: &mut dyn NotificationBackend,
) -> Result<()> {
    write_antennas(inputs, sink, nb)?;
    write_feeds(inputs, sink)?;
    write_spectral_windows(inputs, sink)?;
    write_polarization(sink)?;
    write_dopplers(inputs, sink)?;
    write_fields(inputs, sink, nb)?;
    write_sources(inputs, sink)?;
    write_syscal(inputs, sink)?;
    write_observation(inputs, sink)?;
    write_history(inputs, sink)?;
    write_time_references(inputs.config, sink, nb)?;
    sink.flush()?;
    Ok(())
}

fn write_antennas(
    inputs: &SubtableInputs,
    sink: &mut dyn OutputSink,
    nb: &mut dyn NotificationBackend,
) -> Result<()> {
    let telescope = inputs.info.telescope.as_str();
    let site = site::lookup(telescope);
    let longitude = inputs.info.longitude.unwrap_or(0.);

    let center = match site.center {
        Some(c) => c,
        None => {
            rn_warning!(
                nb,
                "no array center is known for telescope \"{}\"; antenna positions will be relative",
                telescope
            );
            [0.; 3]
        }
    };

    let mut array_name = telescope;

    for gen in inputs.state.arrays.generations() {
        array_name = site::canonical_array_name(telescope, gen.n_antennas);

        for i in 0..gen.n_rows() {
            let local = gen.positions.get(i).copied().unwrap_or([0.; 3]);
            let position = site::antenna_position_itrf(local, longitude, center);

            RowWriter::append(sink, MsTable::Antenna)?
                .put("NAME", (i + 1).to_string())?
                .put("STATION", format!("ANT{}", i + 1))?
                .put("TYPE", "GROUND-BASED")?
                .put("MOUNT", site::mount_name(gen.mount))?
                .put("DISH_DIAMETER", site.dish_diameter)?
                .put("POSITION", position.to_vec())?
                .put("OFFSET", vec![0f64; 3])?
                .put("FLAG_ROW", false)?;
        }
    }

    if array_name != telescope {
        rn_note!(nb, "treating this {} data set as coming from {}", telescope, array_name);
    }

    sink.put_column_keyword(MsTable::Antenna, "NAME", "ARRAY_NAME", array_name.into())?;
    sink.put_column_keyword(
        MsTable::Antenna,
        "POSITION",
        "ARRAY_POSITION",
        center.to_vec().into(),
    )?;
    Ok(())
}

fn write_feeds(inputs: &SubtableInputs, sink: &mut dyn OutputSink) -> Result<()> {
    let receptors: Vec<String> = ["X", "Y"].iter().map(|s| s.to_string()).collect();
    let pol_response = Array2::from_shape_fn((2, 2), |(i, j)| {
        if i == j {
            Complex::new(1f32, 0.)
        } else {
            Complex::new(0., 0.)
        }
    });

    for gen in inputs.state.arrays.generations() {
        for i in 0..gen.n_rows() {
            RowWriter::append(sink, MsTable::Feed)?
                .put("ANTENNA_ID", i as i32)?
                .put("BEAM_ID", -1)?
                .put("FEED_ID", 0)?
                .put("INTERVAL", f64::MAX)?
                .put("SPECTRAL_WINDOW_ID", -1)?
                .put("TIME", 0.)?
                .put("NUM_RECEPTORS", 2)?
                .put("BEAM_OFFSET", Array2::<f64>::zeros((2, 2)))?
                .put("POLARIZATION_TYPE", receptors.clone())?
                .put("POL_RESPONSE", pol_response.clone())?
                .put("POSITION", vec![0f64; 3])?
                .put("RECEPTOR_ANGLE", vec![0f64; 2])?;
        }
    }

    Ok(())
}

fn write_spectral_windows(inputs: &SubtableInputs, sink: &mut dyn OutputSink) -> Result<()> {
    for (i, window) in inputs.state.layout.retained().enumerate() {
        let width = window.channel_width_hz();
        let (group, group_name) = window.freq_group();

        // Continuum windows have no rest frequency; fall back to the band
        // center.
        let ref_freq = match (window.kind, window.rest_freq) {
            (WindowKind::Narrow, Some(f)) if f > 0. => f * 1e9,
            _ => window.reference_frequency_hz(),
        };

        let doppler_id = match window.kind {
            WindowKind::Narrow => i as i32,
            WindowKind::WideAverage => -1,
        };

        RowWriter::append(sink, MsTable::SpectralWindow)?
            .put("NUM_CHAN", window.n_channels as i32)?
            .put("REF_FREQUENCY", ref_freq)?
            .put("CHAN_FREQ", window.channel_frequencies_hz())?
            .put("CHAN_WIDTH", vec![width; window.n_channels])?
            .put("EFFECTIVE_BW", vec![width; window.n_channels])?
            .put("RESOLUTION", vec![width; window.n_channels])?
            .put("TOTAL_BANDWIDTH", window.total_bandwidth_hz())?
            .put("NET_SIDEBAND", window.sideband().net_sideband())?
            .put("IF_CONV_CHAIN", 0)?
            .put("FREQ_GROUP", group)?
            .put("FREQ_GROUP_NAME", group_name)?
            .put("MEAS_FREQ_REF", MEAS_FREQ_REF_TOPO)?
            .put("DOPPLER_ID", doppler_id)?
            .put("FLAG_ROW", false)?;

        RowWriter::append(sink, MsTable::DataDescription)?
            .put("SPECTRAL_WINDOW_ID", i as i32)?
            .put("POLARIZATION_ID", 0)?
            .put("FLAG_ROW", false)?;
    }

    Ok(())
}

fn write_polarization(sink: &mut dyn OutputSink) -> Result<()> {
    let corr_type: Vec<i32> = CANONICAL_ORDER.iter().map(|p| p.casa_stokes_code()).collect();

    // Receptor 0 is X and 1 is Y.
    let receptor = |f: Option<FeedPol>| match f {
        Some(FeedPol::Y) => 1,
        _ => 0,
    };

    let corr_product = Array2::from_shape_fn((CANONICAL_ORDER.len(), 2), |(i, j)| {
        let pol = CANONICAL_ORDER[i];
        if j == 0 {
            receptor(pol.feedpol1())
        } else {
            receptor(pol.feedpol2())
        }
    });

    RowWriter::append(sink, MsTable::Polarization)?
        .put("NUM_CORR", CANONICAL_ORDER.len() as i32)?
        .put("CORR_TYPE", corr_type)?
        .put("CORR_PRODUCT", corr_product)?
        .put("FLAG_ROW", false)?;
    Ok(())
}

fn write_dopplers(inputs: &SubtableInputs, sink: &mut dyn OutputSink) -> Result<()> {
    for i in 0..inputs.state.layout.narrow().len() {
        RowWriter::append(sink, MsTable::Doppler)?
            .put("DOPPLER_ID", i as i32)?
            .put("SOURCE_ID", -1)?
            .put("TRANSITION_ID", -1)?
            .put("VELDEF", 0.)?;
    }

    Ok(())
}

fn write_fields(
    inputs: &SubtableInputs,
    sink: &mut dyn OutputSink,
    nb: &mut dyn NotificationBackend,
) -> Result<()> {
    let directory = &inputs.state.directory;

    let time = match inputs.info.epoch {
        Some(epoch) => match epoch_reference_time(epoch) {
            Some(t) => t,
            None => {
                rn_warning!(nb, "cannot handle coordinate epoch {}; FIELD times will be zero", epoch);
                0.
            }
        },
        None => J2000_MJD * SECONDS_PER_DAY,
    };

    if directory.fields().is_empty() {
        rn_warning!(nb, "the data set never defined a pointing; the FIELD table is empty");
    }

    for field in directory.fields() {
        let (ra, dec) = field.direction();
        let dir = ndarray::arr2(&[[ra, dec]]);
        let code = directory
            .sources()
            .get(field.source)
            .map_or("S", |s| s.purpose.as_str());

        RowWriter::append(sink, MsTable::Field)?
            .put("NAME", directory.field_name(field, inputs.config.suffix_central_fields))?
            .put("CODE", code)?
            .put("SOURCE_ID", field.source as i32)?
            .put("NUM_POLY", 0)?
            .put("TIME", time)?
            .put("PHASE_DIR", dir.clone())?
            .put("DELAY_DIR", dir.clone())?
            .put("REFERENCE_DIR", dir)?
            .put("FLAG_ROW", false)?;
    }

    Ok(())
}

fn write_sources(inputs: &SubtableInputs, sink: &mut dyn OutputSink) -> Result<()> {
    let rest_freqs: Vec<f64> = inputs
        .state
        .layout
        .narrow()
        .iter()
        .map(|w| w.rest_freq.unwrap_or(0.) * 1e9)
        .collect();

    for source in inputs.state.directory.sources() {
        let mut w = RowWriter::append(sink, MsTable::Source)?;
        w.put("SOURCE_ID", source.id as i32)?
            .put("NAME", source.name.as_str())?
            .put("CODE", source.purpose.as_str())?
            .put("CALIBRATION_GROUP", -1)?
            .put("SPECTRAL_WINDOW_ID", -1)?
            .put("TIME", 0.)?
            .put("INTERVAL", f64::MAX)?
            .put("DIRECTION", vec![source.ra, source.dec])?
            .put("NUM_LINES", rest_freqs.len() as i32)?;

        if !rest_freqs.is_empty() {
            w.put("REST_FREQUENCY", rest_freqs.clone())?;
        }
    }

    Ok(())
}

fn write_syscal(inputs: &SubtableInputs, sink: &mut dyn OutputSink) -> Result<()> {
    let time = inputs.stats.last_time.unwrap_or(0.);

    for (i, tsys) in inputs.state.tsys.iter().enumerate() {
        RowWriter::append(sink, MsTable::SysCal)?
            .put("ANTENNA_ID", i as i32)?
            .put("FEED_ID", 0)?
            .put("SPECTRAL_WINDOW_ID", -1)?
            .put("TIME", time)?
            .put("INTERVAL", -1.)?
            .put("TSYS", vec![*tsys as f32])?;
    }

    Ok(())
}

fn write_observation(inputs: &SubtableInputs, sink: &mut dyn OutputSink) -> Result<()> {
    let info = inputs.info;
    let first = inputs.stats.first_time.unwrap_or(0.);
    let last = inputs.stats.last_time.unwrap_or(first);

    RowWriter::append(sink, MsTable::Observation)?
        .put("TELESCOPE_NAME", info.telescope.as_str())?
        .put("OBSERVER", info.observer.as_str())?
        .put("PROJECT", info.project.as_str())?
        .put("TIME_RANGE", vec![first, last])?
        .put("RELEASE_DATE", 0.)?
        .put("SCHEDULE_TYPE", "")?
        .put("FLAG_ROW", false)?;
    Ok(())
}

fn write_history(inputs: &SubtableInputs, sink: &mut dyn OutputSink) -> Result<()> {
    let time = inputs.stats.first_time.unwrap_or(0.);
    let conversion = format!(
        "converted {} to a MeasurementSet with mirfill {}",
        if inputs.info.origin.is_empty() {
            "a MIRIAD data set"
        } else {
            inputs.info.origin.as_str()
        },
        env!("CARGO_PKG_VERSION")
    );

    for (line, origin) in inputs
        .history
        .iter()
        .map(|l| (l.as_str(), "MIRIAD"))
        .chain(std::iter::once((conversion.as_str(), "mirfill")))
    {
        RowWriter::append(sink, MsTable::History)?
            .put("TIME", time)?
            .put("OBSERVATION_ID", 0)?
            .put("MESSAGE", line)?
            .put("PRIORITY", "NORMAL")?
            .put("ORIGIN", origin)?
            .put("OBJECT_ID", -1)?
            .put("APPLICATION", "mirfill")?
            .put("CLI_COMMAND", Vec::<String>::new())?
            .put("APP_PARAMS", Vec::<String>::new())?;
    }

    Ok(())
}

fn write_time_references(
    config: &FillerConfig,
    sink: &mut dyn OutputSink,
    nb: &mut dyn NotificationBackend,
) -> Result<()> {
    let reference = match config.time_reference() {
        Some(r) => r,
        None => {
            rn_warning!(
                nb,
                "unrecognized time system \"{}\"; leaving the time references unset",
                config.time_system
            );
            return Ok(());
        }
    };

    for table in [MsTable::Main, MsTable::Feed, MsTable::Field] {
        sink.put_column_keyword(table, "TIME", "MEASURE_REFERENCE", reference.into())?;
    }

    Ok(())
}
