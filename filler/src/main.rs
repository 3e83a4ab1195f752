// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*! The `mirfill` command: convert a MIRIAD uv data set to a MeasurementSet.

*/

use anyhow::Error;
use clap::{crate_version, Arg, ArgAction, ArgMatches, Command};
use mirfill::archive::VisibilityArchive;
use mirfill::{Filler, FillerConfig, MemorySink, MiriadArchive, MsTable, OutputSink, VisibilityRecord};
use mirfill_core::notify::{run_with_notifications, ClapNotificationArgsExt, NotificationBackend};
use mirfill_core::{ctry, rn_note};
use mirfill_miriad::AnyMiriadValue;
use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

fn main() {
    let matches = make_app().get_matches();

    process::exit(run_with_notifications(
        matches,
        |matches, nb| -> Result<i32, Error> { do_fill(&matches, nb) },
    ));
}

fn make_app() -> Command {
    Command::new("mirfill")
        .version(crate_version!())
        .about("Convert a MIRIAD uv data set into a CASA MeasurementSet")
        .notify_args()
        .arg(
            Arg::new("VIS")
                .value_parser(clap::value_parser!(PathBuf))
                .help("The path to the input MIRIAD data set")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("MS")
                .value_parser(clap::value_parser!(PathBuf))
                .help("The path to the output MeasurementSet, whose tables must already exist (default: VIS with its extension replaced by .ms)")
                .index(2),
        )
        .arg(
            Arg::new("tsys")
                .long("tsys")
                .action(ArgAction::SetTrue)
                .help("Weight visibilities by their system temperatures"),
        )
        .arg(
            Arg::new("snumbase")
                .long("snumbase")
                .value_name("N")
                .value_parser(clap::value_parser!(i32))
                .help("The number of the first scan")
                .default_value("0"),
        )
        .arg(
            Arg::new("max_fields")
                .long("max-fields")
                .value_name("N")
                .value_parser(clap::value_parser!(usize))
                .help("The largest number of distinct pointings to accept")
                .default_value("256"),
        )
        .arg(
            Arg::new("skip_wide")
                .long("skip-wide")
                .action(ArgAction::SetTrue)
                .help("Do not emit rows for the wideband channels"),
        )
        .arg(
            Arg::new("no_central_suffix")
                .long("no-central-suffix")
                .action(ArgAction::SetTrue)
                .help("Do not mark central pointings with a \"_C\" suffix in field names"),
        )
        .arg(
            Arg::new("timesys")
                .long("timesys")
                .value_name("NAME")
                .help("The time system of the data (TAI or UTC)")
                .default_value("TAI"),
        )
        .arg(
            Arg::new("dry_run")
                .long("dry-run")
                .action(ArgAction::SetTrue)
                .help("Convert into memory and report what would be written"),
        )
}

fn config_from_args(matches: &ArgMatches) -> FillerConfig {
    let mut config = FillerConfig {
        apply_tsys: matches.get_flag("tsys"),
        keep_wide_windows: !matches.get_flag("skip_wide"),
        suffix_central_fields: !matches.get_flag("no_central_suffix"),
        ..Default::default()
    };

    if let Some(n) = matches.get_one::<i32>("snumbase") {
        config.scan_number_base = *n;
    }

    if let Some(n) = matches.get_one::<usize>("max_fields") {
        config.max_fields = *n;
    }

    if let Some(s) = matches.get_one::<String>("timesys") {
        config.time_system = s.clone();
    }

    config
}

/// The default output path: the input with any trailing slash removed and
/// its extension replaced by `.ms`.
fn default_ms_path(vis: &Path) -> PathBuf {
    let s = vis.as_os_str().to_string_lossy();
    PathBuf::from(s.trim_end_matches('/')).with_extension("ms")
}

fn do_fill(matches: &ArgMatches, nb: &mut dyn NotificationBackend) -> Result<i32, Error> {
    let vis = matches
        .get_one::<PathBuf>("VIS")
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("no input data set given"))?;
    let ms = matches
        .get_one::<PathBuf>("MS")
        .cloned()
        .unwrap_or_else(|| default_ms_path(&vis));
    let dry_run = matches.get_flag("dry_run");
    let config = config_from_args(matches);

    let archive = ctry!(
        MiriadArchive::open(&vis, config.max_channels);
        "cannot open MIRIAD data set \"{}\"", vis.display()
    );
    let archive = ProgressArchive::new(archive);
    let mut filler = Filler::new(archive, config).with_origin(vis.display().to_string());

    if dry_run {
        let mut sink = MemorySink::new();
        let summary = ctry!(filler.run(&mut sink, nb); "conversion of \"{}\" failed", vis.display());
        filler.into_archive().finish();

        rn_note!(
            nb,
            "{} records, {} rows in {} windows; {} groups dropped as fully flagged",
            summary.records,
            summary.rows,
            summary.windows,
            summary.groups_discarded
        );

        for table in ALL_TABLES {
            rn_note!(nb, "{}: {} rows", table, sink.n_rows(table));
        }

        return Ok(0);
    }

    let mut sink = open_ms(&ms)?;
    ctry!(filler.run(sink.as_mut(), nb); "conversion of \"{}\" into \"{}\" failed", vis.display(), ms.display());
    filler.into_archive().finish();
    Ok(0)
}

const ALL_TABLES: [MsTable; 12] = [
    MsTable::Main,
    MsTable::Antenna,
    MsTable::DataDescription,
    MsTable::Doppler,
    MsTable::Feed,
    MsTable::Field,
    MsTable::History,
    MsTable::Observation,
    MsTable::Polarization,
    MsTable::Source,
    MsTable::SpectralWindow,
    MsTable::SysCal,
];

#[cfg(feature = "casa")]
fn open_ms(path: &Path) -> Result<Box<dyn OutputSink>, Error> {
    let sink = ctry!(
        mirfill::casa::CasaSink::open(path);
        "cannot open MeasurementSet \"{}\"", path.display()
    );
    Ok(Box::new(sink))
}

#[cfg(not(feature = "casa"))]
fn open_ms(path: &Path) -> Result<Box<dyn OutputSink>, Error> {
    Err(anyhow::anyhow!(
        "cannot write \"{}\": this build of mirfill lacks MeasurementSet support (the \"casa\" feature); use --dry-run",
        path.display()
    ))
}

/// An archive that reports how far through the visibility data it is.
struct ProgressArchive<A: VisibilityArchive> {
    inner: A,
    pb: Option<pbr::ProgressBar<io::Stdout>>,
}

impl<A: VisibilityArchive> ProgressArchive<A> {
    fn new(inner: A) -> Self {
        let pb = inner.progress().1.map(|total| {
            let mut pb = pbr::ProgressBar::new(total);
            pb.set_units(pbr::Units::Bytes);
            pb.set_max_refresh_rate(Some(Duration::from_millis(500)));
            pb
        });

        ProgressArchive { inner, pb }
    }

    fn finish(&mut self) {
        if let Some(pb) = self.pb.as_mut() {
            pb.finish();
        }
    }
}

impl<A: VisibilityArchive> VisibilityArchive for ProgressArchive<A> {
    fn rewind(&mut self) -> mirfill::Result<()> {
        self.inner.rewind()
    }

    fn read_record(&mut self, record: &mut VisibilityRecord) -> mirfill::Result<bool> {
        let more = self.inner.read_record(record)?;

        if let Some(pb) = self.pb.as_mut() {
            pb.set(self.inner.progress().0);
        }

        Ok(more)
    }

    fn variable_version(&self, name: &str) -> Option<u64> {
        self.inner.variable_version(name)
    }

    fn variable(&self, name: &str) -> Option<AnyMiriadValue> {
        self.inner.variable(name)
    }

    fn has_item(&mut self, name: &str) -> mirfill::Result<bool> {
        self.inner.has_item(name)
    }

    fn history(&mut self) -> mirfill::Result<Vec<String>> {
        self.inner.history()
    }

    fn progress(&self) -> (u64, Option<u64>) {
        self.inner.progress()
    }
}
