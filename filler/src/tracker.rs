// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Following the metadata embedded in the uv stream.

MIRIAD only writes a variable when it changes, so the filler has to notice
the changes as they go by and update what it derives from them: the window
layout, the array configuration, system temperatures, and the current
field. The tracker remembers which version of each watched variable it last
acted on, and applies exactly the updates whose inputs moved.

 */

use mirfill_core::notify::NotificationBackend;
use mirfill_core::rn_note;
use std::collections::HashMap;

use crate::archive::{ArchiveVariablesExt, VisibilityArchive};
use crate::array::{ArrayConfig, ArrayGeneration};
use crate::config::FillerConfig;
use crate::directory::FieldSourceDirectory;
use crate::error::{FillerError, Result};
use crate::window::{LayoutVariables, WindowLayout, LAYOUT_VARIABLES};

/// The variables that define the current pointing.
const POINTING_VARIABLES: &[&str] = &["source", "dra", "ddec", "ra", "dec"];

const OTHER_VARIABLES: &[&str] = &["antpos", "nants", "mount", "systemp", "wsystemp", "inttime"];

/// Source name used when the stream never names one.
pub const UNKNOWN_SOURCE: &str = "unknown";

/// Everything the filler knows about the stream at the current record.
#[derive(Clone, Debug)]
pub struct StreamState {
    pub arrays: ArrayConfig,

    /// System temperatures by 0-based antenna number.
    pub tsys: Vec<f64>,

    pub layout: WindowLayout,

    /// Spectral-line and wideband channels per record, fixed by the first
    /// record.
    pub n_chan_fine: usize,
    pub n_chan_wide: usize,

    pub directory: FieldSourceDirectory,
    pub current_source: Option<usize>,
    pub current_field: Option<usize>,

    /// Pointing offset in radians.
    pub pointing_offset: (f32, f32),

    /// Base phase center in radians.
    pub ra: f64,
    pub dec: f64,

    /// Integration time in seconds.
    pub inttime: f64,

    /// How many times the pointing changed.
    pub n_pointings: usize,
}

impl StreamState {
    pub fn new(config: &FillerConfig, layout: WindowLayout, n_chan_fine: usize, n_chan_wide: usize) -> Self {
        StreamState {
            arrays: ArrayConfig::new(config.max_antennas),
            tsys: Vec::new(),
            layout,
            n_chan_fine,
            n_chan_wide,
            directory: FieldSourceDirectory::new(config.max_fields, config.max_sources),
            current_source: None,
            current_field: None,
            pointing_offset: (0., 0.),
            ra: 0.,
            dec: 0.,
            inttime: 0.,
            n_pointings: 0,
        }
    }

    /// The system temperature of a 1-based antenna, if known.
    pub fn tsys_of(&self, ant: usize) -> Option<f64> {
        self.tsys.get(ant.checked_sub(1)?).copied()
    }
}

/// Build the window layout from the archive's current variables.
pub fn layout_from_archive<A: VisibilityArchive + ?Sized>(
    archive: &A,
    n_chan_fine: usize,
    n_chan_wide: usize,
    config: &FillerConfig,
) -> Result<WindowLayout> {
    let n_spect = archive.count_value("nspect")?.unwrap_or(0);
    let n_wide = archive.count_value("nwide")?.unwrap_or(0);

    if n_wide > n_chan_wide {
        return Err(FillerError::malformed(
            "nwide",
            format!("{n_wide} wideband windows but records have {n_chan_wide} wideband channels"),
        ));
    }

    WindowLayout::rebuild(
        n_chan_fine,
        n_spect,
        n_wide,
        &LayoutVariables::from_archive(archive)?,
        config.keep_wide_windows,
        config.max_windows,
    )
}

#[derive(Clone, Debug, Default)]
pub struct VariableTracker {
    watched: Vec<&'static str>,
    last_seen: HashMap<&'static str, u64>,
}

impl VariableTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare the variables that the filler derives state from.
    pub fn register_watched(&mut self) {
        for name in LAYOUT_VARIABLES
            .iter()
            .chain(POINTING_VARIABLES)
            .chain(OTHER_VARIABLES)
        {
            self.watch(*name);
        }
    }

    pub fn watch(&mut self, name: &'static str) {
        if !self.watched.contains(&name) {
            self.watched.push(name);
        }
    }

    /// Forget what has been seen, as after rewinding the archive.
    pub fn reset(&mut self) {
        self.last_seen.clear();
    }

    /// Whether any watched variable has been updated since the tracker last
    /// looked at it.
    pub fn stream_changed<A: VisibilityArchive + ?Sized>(&self, archive: &A) -> bool {
        self.watched
            .iter()
            .any(|name| archive.variable_version(name) != self.last_seen.get(name).copied())
    }

    /// Check one variable, marking its current version as seen. True if it
    /// changed.
    fn take_change<A: VisibilityArchive + ?Sized>(&mut self, archive: &A, name: &'static str) -> bool {
        match archive.variable_version(name) {
            None => false,
            Some(v) => self.last_seen.insert(name, v) != Some(v),
        }
    }

    /// Check several variables; every one is marked as seen.
    fn take_any_change<A: VisibilityArchive + ?Sized>(&mut self, archive: &A, names: &[&'static str]) -> bool {
        names
            .iter()
            .fold(false, |acc, name| self.take_change(archive, *name) | acc)
    }

    /// Apply the updates implied by whatever changed since the last call.
    pub fn refresh<A: VisibilityArchive + ?Sized>(
        &mut self,
        record_index: u64,
        archive: &A,
        state: &mut StreamState,
        config: &FillerConfig,
        nb: &mut dyn NotificationBackend,
    ) -> Result<()> {
        if self.take_any_change(archive, LAYOUT_VARIABLES) {
            let layout = layout_from_archive(archive, state.n_chan_fine, state.n_chan_wide, config)?;

            if !layout.same_shape(&state.layout) {
                return Err(FillerError::LayoutChanged {
                    record: record_index,
                });
            }

            state.layout = layout;
        }

        let antpos_changed = self.take_any_change(archive, &["antpos", "nants"]);
        let mount_changed = self.take_change(archive, "mount");
        let mount = archive.i64_value("mount")?;

        if antpos_changed {
            if let Some(antpos) = archive.f64_values("antpos")? {
                let n_ants = archive.count_value("nants")?.unwrap_or(antpos.len() / 3);
                let gen = ArrayGeneration::from_antpos(&antpos, n_ants, mount)?;
                let id = state.arrays.add_generation(gen)?;
                rn_note!(nb, "array configuration #{} has {} antennas", id + 1, n_ants);
            }
        } else if mount_changed {
            if let Some(gen) = state.arrays.last_generation_mut() {
                gen.mount = mount;
            }
        }

        if self.take_any_change(archive, &["systemp", "wsystemp"]) {
            let name = if state.layout.narrow().is_empty() {
                "wsystemp"
            } else {
                "systemp"
            };

            if let Some(values) = archive.f64_values(name)? {
                // Windows other than the first are ignored.
                let n_ants = archive.count_value("nants")?.unwrap_or(values.len()).min(values.len());
                state.tsys = values[..n_ants].to_vec();
            }
        }

        if self.take_change(archive, "inttime") {
            state.inttime = archive.f64_value("inttime")?.unwrap_or(0.);
        }

        // A position change alone does not make a new field; the new
        // position is picked up when the pointing next changes.
        self.take_any_change(archive, &["ra", "dec"]);

        let source_changed = self.take_change(archive, "source");
        let offset_changed = self.take_any_change(archive, &["dra", "ddec"]);

        if source_changed {
            let name = archive.text_value("source")?.unwrap_or_default();
            state.current_source = Some(state.directory.resolve_source(&name)?);
        }

        if source_changed || offset_changed || state.current_field.is_none() {
            let source = match state.current_source {
                Some(s) => s,
                None => {
                    let s = state.directory.resolve_source(UNKNOWN_SOURCE)?;
                    state.current_source = Some(s);
                    s
                }
            };

            state.ra = archive.f64_value("ra")?.unwrap_or(0.);
            state.dec = archive.f64_value("dec")?.unwrap_or(0.);
            state.pointing_offset = (
                archive.f64_value("dra")?.unwrap_or(0.) as f32,
                archive.f64_value("ddec")?.unwrap_or(0.) as f32,
            );
            state.n_pointings += 1;
            state.current_field = Some(state.directory.resolve_field(
                state.pointing_offset,
                source,
                state.ra,
                state.dec,
            )?);
        }

        Ok(())
    }
}
