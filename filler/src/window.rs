// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

The spectral window layout.

MIRIAD describes the spectral-line channels ("narrow" windows) with a set of
per-window arrays, and the wideband channels with a separate pair of arrays.
The output table wants a single list of windows, so the wideband channels
become one-channel pseudo-windows appended after the narrow ones, numbered
as if their channels followed the spectral-line channels in one buffer.

 */

use std::ops::Range;

use crate::archive::{ArchiveVariablesExt, VisibilityArchive};
use crate::error::{FillerError, Result};

const GHZ: f64 = 1e9;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum WindowKind {
    /// Channels at the native spectral resolution.
    Narrow,

    /// A single channel averaging a whole sideband.
    WideAverage,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Sideband {
    Upper,
    Lower,
    Undefined,
}

impl Sideband {
    fn from_spacing(width: f64) -> Self {
        if width > 0. {
            Sideband::Upper
        } else if width < 0. {
            Sideband::Lower
        } else {
            Sideband::Undefined
        }
    }

    /// The value of the NET_SIDEBAND column.
    pub fn net_sideband(self) -> i32 {
        match self {
            Sideband::Upper => 1,
            Sideband::Lower => -1,
            Sideband::Undefined => 0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Window {
    pub n_channels: usize,

    /// The 1-based index of the window's first channel in the combined
    /// narrow-then-wide channel buffer.
    pub start_channel: usize,

    /// Signed channel spacing, in GHz.
    pub channel_width: f64,

    /// Frequency of the first channel, in GHz.
    pub first_freq: f64,

    /// Rest frequency in GHz; wideband windows have none.
    pub rest_freq: Option<f64>,

    pub kind: WindowKind,

    /// Whether rows are emitted for this window.
    pub keep: bool,
}

impl Window {
    pub fn sideband(&self) -> Sideband {
        Sideband::from_spacing(self.channel_width)
    }

    /// The FREQ_GROUP and FREQ_GROUP_NAME values for this window.
    pub fn freq_group(&self) -> (i32, &'static str) {
        match self.kind {
            WindowKind::Narrow => (1, "MULTI-CHANNEL-DATA"),
            WindowKind::WideAverage => (3, "SIDE-BAND-AVERAGE"),
        }
    }

    /// The 0-based range of this window's channels in the combined buffer.
    pub fn channel_range(&self) -> Range<usize> {
        let start = self.start_channel - 1;
        start..start + self.n_channels
    }

    pub fn channel_frequencies_hz(&self) -> Vec<f64> {
        (0..self.n_channels)
            .map(|k| (self.first_freq + k as f64 * self.channel_width) * GHZ)
            .collect()
    }

    pub fn channel_width_hz(&self) -> f64 {
        self.channel_width.abs() * GHZ
    }

    pub fn total_bandwidth_hz(&self) -> f64 {
        self.n_channels as f64 * self.channel_width_hz()
    }

    /// The center of the band, which is what the wideband frequency
    /// variables record.
    pub fn reference_frequency_hz(&self) -> f64 {
        (self.first_freq + 0.5 * (self.n_channels as f64 - 1.) * self.channel_width) * GHZ
    }
}

/// The current values of the uv variables that define the layout. `None`
/// means that the variable has not appeared in the stream.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayoutVariables {
    pub ischan: Option<Vec<i64>>,
    pub nschan: Option<Vec<i64>>,
    pub restfreq: Option<Vec<f64>>,
    pub sdf: Option<Vec<f64>>,
    pub sfreq: Option<Vec<f64>>,
    pub wfreq: Option<Vec<f64>>,
    pub wwidth: Option<Vec<f64>>,
}

/// The uv variables whose changes require the layout to be rebuilt.
pub const LAYOUT_VARIABLES: &[&str] = &[
    "nspect", "nwide", "ischan", "nschan", "restfreq", "sdf", "sfreq", "wfreq", "wwidth",
];

impl LayoutVariables {
    pub fn from_archive<A: VisibilityArchive + ?Sized>(archive: &A) -> Result<Self> {
        Ok(LayoutVariables {
            ischan: archive.i64_values("ischan")?,
            nschan: archive.i64_values("nschan")?,
            restfreq: archive.f64_values("restfreq")?,
            sdf: archive.f64_values("sdf")?,
            sfreq: archive.f64_values("sfreq")?,
            wfreq: archive.f64_values("wfreq")?,
            wwidth: archive.f64_values("wwidth")?,
        })
    }
}

fn per_window<'a, T>(name: &'static str, values: &'a Option<Vec<T>>, n: usize) -> Result<Option<&'a [T]>> {
    match values {
        None => Ok(None),
        Some(v) if v.len() < n => Err(FillerError::malformed(
            name,
            format!("{} values for {n} windows", v.len()),
        )),
        Some(v) => Ok(Some(&v[..n])),
    }
}

fn required<'a, T>(name: &'static str, values: &'a Option<Vec<T>>, n: usize) -> Result<&'a [T]> {
    per_window(name, values, n)?.ok_or(FillerError::MissingLayoutVariable(name))
}

fn positive_count(name: &'static str, v: i64) -> Result<usize> {
    if v < 1 {
        return Err(FillerError::malformed(name, format!("illegal channel value {v}")));
    }

    Ok(v as usize)
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowLayout {
    windows: Vec<Window>,
    n_narrow: usize,
}

impl WindowLayout {
    /// Build the combined window list.
    ///
    /// *n_chan_fine* is the number of spectral-line channels per record;
    /// wideband pseudo-windows are numbered from just past them. Spectral
    /// windows must fit within the spectral-line channels.
    pub fn rebuild(
        n_chan_fine: usize,
        n_spect: usize,
        n_wide: usize,
        vars: &LayoutVariables,
        keep_wide: bool,
        max_windows: usize,
    ) -> Result<Self> {
        if n_spect + n_wide > max_windows {
            return Err(FillerError::CapacityExceeded {
                what: "spectral windows",
                limit: max_windows,
            });
        }

        let mut windows = Vec::with_capacity(n_spect + n_wide);

        if n_spect > 0 {
            let restfreq = required("restfreq", &vars.restfreq, n_spect)?;
            let sfreq = required("sfreq", &vars.sfreq, n_spect)?;

            // A single window may leave its channel bookkeeping implicit.
            let (ischan, nschan, sdf) = if n_spect == 1 {
                (
                    per_window("ischan", &vars.ischan, 1)?.map_or(Ok(1), |v| positive_count("ischan", v[0]))?,
                    per_window("nschan", &vars.nschan, 1)?.map_or(Ok(n_chan_fine), |v| positive_count("nschan", v[0]))?,
                    per_window("sdf", &vars.sdf, 1)?.map_or(0., |v| v[0]),
                )
            } else {
                (0, 0, 0.)
            };

            for i in 0..n_spect {
                let (start_channel, n_channels, channel_width) = if n_spect == 1 {
                    (ischan, nschan, sdf)
                } else {
                    (
                        positive_count("ischan", required("ischan", &vars.ischan, n_spect)?[i])?,
                        positive_count("nschan", required("nschan", &vars.nschan, n_spect)?[i])?,
                        required("sdf", &vars.sdf, n_spect)?[i],
                    )
                };

                windows.push(Window {
                    n_channels,
                    start_channel,
                    channel_width,
                    first_freq: sfreq[i],
                    rest_freq: Some(restfreq[i]),
                    kind: WindowKind::Narrow,
                    keep: true,
                });
            }
        }

        // The wideband widths are unsigned; borrow the sense of the first
        // spectral window.
        let wide_sign = match windows.first() {
            Some(w) if w.channel_width < 0. => -1.,
            _ => 1.,
        };

        let wfreq = per_window("wfreq", &vars.wfreq, n_wide)?;
        let wwidth = per_window("wwidth", &vars.wwidth, n_wide)?;

        for i in 0..n_wide {
            windows.push(Window {
                n_channels: 1,
                start_channel: n_chan_fine + i + 1,
                channel_width: wide_sign * wwidth.map_or(0., |v| v[i]),
                first_freq: wfreq.map_or(0., |v| v[i]),
                rest_freq: None,
                kind: WindowKind::WideAverage,
                keep: keep_wide,
            });
        }

        for (i, w) in windows.iter().enumerate() {
            let limit = match w.kind {
                WindowKind::Narrow => n_chan_fine,
                WindowKind::WideAverage => n_chan_fine + n_wide,
            };

            if w.channel_range().end > limit {
                return Err(FillerError::malformed(
                    "nschan",
                    format!(
                        "window {i} ends at channel {} but there are only {limit}",
                        w.channel_range().end
                    ),
                ));
            }
        }

        Ok(WindowLayout {
            windows,
            n_narrow: n_spect,
        })
    }

    /// Every window, narrow ones first.
    pub fn windows(&self) -> &[Window] {
        &self.windows
    }

    pub fn narrow(&self) -> &[Window] {
        &self.windows[..self.n_narrow]
    }

    /// The windows that produce output rows, in output order. The position
    /// in this sequence is the window's DATA_DESC_ID.
    pub fn retained(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter().filter(|w| w.keep)
    }

    pub fn n_retained(&self) -> usize {
        self.retained().count()
    }

    /// Whether two layouts slice records identically. Frequencies may drift
    /// (e.g. Doppler tracking) without affecting the rows already written.
    pub fn same_shape(&self, other: &WindowLayout) -> bool {
        self.windows.len() == other.windows.len()
            && self.windows.iter().zip(&other.windows).all(|(a, b)| {
                a.n_channels == b.n_channels
                    && a.start_channel == b.start_channel
                    && a.kind == b.kind
                    && a.keep == b.keep
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_plus_wide() -> LayoutVariables {
        LayoutVariables {
            ischan: Some(vec![1, 3]),
            nschan: Some(vec![2, 4]),
            restfreq: Some(vec![115.27, 115.27]),
            sdf: Some(vec![-0.01, -0.02]),
            sfreq: Some(vec![115.0, 114.5]),
            wfreq: Some(vec![114.8]),
            wwidth: Some(vec![0.5]),
        }
    }

    #[test]
    fn narrow_then_wide() {
        let layout = WindowLayout::rebuild(6, 2, 1, &two_plus_wide(), true, 64).unwrap();
        let w = layout.windows();
        assert_eq!(w.len(), 3);
        assert_eq!(layout.narrow().len(), 2);

        assert_eq!(w[0].channel_range(), 0..2);
        assert_eq!(w[1].channel_range(), 2..6);
        assert_eq!(w[2].n_channels, 1);
        assert_eq!(w[2].start_channel, 2 + 4 + 1);
        assert_eq!(w[2].kind, WindowKind::WideAverage);
        assert_eq!(w[2].rest_freq, None);

        // the wideband width takes the sign of the first spectral window
        assert_eq!(w[2].channel_width, -0.5);
        assert_eq!(w[2].sideband(), Sideband::Lower);
        assert_eq!(w[0].freq_group(), (1, "MULTI-CHANNEL-DATA"));
        assert_eq!(w[2].freq_group(), (3, "SIDE-BAND-AVERAGE"));
    }

    #[test]
    fn wide_only() {
        let vars = LayoutVariables {
            wfreq: Some(vec![230.0, 232.0]),
            wwidth: Some(vec![0.5, 0.5]),
            ..Default::default()
        };

        let layout = WindowLayout::rebuild(0, 0, 2, &vars, true, 64).unwrap();
        assert_eq!(layout.windows().len(), 2);
        assert_eq!(layout.windows()[1].start_channel, 2);
        assert_eq!(layout.windows()[1].sideband(), Sideband::Upper);
        assert!(layout.narrow().is_empty());
    }

    #[test]
    fn skipping_wide_windows() {
        let layout = WindowLayout::rebuild(6, 2, 1, &two_plus_wide(), false, 64).unwrap();
        assert_eq!(layout.windows().len(), 3);
        assert_eq!(layout.n_retained(), 2);
    }

    #[test]
    fn single_window_defaults() {
        let vars = LayoutVariables {
            restfreq: Some(vec![0.]),
            sfreq: Some(vec![1.4]),
            ..Default::default()
        };

        let layout = WindowLayout::rebuild(16, 1, 0, &vars, true, 64).unwrap();
        let w = &layout.windows()[0];
        assert_eq!(w.start_channel, 1);
        assert_eq!(w.n_channels, 16);
        assert_eq!(w.sideband(), Sideband::Undefined);
    }

    #[test]
    fn missing_layout_variables() {
        let mut vars = two_plus_wide();
        vars.sdf = None;
        assert!(matches!(
            WindowLayout::rebuild(6, 2, 1, &vars, true, 64),
            Err(FillerError::MissingLayoutVariable("sdf"))
        ));

        let mut vars = two_plus_wide();
        vars.restfreq = None;
        assert!(matches!(
            WindowLayout::rebuild(6, 2, 1, &vars, true, 64),
            Err(FillerError::MissingLayoutVariable("restfreq"))
        ));

        // no narrow windows, nothing required
        assert!(WindowLayout::rebuild(0, 0, 0, &LayoutVariables::default(), true, 64).is_ok());
    }

    #[test]
    fn windows_must_fit() {
        assert!(matches!(
            WindowLayout::rebuild(5, 2, 1, &two_plus_wide(), true, 64),
            Err(FillerError::MalformedVariable { .. })
        ));

        let mut vars = two_plus_wide();
        vars.nschan = Some(vec![2]);
        assert!(matches!(
            WindowLayout::rebuild(6, 2, 1, &vars, true, 64),
            Err(FillerError::MalformedVariable { .. })
        ));

        assert!(matches!(
            WindowLayout::rebuild(6, 2, 1, &two_plus_wide(), true, 2),
            Err(FillerError::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn shapes() {
        let a = WindowLayout::rebuild(6, 2, 1, &two_plus_wide(), true, 64).unwrap();
        let mut vars = two_plus_wide();
        vars.sfreq = Some(vec![115.1, 114.6]);
        let b = WindowLayout::rebuild(6, 2, 1, &vars, true, 64).unwrap();
        assert!(a.same_shape(&b));

        vars.nschan = Some(vec![3, 3]);
        vars.ischan = Some(vec![1, 4]);
        let c = WindowLayout::rebuild(6, 2, 1, &vars, true, 64).unwrap();
        assert!(!a.same_shape(&c));
    }

    #[test]
    fn channel_frequencies() {
        let layout = WindowLayout::rebuild(6, 2, 1, &two_plus_wide(), true, 64).unwrap();
        let f = layout.windows()[0].channel_frequencies_hz();
        assert_eq!(f.len(), 2);
        approx::assert_abs_diff_eq!(f[0], 115.0e9, epsilon = 1.);
        approx::assert_abs_diff_eq!(f[1], 114.99e9, epsilon = 1.);
        approx::assert_abs_diff_eq!(layout.windows()[1].total_bandwidth_hz(), 0.08e9, epsilon = 1.);
    }
}
