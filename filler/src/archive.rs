// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

The sequential source of visibility records.

`VisibilityArchive` is what the engine consumes. `MiriadArchive` implements
it on top of a MIRIAD uv data set. Metadata comes in as uv variables, each
with a version number that increases whenever the stream overwrites it, so
that callers can tell what changed since they last looked.

 */

use mirfill_core::Complex;
use mirfill_miriad::mask::MaskDecoder;
use mirfill_miriad::visdata::{decode_baseline, Decoder, UvVariableReference};
use mirfill_miriad::{AnyMiriadValue, DataSet, ReadStream, Type};
use std::path::Path;

use crate::error::{FillerError, Result};

/// One record of the uv stream: one baseline, one time, one polarization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VisibilityRecord {
    /// Baseline coordinates in nanoseconds, in the archive's sign convention.
    pub uvw: [f64; 3],

    /// Julian date.
    pub time: f64,

    /// 1-based antenna numbers.
    pub ant1: usize,
    pub ant2: usize,

    /// The MIRIAD polarization code.
    pub pol: i32,

    /// Spectral-line channels and their validity (true means good).
    pub corr: Vec<Complex<f32>>,
    pub flags: Vec<bool>,

    /// Wideband channels and their validity.
    pub wcorr: Vec<Complex<f32>>,
    pub wflags: Vec<bool>,
}

impl VisibilityRecord {
    pub fn n_channels(&self) -> usize {
        self.corr.len() + self.wcorr.len()
    }

    /// All samples, spectral-line first, paired with their validity.
    pub fn samples(&self) -> impl Iterator<Item = (Complex<f32>, bool)> + '_ {
        self.corr
            .iter()
            .zip(&self.flags)
            .chain(self.wcorr.iter().zip(&self.wflags))
            .map(|(v, f)| (*v, *f))
    }
}

pub trait VisibilityArchive {
    /// Go back to the first record. Variable versions start over.
    fn rewind(&mut self) -> Result<()>;

    /// Read the next record into *record*. Returns false at the end of the
    /// stream.
    fn read_record(&mut self, record: &mut VisibilityRecord) -> Result<bool>;

    /// `None` if the variable has not appeared in the stream yet; otherwise
    /// a number that changes every time the variable is rewritten.
    fn variable_version(&self, name: &str) -> Option<u64>;

    /// The current value of a variable, if it has appeared.
    fn variable(&self, name: &str) -> Option<AnyMiriadValue>;

    /// Whether the data set has an item with this name (e.g. calibration
    /// tables).
    fn has_item(&mut self, name: &str) -> Result<bool>;

    /// The lines of the data set's processing history.
    fn history(&mut self) -> Result<Vec<String>>;

    /// Bytes consumed so far and, if known, the total.
    fn progress(&self) -> (u64, Option<u64>) {
        (0, None)
    }
}

/// Typed access to archive variables, with MIRIAD's numeric types widened as
/// needed. `Ok(None)` means that the variable has not appeared.
pub trait ArchiveVariablesExt: VisibilityArchive {
    fn f64_values(&self, name: &str) -> Result<Option<Vec<f64>>> {
        match self.variable(name) {
            None => Ok(None),
            Some(v) => v
                .to_f64_vec()
                .map(Some)
                .ok_or_else(|| FillerError::malformed(name, format!("expected a number, got {}", v.type_()))),
        }
    }

    fn f64_value(&self, name: &str) -> Result<Option<f64>> {
        match self.f64_values(name)? {
            None => Ok(None),
            Some(v) => v
                .first()
                .copied()
                .map(Some)
                .ok_or_else(|| FillerError::malformed(name, "no value")),
        }
    }

    fn i64_values(&self, name: &str) -> Result<Option<Vec<i64>>> {
        match self.variable(name) {
            None => Ok(None),
            Some(v) => v
                .to_i64_vec()
                .map(Some)
                .ok_or_else(|| FillerError::malformed(name, format!("expected an integer, got {}", v.type_()))),
        }
    }

    fn i64_value(&self, name: &str) -> Result<Option<i64>> {
        match self.i64_values(name)? {
            None => Ok(None),
            Some(v) => v
                .first()
                .copied()
                .map(Some)
                .ok_or_else(|| FillerError::malformed(name, "no value")),
        }
    }

    /// Integer values that must be non-negative, such as counts.
    fn count_value(&self, name: &str) -> Result<Option<usize>> {
        match self.i64_value(name)? {
            None => Ok(None),
            Some(n) if n >= 0 => Ok(Some(n as usize)),
            Some(n) => Err(FillerError::malformed(name, format!("negative count {n}"))),
        }
    }

    fn text_value(&self, name: &str) -> Result<Option<String>> {
        match self.variable(name) {
            None => Ok(None),
            Some(v) => v
                .as_text()
                .map(|s| Some(s.trim().to_owned()))
                .ok_or_else(|| FillerError::malformed(name, format!("expected text, got {}", v.type_()))),
        }
    }
}

impl<A: VisibilityArchive + ?Sized> ArchiveVariablesExt for A {}

/// A `VisibilityArchive` backed by a MIRIAD uv data set on disk.
pub struct MiriadArchive {
    ds: DataSet,
    uv: Decoder,
    flags: Option<MaskDecoder<ReadStream>>,
    wflags: Option<MaskDecoder<ReadStream>>,
    max_channels: usize,
    scratch_f32: Vec<f32>,
    scratch_i16: Vec<i16>,
}

fn open_mask(ds: &mut DataSet, name: &str) -> Result<Option<MaskDecoder<ReadStream>>> {
    Ok(match ds.get(name)? {
        Some(item) => Some(MaskDecoder::new(item.into_byte_stream()?)),
        None => None,
    })
}

impl MiriadArchive {
    /// Open the data set at *path*. Records with more than *max_channels*
    /// channels are rejected.
    pub fn open<P: AsRef<Path>>(path: P, max_channels: usize) -> Result<Self> {
        let mut ds = DataSet::open(path.as_ref())?;
        let uv = ds.open_uv()?;
        let flags = open_mask(&mut ds, "flags")?;
        let wflags = open_mask(&mut ds, "wflags")?;

        Ok(MiriadArchive {
            ds,
            uv,
            flags,
            wflags,
            max_channels,
            scratch_f32: Vec::new(),
            scratch_i16: Vec::new(),
        })
    }

    /// Decode a correlation variable, which may be stored as complex
    /// values, float pairs, or scaled int16 pairs.
    fn read_correlations(&mut self, name: &str, dest: &mut Vec<Complex<f32>>) -> Result<()> {
        dest.clear();

        let var = match self.uv.lookup_variable(name) {
            Some(v) if self.uv.update_count(v) > 0 => v,
            _ => return Ok(()),
        };

        match self.uv.variable_type(var) {
            Type::Complex64 => self.uv.get_data(var, dest)?,

            Type::Float32 => {
                self.uv.get_data(var, &mut self.scratch_f32)?;
                dest.extend(
                    self.scratch_f32
                        .chunks_exact(2)
                        .map(|p| Complex::new(p[0], p[1])),
                );
            }

            Type::Int16 => {
                let scale = match self.uv.lookup_variable("tscale") {
                    Some(ts) if self.uv.update_count(ts) > 0 => self.uv.get_scalar::<f32>(ts)?,
                    _ => 1.0,
                };

                self.uv.get_data(var, &mut self.scratch_i16)?;
                dest.extend(
                    self.scratch_i16
                        .chunks_exact(2)
                        .map(|p| Complex::new(p[0] as f32 * scale, p[1] as f32 * scale)),
                );
            }

            other => {
                return Err(FillerError::malformed(
                    name,
                    format!("correlations cannot be stored as {other}"),
                ))
            }
        }

        Ok(())
    }

    fn scalar_var(&self, name: &'static str) -> Result<UvVariableReference> {
        match self.uv.lookup_variable(name) {
            Some(v) if self.uv.update_count(v) > 0 => Ok(v),
            _ => Err(FillerError::malformed(name, "missing from the uv stream")),
        }
    }
}

fn expand_flags(
    mask: &mut Option<MaskDecoder<ReadStream>>,
    n: usize,
    dest: &mut Vec<bool>,
) -> Result<()> {
    dest.clear();
    dest.resize(n, true);

    if let Some(dec) = mask {
        dec.expand(dest)?;
    }

    Ok(())
}

impl VisibilityArchive for MiriadArchive {
    fn rewind(&mut self) -> Result<()> {
        self.uv.rewind()?;
        self.flags = open_mask(&mut self.ds, "flags")?;
        self.wflags = open_mask(&mut self.ds, "wflags")?;
        Ok(())
    }

    fn read_record(&mut self, record: &mut VisibilityRecord) -> Result<bool> {
        if !self.uv.next()? {
            return Ok(false);
        }

        let mut coord = Vec::with_capacity(3);
        self.uv.get_data::<f64>(self.scalar_var("coord")?, &mut coord)?;

        if coord.len() < 2 {
            return Err(FillerError::malformed("coord", "need at least u and v"));
        }

        record.uvw = [coord[0], coord[1], coord.get(2).copied().unwrap_or(0.0)];
        record.time = self.uv.get_scalar::<f64>(self.scalar_var("time")?)?;

        let bl = self.uv.get_scalar::<f32>(self.scalar_var("baseline")?)?;
        let (ant1, ant2) = decode_baseline(bl)?;
        record.ant1 = ant1;
        record.ant2 = ant2;

        // MIRIAD defaults to Stokes I when there is no "pol" variable.
        record.pol = match self.uv.lookup_variable("pol") {
            Some(v) if self.uv.update_count(v) > 0 => self.uv.get_scalar::<i32>(v)?,
            _ => 1,
        };

        let mut corr = std::mem::take(&mut record.corr);
        let mut wcorr = std::mem::take(&mut record.wcorr);
        self.read_correlations("corr", &mut corr)?;
        self.read_correlations("wcorr", &mut wcorr)?;
        record.corr = corr;
        record.wcorr = wcorr;

        if record.n_channels() > self.max_channels {
            return Err(FillerError::CapacityExceeded {
                what: "channels",
                limit: self.max_channels,
            });
        }

        expand_flags(&mut self.flags, record.corr.len(), &mut record.flags)?;
        expand_flags(&mut self.wflags, record.wcorr.len(), &mut record.wflags)?;
        Ok(true)
    }

    fn variable_version(&self, name: &str) -> Option<u64> {
        let var = self.uv.lookup_variable(name)?;
        let count = self.uv.update_count(var);
        (count > 0).then_some(count)
    }

    fn variable(&self, name: &str) -> Option<AnyMiriadValue> {
        self.uv.get_any(self.uv.lookup_variable(name)?)
    }

    fn has_item(&mut self, name: &str) -> Result<bool> {
        Ok(self.ds.has_item(name)?)
    }

    fn history(&mut self) -> Result<Vec<String>> {
        let item = match self.ds.get("history")? {
            Some(item) => item,
            None => return Ok(Vec::new()),
        };

        let mut lines = Vec::new();

        for line in item.into_lines()? {
            lines.push(line?);
        }

        Ok(lines)
    }

    fn progress(&self) -> (u64, Option<u64>) {
        (self.uv.position(), self.uv.visdata_bytes())
    }
}
