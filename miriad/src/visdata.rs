// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Access to MIRIAD "uv" data sets containing visibility data.

The `visdata` item is a stream of entries, each introduced by a four-byte
header naming a variable (by its index in `vartable`) and an entry kind.
SIZE entries announce how many bytes a variable occupies, DATA entries carry
its new value, and EOR entries end a record. Every entry is padded to an
eight-byte boundary. A variable keeps its value until it is overwritten, so
each record only carries what changed.

 */

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use mirfill_core::io::{EofReadExactExt, OpenResultExt};
use std::collections::HashMap;
use std::io::prelude::*;

use super::{AnyMiriadValue, DataSet, MiriadFormatError, MiriadMappedType, ReadStream, Type, WriteStream};

const ENTRY_SIZE: u8 = 0;
const ENTRY_DATA: u8 = 1;
const ENTRY_EOR: u8 = 2;

/// Entries in the visdata stream are padded to this many bytes.
const UV_ALIGN: usize = 8;

/// The visdata item starts with this many bytes of (zero) type header.
const VISDATA_HEADER_SIZE: usize = 4;

/// The maximum number of variables a uv data set can declare.
pub const MAX_VARIABLES: usize = 256;

#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum ObsType {
    Auto,
    Cross,
    MixedAutoCross,
}

impl ObsType {
    pub fn from_header(s: &str) -> Result<Self, MiriadFormatError> {
        if s.starts_with("auto") {
            Ok(ObsType::Auto)
        } else if s.starts_with("cross") {
            Ok(ObsType::Cross)
        } else if s.starts_with("mixed") {
            Ok(ObsType::MixedAutoCross)
        } else {
            Err(MiriadFormatError::generic(format!(
                "unexpected \"obstype\" value {s}"
            )))
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ObsType::Auto => "autocorrelation",
            ObsType::Cross => "crosscorrelation",
            ObsType::MixedAutoCross => "mixed-auto-cross",
        }
    }
}

/// Decode a MIRIAD baseline number into a pair of 1-based antenna numbers.
///
/// Baseline numbers above 65536 use the extended encoding that supports more
/// than 255 antennas.
pub fn decode_baseline(v: f32) -> Result<(usize, usize), MiriadFormatError> {
    let v = v.round() as i64;

    let (a1, a2) = if v > 65536 {
        let v = v - 65536;
        (v / 2048, v % 2048)
    } else {
        (v / 256, v % 256)
    };

    if a1 < 1 || a2 < 1 {
        return Err(MiriadFormatError::generic(format!(
            "illegal baseline number {v}"
        )));
    }

    Ok((a1 as usize, a2 as usize))
}

/// Encode a pair of 1-based antenna numbers into a MIRIAD baseline number.
pub fn encode_baseline(ant1: usize, ant2: usize) -> f32 {
    if ant1 > 255 || ant2 > 255 {
        (2048 * ant1 + ant2 + 65536) as f32
    } else {
        (256 * ant1 + ant2) as f32
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct UvVariable {
    name: String,
    ty: Type,
    sized: bool,
    data: Vec<u8>,
    update_count: u64,
}

impl UvVariable {
    fn new(ty: Type, name: &str) -> Self {
        UvVariable {
            name: name.to_owned(),
            ty,
            sized: false,
            data: Vec::new(),
            update_count: 0,
        }
    }

    fn reset(&mut self) {
        self.sized = false;
        self.data.clear();
        self.update_count = 0;
    }
}

/// An opaque handle to a uv variable, obtained from
/// `Decoder::lookup_variable`.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct UvVariableReference(usize);

/// A struct that holds state for reading visibility data out of a MIRIAD uv
/// dataset.
#[derive(Debug)]
pub struct Decoder {
    obstype: ObsType,
    vislen: u64,
    vars: Vec<UvVariable>,
    var_lookup: HashMap<String, usize>,
    stream: ReadStream,
    n_records: u64,
}

impl Decoder {
    pub fn create(ds: &mut DataSet) -> Result<Self, MiriadFormatError> {
        let obstype = match ds.get("obstype")? {
            Some(item) => ObsType::from_header(&item.read_scalar::<String>()?)?,
            None => ObsType::Cross,
        };

        // "vislen" is what we should use to determine when to stop reading,
        // rather than EOF: it saves datasets that have junk appended when a
        // data-taker crashes.
        let vislen = match ds.get("vislen")? {
            Some(item) => match item.read_any()?.to_i64_vec().as_deref() {
                Some([n]) if *n >= 0 => *n as u64,
                _ => {
                    return Err(MiriadFormatError::generic(
                        "\"vislen\" header item is not a non-negative integer",
                    ))
                }
            },
            None => u64::MAX,
        };

        let mut vars = Vec::new();
        let mut var_lookup = HashMap::new();

        let vartable = ds.get("vartable").require_found("uv variable table \"vartable\"")?;

        for maybe_line in vartable.into_lines()? {
            let line = maybe_line?;

            if line.trim().is_empty() {
                continue;
            }

            let pieces: Vec<_> = line.split_whitespace().collect();

            if pieces.len() != 2 {
                return Err(MiriadFormatError::generic(format!(
                    "illegal vartable line: {line}"
                )));
            }

            if vars.len() == MAX_VARIABLES {
                return Err(MiriadFormatError::generic("too many UV variables"));
            }

            let ty = Type::try_from_abbrev(pieces[0])?;
            var_lookup.insert(pieces[1].to_owned(), vars.len());
            vars.push(UvVariable::new(ty, pieces[1]));
        }

        let stream = ds
            .get("visdata")
            .require_found("uv data stream \"visdata\"")?
            .into_byte_stream()?;

        Ok(Decoder {
            obstype,
            vislen,
            vars,
            var_lookup,
            stream,
            n_records: 0,
        })
    }

    pub fn obstype(&self) -> ObsType {
        self.obstype
    }

    /// The number of meaningful bytes in the visdata stream, if known.
    pub fn visdata_bytes(&self) -> Option<u64> {
        (self.vislen != u64::MAX).then_some(self.vislen)
    }

    /// The current byte offset into the visdata stream.
    pub fn position(&self) -> u64 {
        self.stream.offset()
    }

    /// The number of complete records read since opening or rewinding.
    pub fn n_records_read(&self) -> u64 {
        self.n_records
    }

    pub fn lookup_variable(&self, name: &str) -> Option<UvVariableReference> {
        self.var_lookup.get(name).map(|i| UvVariableReference(*i))
    }

    pub fn variable_type(&self, var: UvVariableReference) -> Type {
        self.vars[var.0].ty
    }

    /// How many times the variable's value has been set since opening or
    /// rewinding. Zero means that it has not yet appeared in the stream.
    pub fn update_count(&self, var: UvVariableReference) -> u64 {
        self.vars[var.0].update_count
    }

    /// Decode the variable's current value into *dest*.
    pub fn get_data<T: MiriadMappedType>(
        &self,
        var: UvVariableReference,
        dest: &mut Vec<T>,
    ) -> Result<(), MiriadFormatError> {
        let v = &self.vars[var.0];

        if T::TYPE != v.ty {
            return Err(MiriadFormatError::generic(format!(
                "expected uv variable \"{}\" to be of type {}, but it is {}",
                v.name,
                T::TYPE,
                v.ty
            )));
        }

        T::decode_buf_into_vec(&v.data, dest);
        Ok(())
    }

    pub fn get_scalar<T: MiriadMappedType>(
        &self,
        var: UvVariableReference,
    ) -> Result<T, MiriadFormatError> {
        let mut vec = Vec::with_capacity(1);
        self.get_data(var, &mut vec)?;

        if vec.len() != 1 {
            return Err(MiriadFormatError::generic(format!(
                "expected scalar value for uv variable \"{}\" but got {}-element vector",
                self.vars[var.0].name,
                vec.len()
            )));
        }

        Ok(vec.swap_remove(0))
    }

    /// The variable's current value with its native type, or `None` if it
    /// has not yet appeared in the stream.
    pub fn get_any(&self, var: UvVariableReference) -> Option<AnyMiriadValue> {
        let v = &self.vars[var.0];
        (v.update_count > 0).then(|| AnyMiriadValue::from_type_and_buf(v.ty, &v.data))
    }

    /// Read the next record. Returns Ok(false) on EOF, Ok(true) if a record
    /// was read.
    pub fn next(&mut self) -> Result<bool, MiriadFormatError> {
        let mut header_buf = [0u8; 4];

        loop {
            if self.stream.offset() >= self.vislen {
                return Ok(false);
            }

            if !self.stream.eof_read_exact::<MiriadFormatError>(&mut header_buf)? {
                return Ok(false);
            }

            let varnum = header_buf[0] as usize;
            let entry_type = header_buf[2];

            if entry_type != ENTRY_EOR && varnum >= self.vars.len() {
                return Err(MiriadFormatError::generic(format!(
                    "invalid visdata: variable number {varnum} not in vartable"
                )));
            }

            match entry_type {
                ENTRY_SIZE => {
                    let var = &mut self.vars[varnum];
                    let n_bytes = self.stream.read_i32::<BigEndian>()?;

                    if n_bytes < 0 {
                        return Err(MiriadFormatError::generic(format!(
                            "invalid visdata: negative data size for \"{}\"",
                            var.name
                        )));
                    }

                    if n_bytes as usize % var.ty.size() != 0 {
                        return Err(MiriadFormatError::generic(format!(
                            "invalid visdata: non-integral number of elements in \"{}\"",
                            var.name
                        )));
                    }

                    var.data.resize(n_bytes as usize, 0);
                    var.sized = true;
                }

                ENTRY_DATA => {
                    let var = &mut self.vars[varnum];

                    if !var.sized {
                        return Err(MiriadFormatError::generic(format!(
                            "invalid visdata: data for \"{}\" before its size",
                            var.name
                        )));
                    }

                    self.stream.align_to(var.ty.alignment() as usize)?;
                    self.stream.read_exact(&mut var.data)?;
                    var.update_count += 1;
                }

                ENTRY_EOR => {
                    self.stream.align_to(UV_ALIGN)?;
                    self.n_records += 1;
                    return Ok(true);
                }

                z => {
                    return Err(MiriadFormatError::generic(format!(
                        "invalid visdata: unrecognized record code {z}"
                    )));
                }
            }

            self.stream.align_to(UV_ALIGN)?;
        }
    }

    /// Go back to the start of the stream. All variables return to their
    /// never-seen state.
    pub fn rewind(&mut self) -> Result<(), MiriadFormatError> {
        self.stream.rewind()?;
        let mut header = [0u8; VISDATA_HEADER_SIZE];
        self.stream.eof_read_exact::<MiriadFormatError>(&mut header)?;

        for v in &mut self.vars {
            v.reset();
        }

        self.n_records = 0;
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct EncoderVariable {
    name: String,
    ty: Type,
    n_bytes: Option<usize>,
}

/// A struct for writing a new MIRIAD uv data stream.
///
/// Variables are declared implicitly the first time they are written. The
/// size entry is only emitted when a variable's length changes.
#[derive(Debug)]
pub struct Encoder {
    obstype: ObsType,
    vars: Vec<EncoderVariable>,
    var_lookup: HashMap<String, usize>,
    stream: WriteStream,
    buf: Vec<u8>,
    ncorr: i64,
    nwcorr: i64,
}

impl Encoder {
    pub fn create(ds: &mut DataSet, obstype: ObsType) -> Result<Self, MiriadFormatError> {
        let mut stream = ds.create_large_item("visdata", Type::Binary)?;
        stream.write_all(&[0u8; VISDATA_HEADER_SIZE])?;

        Ok(Encoder {
            obstype,
            vars: Vec::new(),
            var_lookup: HashMap::new(),
            stream,
            buf: Vec::new(),
            ncorr: 0,
            nwcorr: 0,
        })
    }

    fn write_entry_header(&mut self, varnum: usize, entry_type: u8) -> Result<(), MiriadFormatError> {
        self.stream.write_all(&[varnum as u8, 0, entry_type, 0])?;
        Ok(())
    }

    fn declare(&mut self, name: &str, ty: Type) -> Result<usize, MiriadFormatError> {
        if let Some(i) = self.var_lookup.get(name) {
            let var = &self.vars[*i];

            if var.ty != ty {
                return Err(MiriadFormatError::generic(format!(
                    "uv variable \"{name}\" was declared as {} but written as {ty}",
                    var.ty
                )));
            }

            return Ok(*i);
        }

        if self.vars.len() == MAX_VARIABLES {
            return Err(MiriadFormatError::generic("too many UV variables"));
        }

        if name.is_empty() || name.len() > super::MAX_ITEM_NAME_LENGTH || name.contains(char::is_whitespace) {
            return Err(MiriadFormatError::generic(format!(
                "illegal uv variable name \"{name}\""
            )));
        }

        let i = self.vars.len();
        self.vars.push(EncoderVariable {
            name: name.to_owned(),
            ty,
            n_bytes: None,
        });
        self.var_lookup.insert(name.to_owned(), i);
        Ok(i)
    }

    /// Set the value of a uv variable within the current record.
    pub fn write<T: MiriadMappedType>(&mut self, name: &str, values: &[T]) -> Result<(), MiriadFormatError> {
        let varnum = self.declare(name, T::TYPE)?;
        let mut buf = std::mem::take(&mut self.buf);
        T::encode_values_into_vec(values, &mut buf);
        let n_bytes = buf.len();

        if self.vars[varnum].n_bytes != Some(n_bytes) {
            self.write_entry_header(varnum, ENTRY_SIZE)?;
            self.stream.write_i32::<BigEndian>(n_bytes as i32)?;
            self.stream.align_to(UV_ALIGN)?;
            self.vars[varnum].n_bytes = Some(n_bytes);
        }

        self.write_entry_header(varnum, ENTRY_DATA)?;
        self.stream.align_to(T::TYPE.alignment() as usize)?;
        self.stream.write_all(&buf)?;
        self.stream.align_to(UV_ALIGN)?;
        self.buf = buf;

        let count = T::get_miriad_count(values) as i64;

        match name {
            "corr" => self.ncorr += count,
            "wcorr" => self.nwcorr += count,
            _ => {}
        }

        Ok(())
    }

    pub fn write_scalar<T: MiriadMappedType>(&mut self, name: &str, value: T) -> Result<(), MiriadFormatError> {
        self.write(name, &[value])
    }

    pub fn finish_record(&mut self) -> Result<(), MiriadFormatError> {
        self.write_entry_header(0, ENTRY_EOR)?;
        self.stream.align_to(UV_ALIGN)?;
        Ok(())
    }

    /// Finish writing: flush the stream and record the variable table and
    /// bookkeeping header items in *ds*.
    pub fn close(mut self, ds: &mut DataSet) -> Result<(), MiriadFormatError> {
        self.stream.flush()?;
        let vislen = self.stream.offset() as i64;

        let mut vartable = ds.create_large_item("vartable", Type::Text)?;

        for var in &self.vars {
            writeln!(vartable, "{} {}", var.ty.abbrev_char(), var.name)?;
        }

        vartable.flush()?;

        ds.set_scalar_item("vislen", vislen)?;
        ds.set_scalar_item("ncorr", self.ncorr)?;
        ds.set_scalar_item("nwcorr", self.nwcorr)?;
        ds.set_small_item("obstype", &[self.obstype.as_str().to_owned()])?;
        ds.flush()
    }
}
