// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

//! Access to MIRIAD-format data sets.
//!
//! A data set is a directory. Small "items" live together in a file named
//! `header`; large items are files of their own that start with a four-byte
//! type code. Everything is big-endian.

use byteorder::{BigEndian, ByteOrder, ReadBytesExt, WriteBytesExt};
use mirfill_core::io::{AligningReader, AligningWriter, EofReadExactExt};
use mirfill_core::Complex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;
use thiserror::Error;

pub mod mask;
pub mod visdata;

/// The maximum length of the name of a dataset "item", in bytes.
pub const MAX_ITEM_NAME_LENGTH: usize = 8;

/// The largest payload a small (header) item may carry.
pub const MAX_SMALL_ITEM_BYTES: usize = 64;

#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub enum Type {
    Binary = 0,
    Int8 = 1,
    Int32 = 2,
    Int16 = 3,
    Float32 = 4,
    Float64 = 5,
    Text = 6,
    Complex64 = 7,
    Int64 = 8,
}

/// An error type for when a MIRIAD file is malformed.
#[derive(Error, Debug)]
pub enum MiriadFormatError {
    #[error("{0}")]
    Generic(String),

    #[error(transparent)]
    IO(#[from] std::io::Error),

    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
}

impl MiriadFormatError {
    pub(crate) fn generic<S: Into<String>>(msg: S) -> Self {
        MiriadFormatError::Generic(msg.into())
    }
}

impl Type {
    pub fn try_from_i32(type_code: i32) -> Result<Self, MiriadFormatError> {
        Ok(match type_code {
            0 => Type::Binary,
            1 => Type::Int8,
            2 => Type::Int32,
            3 => Type::Int16,
            4 => Type::Float32,
            5 => Type::Float64,
            6 => Type::Text,
            7 => Type::Complex64,
            8 => Type::Int64,
            _ => {
                return Err(MiriadFormatError::generic(format!(
                    "illegal MIRIAD type code {type_code}"
                )))
            }
        })
    }

    /// Parse the one-letter abbreviations used in uv `vartable` items.
    pub fn try_from_abbrev(abbrev: &str) -> Result<Self, MiriadFormatError> {
        Ok(match abbrev {
            "b" => Type::Int8,
            "j" => Type::Int16,
            "i" => Type::Int32,
            "l" => Type::Int64,
            "r" => Type::Float32,
            "d" => Type::Float64,
            "c" => Type::Complex64,
            "a" => Type::Text,
            _ => {
                return Err(MiriadFormatError::generic(format!(
                    "illegal MIRIAD type abbreviation {abbrev}"
                )))
            }
        })
    }

    pub fn abbrev_char(&self) -> char {
        match *self {
            Type::Binary => '?',
            Type::Int8 => 'b',
            Type::Int16 => 'j',
            Type::Int32 => 'i',
            Type::Int64 => 'l',
            Type::Float32 => 'r',
            Type::Float64 => 'd',
            Type::Complex64 => 'c',
            Type::Text => 'a',
        }
    }

    pub fn size(&self) -> usize {
        match *self {
            Type::Binary | Type::Int8 | Type::Text => 1,
            Type::Int16 => 2,
            Type::Int32 | Type::Float32 => 4,
            Type::Int64 | Type::Float64 | Type::Complex64 => 8,
        }
    }

    pub fn alignment(&self) -> u8 {
        match *self {
            Type::Binary | Type::Int8 | Type::Text => 1,
            Type::Int16 => 2,
            Type::Int32 | Type::Float32 => 4,
            Type::Int64 | Type::Float64 => 8,
            Type::Complex64 => 4, // this is the only surprising one
        }
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.pad(match *self {
            Type::Binary => "binary",
            Type::Int8 => "int8",
            Type::Int16 => "int16",
            Type::Int32 => "int32",
            Type::Int64 => "int64",
            Type::Float32 => "float32",
            Type::Float64 => "float64",
            Type::Complex64 => "complex64",
            Type::Text => "text",
        })
    }
}

/// This trait marks that the given type maps onto a type defined in the
/// MIRIAD data format.
pub trait MiriadMappedType: Sized {
    /// The particular MIRIAD `Type` to which this Rust type maps.
    const TYPE: Type;

    fn vec_from_miriad_reader<R: Read>(stream: R) -> Result<Vec<Self>, io::Error>;

    fn vec_from_miriad_bytes(buf: &[u8]) -> Result<Vec<Self>, io::Error> {
        Self::vec_from_miriad_reader(io::Cursor::new(buf))
    }

    fn decode_buf_into_vec(buf: &[u8], vec: &mut Vec<Self>);

    fn encode_values_into_vec(values: &[Self], vec: &mut Vec<u8>);

    /// How many MIRIAD elements *values* occupies. This only differs from
    /// the slice length for text.
    fn get_miriad_count(values: &[Self]) -> usize {
        values.len()
    }
}

impl MiriadMappedType for u8 {
    const TYPE: Type = Type::Binary;

    fn vec_from_miriad_reader<R: Read>(mut stream: R) -> Result<Vec<Self>, io::Error> {
        let mut val = Vec::new();
        stream.read_to_end(&mut val)?;
        Ok(val)
    }

    fn decode_buf_into_vec(buf: &[u8], vec: &mut Vec<Self>) {
        vec.clear();
        vec.extend_from_slice(buf);
    }

    fn encode_values_into_vec(values: &[Self], vec: &mut Vec<u8>) {
        vec.clear();
        vec.extend_from_slice(values);
    }
}

impl MiriadMappedType for i8 {
    const TYPE: Type = Type::Int8;

    fn vec_from_miriad_reader<R: Read>(stream: R) -> Result<Vec<Self>, io::Error> {
        Ok(u8::vec_from_miriad_reader(stream)?
            .into_iter()
            .map(|b| b as i8)
            .collect())
    }

    fn decode_buf_into_vec(buf: &[u8], vec: &mut Vec<Self>) {
        vec.clear();
        vec.extend(buf.iter().map(|b| *b as i8));
    }

    fn encode_values_into_vec(values: &[Self], vec: &mut Vec<u8>) {
        vec.clear();
        vec.extend(values.iter().map(|b| *b as u8));
    }
}

macro_rules! impl_numeric_mapped_type {
    ($ty:ty, $mtype:expr, $size:expr, $read:ident, $write:ident, $eof_read:ident) => {
        impl MiriadMappedType for $ty {
            const TYPE: Type = $mtype;

            fn vec_from_miriad_reader<R: Read>(mut stream: R) -> Result<Vec<Self>, io::Error> {
                let mut val = Vec::new();

                while let Some(n) = stream.$eof_read::<io::Error>()? {
                    val.push(n);
                }

                Ok(val)
            }

            fn decode_buf_into_vec(buf: &[u8], vec: &mut Vec<Self>) {
                vec.clear();
                vec.extend(buf.chunks_exact($size).map(BigEndian::$read));
            }

            fn encode_values_into_vec(values: &[Self], vec: &mut Vec<u8>) {
                vec.clear();
                vec.resize($size * values.len(), 0);

                for (chunk, v) in vec.chunks_exact_mut($size).zip(values) {
                    BigEndian::$write(chunk, *v);
                }
            }
        }
    };
}

impl_numeric_mapped_type!(i16, Type::Int16, 2, read_i16, write_i16, eof_read_be_i16);
impl_numeric_mapped_type!(i32, Type::Int32, 4, read_i32, write_i32, eof_read_be_i32);
impl_numeric_mapped_type!(i64, Type::Int64, 8, read_i64, write_i64, eof_read_be_i64);
impl_numeric_mapped_type!(f32, Type::Float32, 4, read_f32, write_f32, eof_read_be_f32);
impl_numeric_mapped_type!(f64, Type::Float64, 8, read_f64, write_f64, eof_read_be_f64);

impl MiriadMappedType for Complex<f32> {
    const TYPE: Type = Type::Complex64;

    fn vec_from_miriad_reader<R: Read>(mut stream: R) -> Result<Vec<Self>, io::Error> {
        let mut val = Vec::new();

        while let Some(x) = stream.eof_read_be_c64::<io::Error>()? {
            val.push(x);
        }

        Ok(val)
    }

    fn decode_buf_into_vec(buf: &[u8], vec: &mut Vec<Self>) {
        vec.clear();
        vec.extend(buf.chunks_exact(8).map(|chunk| {
            Complex::new(
                BigEndian::read_f32(&chunk[..4]),
                BigEndian::read_f32(&chunk[4..]),
            )
        }));
    }

    fn encode_values_into_vec(values: &[Self], vec: &mut Vec<u8>) {
        vec.clear();
        vec.resize(8 * values.len(), 0);

        for (chunk, v) in vec.chunks_exact_mut(8).zip(values) {
            BigEndian::write_f32(&mut chunk[..4], v.re);
            BigEndian::write_f32(&mut chunk[4..], v.im);
        }
    }
}

/// Text maps onto a single `String`. Decoding always yields a one-element
/// vector; encoding concatenates whatever it is given.
impl MiriadMappedType for String {
    const TYPE: Type = Type::Text;

    fn vec_from_miriad_reader<R: Read>(mut stream: R) -> Result<Vec<Self>, io::Error> {
        let mut val = String::new();
        stream.read_to_string(&mut val)?;
        Ok(vec![val])
    }

    fn decode_buf_into_vec(buf: &[u8], vec: &mut Vec<Self>) {
        vec.clear();
        vec.push(String::from_utf8_lossy(buf).into_owned());
    }

    fn encode_values_into_vec(values: &[Self], vec: &mut Vec<u8>) {
        vec.clear();

        for v in values {
            vec.extend_from_slice(v.as_bytes());
        }
    }

    fn get_miriad_count(values: &[Self]) -> usize {
        values.iter().map(|v| v.len()).sum()
    }
}

/// A value of any MIRIAD type, as decoded from a header item or a uv
/// variable whose type is only known at runtime.
#[derive(Clone, Debug, PartialEq)]
pub enum AnyMiriadValue {
    Binary(Vec<u8>),
    Int8(Vec<i8>),
    Int16(Vec<i16>),
    Int32(Vec<i32>),
    Int64(Vec<i64>),
    Float32(Vec<f32>),
    Float64(Vec<f64>),
    Complex64(Vec<Complex<f32>>),
    Text(String),
}

fn decode_vec<T: MiriadMappedType>(buf: &[u8]) -> Vec<T> {
    let mut vec = Vec::new();
    T::decode_buf_into_vec(buf, &mut vec);
    vec
}

impl AnyMiriadValue {
    pub fn from_type_and_buf(ty: Type, buf: &[u8]) -> Self {
        match ty {
            Type::Binary => AnyMiriadValue::Binary(decode_vec(buf)),
            Type::Int8 => AnyMiriadValue::Int8(decode_vec(buf)),
            Type::Int16 => AnyMiriadValue::Int16(decode_vec(buf)),
            Type::Int32 => AnyMiriadValue::Int32(decode_vec(buf)),
            Type::Int64 => AnyMiriadValue::Int64(decode_vec(buf)),
            Type::Float32 => AnyMiriadValue::Float32(decode_vec(buf)),
            Type::Float64 => AnyMiriadValue::Float64(decode_vec(buf)),
            Type::Complex64 => AnyMiriadValue::Complex64(decode_vec(buf)),
            Type::Text => AnyMiriadValue::Text(String::from_utf8_lossy(buf).into_owned()),
        }
    }

    pub fn type_(&self) -> Type {
        match self {
            AnyMiriadValue::Binary(_) => Type::Binary,
            AnyMiriadValue::Int8(_) => Type::Int8,
            AnyMiriadValue::Int16(_) => Type::Int16,
            AnyMiriadValue::Int32(_) => Type::Int32,
            AnyMiriadValue::Int64(_) => Type::Int64,
            AnyMiriadValue::Float32(_) => Type::Float32,
            AnyMiriadValue::Float64(_) => Type::Float64,
            AnyMiriadValue::Complex64(_) => Type::Complex64,
            AnyMiriadValue::Text(_) => Type::Text,
        }
    }

    /// Number of elements; text counts as one.
    pub fn len(&self) -> usize {
        match self {
            AnyMiriadValue::Binary(v) => v.len(),
            AnyMiriadValue::Int8(v) => v.len(),
            AnyMiriadValue::Int16(v) => v.len(),
            AnyMiriadValue::Int32(v) => v.len(),
            AnyMiriadValue::Int64(v) => v.len(),
            AnyMiriadValue::Float32(v) => v.len(),
            AnyMiriadValue::Float64(v) => v.len(),
            AnyMiriadValue::Complex64(v) => v.len(),
            AnyMiriadValue::Text(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Widen a real-valued numeric value to `f64`. Text and complex values
    /// yield `None`.
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        Some(match self {
            AnyMiriadValue::Int8(v) => v.iter().map(|x| *x as f64).collect(),
            AnyMiriadValue::Int16(v) => v.iter().map(|x| *x as f64).collect(),
            AnyMiriadValue::Int32(v) => v.iter().map(|x| *x as f64).collect(),
            AnyMiriadValue::Int64(v) => v.iter().map(|x| *x as f64).collect(),
            AnyMiriadValue::Float32(v) => v.iter().map(|x| *x as f64).collect(),
            AnyMiriadValue::Float64(v) => v.clone(),
            _ => return None,
        })
    }

    /// Convert an integer-valued value to `i64`. Floating-point, complex, and
    /// text values yield `None`.
    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        Some(match self {
            AnyMiriadValue::Int8(v) => v.iter().map(|x| *x as i64).collect(),
            AnyMiriadValue::Int16(v) => v.iter().map(|x| *x as i64).collect(),
            AnyMiriadValue::Int32(v) => v.iter().map(|x| *x as i64).collect(),
            AnyMiriadValue::Int64(v) => v.clone(),
            _ => return None,
        })
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AnyMiriadValue::Text(s) => Some(s.trim_end_matches('\0')),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnyMiriadValue {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        fn do_vec<T: std::fmt::Display>(
            f: &mut std::fmt::Formatter,
            vec: &[T],
        ) -> std::fmt::Result {
            if vec.len() == 1 {
                return write!(f, "{}", vec[0]);
            }

            f.write_str("[")?;

            for (i, item) in vec.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }

                write!(f, "{item}")?;
            }

            f.write_str("]")
        }

        match self {
            AnyMiriadValue::Binary(vec) => do_vec(f, vec),
            AnyMiriadValue::Int8(vec) => do_vec(f, vec),
            AnyMiriadValue::Int16(vec) => do_vec(f, vec),
            AnyMiriadValue::Int32(vec) => do_vec(f, vec),
            AnyMiriadValue::Int64(vec) => do_vec(f, vec),
            AnyMiriadValue::Float32(vec) => do_vec(f, vec),
            AnyMiriadValue::Float64(vec) => do_vec(f, vec),
            AnyMiriadValue::Complex64(vec) => do_vec(f, vec),
            AnyMiriadValue::Text(s) => write!(f, "\"{s}\""),
        }
    }
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
enum ItemStorage {
    Small(Vec<u8>),
    Large(usize),
}

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
struct InternalItemInfo {
    pub ty: Type,
    pub storage: ItemStorage,
}

impl InternalItemInfo {
    pub fn new_small(ty: Type, data: Vec<u8>) -> Self {
        InternalItemInfo {
            ty,
            storage: ItemStorage::Small(data),
        }
    }

    pub fn new_large(dir: &mut openat::Dir, name: &str) -> Result<Self, MiriadFormatError> {
        let f = dir.open_file(name)?;
        let mut head = Vec::with_capacity(4);
        (&f).take(4).read_to_end(&mut head)?;

        let is_text = |bytes: &[u8]| bytes.iter().all(|c| (0x20..=0x7e).contains(c) || *c == b'\n');
        let mut size_offset = 0;

        let ty = if head.len() < 4 {
            // Too short for a type header. Empty items are text that was
            // never written to, such as the vartable of an empty uv stream.
            if is_text(&head) {
                Type::Text
            } else {
                Type::Binary
            }
        } else {
            match Type::try_from_i32(BigEndian::read_i32(&head)) {
                // The type code is padded out to the element alignment.
                Ok(t) => {
                    size_offset = std::cmp::max(4, t.alignment()) as u64;
                    t
                }

                // Probably text (e.g. "history"). We test for ASCII
                // printability, which might not be quite right.
                Err(_) if is_text(&head) => Type::Text,
                Err(_) => Type::Binary,
            }
        };

        let file_size = f.metadata()?.len();
        let data_size = file_size.saturating_sub(size_offset);

        if data_size % ty.size() as u64 != 0 {
            return Err(MiriadFormatError::generic(format!(
                "non-integral number of elements in {name}"
            )));
        }

        Ok(InternalItemInfo {
            ty,
            storage: ItemStorage::Large((data_size / ty.size() as u64) as usize),
        })
    }

    pub fn n_vals(&self) -> usize {
        if self.ty == Type::Text {
            1
        } else {
            match self.storage {
                ItemStorage::Small(ref data) => data.len() / self.ty.size(),
                ItemStorage::Large(n) => n,
            }
        }
    }
}

pub type ReadStream = AligningReader<io::BufReader<fs::File>>;
pub type WriteStream = AligningWriter<io::BufWriter<fs::File>>;

#[derive(Debug)]
pub struct Item<'a> {
    dset: &'a DataSet,
    name: &'a str,
    info: &'a InternalItemInfo,
}

impl Item<'_> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn is_large(&self) -> bool {
        matches!(self.info.storage, ItemStorage::Large(_))
    }

    pub fn type_(&self) -> Type {
        self.info.ty
    }

    pub fn n_vals(&self) -> usize {
        self.info.n_vals()
    }

    pub fn read_vector<T: MiriadMappedType>(&self) -> Result<Vec<T>, MiriadFormatError> {
        if T::TYPE != self.info.ty {
            return Err(MiriadFormatError::generic(format!(
                "expected item \"{}\" to be of type {}, but found {}",
                self.name,
                T::TYPE,
                self.info.ty
            )));
        }

        let v = match self.info.storage {
            ItemStorage::Small(ref data) => T::vec_from_miriad_bytes(data)?,
            ItemStorage::Large(_) => {
                let mut f = self.dset.dir.open_file(self.name)?;

                if self.info.ty != Type::Text {
                    let align = std::cmp::max(4, self.info.ty.alignment()) as usize;
                    let mut align_buf = [0u8; 8];
                    f.read_exact(&mut align_buf[..align])?;
                }

                T::vec_from_miriad_reader(f)?
            }
        };

        Ok(v)
    }

    pub fn read_scalar<T: MiriadMappedType>(&self) -> Result<T, MiriadFormatError> {
        let mut vec = self.read_vector()?;

        if vec.len() != 1 {
            return Err(MiriadFormatError::generic(format!(
                "expected scalar value for {} but got {}-element vector",
                self.name,
                vec.len()
            )));
        }

        Ok(vec.swap_remove(0))
    }

    /// Read the item whatever its type happens to be.
    pub fn read_any(&self) -> Result<AnyMiriadValue, MiriadFormatError> {
        match self.info.storage {
            ItemStorage::Small(ref data) => Ok(AnyMiriadValue::from_type_and_buf(self.info.ty, data)),
            ItemStorage::Large(_) => {
                let mut buf = Vec::new();
                self.dset.dir.open_file(self.name)?.read_to_end(&mut buf)?;
                let skip = if self.info.ty == Type::Text {
                    0
                } else {
                    std::cmp::max(4, self.info.ty.alignment()) as usize
                };
                Ok(AnyMiriadValue::from_type_and_buf(
                    self.info.ty,
                    buf.get(skip..).unwrap_or_default(),
                ))
            }
        }
    }

    pub fn into_lines(self) -> Result<io::Lines<io::BufReader<fs::File>>, MiriadFormatError> {
        if self.info.ty != Type::Text {
            return Err(MiriadFormatError::generic(format!(
                "cannot read lines of non-text item {}",
                self.name
            )));
        }

        if let ItemStorage::Small(_) = self.info.storage {
            return Err(MiriadFormatError::generic(format!(
                "cannot read lines of small text item {}",
                self.name
            )));
        }

        // Text items have no type header so there is nothing to skip.
        Ok(io::BufReader::new(self.dset.dir.open_file(self.name)?).lines())
    }

    pub fn into_byte_stream(self) -> Result<ReadStream, MiriadFormatError> {
        if let ItemStorage::Small(_) = self.info.storage {
            return Err(MiriadFormatError::generic(format!(
                "cannot turn small item {} into byte stream",
                self.name
            )));
        }

        let f = self.dset.dir.open_file(self.name)?;
        let mut ar = AligningReader::new(io::BufReader::new(f));

        // Skip the type header, which is padded out to the element
        // alignment. Offsets stay relative to the start of the file.
        if self.info.ty != Type::Text {
            let mut header = [0u8; 16];
            let n = std::cmp::max(4, self.info.ty.alignment()) as usize;
            ar.eof_read_exact::<MiriadFormatError>(&mut header[..n])?;
        }

        Ok(ar)
    }
}

#[derive(Debug)]
pub struct DataSet {
    dir: openat::Dir,
    items: HashMap<String, InternalItemInfo>,
    large_items_scanned: bool,
    needs_flush: bool,
}

impl DataSet {
    pub fn open<P: openat::AsPath>(path: P) -> Result<Self, MiriadFormatError> {
        let mut ds = DataSet {
            dir: openat::Dir::open(path)?,
            items: HashMap::new(),
            large_items_scanned: false,
            needs_flush: false,
        };

        let mut header = AligningReader::new(io::BufReader::new(ds.dir.open_file("header")?));
        let mut buf = [0u8; 16];

        loop {
            if !header.eof_read_exact::<io::Error>(&mut buf)? {
                break; // no more data
            }

            // First 15 bytes are the NUL-padded item name, last byte is the
            // "aligned length" of what follows.

            let name_len = buf[..15].iter().position(|b| *b == 0).unwrap_or(15);
            let aligned_len = buf[15] as usize;
            let name = std::str::from_utf8(&buf[..name_len])?;

            let (ty, data) = if aligned_len == 0 {
                (Type::Binary, Vec::new())
            } else {
                let type_code = header.read_i32::<BigEndian>()?;
                let mut ty = Type::try_from_i32(type_code)?;

                // Textual header items are stored as arrays of int8's.
                if ty == Type::Int8 && aligned_len > 5 {
                    ty = Type::Text;
                }

                // The header-writing code aligns based on the type sizes, not
                // the type alignment values.
                let align = std::cmp::max(4, ty.size());
                header.align_to(align)?;

                let n_bytes = aligned_len.checked_sub(align).ok_or_else(|| {
                    MiriadFormatError::generic(format!("illegal header entry size for {name}"))
                })?;

                if n_bytes % ty.size() != 0 {
                    return Err(MiriadFormatError::generic(format!(
                        "illegal array size {n_bytes} for type {ty} in header item {name}"
                    )));
                }

                let mut data = vec![0; n_bytes];
                header.read_exact(&mut data[..])?;
                (ty, data)
            };

            ds.items
                .insert(name.to_owned(), InternalItemInfo::new_small(ty, data));
            header.align_to(16)?;
        }

        Ok(ds)
    }

    /// Create a new, empty data set at *path*. The directory must not
    /// already exist.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, MiriadFormatError> {
        let path = path.as_ref();
        fs::create_dir(path)?;
        let dir = openat::Dir::open(path)?;
        dir.write_file("header", 0o666)?;

        Ok(DataSet {
            dir,
            items: HashMap::new(),
            large_items_scanned: true,
            needs_flush: true,
        })
    }

    fn scan_large_items(&mut self) -> Result<(), MiriadFormatError> {
        for maybe_item in self.dir.list_dir(".")? {
            let item = maybe_item?;

            if let Some(s) = item.file_name().to_str() {
                if s == "header" || s.starts_with('.') {
                    continue;
                }

                let iii = InternalItemInfo::new_large(&mut self.dir, s)?;
                self.items.insert(s.to_owned(), iii);
            }
        }

        self.large_items_scanned = true;
        Ok(())
    }

    /// Get a handle to an item in this data set, or `None` if there is no
    /// such item.
    pub fn get<'a>(
        &'a mut self,
        item_name: &'a str,
    ) -> Result<Option<Item<'a>>, MiriadFormatError> {
        if !self.items.contains_key(item_name) {
            // Assume it's an as-yet-unprobed large item on the filesystem.
            match InternalItemInfo::new_large(&mut self.dir, item_name) {
                Ok(iii) => {
                    self.items.insert(item_name.to_owned(), iii);
                }
                Err(MiriadFormatError::IO(ref ioe)) if ioe.kind() == io::ErrorKind::NotFound => {
                    // Don't bother to cache negative results.
                    return Ok(None);
                }
                Err(e) => return Err(e),
            }
        }

        let dset: &'a DataSet = self;
        Ok(dset.items.get(item_name).map(|info| Item {
            dset,
            name: item_name,
            info,
        }))
    }

    pub fn has_item(&mut self, item_name: &str) -> Result<bool, MiriadFormatError> {
        Ok(self.get(item_name)?.is_some())
    }

    pub fn open_uv(&mut self) -> Result<visdata::Decoder, MiriadFormatError> {
        visdata::Decoder::create(self)
    }

    pub fn new_uv(
        &mut self,
        obstype: visdata::ObsType,
    ) -> Result<visdata::Encoder, MiriadFormatError> {
        visdata::Encoder::create(self, obstype)
    }

    pub fn create_large_item(
        &mut self,
        name: &str,
        ty: Type,
    ) -> Result<WriteStream, MiriadFormatError> {
        if name == "header" {
            return Err(MiriadFormatError::generic(
                "cannot create an item named \"header\"",
            ));
        }

        let name_bytes = name.as_bytes();

        if name_bytes.len() > MAX_ITEM_NAME_LENGTH {
            return Err(MiriadFormatError::generic(format!(
                "cannot create an item with a name longer than {MAX_ITEM_NAME_LENGTH} bytes"
            )));
        }

        if !name_bytes.is_ascii() {
            return Err(MiriadFormatError::generic(
                "cannot create an item with a non-ASCII name",
            ));
        }

        let mut stream = AligningWriter::new(io::BufWriter::new(self.dir.write_file(name, 0o666)?));

        match ty {
            Type::Text | Type::Binary => {}
            _ => {
                stream.write_i32::<BigEndian>(ty as i32)?;
            }
        }

        self.items.insert(
            name.to_owned(),
            InternalItemInfo {
                ty,
                storage: ItemStorage::Large(0), // size unknown until written
            },
        );

        Ok(stream)
    }

    pub fn set_small_item<T: MiriadMappedType>(
        &mut self,
        name: &str,
        values: &[T],
    ) -> Result<(), MiriadFormatError> {
        // Ensure that we don't create a small item that masks a large one.
        if !self.large_items_scanned {
            self.scan_large_items()?;
        }

        if name.is_empty() || name.len() > 15 || !name.is_ascii() {
            return Err(MiriadFormatError::generic(format!(
                "illegal header item name \"{name}\""
            )));
        }

        let iii = self
            .items
            .entry(name.to_owned())
            .or_insert_with(|| InternalItemInfo::new_small(T::TYPE, Vec::new()));

        match iii.storage {
            ItemStorage::Small(ref mut data) => {
                T::encode_values_into_vec(values, data);

                if data.len() > MAX_SMALL_ITEM_BYTES {
                    return Err(MiriadFormatError::generic(format!(
                        "value for \"{name}\" too large to be stored as a small MIRIAD header item"
                    )));
                }
            }

            ItemStorage::Large(_) => {
                return Err(MiriadFormatError::generic(format!(
                    "cannot set \"{name}\" as a small item; would mask an existing large item"
                )));
            }
        }

        iii.ty = T::TYPE;
        self.needs_flush = true;
        Ok(())
    }

    pub fn set_scalar_item<T: MiriadMappedType>(
        &mut self,
        name: &str,
        value: T,
    ) -> Result<(), MiriadFormatError> {
        self.set_small_item(name, &[value])
    }

    /// Flush any pending changes to the overall dataset. In particular, this
    /// means that the "header" file is rewritten.
    pub fn flush(&mut self) -> Result<(), MiriadFormatError> {
        if !self.needs_flush {
            return Ok(());
        }

        let mut stream =
            AligningWriter::new(io::BufWriter::new(self.dir.write_file("header", 0o666)?));

        let mut names: Vec<_> = self.items.keys().collect();
        names.sort();

        for name in names {
            let item = &self.items[name];

            if let ItemStorage::Small(ref data) = item.storage {
                let mut buf = [0u8; 16];
                stream.align_to(16)?;

                let name_bytes = name.as_bytes();
                buf[..name_bytes.len()].copy_from_slice(name_bytes);

                if data.is_empty() {
                    // Data-free items are allowed and have no type indicator.
                    stream.write_all(&buf)?;
                    continue;
                }

                // Text is stored on disk as int8.
                let disk_type = if item.ty == Type::Text {
                    Type::Int8
                } else {
                    item.ty
                };

                let alignment = std::cmp::max(4, item.ty.size());
                let excess = (stream.offset() as usize + 4) % alignment;
                let n_alignment_bytes = if excess == 0 { 0 } else { alignment - excess };

                buf[15] = (4 + n_alignment_bytes + data.len()) as u8;
                stream.write_all(&buf)?;
                stream.write_i32::<BigEndian>(disk_type as i32)?;
                stream.write_all(&[0u8; 8][..n_alignment_bytes])?;
                stream.write_all(data)?;
            }
        }

        stream.flush()?;
        self.needs_flush = false;
        Ok(())
    }
}

impl Drop for DataSet {
    fn drop(&mut self) {
        // cf: https://github.com/rust-lang/rust/issues/32677
        let _r = self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_items_survive_a_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ds.uv");

        {
            let mut ds = DataSet::create(&path).unwrap();
            ds.set_scalar_item("vislen", 1234i64).unwrap();
            ds.set_scalar_item("ncorr", 7i32).unwrap();
            ds.set_scalar_item("epoch", 2000.5f64).unwrap();
            ds.set_small_item("obstype", &["cross".to_owned()]).unwrap();
            ds.flush().unwrap();
        }

        let mut ds = DataSet::open(&path).unwrap();
        assert_eq!(
            ds.get("vislen").unwrap().unwrap().read_scalar::<i64>().unwrap(),
            1234
        );
        assert_eq!(ds.get("ncorr").unwrap().unwrap().read_scalar::<i32>().unwrap(), 7);
        assert_eq!(
            ds.get("epoch").unwrap().unwrap().read_scalar::<f64>().unwrap(),
            2000.5
        );
        assert_eq!(
            ds.get("obstype").unwrap().unwrap().read_scalar::<String>().unwrap(),
            "cross"
        );
        assert!(ds.get("nosuch").unwrap().is_none());
    }

    #[test]
    fn type_mismatch_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ds.uv");
        let mut ds = DataSet::create(&path).unwrap();
        ds.set_scalar_item("nants", 6i32).unwrap();
        let item = ds.get("nants").unwrap().unwrap();
        assert!(item.read_scalar::<f64>().is_err());
        assert_eq!(item.read_any().unwrap(), AnyMiriadValue::Int32(vec![6]));
    }

    #[test]
    fn large_items_carry_a_type_header() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("ds.uv");
        let mut ds = DataSet::create(&path).unwrap();

        {
            let mut s = ds.create_large_item("gains", Type::Float64).unwrap();
            // pad to the 8-byte alignment of float64 data
            s.align_to(8).unwrap();
            let mut buf = Vec::new();
            f64::encode_values_into_vec(&[1.5, -2.0], &mut buf);
            s.write_all(&buf).unwrap();
            s.flush().unwrap();
        }

        let mut ds = DataSet::open(&path).unwrap();
        assert!(ds.has_item("gains").unwrap());
        let item = ds.get("gains").unwrap().unwrap();
        assert!(item.is_large());
        assert_eq!(item.type_(), Type::Float64);
        assert_eq!(item.read_vector::<f64>().unwrap(), vec![1.5, -2.0]);

        let mut stream = ds.get("gains").unwrap().unwrap().into_byte_stream().unwrap();
        assert_eq!(stream.offset(), 8);
        assert_eq!(stream.read_f64::<BigEndian>().unwrap(), 1.5);
    }

    #[test]
    fn widening_conversions() {
        let v = AnyMiriadValue::Float32(vec![1.5, 2.0]);
        assert_eq!(v.to_f64_vec(), Some(vec![1.5, 2.0]));
        assert_eq!(v.to_i64_vec(), None);
        assert_eq!(AnyMiriadValue::Int16(vec![-3]).to_i64_vec(), Some(vec![-3]));
        assert_eq!(
            AnyMiriadValue::Text("CARMA\0".to_owned()).as_text(),
            Some("CARMA")
        );
        assert_eq!(format!("{}", AnyMiriadValue::Int32(vec![1, 2])), "[1, 2]");
    }
}
