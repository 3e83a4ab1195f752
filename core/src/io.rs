// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Basic I/O helpers.

MIRIAD items are big-endian streams whose records must sit at particular
byte offsets from the start of the file. The wrappers here keep track of
that offset so the decoders can pad and skip as needed.

 */

use byteorder::{BigEndian, ByteOrder};
use num_complex::Complex;
use std::io;
use std::io::{Read, Result, Seek, SeekFrom, Write};
use std::result;

/// The largest alignment that `align_to` will honor.
pub const MAX_ALIGNMENT: usize = 64;

fn check_alignment(alignment: usize) -> Result<()> {
    if alignment == 0 || alignment > MAX_ALIGNMENT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("alignment must be between 1 and {MAX_ALIGNMENT} bytes; got {alignment}"),
        ));
    }

    Ok(())
}

/// This struct wraps a Read type and counts how many bytes have been read
/// through it, so that the caller can skip forward to an aligned offset.
///
/// The offset is tracked internally. If you open a file, read part of it,
/// and *then* wrap it, offsets are relative to the wrapping point.
#[derive(Debug)]
pub struct AligningReader<R: Read> {
    inner: R,
    offset: u64,
}

impl<R: Read> AligningReader<R> {
    pub fn new(inner: R) -> Self {
        AligningReader { inner, offset: 0 }
    }

    /// Consume this struct, returning the underlying inner reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Return how many bytes we have read since this struct was created (or
    /// last rewound).
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read and discard bytes to ensure that the stream is aligned as specified.
    ///
    /// Returns whether the stream was already at the right alignment. When
    /// that is the case, no read is performed. Hitting EOF while padding is
    /// reported as `Ok(false)` with the offset left unchanged, so that a
    /// padded stream that ends exactly at a record boundary is not an error.
    pub fn align_to(&mut self, alignment: usize) -> Result<bool> {
        check_alignment(alignment)?;

        let excess = (self.offset % alignment as u64) as usize;

        if excess == 0 {
            return Ok(true);
        }

        let mut buf = [0u8; MAX_ALIGNMENT];
        let amount = alignment - excess;

        if self.inner.eof_read_exact::<io::Error>(&mut buf[..amount])? {
            self.offset += amount as u64;
        }

        Ok(false)
    }
}

impl<R: Read + Seek> AligningReader<R> {
    /// Seek the underlying stream back to its start and reset the offset.
    pub fn rewind(&mut self) -> Result<()> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.offset = 0;
        Ok(())
    }
}

impl<R: Read> Read for AligningReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// The writing counterpart of `AligningReader`: tracks how many bytes have
/// been written so that zero padding can be inserted before aligned records.
#[derive(Debug)]
pub struct AligningWriter<W: Write> {
    inner: W,
    offset: u64,
}

impl<W: Write> AligningWriter<W> {
    pub fn new(inner: W) -> Self {
        AligningWriter { inner, offset: 0 }
    }

    /// Consume this struct, returning the underlying inner writer.
    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Return how many bytes we have written since this struct was created.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Write zero bytes to ensure that the stream is aligned as specified.
    ///
    /// Returns whether the stream was already at the right alignment.
    pub fn align_to(&mut self, alignment: usize) -> Result<bool> {
        check_alignment(alignment)?;

        let excess = (self.offset % alignment as u64) as usize;

        if excess == 0 {
            Ok(true)
        } else {
            let buf = [0u8; MAX_ALIGNMENT];
            let amount = alignment - excess;
            self.inner.write_all(&buf[..amount])?;
            self.offset += amount as u64;
            Ok(false)
        }
    }
}

impl<W: Write> Write for AligningWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// An extension trait for `Result<Option<T>>` values where `Ok(None)` means
/// "not found". The `require_found` method turns that case into a
/// `NotFound` I/O error for callers that need the thing to exist.
pub trait OpenResultExt {
    /// `Result<Option<T>>` becomes `Result<T>`.
    type Reprocessed;

    /// If *self* is `Ok(None)`, convert it into an `Err` with a `NotFound`
    /// kind, mentioning *what* in the message.
    fn require_found(self, what: &str) -> Self::Reprocessed;
}

impl<T, E> OpenResultExt for result::Result<Option<T>, E>
where
    E: From<io::Error>,
{
    type Reprocessed = result::Result<T, E>;

    fn require_found(self, what: &str) -> Self::Reprocessed {
        match self? {
            Some(x) => Ok(x),
            None => Err(io::Error::new(io::ErrorKind::NotFound, format!("{what} not found")).into()),
        }
    }
}

/// Extend the `Read` trait to provide functions for reading an exact number
/// of bytes from a stream and distinguishing whether EOF was encountered
/// immediately, versus whether it was encountered in the midst of the read.
pub trait EofReadExactExt: Read {
    /// Like `Read::read_exact`, except returns Ok(false) if EOF was
    /// encountered at the first read attempt. Returns Ok(true) if everything
    /// was OK and EOF has not yet been hit. Returns Err with an IoError with
    /// a "kind" of UnexpectedEof if EOF was encountered somewhere in the
    /// midst of the buffer.
    fn eof_read_exact<E>(&mut self, buf: &mut [u8]) -> result::Result<bool, E>
    where
        E: From<io::Error>;

    fn eof_read_be_i16<E>(&mut self) -> result::Result<Option<i16>, E>
    where
        E: From<io::Error>,
    {
        let mut buf = [0u8; 2];
        Ok(self.eof_read_exact::<E>(&mut buf)?.then(|| BigEndian::read_i16(&buf)))
    }

    fn eof_read_be_i32<E>(&mut self) -> result::Result<Option<i32>, E>
    where
        E: From<io::Error>,
    {
        let mut buf = [0u8; 4];
        Ok(self.eof_read_exact::<E>(&mut buf)?.then(|| BigEndian::read_i32(&buf)))
    }

    fn eof_read_be_i64<E>(&mut self) -> result::Result<Option<i64>, E>
    where
        E: From<io::Error>,
    {
        let mut buf = [0u8; 8];
        Ok(self.eof_read_exact::<E>(&mut buf)?.then(|| BigEndian::read_i64(&buf)))
    }

    fn eof_read_be_f32<E>(&mut self) -> result::Result<Option<f32>, E>
    where
        E: From<io::Error>,
    {
        let mut buf = [0u8; 4];
        Ok(self.eof_read_exact::<E>(&mut buf)?.then(|| BigEndian::read_f32(&buf)))
    }

    fn eof_read_be_f64<E>(&mut self) -> result::Result<Option<f64>, E>
    where
        E: From<io::Error>,
    {
        let mut buf = [0u8; 8];
        Ok(self.eof_read_exact::<E>(&mut buf)?.then(|| BigEndian::read_f64(&buf)))
    }

    /// Read two big-endian `f32`s and pack them into a `Complex<f32>`. The
    /// real part comes before the imaginary part.
    fn eof_read_be_c64<E>(&mut self) -> result::Result<Option<Complex<f32>>, E>
    where
        E: From<io::Error>,
    {
        let mut buf = [0u8; 8];
        Ok(self.eof_read_exact::<E>(&mut buf)?.then(|| {
            Complex::new(
                BigEndian::read_f32(&buf[..4]),
                BigEndian::read_f32(&buf[4..]),
            )
        }))
    }
}

impl<R: Read> EofReadExactExt for R {
    fn eof_read_exact<E>(&mut self, buf: &mut [u8]) -> result::Result<bool, E>
    where
        E: From<io::Error>,
    {
        let mut ofs = 0;

        while ofs < buf.len() {
            let n_read = match self.read(&mut buf[ofs..]) {
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            };

            if n_read == 0 {
                return if ofs == 0 {
                    Ok(false) // no more data at an expected stopping point
                } else {
                    Err(
                        io::Error::new(io::ErrorKind::UnexpectedEof, "unexpected end of file")
                            .into(),
                    )
                };
            }

            ofs += n_read;
        }

        Ok(true)
    }
}
