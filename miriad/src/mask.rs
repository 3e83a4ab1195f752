// Copyright 2017-2026 Peter Williams and collaborators
// Licensed under the MIT License.

/*!

Reading and writing MIRIAD mask-format items, such as uv data flags.

Masks are packed 31 bits to a big-endian `u32`, least significant bit first.
The top bit of every word is unused. A set bit means "good".

 */

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io;

const BITS_PER_WORD: usize = 31;

#[derive(Debug)]
pub struct MaskDecoder<R: io::Read> {
    stream: R,
    current_val: u32,
    bits_left_in_current: usize,
}

impl<R: io::Read> MaskDecoder<R> {
    pub fn new(stream: R) -> Self {
        MaskDecoder {
            stream,
            current_val: 0,
            bits_left_in_current: 0,
        }
    }

    /// Fill *dest* with the next `dest.len()` bits of the mask.
    pub fn expand(&mut self, dest: &mut [bool]) -> Result<(), io::Error> {
        for slot in dest.iter_mut() {
            if self.bits_left_in_current == 0 {
                self.current_val = self.stream.read_u32::<BigEndian>()?;
                self.bits_left_in_current = BITS_PER_WORD;
            }

            let i = BITS_PER_WORD - self.bits_left_in_current;
            *slot = self.current_val & (1 << i) != 0;
            self.bits_left_in_current -= 1;
        }

        Ok(())
    }
}

#[derive(Debug)]
pub struct MaskEncoder<W: io::Write> {
    stream: W,
    current_val: u32,
    bits_used_in_current: usize,
    closed: bool,
}

impl<W: io::Write> MaskEncoder<W> {
    pub fn new(stream: W) -> Self {
        MaskEncoder {
            stream,
            current_val: 0,
            bits_used_in_current: 0,
            closed: false,
        }
    }

    pub fn append_mask(&mut self, data: &[bool]) -> Result<(), io::Error> {
        if self.closed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "cannot append to mask after closing it",
            ));
        }

        for bit in data {
            if *bit {
                self.current_val |= 1 << self.bits_used_in_current;
            }

            self.bits_used_in_current += 1;

            if self.bits_used_in_current == BITS_PER_WORD {
                self.stream.write_u32::<BigEndian>(self.current_val)?;
                self.current_val = 0;
                self.bits_used_in_current = 0;
            }
        }

        Ok(())
    }

    /// Write out any partial word and flush the stream. Appending after
    /// this is an error.
    pub fn close(&mut self) -> Result<(), io::Error> {
        if self.closed {
            return Ok(());
        }

        if self.bits_used_in_current != 0 {
            self.stream.write_u32::<BigEndian>(self.current_val)?;
        }

        self.stream.flush()?;
        self.closed = true;
        Ok(())
    }
}

impl<W: io::Write> Drop for MaskEncoder<W> {
    fn drop(&mut self) {
        let _r = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_span_word_boundaries() {
        let bits: Vec<bool> = (0..70).map(|i| i % 3 != 0).collect();
        let mut buf = Vec::new();

        {
            let mut enc = MaskEncoder::new(&mut buf);
            enc.append_mask(&bits[..40]).unwrap();
            enc.append_mask(&bits[40..]).unwrap();
            enc.close().unwrap();
            assert!(enc.append_mask(&[true]).is_err());
        }

        // 70 bits need three 31-bit words
        assert_eq!(buf.len(), 12);
        assert_eq!(buf[0] & 0x80, 0);

        let mut dec = MaskDecoder::new(&buf[..]);
        let mut first = vec![false; 31];
        let mut rest = vec![false; 39];
        dec.expand(&mut first).unwrap();
        dec.expand(&mut rest).unwrap();
        assert_eq!(first, bits[..31]);
        assert_eq!(rest, bits[31..]);
    }

    #[test]
    fn short_mask_is_an_error() {
        let mut dec = MaskDecoder::new(&[0xffu8, 0xff, 0xff, 0xff][..]);
        let mut dest = vec![false; 40];
        assert!(dec.expand(&mut dest).is_err());
    }
}
