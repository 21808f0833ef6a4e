use std::io::{Read, Write};

use byteorder::{ReadBytesExt, WriteBytesExt};

use crate::ErrorKind;

/// A bit-level reader wrapping a byte stream.
///
/// Bits are consumed most significant first, matching the on-disk layout of FLAC block headers
/// and every other big-endian packed structure in this crate. Byte-aligned accesses are only
/// permitted when no partial byte is buffered.
pub struct BitReader<R: Read> {
    inner: R,
    /// The partially consumed byte.
    buf: u8,
    /// The number of unconsumed bits left in `buf`.
    avail: u32,
    /// The number of bits consumed so far.
    pos: u64,
}

impl<R: Read> BitReader<R> {
    /// Creates a new bit reader over the byte stream.
    pub fn new(inner: R) -> Self {
        Self { inner, buf: 0, avail: 0, pos: 0 }
    }

    /// Returns the number of bits consumed so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Returns whether the reader is at a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.avail == 0
    }

    /// Attempts to read an unsigned integer of up to 64 bits, most significant bit first.
    pub fn read_bits(&mut self, bits: u32) -> crate::Result<u64> {
        debug_assert!(bits <= 64);

        let mut value = 0u64;
        let mut remaining = bits;
        while remaining > 0 {
            if self.avail == 0 {
                self.buf = self.inner.read_u8()?;
                self.avail = 8;
            }

            let take = remaining.min(self.avail);
            let shifted = self.buf >> (self.avail - take);
            let mask = if take == 8 { 0xff } else { (1u8 << take) - 1 };
            value = (value << take) | u64::from(shifted & mask);

            self.avail -= take;
            self.pos += u64::from(take);
            remaining -= take;
        }

        Ok(value)
    }

    /// Attempts to skip over a run of padding bits.
    pub fn skip_bits(&mut self, mut bits: u32) -> crate::Result<()> {
        while bits > 0 {
            let chunk = bits.min(64);
            self.read_bits(chunk)?;
            bits -= chunk;
        }
        Ok(())
    }

    /// Attempts to read a run of whole bytes. The reader must be at a byte boundary.
    pub fn read_bytes(&mut self, len: usize) -> crate::Result<Vec<u8>> {
        if !self.is_aligned() {
            return Err(crate::Error::new(
                ErrorKind::Parsing,
                format!("Byte run at unaligned bit position {}", self.pos),
            ));
        }

        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf)?;
        self.pos += 8 * len as u64;
        Ok(buf)
    }

    /// Consumes the reader, returning the wrapped byte stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// A bit-level writer wrapping a byte stream.
///
/// The counterpart of [`BitReader`]; bits are emitted most significant first. A partially
/// filled byte is only flushed once complete, so every record built through this writer must
/// end on a byte boundary.
pub struct BitWriter<W: Write> {
    inner: W,
    /// The partially filled byte.
    buf: u8,
    /// The number of bits used in `buf`.
    used: u32,
    /// The number of bits written so far.
    pos: u64,
}

impl<W: Write> BitWriter<W> {
    /// Creates a new bit writer over the byte stream.
    pub fn new(inner: W) -> Self {
        Self { inner, buf: 0, used: 0, pos: 0 }
    }

    /// Returns the number of bits written so far.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Returns whether the writer is at a byte boundary.
    pub fn is_aligned(&self) -> bool {
        self.used == 0
    }

    /// Attempts to write the `bits` least significant bits of `value`, most significant first.
    ///
    /// Bits of `value` above `bits` must already have been rejected by the caller.
    pub fn write_bits(&mut self, bits: u32, value: u64) -> crate::Result<()> {
        debug_assert!(bits <= 64);
        debug_assert!(bits == 64 || value < (1u64 << bits));

        let mut remaining = bits;
        while remaining > 0 {
            let room = 8 - self.used;
            let take = remaining.min(room);
            let chunk = (value >> (remaining - take)) as u8;
            // A full-byte take only occurs on an empty buffer; shifting it by 8 would overflow.
            self.buf = if take == 8 {
                chunk
            } else {
                let mask = (1u8 << take) - 1;
                (self.buf << take) | (chunk & mask)
            };

            self.used += take;
            self.pos += u64::from(take);
            remaining -= take;

            if self.used == 8 {
                self.inner.write_u8(self.buf)?;
                self.buf = 0;
                self.used = 0;
            }
        }

        Ok(())
    }

    /// Attempts to write a run of zeroed padding bits.
    pub fn write_padding(&mut self, mut bits: u32) -> crate::Result<()> {
        while bits > 0 {
            let chunk = bits.min(64);
            self.write_bits(chunk, 0)?;
            bits -= chunk;
        }
        Ok(())
    }

    /// Attempts to write a run of whole bytes. The writer must be at a byte boundary.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> crate::Result<()> {
        if !self.is_aligned() {
            return Err(crate::Error::new(
                ErrorKind::Parsing,
                format!("Byte run at unaligned bit position {}", self.pos),
            ));
        }

        self.inner.write_all(bytes)?;
        self.pos += 8 * bytes.len() as u64;
        Ok(())
    }

    /// Consumes the writer, returning the wrapped byte stream.
    ///
    /// Fails if a partially filled byte is still buffered, since flushing it would corrupt the
    /// stream rather than truncate it silently.
    pub fn finalize(self) -> crate::Result<W> {
        if !self.is_aligned() {
            return Err(crate::Error::new(
                ErrorKind::Parsing,
                format!("Record ends at unaligned bit position {}", self.pos),
            ));
        }
        Ok(self.inner)
    }
}
