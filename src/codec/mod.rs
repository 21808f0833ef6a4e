//! A structured binary codec driven by a compact format-string grammar.
//!
//! Every on-disk record in this crate is parsed and built through a [`FormatSpec`]:
//!
//! ```md
//! Nu  unsigned integer, N bits
//! Ns  signed integer (two's complement), N bits
//! Np  padding run, N bits (skipped when parsing, zeroed when building)
//! Nb  fixed byte run, N bytes
//! N$  length-prefixed byte run, N-bit length followed by that many bytes
//! <   little-endian numerics for the remainder of the record
//! >   big-endian numerics for the remainder of the record (the default)
//! ```
//!
//! The FLAC metadata block header, for example, is `"1u7u24u"`: a 1 bit last-block flag, a
//! 7 bit block type and a 24 bit length.

use std::io::{Read, Take, Write};

pub use bits::{BitReader, BitWriter};

use crate::ErrorKind;

mod bits;

/// A single field descriptor of a [`FormatSpec`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Field {
    /// An unsigned integer of n bits.
    Uint(u32),
    /// A signed two's complement integer of n bits.
    Int(u32),
    /// A run of n padding bits.
    Padding(u32),
    /// A fixed run of n bytes.
    Bytes(u32),
    /// A length-prefixed byte run with an n bit length prefix.
    LenPrefixed(u32),
    /// Switches numeric fields to little-endian for the remainder of the record.
    LittleEndian,
    /// Switches numeric fields back to big-endian.
    BigEndian,
}

/// A value parsed from or built into a structured binary record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Value {
    /// An unsigned integer.
    Uint(u64),
    /// A signed integer.
    Int(i64),
    /// A byte run.
    Bytes(Vec<u8>),
}

impl Value {
    /// Returns the contained unsigned integer.
    pub fn uint(&self) -> crate::Result<u64> {
        match self {
            Self::Uint(n) => Ok(*n),
            _ => Err(crate::Error::new(ErrorKind::Parsing, "Expected an unsigned integer value")),
        }
    }

    /// Returns the contained signed integer.
    pub fn int(&self) -> crate::Result<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            _ => Err(crate::Error::new(ErrorKind::Parsing, "Expected a signed integer value")),
        }
    }

    /// Returns a reference to the contained byte run.
    pub fn bytes(&self) -> crate::Result<&[u8]> {
        match self {
            Self::Bytes(b) => Ok(b),
            _ => Err(crate::Error::new(ErrorKind::Parsing, "Expected a byte run value")),
        }
    }

    /// Consumes the value, returning the contained byte run.
    pub fn into_bytes(self) -> crate::Result<Vec<u8>> {
        match self {
            Self::Bytes(b) => Ok(b),
            _ => Err(crate::Error::new(ErrorKind::Parsing, "Expected a byte run value")),
        }
    }

    /// Consumes the value, returning the contained byte run decoded as utf-8.
    pub fn into_string(self) -> crate::Result<String> {
        Ok(String::from_utf8(self.into_bytes()?)?)
    }
}

/// An ordered sequence of field descriptors compiled from a format string.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FormatSpec {
    fields: Vec<Field>,
}

impl FormatSpec {
    /// Compiles a format string into a field sequence.
    ///
    /// Fails if the grammar is violated, an integer width exceeds 64 bits, or a byte run field
    /// would start at an unaligned bit position.
    pub fn compile(fmt: &str) -> crate::Result<Self> {
        let mut fields = Vec::new();
        let mut width: Option<u32> = None;
        // Bit offset modulo 8, tracked statically so alignment violations are caught at
        // compile time instead of halfway through a record.
        let mut bit_pos = 0u32;

        for c in fmt.chars() {
            match c {
                '0'..='9' => {
                    let digit = c as u32 - '0' as u32;
                    let w = width.unwrap_or(0).saturating_mul(10).saturating_add(digit);
                    width = Some(w);
                }
                'u' | 's' | 'p' | 'b' | '$' => {
                    let w = width.take().ok_or_else(|| {
                        crate::Error::new(
                            ErrorKind::Parsing,
                            format!("Missing width before '{}' in format string {:?}", c, fmt),
                        )
                    })?;
                    let field = match c {
                        'u' => {
                            check_int_width(fmt, w)?;
                            bit_pos = (bit_pos + w) % 8;
                            Field::Uint(w)
                        }
                        's' => {
                            check_int_width(fmt, w)?;
                            bit_pos = (bit_pos + w) % 8;
                            Field::Int(w)
                        }
                        'p' => {
                            bit_pos = (bit_pos + w) % 8;
                            Field::Padding(w)
                        }
                        'b' => {
                            check_aligned(fmt, bit_pos)?;
                            Field::Bytes(w)
                        }
                        _ => {
                            check_int_width(fmt, w)?;
                            check_aligned(fmt, bit_pos)?;
                            if w % 8 != 0 {
                                return Err(crate::Error::new(
                                    ErrorKind::Parsing,
                                    format!(
                                        "Length prefix of {} bits leaves the byte run unaligned in format string {:?}",
                                        w, fmt
                                    ),
                                ));
                            }
                            Field::LenPrefixed(w)
                        }
                    };
                    fields.push(field);
                }
                '<' | '>' => {
                    if width.is_some() {
                        return Err(crate::Error::new(
                            ErrorKind::Parsing,
                            format!("Dangling width before '{}' in format string {:?}", c, fmt),
                        ));
                    }
                    fields.push(if c == '<' { Field::LittleEndian } else { Field::BigEndian });
                }
                c if c.is_whitespace() => (),
                _ => {
                    return Err(crate::Error::new(
                        ErrorKind::Parsing,
                        format!("Unknown field code '{}' in format string {:?}", c, fmt),
                    ));
                }
            }
        }

        if width.is_some() {
            return Err(crate::Error::new(
                ErrorKind::Parsing,
                format!("Dangling width at end of format string {:?}", fmt),
            ));
        }

        Ok(Self { fields })
    }

    /// Returns the number of values one record of this spec parses into.
    pub fn value_count(&self) -> usize {
        self.fields
            .iter()
            .filter(|f| {
                !matches!(f, Field::Padding(_) | Field::LittleEndian | Field::BigEndian)
            })
            .count()
    }

    /// Attempts to parse one record from the reader.
    ///
    /// Reading past the end of the stream fails with a truncation error and no partial record
    /// is returned.
    pub fn parse(&self, reader: &mut impl Read) -> crate::Result<Vec<Value>> {
        let mut r = BitReader::new(reader);
        let mut values = Vec::with_capacity(self.value_count());
        let mut le = false;

        for field in &self.fields {
            match *field {
                Field::Uint(bits) => values.push(Value::Uint(parse_uint(&mut r, bits, le)?)),
                Field::Int(bits) => {
                    let raw = parse_uint(&mut r, bits, le)?;
                    values.push(Value::Int(sign_extend(raw, bits)));
                }
                Field::Padding(bits) => r.skip_bits(bits)?,
                Field::Bytes(len) => values.push(Value::Bytes(r.read_bytes(len as usize)?)),
                Field::LenPrefixed(bits) => {
                    let len = parse_uint(&mut r, bits, le)?;
                    values.push(Value::Bytes(r.read_bytes(len as usize)?));
                }
                Field::LittleEndian => le = true,
                Field::BigEndian => le = false,
            }
        }

        Ok(values)
    }

    /// Attempts to build one record from the values and write it to the writer.
    ///
    /// Fails with a field overflow if a value exceeds its bit-width budget or a byte run is
    /// longer than its length prefix can express; a record is never silently truncated.
    pub fn build(&self, writer: &mut impl Write, values: &[Value]) -> crate::Result<()> {
        if values.len() != self.value_count() {
            return Err(crate::Error::new(
                ErrorKind::Parsing,
                format!("Expected {} values, found {}", self.value_count(), values.len()),
            ));
        }

        let mut w = BitWriter::new(writer);
        let mut le = false;
        let mut next = values.iter();
        let mut next_value = move || {
            next.next().ok_or_else(|| {
                crate::Error::new(ErrorKind::Parsing, "Ran out of values while building a record")
            })
        };

        for field in &self.fields {
            match *field {
                Field::Uint(bits) => {
                    let v = next_value()?.uint()?;
                    check_uint_budget(v, bits)?;
                    build_uint(&mut w, bits, v, le)?;
                }
                Field::Int(bits) => {
                    let v = next_value()?.int()?;
                    check_int_budget(v, bits)?;
                    let raw = (v as u64) & mask(bits);
                    build_uint(&mut w, bits, raw, le)?;
                }
                Field::Padding(bits) => w.write_padding(bits)?,
                Field::Bytes(len) => {
                    let b = next_value()?.bytes()?;
                    if b.len() != len as usize {
                        return Err(crate::Error::new(
                            ErrorKind::FieldOverflow,
                            format!("Byte run of {} bytes in a {} byte field", b.len(), len),
                        ));
                    }
                    w.write_bytes(b)?;
                }
                Field::LenPrefixed(bits) => {
                    let b = next_value()?.bytes()?;
                    check_uint_budget(b.len() as u64, bits)?;
                    build_uint(&mut w, bits, b.len() as u64, le)?;
                    w.write_bytes(b)?;
                }
                Field::LittleEndian => le = true,
                Field::BigEndian => le = false,
            }
        }

        w.finalize()?;
        Ok(())
    }
}

/// Returns a bounded sub-reader over the next `len` bytes of the reader.
pub fn substream<R: Read>(reader: R, len: u64) -> Take<R> {
    reader.take(len)
}

fn check_int_width(fmt: &str, width: u32) -> crate::Result<()> {
    if width == 0 || width > 64 {
        return Err(crate::Error::new(
            ErrorKind::Parsing,
            format!("Integer width of {} bits in format string {:?}", width, fmt),
        ));
    }
    Ok(())
}

fn check_aligned(fmt: &str, bit_pos: u32) -> crate::Result<()> {
    if bit_pos != 0 {
        return Err(crate::Error::new(
            ErrorKind::Parsing,
            format!("Byte run at unaligned bit offset in format string {:?}", fmt),
        ));
    }
    Ok(())
}

fn check_uint_budget(value: u64, bits: u32) -> crate::Result<()> {
    if bits < 64 && value >= 1u64 << bits {
        return Err(crate::Error::new(
            ErrorKind::FieldOverflow,
            format!("Value {} exceeds its {} bit field", value, bits),
        ));
    }
    Ok(())
}

fn check_int_budget(value: i64, bits: u32) -> crate::Result<()> {
    let min = if bits == 64 { i64::MIN } else { -(1i64 << (bits - 1)) };
    let max = if bits == 64 { i64::MAX } else { (1i64 << (bits - 1)) - 1 };
    if value < min || value > max {
        return Err(crate::Error::new(
            ErrorKind::FieldOverflow,
            format!("Value {} exceeds its {} bit field", value, bits),
        ));
    }
    Ok(())
}

fn mask(bits: u32) -> u64 {
    if bits == 64 {
        u64::MAX
    } else {
        (1u64 << bits) - 1
    }
}

fn sign_extend(raw: u64, bits: u32) -> i64 {
    if bits == 64 || raw & (1u64 << (bits - 1)) == 0 {
        raw as i64
    } else {
        ((raw as i128) - (1i128 << bits)) as i64
    }
}

/// Reads an unsigned integer honoring the active endianness.
///
/// Little-endian fields only occur byte-aligned with whole-byte widths (the VORBIS_COMMENT
/// block); anything else would have been rejected when the spec was compiled.
fn parse_uint<R: Read>(r: &mut BitReader<R>, bits: u32, le: bool) -> crate::Result<u64> {
    if !le {
        return r.read_bits(bits);
    }

    if bits % 8 != 0 {
        return Err(crate::Error::new(
            ErrorKind::Parsing,
            format!("Little-endian field of {} bits", bits),
        ));
    }
    let bytes = r.read_bytes((bits / 8) as usize)?;
    let mut value = 0u64;
    for (i, b) in bytes.iter().enumerate() {
        value |= u64::from(*b) << (8 * i);
    }
    Ok(value)
}

fn build_uint<W: Write>(w: &mut BitWriter<W>, bits: u32, value: u64, le: bool) -> crate::Result<()> {
    if !le {
        return w.write_bits(bits, value);
    }

    if bits % 8 != 0 {
        return Err(crate::Error::new(
            ErrorKind::Parsing,
            format!("Little-endian field of {} bits", bits),
        ));
    }
    let len = (bits / 8) as usize;
    let bytes = value.to_le_bytes();
    w.write_bytes(&bytes[..len])
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn compile_flac_block_header() {
        let spec = FormatSpec::compile("1u7u24u").unwrap();
        assert_eq!(spec.value_count(), 3);
    }

    #[test]
    fn compile_rejects_unaligned_byte_run() {
        assert!(FormatSpec::compile("3u4b").is_err());
        assert!(FormatSpec::compile("1u7u16b").is_ok());
    }

    #[test]
    fn compile_rejects_bad_grammar() {
        assert!(FormatSpec::compile("u").is_err());
        assert!(FormatSpec::compile("12").is_err());
        assert!(FormatSpec::compile("8x").is_err());
        assert!(FormatSpec::compile("65u").is_err());
    }

    #[test]
    fn parse_build_round_trip() {
        let spec = FormatSpec::compile("1u7u24u4b").unwrap();
        let values = vec![
            Value::Uint(1),
            Value::Uint(0x42),
            Value::Uint(0x0102_03),
            Value::Bytes(b"fLaC".to_vec()),
        ];

        let mut buf = Vec::new();
        spec.build(&mut buf, &values).unwrap();
        assert_eq!(spec.parse(&mut buf.as_slice()).unwrap(), values);
    }

    #[test]
    fn little_endian_toggle() {
        let spec = FormatSpec::compile("<32$").unwrap();
        let values = vec![Value::Bytes(b"vendor".to_vec())];

        let mut buf = Vec::new();
        spec.build(&mut buf, &values).unwrap();
        assert_eq!(&buf[..4], &[6, 0, 0, 0]);
        assert_eq!(spec.parse(&mut buf.as_slice()).unwrap(), values);
    }

    #[test]
    fn signed_fields() {
        let spec = FormatSpec::compile("8s8s").unwrap();
        let values = vec![Value::Int(-1), Value::Int(127)];

        let mut buf = Vec::new();
        spec.build(&mut buf, &values).unwrap();
        assert_eq!(buf, vec![0xff, 0x7f]);
        assert_eq!(spec.parse(&mut buf.as_slice()).unwrap(), values);
    }

    #[test]
    fn build_rejects_field_overflow() {
        let spec = FormatSpec::compile("24u").unwrap();
        let err = spec.build(&mut Vec::new(), &[Value::Uint(1 << 24)]).unwrap_err();
        assert!(matches!(err.kind, crate::ErrorKind::FieldOverflow));
    }

    #[test]
    fn build_rejects_oversized_length_prefix() {
        let spec = FormatSpec::compile("8$").unwrap();
        let err = spec.build(&mut Vec::new(), &[Value::Bytes(vec![0u8; 256])]).unwrap_err();
        assert!(matches!(err.kind, crate::ErrorKind::FieldOverflow));
    }

    #[test]
    fn parse_rejects_truncation() {
        let spec = FormatSpec::compile("32u").unwrap();
        let err = spec.parse(&mut [0u8, 1].as_ref()).unwrap_err();
        assert!(matches!(err.kind, crate::ErrorKind::TruncatedStream));
    }

    #[test]
    fn substream_is_bounded() {
        use std::io::Read;

        let data = b"0123456789";
        let mut sub = substream(&data[..], 4);
        let mut buf = Vec::new();
        sub.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"0123");
    }
}
