use std::fmt;
use std::io::Write;

use crate::codec::{FormatSpec, Value};
use crate::container::Record;
use crate::ErrorKind;

lazy_static! {
    /// (`3b24u`) ID3v2.2 frame header: 3 byte id, 24 bit length.
    static ref FRAME_HEADER_V22: FormatSpec = FormatSpec::compile("3b24u").unwrap();
    /// (`4b32u16u`) ID3v2.3/2.4 frame header: 4 byte id, 32 bit length, 16 bit flags.
    /// In v2.4 the length is syncsafe and decoded separately.
    static ref FRAME_HEADER_V23: FormatSpec = FormatSpec::compile("4b32u16u").unwrap();
}

/// The highest value a syncsafe integer can hold, 2^28 - 1.
pub const SYNCSAFE_MAX: u32 = (1 << 28) - 1;

/// Encodes a 28 bit value as a syncsafe integer, 7 data bits per byte with every high bit
/// clear.
pub fn encode_syncsafe(value: u32) -> crate::Result<u32> {
    if value > SYNCSAFE_MAX {
        return Err(crate::Error::new(
            ErrorKind::FieldOverflow,
            format!("Value {} exceeds the 28 bit syncsafe budget", value),
        ));
    }

    let mut out = 0u32;
    for i in 0..4 {
        out |= ((value >> (7 * i)) & 0x7f) << (8 * i);
    }
    Ok(out)
}

/// Decodes a syncsafe integer back to its 28 bit value. A set high bit in any byte means the
/// value was not syncsafe encoded.
pub fn decode_syncsafe(raw: u32) -> crate::Result<u32> {
    if raw & 0x8080_8080 != 0 {
        return Err(crate::Error::new(
            ErrorKind::MalformedHeader,
            format!("Value {:#010x} is not a syncsafe integer", raw),
        ));
    }

    let mut out = 0u32;
    for i in 0..4 {
        out |= ((raw >> (8 * i)) & 0x7f) << (7 * i);
    }
    Ok(out)
}

/// An ID3v2 tag version.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Id3Version {
    /// ID3v2.2 with 3 byte frame ids and 24 bit lengths.
    V22,
    /// ID3v2.3 with 4 byte frame ids, 32 bit lengths and frame flags.
    V23,
    /// ID3v2.4 with syncsafe frame lengths and the full set of text encodings.
    V24,
}

/// The field widths and capabilities of one tag version.
///
/// Frame behavior is a function of this descriptor; there is one frame type for all versions.
pub(crate) struct VersionInfo {
    /// The frame id length in bytes.
    pub id_len: usize,
    /// The frame header length in bytes.
    pub header_len: u64,
    /// Whether frame lengths are syncsafe encoded.
    pub syncsafe_sizes: bool,
    /// The frame length budget in bits.
    pub size_bits: u32,
    /// Whether the utf-8 and unmarked utf-16 encodings are permitted.
    pub modern_encodings: bool,
}

const V22_INFO: VersionInfo = VersionInfo {
    id_len: 3,
    header_len: 6,
    syncsafe_sizes: false,
    size_bits: 24,
    modern_encodings: false,
};
const V23_INFO: VersionInfo = VersionInfo {
    id_len: 4,
    header_len: 10,
    syncsafe_sizes: false,
    size_bits: 32,
    modern_encodings: false,
};
const V24_INFO: VersionInfo = VersionInfo {
    id_len: 4,
    header_len: 10,
    syncsafe_sizes: true,
    size_bits: 28,
    modern_encodings: true,
};

impl Id3Version {
    /// Returns the tag version of the major version number.
    pub fn from_major(major: u8) -> crate::Result<Self> {
        match major {
            2 => Ok(Self::V22),
            3 => Ok(Self::V23),
            4 => Ok(Self::V24),
            _ => Err(crate::Error::new(
                ErrorKind::UnsupportedVersion(major),
                format!("Unknown ID3v2 major version {}", major),
            )),
        }
    }

    /// Returns the major version number.
    pub fn major(self) -> u8 {
        match self {
            Self::V22 => 2,
            Self::V23 => 3,
            Self::V24 => 4,
        }
    }

    pub(crate) fn info(self) -> &'static VersionInfo {
        match self {
            Self::V22 => &V22_INFO,
            Self::V23 => &V23_INFO,
            Self::V24 => &V24_INFO,
        }
    }

    fn frame_header_spec(self) -> &'static FormatSpec {
        match self {
            Self::V22 => &FRAME_HEADER_V22,
            _ => &FRAME_HEADER_V23,
        }
    }
}

impl fmt::Display for Id3Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID3v2.{}", self.major())
    }
}

/// An ID3v2 frame identifier of 3 (v2.2) or 4 (v2.3/2.4) uppercase ASCII characters.
#[derive(Clone, Copy, Eq, PartialEq, Hash)]
pub struct FrameId {
    len: u8,
    bytes: [u8; 4],
}

impl FrameId {
    /// Creates a frame id from a 3 or 4 character string. Longer input is truncated to 4
    /// characters.
    pub fn new(id: &str) -> Self {
        let src = id.as_bytes();
        let len = src.len().min(4);
        let mut bytes = [0u8; 4];
        bytes[..len].copy_from_slice(&src[..len]);
        Self { len: len as u8, bytes }
    }

    /// Attempts to read a frame id from raw header bytes.
    pub fn from_bytes(src: &[u8]) -> crate::Result<Self> {
        let valid = matches!(src.len(), 3 | 4)
            && src.iter().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit());
        if !valid {
            return Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("Invalid frame id {:?}", src),
            ));
        }

        let mut bytes = [0u8; 4];
        bytes[..src.len()].copy_from_slice(src);
        Ok(Self { len: src.len() as u8, bytes })
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        // Only ASCII bytes get in through the constructors.
        std::str::from_utf8(&self.bytes[..self.len as usize]).unwrap_or_default()
    }

    fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }

    fn is_text(&self) -> bool {
        self.bytes[0] == b'T' && self.as_str() != "TXX" && self.as_str() != "TXXX"
    }

    fn is_comment(&self) -> bool {
        matches!(self.as_str(), "COM" | "COMM")
    }

    fn is_picture(&self) -> bool {
        matches!(self.as_str(), "PIC" | "APIC")
    }
}

impl fmt::Debug for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FrameId({})", self.as_str())
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A text encoding selected per frame by a 1 byte discriminant.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Encoding {
    /// (`0`) ISO-8859-1.
    Latin1,
    /// (`1`) UTF-16 with a byte order mark.
    Utf16,
    /// (`2`) Big-endian UTF-16 without a byte order mark, v2.4 only.
    Utf16Be,
    /// (`3`) UTF-8, v2.4 only.
    Utf8,
}

impl Encoding {
    /// Returns the encoding of the discriminant code.
    pub fn from_code(code: u8) -> crate::Result<Self> {
        match code {
            0 => Ok(Self::Latin1),
            1 => Ok(Self::Utf16),
            2 => Ok(Self::Utf16Be),
            3 => Ok(Self::Utf8),
            _ => Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("Unknown text encoding {}", code),
            )),
        }
    }

    /// Returns the discriminant code of the encoding.
    pub fn code(self) -> u8 {
        match self {
            Self::Latin1 => 0,
            Self::Utf16 => 1,
            Self::Utf16Be => 2,
            Self::Utf8 => 3,
        }
    }

    /// Returns the number of zero bytes terminating a string of this encoding.
    pub fn terminator_len(self) -> usize {
        match self {
            Self::Latin1 | Self::Utf8 => 1,
            Self::Utf16 | Self::Utf16Be => 2,
        }
    }

    /// Attempts to decode raw bytes, without a terminator, into a string.
    pub fn decode(self, bytes: &[u8]) -> crate::Result<String> {
        match self {
            Self::Latin1 => Ok(bytes.iter().map(|&b| char::from(b)).collect()),
            Self::Utf8 => Ok(String::from_utf8(bytes.to_vec())?),
            Self::Utf16 => match bytes {
                [0xff, 0xfe, rest @ ..] => decode_utf16(rest, false),
                [0xfe, 0xff, rest @ ..] => decode_utf16(rest, true),
                rest => decode_utf16(rest, true),
            },
            Self::Utf16Be => decode_utf16(bytes, true),
        }
    }

    /// Encodes a string into raw bytes, without a terminator.
    ///
    /// Latin-1 input must have been checked with [`is_latin1`]; unrepresentable characters are
    /// replaced with `'?'`.
    pub fn encode(self, s: &str) -> Vec<u8> {
        match self {
            Self::Latin1 => {
                s.chars().map(|c| if (c as u32) < 0x100 { c as u8 } else { b'?' }).collect()
            }
            Self::Utf8 => s.as_bytes().to_vec(),
            Self::Utf16 => {
                let mut out = vec![0xff, 0xfe];
                for unit in s.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
                out
            }
            Self::Utf16Be => {
                let mut out = Vec::with_capacity(2 * s.len());
                for unit in s.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
                out
            }
        }
    }
}

/// Returns whether every character of the string fits the Latin-1 repertoire.
pub fn is_latin1(s: &str) -> bool {
    s.chars().all(|c| (c as u32) < 0x100)
}

fn decode_utf16(bytes: &[u8], be: bool) -> crate::Result<String> {
    if bytes.len() % 2 != 0 {
        return Err(crate::Error::new(
            ErrorKind::Parsing,
            format!("Utf-16 string of {} bytes, expected an even length", bytes.len()),
        ));
    }

    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| {
            let pair = [c[0], c[1]];
            if be {
                u16::from_be_bytes(pair)
            } else {
                u16::from_le_bytes(pair)
            }
        })
        .collect();
    Ok(String::from_utf16(&units)?)
}

/// Splits a terminated string off the front of the data, returning it and the remainder.
/// Data without a terminator is consumed entirely.
fn split_terminated(encoding: Encoding, data: &[u8]) -> crate::Result<(String, &[u8])> {
    match encoding.terminator_len() {
        1 => match data.iter().position(|&b| b == 0) {
            Some(idx) => Ok((encoding.decode(&data[..idx])?, &data[idx + 1..])),
            None => Ok((encoding.decode(data)?, &[])),
        },
        _ => {
            let end = data.chunks_exact(2).position(|c| c == [0, 0]);
            match end {
                Some(idx) => Ok((encoding.decode(&data[..2 * idx])?, &data[2 * idx + 2..])),
                None => Ok((encoding.decode(data)?, &[])),
            }
        }
    }
}

/// Strips the trailing zero terminator of the encoding, if present.
fn strip_terminator(encoding: Encoding, data: &[u8]) -> &[u8] {
    match encoding.terminator_len() {
        1 => data.strip_suffix(&[0]).unwrap_or(data),
        _ => data.strip_suffix(&[0, 0]).unwrap_or(data),
    }
}

/// The typed payload of a frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Content {
    /// A text frame: encoding discriminant followed by terminated text.
    Text {
        /// The text encoding.
        encoding: Encoding,
        /// The decoded text.
        text: String,
    },
    /// A comment frame, keyed by language and description.
    Comment {
        /// The text encoding.
        encoding: Encoding,
        /// The ISO-639-2 language code.
        language: [u8; 3],
        /// The content description.
        description: String,
        /// The comment text.
        text: String,
    },
    /// An attached picture frame (`PIC`/`APIC`).
    Picture {
        /// The text encoding of the description.
        encoding: Encoding,
        /// The mime type of the image data.
        mime_type: String,
        /// The picture type code (3 is the front cover).
        picture_type: u8,
        /// A textual description of the picture.
        description: String,
        /// The raw image data.
        data: Vec<u8>,
    },
    /// An unrecognized frame kept as opaque bytes.
    Binary(Vec<u8>),
}

/// One ID3v2 frame.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Frame {
    /// The frame identifier.
    pub id: FrameId,
    /// The frame flags of v2.3/2.4 headers, written back verbatim.
    pub flags: u16,
    /// The typed payload.
    pub content: Content,
}

impl Record for Frame {
    type Kind = FrameId;

    fn kind(&self) -> FrameId {
        self.id
    }

    /// The external length when written with the 10 byte frame header of v2.3/2.4.
    fn len(&self) -> u64 {
        10 + self.content_bytes(Id3Version::V24).len() as u64
    }
}

impl Frame {
    /// Creates a text frame, choosing Latin-1 when the text fits it and utf-16 otherwise.
    pub fn text(id: FrameId, text: impl Into<String>) -> Self {
        let text = text.into();
        let encoding = if is_latin1(&text) { Encoding::Latin1 } else { Encoding::Utf16 };
        Self { id, flags: 0, content: Content::Text { encoding, text } }
    }

    /// Creates a comment frame.
    pub fn comment(
        id: FrameId,
        language: [u8; 3],
        description: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        let description = description.into();
        let text = text.into();
        let encoding = if is_latin1(&description) && is_latin1(&text) {
            Encoding::Latin1
        } else {
            Encoding::Utf16
        };
        Self { id, flags: 0, content: Content::Comment { encoding, language, description, text } }
    }

    /// Creates a front cover picture frame.
    pub fn front_cover(id: FrameId, mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            id,
            flags: 0,
            content: Content::Picture {
                encoding: Encoding::Latin1,
                mime_type: mime_type.into(),
                picture_type: 3,
                description: String::new(),
                data,
            },
        }
    }

    /// Returns the text of a text or comment frame.
    pub fn text_value(&self) -> Option<&str> {
        match &self.content {
            Content::Text { text, .. } => Some(text),
            Content::Comment { text, .. } => Some(text),
            _ => None,
        }
    }

    /// Attempts to parse one frame from the start of the data, returning it and the number of
    /// bytes consumed.
    pub fn parse(version: Id3Version, data: &[u8]) -> crate::Result<(Self, usize)> {
        let info = version.info();
        let mut reader = data;
        let head = version.frame_header_spec().parse(&mut reader)?;

        let id = FrameId::from_bytes(head[0].bytes()?)?;
        let mut size = head[1].uint()? as u32;
        if info.syncsafe_sizes {
            size = decode_syncsafe(size)?;
        }
        let flags = match version {
            Id3Version::V22 => 0,
            _ => head[2].uint()? as u16,
        };

        let start = info.header_len as usize;
        let end = start + size as usize;
        if end > data.len() {
            return Err(crate::Error::new(
                ErrorKind::TruncatedStream,
                format!("Frame {} declares {} content bytes, {} available", id, size, data.len() - start),
            ));
        }

        let content = Self::parse_content(version, id, &data[start..end])?;
        Ok((Self { id, flags, content }, end))
    }

    fn parse_content(version: Id3Version, id: FrameId, data: &[u8]) -> crate::Result<Content> {
        if !(id.is_text() || id.is_comment() || id.is_picture()) {
            return Ok(Content::Binary(data.to_vec()));
        }

        let (&code, rest) = data.split_first().ok_or_else(|| {
            crate::Error::new(ErrorKind::TruncatedStream, format!("Empty {} frame", id))
        })?;
        let encoding = Encoding::from_code(code)?;

        if id.is_text() {
            let text = encoding.decode(strip_terminator(encoding, rest))?;
            return Ok(Content::Text { encoding, text });
        }

        if id.is_comment() {
            if rest.len() < 3 {
                return Err(crate::Error::new(
                    ErrorKind::TruncatedStream,
                    format!("{} frame ends inside its language code", id),
                ));
            }
            let mut language = [0u8; 3];
            language.copy_from_slice(&rest[..3]);
            let (description, text) = split_terminated(encoding, &rest[3..])?;
            let text = encoding.decode(strip_terminator(encoding, text))?;
            return Ok(Content::Comment { encoding, language, description, text });
        }

        // PIC stores a 3 byte image format, APIC a terminated latin-1 mime type.
        let (mime_type, rest) = match version {
            Id3Version::V22 => {
                if rest.len() < 3 {
                    return Err(crate::Error::new(
                        ErrorKind::TruncatedStream,
                        "PIC frame ends inside its image format",
                    ));
                }
                (format_to_mime(&rest[..3]), &rest[3..])
            }
            _ => {
                let (mime, rest) = split_terminated(Encoding::Latin1, rest)?;
                (mime, rest)
            }
        };
        let (&picture_type, rest) = rest.split_first().ok_or_else(|| {
            crate::Error::new(ErrorKind::TruncatedStream, format!("{} frame ends inside its picture type", id))
        })?;
        let (description, data) = split_terminated(encoding, rest)?;

        Ok(Content::Picture {
            encoding,
            mime_type,
            picture_type,
            description,
            data: data.to_vec(),
        })
    }

    /// Returns the encoding actually used when writing for the version.
    ///
    /// The v2.4-only encodings fall back to utf-16 in older versions, and Latin-1 is upgraded
    /// to utf-16 when the text no longer fits it.
    fn effective_encoding(&self, version: Id3Version) -> Encoding {
        let (encoding, texts): (Encoding, Vec<&str>) = match &self.content {
            Content::Text { encoding, text } => (*encoding, vec![text]),
            Content::Comment { encoding, description, text, .. } => {
                (*encoding, vec![description, text])
            }
            Content::Picture { encoding, description, .. } => (*encoding, vec![description]),
            Content::Binary(_) => return Encoding::Latin1,
        };

        let mut encoding = encoding;
        if !version.info().modern_encodings
            && matches!(encoding, Encoding::Utf16Be | Encoding::Utf8)
        {
            encoding = Encoding::Utf16;
        }
        if encoding == Encoding::Latin1 && !texts.iter().all(|t| is_latin1(t)) {
            encoding = Encoding::Utf16;
        }
        encoding
    }

    /// Renders the frame content as it is written for the version, header excluded.
    pub fn content_bytes(&self, version: Id3Version) -> Vec<u8> {
        let encoding = self.effective_encoding(version);
        let mut out = Vec::new();

        match &self.content {
            Content::Text { text, .. } => {
                out.push(encoding.code());
                out.extend_from_slice(&encoding.encode(text));
                out.extend_from_slice(&[0, 0][..encoding.terminator_len()]);
            }
            Content::Comment { language, description, text, .. } => {
                out.push(encoding.code());
                out.extend_from_slice(language);
                out.extend_from_slice(&encoding.encode(description));
                out.extend_from_slice(&[0, 0][..encoding.terminator_len()]);
                out.extend_from_slice(&encoding.encode(text));
                out.extend_from_slice(&[0, 0][..encoding.terminator_len()]);
            }
            Content::Picture { mime_type, picture_type, description, data, .. } => {
                out.push(encoding.code());
                match version {
                    Id3Version::V22 => out.extend_from_slice(&mime_to_format(mime_type)),
                    _ => {
                        out.extend_from_slice(&Encoding::Latin1.encode(mime_type));
                        out.push(0);
                    }
                }
                out.push(*picture_type);
                out.extend_from_slice(&encoding.encode(description));
                out.extend_from_slice(&[0, 0][..encoding.terminator_len()]);
                out.extend_from_slice(data);
            }
            Content::Binary(data) => out.extend_from_slice(data),
        }

        out
    }

    /// Attempts to write the frame, preceded by its header, to the writer.
    pub fn write_to(&self, version: Id3Version, writer: &mut impl Write) -> crate::Result<()> {
        let info = version.info();
        if self.id.as_bytes().len() != info.id_len {
            return Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("Frame id {} does not fit a {} header", self.id, version),
            ));
        }

        let content = self.content_bytes(version);
        if content.len() as u64 >= 1 << info.size_bits {
            return Err(crate::Error::new(
                ErrorKind::FieldOverflow,
                format!(
                    "Frame content of {} bytes exceeds the {} bit length budget of {}",
                    content.len(),
                    info.size_bits,
                    version
                ),
            ));
        }
        let mut size = content.len() as u32;
        if info.syncsafe_sizes {
            size = encode_syncsafe(size)?;
        }

        let mut values = vec![Value::Bytes(self.id.as_bytes().to_vec()), Value::Uint(size.into())];
        if info.header_len == 10 {
            values.push(Value::Uint(self.flags.into()));
        }
        version.frame_header_spec().build(writer, &values)?;
        writer.write_all(&content).map_err(crate::Error::from)
    }

    /// Returns the external length of the frame when written for the version.
    pub fn external_len(&self, version: Id3Version) -> u64 {
        version.info().header_len + self.content_bytes(version).len() as u64
    }
}

fn format_to_mime(format: &[u8]) -> String {
    match format {
        b"PNG" => "image/png".to_owned(),
        b"JPG" => "image/jpeg".to_owned(),
        _ => format!("image/{}", String::from_utf8_lossy(format).to_lowercase()),
    }
}

fn mime_to_format(mime: &str) -> [u8; 3] {
    match mime {
        "image/png" => *b"PNG",
        "image/jpeg" | "image/jpg" => *b"JPG",
        _ => {
            let mut out = *b"   ";
            let tail = mime.rsplit('/').next().unwrap_or(mime).as_bytes();
            for (o, b) in out.iter_mut().zip(tail) {
                *o = b.to_ascii_uppercase();
            }
            out
        }
    }
}
