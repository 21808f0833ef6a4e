use std::convert::TryFrom;
use std::fmt;
use std::io::{Read, Write};

use crate::codec::{self, FormatSpec, Value};
use crate::container::Record;
use crate::types::{ImageMetrics, PcmSource};
use crate::ErrorKind;

lazy_static! {
    /// (`1u7u24u`) 1 bit last-block flag, 7 bit block type, 24 bit content length.
    pub(crate) static ref BLOCK_HEADER: FormatSpec = FormatSpec::compile("1u7u24u").unwrap();
    static ref STREAMINFO: FormatSpec =
        FormatSpec::compile("16u16u24u24u20u3u5u36u16b").unwrap();
    static ref SEEKPOINT: FormatSpec = FormatSpec::compile("64u64u16u").unwrap();
    static ref PICTURE: FormatSpec =
        FormatSpec::compile("32u32$32$32u32u32u32u32$").unwrap();
    static ref VORBIS_HEAD: FormatSpec = FormatSpec::compile("<32$32u").unwrap();
    static ref VORBIS_ENTRY: FormatSpec = FormatSpec::compile("<32$").unwrap();
    static ref APPLICATION_ID: FormatSpec = FormatSpec::compile("4b").unwrap();
}

/// The type discriminant of a FLAC metadata block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BlockType {
    /// (`0`) The stream information block.
    StreamInfo,
    /// (`1`) A run of zeroed padding bytes.
    Padding,
    /// (`2`) An application specific block.
    Application,
    /// (`3`) The seek point table.
    SeekTable,
    /// (`4`) The Vorbis comment block.
    VorbisComment,
    /// (`5`) The cue sheet block.
    Cuesheet,
    /// (`6`) An embedded picture.
    Picture,
}

impl BlockType {
    /// Returns the block type of the discriminant code. Codes 7 to 126 are reserved and 127 is
    /// forbidden; both are rejected as malformed.
    pub fn from_code(code: u8) -> crate::Result<Self> {
        match code {
            0 => Ok(Self::StreamInfo),
            1 => Ok(Self::Padding),
            2 => Ok(Self::Application),
            3 => Ok(Self::SeekTable),
            4 => Ok(Self::VorbisComment),
            5 => Ok(Self::Cuesheet),
            6 => Ok(Self::Picture),
            _ => Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("Reserved FLAC block type {}", code),
            )),
        }
    }

    /// Returns the discriminant code of the block type.
    pub fn code(self) -> u8 {
        match self {
            Self::StreamInfo => 0,
            Self::Padding => 1,
            Self::Application => 2,
            Self::SeekTable => 3,
            Self::VorbisComment => 4,
            Self::Cuesheet => 5,
            Self::Picture => 6,
        }
    }
}

impl fmt::Display for BlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StreamInfo => write!(f, "STREAMINFO"),
            Self::Padding => write!(f, "PADDING"),
            Self::Application => write!(f, "APPLICATION"),
            Self::SeekTable => write!(f, "SEEKTABLE"),
            Self::VorbisComment => write!(f, "VORBIS_COMMENT"),
            Self::Cuesheet => write!(f, "CUESHEET"),
            Self::Picture => write!(f, "PICTURE"),
        }
    }
}

/// The STREAMINFO block describing the audio stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StreamInfo {
    /// The minimum block size in samples.
    pub min_block_size: u16,
    /// The maximum block size in samples.
    pub max_block_size: u16,
    /// The minimum frame size in bytes, 0 if unknown.
    pub min_frame_size: u32,
    /// The maximum frame size in bytes, 0 if unknown.
    pub max_frame_size: u32,
    /// The sample rate in Hz.
    pub sample_rate: u32,
    /// The number of channels.
    pub channels: u8,
    /// The number of bits per sample.
    pub bits_per_sample: u8,
    /// The total number of samples, 0 if unknown.
    pub total_samples: u64,
    /// The MD5 signature of the unencoded audio data.
    pub md5: [u8; 16],
}

impl StreamInfo {
    /// Seeds a fresh STREAMINFO block from a PCM source.
    ///
    /// Frame sizes and the MD5 signature are left at 0 since this crate never encodes samples.
    pub fn from_pcm(pcm: &impl PcmSource) -> Self {
        Self {
            min_block_size: 0,
            max_block_size: 0,
            min_frame_size: 0,
            max_frame_size: 0,
            sample_rate: pcm.sample_rate(),
            channels: pcm.channels() as u8,
            bits_per_sample: pcm.bits_per_sample() as u8,
            total_samples: pcm.total_frames(),
            md5: [0; 16],
        }
    }

    fn parse(reader: &mut impl Read) -> crate::Result<Self> {
        let v = STREAMINFO.parse(reader)?;
        let mut md5 = [0u8; 16];
        md5.copy_from_slice(v[8].bytes()?);

        Ok(Self {
            min_block_size: v[0].uint()? as u16,
            max_block_size: v[1].uint()? as u16,
            min_frame_size: v[2].uint()? as u32,
            max_frame_size: v[3].uint()? as u32,
            sample_rate: v[4].uint()? as u32,
            channels: v[5].uint()? as u8 + 1,
            bits_per_sample: v[6].uint()? as u8 + 1,
            total_samples: v[7].uint()?,
            md5,
        })
    }

    fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        if self.channels == 0 || self.bits_per_sample == 0 {
            return Err(crate::Error::new(
                ErrorKind::FieldOverflow,
                "STREAMINFO channels and bits per sample are stored offset by one and must be nonzero",
            ));
        }

        STREAMINFO.build(
            writer,
            &[
                Value::Uint(self.min_block_size.into()),
                Value::Uint(self.max_block_size.into()),
                Value::Uint(self.min_frame_size.into()),
                Value::Uint(self.max_frame_size.into()),
                Value::Uint(self.sample_rate.into()),
                Value::Uint(u64::from(self.channels) - 1),
                Value::Uint(u64::from(self.bits_per_sample) - 1),
                Value::Uint(self.total_samples),
                Value::Bytes(self.md5.to_vec()),
            ],
        )
    }

    const LEN: u64 = 34;
}

/// A single entry of a SEEKTABLE block.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SeekPoint {
    /// The sample number of the first sample in the target frame.
    pub sample_offset: u64,
    /// The byte offset of the target frame from the first frame.
    pub byte_offset: u64,
    /// The number of samples in the target frame.
    pub frame_count: u16,
}

impl SeekPoint {
    /// The sample offset marking a placeholder seek point.
    pub const PLACEHOLDER: u64 = u64::MAX;
}

/// The SEEKTABLE block.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SeekTable {
    /// The seek points in order.
    pub points: Vec<SeekPoint>,
}

impl SeekTable {
    /// Checks that the table is non-empty and that non-placeholder seek points are strictly
    /// ascending by sample offset.
    pub fn validate(&self) -> crate::Result<()> {
        if self.points.is_empty() {
            return Err(crate::Error::new(ErrorKind::Parsing, "Empty SEEKTABLE block"));
        }

        let mut prev = None;
        for p in &self.points {
            if p.sample_offset == SeekPoint::PLACEHOLDER {
                continue;
            }
            if let Some(prev) = prev {
                if p.sample_offset <= prev {
                    return Err(crate::Error::new(
                        ErrorKind::Parsing,
                        format!(
                            "SEEKTABLE sample offset {} follows offset {}, expected ascending order",
                            p.sample_offset, prev
                        ),
                    ));
                }
            }
            prev = Some(p.sample_offset);
        }

        Ok(())
    }

    fn parse(reader: &mut impl Read, len: u64) -> crate::Result<Self> {
        if len % 18 != 0 {
            return Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("SEEKTABLE length {} is not a multiple of 18", len),
            ));
        }

        let mut points = Vec::with_capacity((len / 18) as usize);
        for _ in 0..len / 18 {
            let v = SEEKPOINT.parse(reader)?;
            points.push(SeekPoint {
                sample_offset: v[0].uint()?,
                byte_offset: v[1].uint()?,
                frame_count: v[2].uint()? as u16,
            });
        }

        let table = Self { points };
        table.validate()?;
        Ok(table)
    }

    fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        self.validate()?;
        for p in &self.points {
            SEEKPOINT.build(
                writer,
                &[
                    Value::Uint(p.sample_offset),
                    Value::Uint(p.byte_offset),
                    Value::Uint(p.frame_count.into()),
                ],
            )?;
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        18 * self.points.len() as u64
    }
}

/// The VORBIS_COMMENT block holding textual metadata.
///
/// All numeric fields inside this block are little-endian, unlike the rest of the container;
/// keys are ASCII and compared case-insensitively, values are utf-8.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct VorbisComment {
    /// The vendor string of the encoder.
    pub vendor: String,
    /// The `KEY=value` entries in order.
    pub comments: Vec<(String, String)>,
}

impl VorbisComment {
    /// Returns the first value stored under the key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.comments
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every value stored under the key with the new value, keeping the position of
    /// the first one.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        match self.comments.iter().position(|(k, _)| k.eq_ignore_ascii_case(key)) {
            Some(idx) => {
                self.comments.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
                self.comments.insert(idx, (key.to_owned(), value));
            }
            None => self.comments.push((key.to_owned(), value)),
        }
    }

    /// Removes every value stored under the key.
    pub fn remove(&mut self, key: &str) {
        self.comments.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    fn parse(reader: &mut impl Read) -> crate::Result<Self> {
        let head = VORBIS_HEAD.parse(reader)?;
        let vendor = String::from_utf8(head[0].bytes()?.to_vec())?;
        let count = head[1].uint()?;

        let mut comments = Vec::with_capacity(count.min(1024) as usize);
        for i in 0..count {
            let entry = VORBIS_ENTRY.parse(reader)?;
            let entry = String::from_utf8(entry[0].bytes()?.to_vec())?;
            let split = entry.find('=').ok_or_else(|| {
                crate::Error::new(
                    ErrorKind::Parsing,
                    format!("Vorbis comment {} contains no '=' separator", i),
                )
            })?;
            comments.push((entry[..split].to_owned(), entry[split + 1..].to_owned()));
        }

        Ok(Self { vendor, comments })
    }

    fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        VORBIS_HEAD.build(
            writer,
            &[
                Value::Bytes(self.vendor.as_bytes().to_vec()),
                Value::Uint(self.comments.len() as u64),
            ],
        )?;
        for (k, v) in &self.comments {
            let entry = format!("{}={}", k, v);
            VORBIS_ENTRY.build(writer, &[Value::Bytes(entry.into_bytes())])?;
        }
        Ok(())
    }

    fn len(&self) -> u64 {
        let entries: u64 =
            self.comments.iter().map(|(k, v)| 4 + k.len() as u64 + 1 + v.len() as u64).sum();
        4 + self.vendor.len() as u64 + 4 + entries
    }
}

/// An embedded PICTURE block.
///
/// Width, height, bit depth and color count are stored redundantly next to the image payload;
/// the cleanup pass recomputes them through an [`ImageMetrics`] collaborator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Picture {
    /// The picture type code (3 is the front cover).
    pub picture_type: u32,
    /// The mime type of the image data.
    pub mime_type: String,
    /// A textual description of the picture.
    pub description: String,
    /// The width in pixels.
    pub width: u32,
    /// The height in pixels.
    pub height: u32,
    /// The color depth in bits per pixel.
    pub depth: u32,
    /// The number of colors for indexed images, 0 otherwise.
    pub colors: u32,
    /// The raw image data.
    pub data: Vec<u8>,
}

impl Picture {
    /// Creates a front cover picture with zeroed metrics.
    pub fn front_cover(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            picture_type: 3,
            mime_type: mime_type.into(),
            description: String::new(),
            width: 0,
            height: 0,
            depth: 0,
            colors: 0,
            data,
        }
    }

    /// Recomputes the stored image metrics from the payload and corrects stale values.
    /// Returns whether anything was repaired.
    pub fn repair_metrics(&mut self, metrics: &dyn ImageMetrics) -> bool {
        let info = match metrics.measure(&self.data) {
            Some(i) => i,
            None => return false,
        };

        let stale = self.width != info.width
            || self.height != info.height
            || self.depth != info.bits_per_pixel
            || self.colors != info.color_count
            || self.mime_type != info.mime_type;
        if stale {
            self.width = info.width;
            self.height = info.height;
            self.depth = info.bits_per_pixel;
            self.colors = info.color_count;
            self.mime_type = info.mime_type;
        }
        stale
    }

    fn parse(reader: &mut impl Read) -> crate::Result<Self> {
        let v = PICTURE.parse(reader)?;
        Ok(Self {
            picture_type: v[0].uint()? as u32,
            mime_type: String::from_utf8(v[1].bytes()?.to_vec())?,
            description: String::from_utf8(v[2].bytes()?.to_vec())?,
            width: v[3].uint()? as u32,
            height: v[4].uint()? as u32,
            depth: v[5].uint()? as u32,
            colors: v[6].uint()? as u32,
            data: v[7].bytes()?.to_vec(),
        })
    }

    fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        PICTURE.build(
            writer,
            &[
                Value::Uint(self.picture_type.into()),
                Value::Bytes(self.mime_type.as_bytes().to_vec()),
                Value::Bytes(self.description.as_bytes().to_vec()),
                Value::Uint(self.width.into()),
                Value::Uint(self.height.into()),
                Value::Uint(self.depth.into()),
                Value::Uint(self.colors.into()),
                Value::Bytes(self.data.clone()),
            ],
        )
    }

    fn len(&self) -> u64 {
        32 + self.mime_type.len() as u64 + self.description.len() as u64 + self.data.len() as u64
    }
}

/// A FLAC metadata block.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Block {
    /// The STREAMINFO block.
    StreamInfo(StreamInfo),
    /// A padding block of zeroed bytes with the contained content length.
    Padding(u32),
    /// An application block with a 4 byte application id and opaque payload.
    Application {
        /// The registered application id.
        id: [u8; 4],
        /// The application payload.
        data: Vec<u8>,
    },
    /// The SEEKTABLE block.
    SeekTable(SeekTable),
    /// The VORBIS_COMMENT block.
    VorbisComment(VorbisComment),
    /// The CUESHEET block, kept as an opaque payload.
    Cuesheet(Vec<u8>),
    /// An embedded PICTURE block.
    Picture(Picture),
}

impl Record for Block {
    type Kind = BlockType;

    fn kind(&self) -> BlockType {
        match self {
            Self::StreamInfo(_) => BlockType::StreamInfo,
            Self::Padding(_) => BlockType::Padding,
            Self::Application { .. } => BlockType::Application,
            Self::SeekTable(_) => BlockType::SeekTable,
            Self::VorbisComment(_) => BlockType::VorbisComment,
            Self::Cuesheet(_) => BlockType::Cuesheet,
            Self::Picture(_) => BlockType::Picture,
        }
    }

    fn len(&self) -> u64 {
        4 + self.content_len()
    }
}

impl Block {
    /// Returns the content length of the block in bytes, excluding the 4 byte block header.
    pub fn content_len(&self) -> u64 {
        match self {
            Self::StreamInfo(_) => StreamInfo::LEN,
            Self::Padding(size) => u64::from(*size),
            Self::Application { data, .. } => 4 + data.len() as u64,
            Self::SeekTable(t) => t.len(),
            Self::VorbisComment(vc) => vc.len(),
            Self::Cuesheet(data) => data.len() as u64,
            Self::Picture(p) => p.len(),
        }
    }

    /// Attempts to parse one block from the reader, returning it and whether its header carried
    /// the last-block flag.
    pub fn parse(reader: &mut impl Read) -> crate::Result<(Self, bool)> {
        let head = BLOCK_HEADER.parse(reader)?;
        let last = head[0].uint()? == 1;
        let block_type = BlockType::from_code(head[1].uint()? as u8)?;
        let len = head[2].uint()?;

        let mut content = codec::substream(reader, len);
        let block = match block_type {
            BlockType::StreamInfo => Block::StreamInfo(StreamInfo::parse(&mut content)?),
            BlockType::Padding => {
                std::io::copy(&mut content, &mut std::io::sink())
                    .map_err(crate::Error::from)?;
                Block::Padding(u32::try_from(len).map_err(|_| {
                    crate::Error::new(ErrorKind::MalformedHeader, "Padding block too large")
                })?)
            }
            BlockType::Application => {
                let id = APPLICATION_ID.parse(&mut content)?;
                let mut data = Vec::new();
                content.read_to_end(&mut data).map_err(crate::Error::from)?;
                let mut app_id = [0u8; 4];
                app_id.copy_from_slice(id[0].bytes()?);
                Block::Application { id: app_id, data }
            }
            BlockType::SeekTable => Block::SeekTable(SeekTable::parse(&mut content, len)?),
            BlockType::VorbisComment => {
                Block::VorbisComment(VorbisComment::parse(&mut content)?)
            }
            BlockType::Cuesheet => {
                let mut data = Vec::new();
                content.read_to_end(&mut data).map_err(crate::Error::from)?;
                Block::Cuesheet(data)
            }
            BlockType::Picture => Block::Picture(Picture::parse(&mut content)?),
        };

        if content.limit() != 0 {
            return Err(crate::Error::new(
                ErrorKind::Parsing,
                format!(
                    "{} block declared {} content bytes but {} were left unparsed",
                    block_type,
                    len,
                    content.limit()
                ),
            ));
        }

        Ok((block, last))
    }

    /// Attempts to write the block, preceded by its header, to the writer.
    pub fn write_to(&self, writer: &mut impl Write, last: bool) -> crate::Result<()> {
        BLOCK_HEADER.build(
            writer,
            &[
                Value::Uint(last as u64),
                Value::Uint(self.kind().code().into()),
                Value::Uint(self.content_len()),
            ],
        )?;

        match self {
            Self::StreamInfo(info) => info.write_to(writer),
            Self::Padding(size) => {
                let zeroes = vec![0u8; *size as usize];
                writer.write_all(&zeroes).map_err(crate::Error::from)
            }
            Self::Application { id, data } => {
                writer.write_all(id).map_err(crate::Error::from)?;
                writer.write_all(data).map_err(crate::Error::from)
            }
            Self::SeekTable(t) => t.write_to(writer),
            Self::VorbisComment(vc) => vc.write_to(writer),
            Self::Cuesheet(data) => writer.write_all(data).map_err(crate::Error::from),
            Self::Picture(p) => p.write_to(writer),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(block: Block) -> Block {
        let mut buf = Vec::new();
        block.write_to(&mut buf, false).unwrap();
        assert_eq!(buf.len() as u64, block.content_len() + 4);

        let (parsed, last) = Block::parse(&mut buf.as_slice()).unwrap();
        assert!(!last);
        parsed
    }

    #[test]
    fn streaminfo_round_trip() {
        let block = Block::StreamInfo(StreamInfo {
            min_block_size: 4096,
            max_block_size: 4096,
            min_frame_size: 14,
            max_frame_size: 14970,
            sample_rate: 44100,
            channels: 2,
            bits_per_sample: 16,
            total_samples: 304_844,
            md5: *b"0123456789abcdef",
        });
        assert_eq!(round_trip(block.clone()), block);
    }

    #[test]
    fn vorbis_comment_round_trip() {
        let mut vc = VorbisComment { vendor: "reference encoder".to_owned(), comments: vec![] };
        vc.set("TITLE", "a title");
        vc.set("TRACKNUMBER", "2/3");
        let block = Block::VorbisComment(vc);
        assert_eq!(round_trip(block.clone()), block);
    }

    #[test]
    fn vorbis_comment_set_replaces_in_place() {
        let mut vc = VorbisComment::default();
        vc.set("TITLE", "one");
        vc.set("ARTIST", "a");
        vc.set("title", "two");
        assert_eq!(vc.comments.len(), 2);
        assert_eq!(vc.comments[0].1, "two");
        assert_eq!(vc.get("TITLE"), Some("two"));
    }

    #[test]
    fn seek_table_rejects_unordered_points() {
        let table = SeekTable {
            points: vec![
                SeekPoint { sample_offset: 100, byte_offset: 0, frame_count: 10 },
                SeekPoint { sample_offset: 50, byte_offset: 20, frame_count: 10 },
            ],
        };
        assert!(table.validate().is_err());
        assert!(SeekTable::default().validate().is_err());
    }

    #[test]
    fn seek_table_allows_placeholders() {
        let table = SeekTable {
            points: vec![
                SeekPoint { sample_offset: 50, byte_offset: 20, frame_count: 10 },
                SeekPoint {
                    sample_offset: SeekPoint::PLACEHOLDER,
                    byte_offset: 0,
                    frame_count: 0,
                },
            ],
        };
        assert!(table.validate().is_ok());
    }

    #[test]
    fn reserved_block_type_is_rejected() {
        for code in [7u8, 66, 126, 127] {
            assert!(BlockType::from_code(code).is_err());
        }
    }

    #[test]
    fn picture_round_trip() {
        let block = Block::Picture(Picture {
            picture_type: 3,
            mime_type: "image/png".to_owned(),
            description: "cover".to_owned(),
            width: 500,
            height: 500,
            depth: 24,
            colors: 0,
            data: vec![0x89, b'P', b'N', b'G'],
        });
        assert_eq!(round_trip(block.clone()), block);
    }
}
