//! Reading and writing ID3v2.2, v2.3 and v2.4 tags.

use std::convert::TryFrom;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::codec::{FormatSpec, Value};
use crate::container::TagContainer;
use crate::fields::{self, FieldId, FieldKind, FormattingOptions};
use crate::types::{ContainerClass, ImageMetrics};
use crate::ErrorKind;

pub use frame::{
    decode_syncsafe, encode_syncsafe, Content, Encoding, Frame, FrameId, Id3Version, SYNCSAFE_MAX,
};

mod frame;

/// The marker at the start of every ID3v2 tag.
pub const MAGIC: [u8; 3] = *b"ID3";

lazy_static! {
    /// (`3b8u8u8u32u`) tag header: marker, major version, revision, flags and the syncsafe
    /// length of everything after the header.
    static ref TAG_HEADER: FormatSpec = FormatSpec::compile("3b8u8u8u32u").unwrap();
}

/// The tag header flag marking an unsynchronised tag.
const FLAG_UNSYNC: u8 = 0x80;
/// The tag header flag marking an extended header (v2.3/2.4) or compression (v2.2).
const FLAG_EXTENDED: u8 = 0x40;

/// An ID3v2 tag: a 10 byte header followed by frames and optional zero padding, stored at the
/// start of the file.
#[derive(Clone, Debug, PartialEq)]
pub struct Id3Container {
    frames: TagContainer<Frame>,
    /// The tag version frames are read from and written for.
    pub version: Id3Version,
    flags: u8,
    padding: u64,
}

impl Default for Id3Container {
    fn default() -> Self {
        Self::new(Id3Version::V24)
    }
}

impl Id3Container {
    /// Creates an empty tag of the version.
    pub fn new(version: Id3Version) -> Self {
        Self { frames: TagContainer::new(), version, flags: 0, padding: 0 }
    }

    /// Attempts to read an ID3v2 tag from the reader.
    pub fn read_from(reader: &mut impl Read) -> crate::Result<Self> {
        let head = TAG_HEADER.parse(reader)?;
        if head[0].bytes()? != MAGIC {
            return Err(crate::Error::new(
                ErrorKind::ForeignContainer(ContainerClass::Id3),
                "Missing ID3 tag marker",
            ));
        }

        let version = Id3Version::from_major(head[1].uint()? as u8)?;
        let flags = head[3].uint()? as u8;
        let size = decode_syncsafe(head[4].uint()? as u32)?;

        if flags & FLAG_UNSYNC != 0 {
            log::warn!("Unsynchronised {} tag, reading bytes as stored", version);
        }

        let mut region = vec![0u8; size as usize];
        reader.read_exact(&mut region)?;

        let mut pos = skip_extended_header(version, flags, &region)?;
        if pos > region.len() {
            return Err(crate::Error::new(
                ErrorKind::TruncatedStream,
                "Extended header extends past the end of the tag",
            ));
        }
        let mut frames = TagContainer::new();
        while pos + version.info().header_len as usize <= region.len() {
            // A zeroed id byte marks the start of the padding.
            if region[pos] == 0 {
                break;
            }
            let (frame, consumed) = Frame::parse(version, &region[pos..])?;
            frames.push(frame);
            pos += consumed;
        }
        let padding = (region.len() - pos) as u64;

        frames.origin_length = Some(10 + u64::from(size));
        Ok(Self { frames, version, flags, padding })
    }

    /// Attempts to read an ID3v2 tag from the file at the path.
    pub fn read_from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    /// Attempts to write the tag header, every frame and the padding to the writer.
    pub fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        let mut body = Vec::new();
        for frame in self.frames.records() {
            frame.write_to(self.version, &mut body)?;
        }

        let size = body.len() as u64 + self.padding;
        let size = u32::try_from(size)
            .ok()
            .filter(|s| *s <= SYNCSAFE_MAX)
            .ok_or_else(|| {
                crate::Error::new(
                    ErrorKind::FieldOverflow,
                    format!("Tag of {} bytes exceeds the 28 bit syncsafe budget", size),
                )
            })?;

        TAG_HEADER.build(
            writer,
            &[
                Value::Bytes(MAGIC.to_vec()),
                Value::Uint(self.version.major().into()),
                Value::Uint(0),
                // The extended header is not carried over; its flag must not survive either.
                Value::Uint((self.flags & !FLAG_EXTENDED & !FLAG_UNSYNC).into()),
                Value::Uint(encode_syncsafe(size)?.into()),
            ],
        )?;
        writer.write_all(&body)?;

        let zeroes = vec![0u8; self.padding as usize];
        writer.write_all(&zeroes).map_err(crate::Error::from)
    }

    /// Returns the external length of the tag in bytes, header and padding included.
    pub fn len(&self) -> u64 {
        10 + self
            .frames
            .records()
            .iter()
            .map(|f| f.external_len(self.version))
            .sum::<u64>()
            + self.padding
    }

    /// Returns whether the tag holds no frames.
    pub fn is_empty(&self) -> bool {
        self.frames.records().is_empty()
    }

    /// Returns the on-disk byte length the tag had when it was read, if it was.
    pub fn origin_length(&self) -> Option<u64> {
        self.frames.origin_length
    }

    pub(crate) fn set_origin_length(&mut self, len: u64) {
        self.frames.origin_length = Some(len);
    }

    /// Returns the frames in order.
    pub fn frames(&self) -> &[Frame] {
        self.frames.records()
    }

    /// Appends a frame. Multiple frames of the same id are legal; comment frames go through
    /// [`set_comment`](Self::set_comment) instead to honor their exclusivity rule.
    pub fn add_frame(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// Removes every frame of the id, returning the number removed.
    pub fn remove_frames(&mut self, id: FrameId) -> usize {
        self.frames.remove(&id)
    }

    /// Returns the frame id the abstract field maps to in this tag's version.
    pub fn field_frame_id(&self, id: FieldId) -> FrameId {
        let m = fields::mapping(id);
        FrameId::new(match self.version {
            Id3Version::V22 => m.id3v22,
            Id3Version::V23 => m.id3v23,
            Id3Version::V24 => m.id3v24,
        })
    }

    /// Returns the value of the abstract field, if set.
    pub fn get_field(&self, id: FieldId) -> Option<&str> {
        self.frames.get_first(&self.field_frame_id(id))?.text_value()
    }

    /// Sets the abstract field to a text value, replacing existing frames of its id in place.
    pub fn set_field(&mut self, id: FieldId, value: impl Into<String>) {
        let frame_id = self.field_frame_id(id);
        let frame = match id {
            FieldId::Comment => Frame::comment(frame_id, *b"eng", "", value),
            _ => Frame::text(frame_id, value),
        };
        self.frames.replace_all(&frame_id, vec![frame], TagContainer::push);
    }

    /// Sets the abstract field to a numeric pair, rendered as `current` or `current/total`.
    pub fn set_field_pair(
        &mut self,
        id: FieldId,
        current: u32,
        total: u32,
        opts: &FormattingOptions,
    ) {
        self.set_field(id, fields::render_pair(current, total, opts));
    }

    /// Returns the abstract field parsed as a numeric pair.
    pub fn get_field_pair(&self, id: FieldId) -> Option<(u32, u32)> {
        self.get_field(id).map(fields::parse_pair)
    }

    /// Removes the abstract field.
    ///
    /// Removal of a numeric pair is conditional: when the stored value carries a nonzero
    /// total, only the current part is zeroed and the frame stays, since the total remains
    /// meaningful on its own.
    pub fn remove_field(&mut self, id: FieldId) {
        if fields::mapping(id).kind == FieldKind::NumericPair {
            if let Some((_, total)) = self.get_field_pair(id) {
                if total != 0 {
                    self.set_field_pair(id, 0, total, &FormattingOptions::default());
                    return;
                }
            }
        }
        self.frames.remove(&self.field_frame_id(id));
    }

    /// Sets a comment frame, replacing an existing one with the same language and description.
    pub fn set_comment(
        &mut self,
        language: [u8; 3],
        description: impl Into<String>,
        text: impl Into<String>,
    ) {
        let id = self.field_frame_id(FieldId::Comment);
        let frame = Frame::comment(id, language, description, text);
        let key = match &frame.content {
            Content::Comment { language, description, .. } => (*language, description.clone()),
            _ => unreachable!("comment constructor builds comment content"),
        };

        let existing = self.frames.records_mut().iter_mut().find(|f| match &f.content {
            Content::Comment { language, description, .. } => {
                (*language, description.clone()) == key
            }
            _ => false,
        });
        match existing {
            Some(f) => *f = frame,
            None => self.frames.push(frame),
        }
    }

    /// Returns the attached pictures in order.
    pub fn pictures(&self) -> impl Iterator<Item = &Frame> {
        self.frames
            .records()
            .iter()
            .filter(|f| matches!(f.content, Content::Picture { .. }))
    }

    /// Appends an attached picture frame.
    pub fn add_picture(&mut self, mime_type: impl Into<String>, data: Vec<u8>) {
        let id = match self.version {
            Id3Version::V22 => FrameId::new("PIC"),
            _ => FrameId::new("APIC"),
        };
        self.frames.push(Frame::front_cover(id, mime_type, data));
    }

    /// Removes every attached picture, returning the number removed.
    pub fn remove_pictures(&mut self) -> usize {
        self.frames.remove_where(|f| matches!(f.content, Content::Picture { .. }))
    }

    /// Normalizes the stored metadata in place, returning the number of repairs.
    ///
    /// Text fields are trimmed, numeric pairs are rendered canonically and the stored mime
    /// type of every picture is recomputed from its payload.
    pub fn clean(&mut self, metrics: &dyn ImageMetrics) -> usize {
        let mut repairs = 0;

        for mapping in &fields::FORMAT_TABLE {
            let value = match self.get_field(mapping.id) {
                Some(v) => v,
                None => continue,
            };
            let cleaned = match mapping.kind {
                FieldKind::Text => fields::clean_text(value),
                FieldKind::NumericPair => fields::clean_pair(value),
            };
            if let Some(cleaned) = cleaned {
                log::info!("Fixed {:?} value {:?} to {:?}", mapping.id, value, cleaned);
                self.set_field(mapping.id, cleaned);
                repairs += 1;
            }
        }

        for frame in self.frames.records_mut() {
            if let Content::Picture { mime_type, data, .. } = &mut frame.content {
                if let Some(info) = metrics.measure(data) {
                    if *mime_type != info.mime_type {
                        log::info!("Fixed picture mime type {:?} to {:?}", mime_type, info.mime_type);
                        *mime_type = info.mime_type;
                        repairs += 1;
                    }
                }
            }
        }

        repairs
    }

    /// Returns the number of padding bytes after the last frame.
    pub fn padding(&self) -> u64 {
        self.padding
    }

    /// Resizes the padding to exactly `external` bytes. Always representable since the padding
    /// is a raw zero run.
    pub fn set_padding(&mut self, external: u64) -> bool {
        self.padding = external;
        true
    }
}

/// Returns the frame region offset after an extended header, if the flags announce one.
fn skip_extended_header(version: Id3Version, flags: u8, region: &[u8]) -> crate::Result<usize> {
    if flags & FLAG_EXTENDED == 0 {
        return Ok(0);
    }

    let mut reader = region;
    match version {
        Id3Version::V22 => Err(crate::Error::new(
            ErrorKind::MalformedHeader,
            "Compressed ID3v2.2 tags are not supported",
        )),
        Id3Version::V23 => {
            // The v2.3 extended header length excludes its own 4 length bytes.
            let head = FormatSpec::compile("32u")?.parse(&mut reader)?;
            Ok(4 + head[0].uint()? as usize)
        }
        Id3Version::V24 => {
            // The v2.4 extended header length is syncsafe and includes itself.
            let head = FormatSpec::compile("32u")?.parse(&mut reader)?;
            Ok(decode_syncsafe(head[0].uint()? as u32)? as usize)
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn round_trip(tag: &Id3Container) -> Id3Container {
        let mut buf = Vec::new();
        tag.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, tag.len());
        Id3Container::read_from(&mut buf.as_slice()).unwrap()
    }

    #[test]
    fn tag_round_trip_per_version() {
        for version in [Id3Version::V22, Id3Version::V23, Id3Version::V24] {
            let mut tag = Id3Container::new(version);
            tag.set_field(FieldId::Title, "a title");
            tag.set_field(FieldId::Artist, "än ártist");
            tag.set_field_pair(FieldId::TrackNumber, 2, 9, &FormattingOptions::default());
            tag.set_padding(256);

            let parsed = round_trip(&tag);
            assert_eq!(parsed.version, version);
            assert_eq!(parsed.get_field(FieldId::Title), Some("a title"));
            assert_eq!(parsed.get_field(FieldId::Artist), Some("än ártist"));
            assert_eq!(parsed.get_field_pair(FieldId::TrackNumber), Some((2, 9)));
            assert_eq!(parsed.padding(), 256);
            assert_eq!(parsed.origin_length(), Some(tag.len()));
        }
    }

    #[test]
    fn year_maps_to_tdrc_in_v24() {
        let mut v23 = Id3Container::new(Id3Version::V23);
        let mut v24 = Id3Container::new(Id3Version::V24);
        v23.set_field(FieldId::Year, "1999");
        v24.set_field(FieldId::Year, "1999");

        assert_eq!(v23.frames()[0].id, FrameId::new("TYER"));
        assert_eq!(v24.frames()[0].id, FrameId::new("TDRC"));
    }

    #[test]
    fn foreign_marker_is_rejected() {
        let data = b"APETAGEX\x00\x00";
        let err = Id3Container::read_from(&mut data.as_ref()).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ForeignContainer(ContainerClass::Id3)));
    }

    #[test]
    fn duplicate_frame_ids_are_legal() {
        let mut tag = Id3Container::new(Id3Version::V24);
        tag.add_frame(Frame::text(FrameId::new("TIT2"), "one"));
        tag.add_frame(Frame::text(FrameId::new("TIT2"), "two"));

        let parsed = round_trip(&tag);
        assert_eq!(parsed.frames().len(), 2);
    }

    #[test]
    fn comments_are_keyed_by_language_and_description() {
        let mut tag = Id3Container::new(Id3Version::V24);
        tag.set_comment(*b"eng", "", "first");
        tag.set_comment(*b"ger", "", "zweiter");
        tag.set_comment(*b"eng", "", "replaced");

        let comments: Vec<_> = tag
            .frames()
            .iter()
            .filter_map(|f| match &f.content {
                Content::Comment { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(comments, ["replaced", "zweiter"]);
    }

    #[test]
    fn pair_removal_keeps_a_nonzero_total() {
        let mut tag = Id3Container::new(Id3Version::V24);
        tag.set_field_pair(FieldId::TrackNumber, 2, 9, &FormattingOptions::default());
        tag.remove_field(FieldId::TrackNumber);
        assert_eq!(tag.get_field_pair(FieldId::TrackNumber), Some((0, 9)));

        tag.set_field_pair(FieldId::TrackNumber, 2, 0, &FormattingOptions::default());
        tag.remove_field(FieldId::TrackNumber);
        assert_eq!(tag.get_field(FieldId::TrackNumber), None);
    }

    #[test]
    fn unknown_frames_survive_round_trips() {
        let mut tag = Id3Container::new(Id3Version::V24);
        tag.add_frame(Frame {
            id: FrameId::new("PRIV"),
            flags: 0,
            content: Content::Binary(vec![1, 2, 3, 4]),
        });

        let parsed = round_trip(&tag);
        assert_eq!(parsed.frames()[0].content, Content::Binary(vec![1, 2, 3, 4]));
    }

    #[test]
    fn v23_extended_header_is_skipped() {
        let mut tag = Id3Container::new(Id3Version::V23);
        tag.set_field(FieldId::Title, "t");

        let mut body = vec![0u8, 0, 0, 6, 0, 0, 0, 0, 0, 0];
        for frame in tag.frames() {
            frame.write_to(Id3Version::V23, &mut body).unwrap();
        }

        let mut buf = Vec::new();
        TAG_HEADER
            .build(
                &mut buf,
                &[
                    Value::Bytes(MAGIC.to_vec()),
                    Value::Uint(3),
                    Value::Uint(0),
                    Value::Uint(FLAG_EXTENDED.into()),
                    Value::Uint(encode_syncsafe(body.len() as u32).unwrap().into()),
                ],
            )
            .unwrap();
        buf.extend_from_slice(&body);

        let parsed = Id3Container::read_from(&mut buf.as_slice()).unwrap();
        assert_eq!(parsed.get_field(FieldId::Title), Some("t"));
    }
}
