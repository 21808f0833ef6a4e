//! Reading and writing APEv2 tags.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::codec::{FormatSpec, Value};
use crate::container::{Record, TagContainer};
use crate::fields::{self, FieldId, FieldKind, FormattingOptions};
use crate::types::{ContainerClass, ImageMetrics};
use crate::ErrorKind;

/// The preamble of every APEv2 tag header and footer.
pub const MAGIC: [u8; 8] = *b"APETAGEX";

/// The APEv2 version number.
const VERSION: u32 = 2000;

/// The byte length of the tag header and footer.
const EDGE_LEN: u64 = 32;

lazy_static! {
    /// (`8b<32u32u32u32u64p`) header/footer: preamble, then little-endian version, tag size,
    /// item count and flags, then 8 reserved zero bytes.
    static ref EDGE: FormatSpec = FormatSpec::compile("8b<32u32u32u32u64p").unwrap();
    /// (`<32u32u`) item preamble: little-endian value size and item flags; the NUL-terminated
    /// key and the value bytes follow.
    static ref ITEM_HEAD: FormatSpec = FormatSpec::compile("<32u32u").unwrap();
}

/// The tag-level flag marking a tag that carries a leading header.
const FLAG_HAS_HEADER: u32 = 1 << 31;
/// The tag-level flag marking the header edge itself.
const FLAG_IS_HEADER: u32 = 1 << 29;

/// The value type of an item, stored in bits 1..=2 of its flags.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ItemType {
    /// (`0`) UTF-8 text.
    Text,
    /// (`1`) Opaque binary data.
    Binary,
    /// (`2`) A locator to external data.
    External,
    /// (`3`) Reserved.
    Reserved,
}

impl ItemType {
    fn from_code(code: u32) -> Self {
        match code & 0b11 {
            0 => Self::Text,
            1 => Self::Binary,
            2 => Self::External,
            _ => Self::Reserved,
        }
    }

    fn code(self) -> u32 {
        match self {
            Self::Text => 0,
            Self::Binary => 1,
            Self::External => 2,
            Self::Reserved => 3,
        }
    }
}

/// One APEv2 tag item: a case-sensitive ASCII key and a typed value.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApeItem {
    /// The item key, ASCII in the printable range.
    pub key: String,
    /// The value type.
    pub item_type: ItemType,
    /// The read-only flag, carried but not enforced.
    pub read_only: bool,
    /// The raw value bytes.
    pub value: Vec<u8>,
}

impl Record for ApeItem {
    type Kind = String;

    fn kind(&self) -> String {
        self.key.clone()
    }

    fn len(&self) -> u64 {
        8 + self.key.len() as u64 + 1 + self.value.len() as u64
    }
}

impl ApeItem {
    /// Creates a text item.
    pub fn text(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            item_type: ItemType::Text,
            read_only: false,
            value: value.into().into_bytes(),
        }
    }

    /// Creates a binary item.
    pub fn binary(key: impl Into<String>, value: Vec<u8>) -> Self {
        Self { key: key.into(), item_type: ItemType::Binary, read_only: false, value }
    }

    /// Returns the value decoded as utf-8 text, if the item is textual.
    pub fn text_value(&self) -> Option<&str> {
        match self.item_type {
            ItemType::Text | ItemType::External => std::str::from_utf8(&self.value).ok(),
            _ => None,
        }
    }

    fn validate_key(key: &str) -> crate::Result<()> {
        let valid = (2..=255).contains(&key.len())
            && key.bytes().all(|b| (0x20..=0x7e).contains(&b));
        if !valid {
            return Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("Invalid item key {:?}", key),
            ));
        }
        Ok(())
    }

    /// Attempts to parse one item from the start of the data, returning it and the number of
    /// bytes consumed.
    fn parse(data: &[u8]) -> crate::Result<(Self, usize)> {
        let mut reader = data;
        let head = ITEM_HEAD.parse(&mut reader)?;
        let value_size = head[0].uint()? as usize;
        let flags = head[1].uint()? as u32;

        let rest = &data[8..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(|| {
            crate::Error::new(ErrorKind::TruncatedStream, "Item key is missing its terminator")
        })?;
        let key = String::from_utf8(rest[..nul].to_vec())?;
        Self::validate_key(&key)?;

        let value_start = nul + 1;
        let value_end = value_start + value_size;
        if value_end > rest.len() {
            return Err(crate::Error::new(
                ErrorKind::TruncatedStream,
                format!(
                    "Item {} declares {} value bytes, {} available",
                    key,
                    value_size,
                    rest.len() - value_start
                ),
            ));
        }

        let item = Self {
            key,
            item_type: ItemType::from_code(flags >> 1),
            read_only: flags & 1 != 0,
            value: rest[value_start..value_end].to_vec(),
        };
        Ok((item, 8 + value_end))
    }

    fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        Self::validate_key(&self.key)?;

        let flags = (self.item_type.code() << 1) | u32::from(self.read_only);
        ITEM_HEAD
            .build(writer, &[Value::Uint(self.value.len() as u64), Value::Uint(flags.into())])?;
        writer.write_all(self.key.as_bytes())?;
        writer.write_all(&[0])?;
        writer.write_all(&self.value).map_err(crate::Error::from)
    }
}

/// An APEv2 tag stored at the end of the file: items framed by a 32 byte header and footer,
/// or by the footer alone.
#[derive(Clone, Debug, PartialEq)]
pub struct ApeContainer {
    items: TagContainer<ApeItem>,
    /// Whether a leading header is written in front of the items.
    pub header: bool,
}

impl Default for ApeContainer {
    fn default() -> Self {
        Self::new()
    }
}

impl ApeContainer {
    /// Creates an empty tag that writes both header and footer.
    pub fn new() -> Self {
        Self { items: TagContainer::new(), header: true }
    }

    /// Attempts to read a trailing APEv2 tag from the end of the file.
    pub fn read_trailing(file: &mut (impl Read + Seek)) -> crate::Result<Self> {
        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < EDGE_LEN {
            return Err(crate::Error::new(
                ErrorKind::ForeignContainer(ContainerClass::Ape),
                "File too short to hold an APETAGEX footer",
            ));
        }

        file.seek(SeekFrom::End(-(EDGE_LEN as i64)))?;
        let mut edge = [0u8; EDGE_LEN as usize];
        file.read_exact(&mut edge)?;
        let footer = Edge::parse(&edge)?;

        let total = match footer.flags & FLAG_HAS_HEADER {
            0 => footer.size,
            _ => footer.size + EDGE_LEN,
        };
        if total > file_len {
            return Err(crate::Error::new(
                ErrorKind::TruncatedStream,
                format!("Tag of {} bytes in a {} byte file", total, file_len),
            ));
        }

        file.seek(SeekFrom::End(-(total as i64)))?;
        let mut region = vec![0u8; total as usize];
        file.read_exact(&mut region)?;
        Self::parse_region(&region, &footer)
    }

    /// Attempts to read a trailing APEv2 tag from the file at the path.
    pub fn read_from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let mut file = File::open(path)?;
        Self::read_trailing(&mut file)
    }

    fn parse_region(region: &[u8], footer: &Edge) -> crate::Result<Self> {
        let header = footer.flags & FLAG_HAS_HEADER != 0;
        let mut pos = 0;
        if header {
            let leading = Edge::parse(&region[..EDGE_LEN as usize])?;
            if leading.flags & FLAG_IS_HEADER == 0 || leading.size != footer.size {
                return Err(crate::Error::new(
                    ErrorKind::MalformedHeader,
                    "Tag header and footer disagree",
                ));
            }
            pos = EDGE_LEN as usize;
        }

        let items_end = region.len() - EDGE_LEN as usize;
        let mut items = TagContainer::new();
        for _ in 0..footer.count {
            if pos >= items_end {
                return Err(crate::Error::new(
                    ErrorKind::TruncatedStream,
                    format!("Tag declares {} items, region ended after {}", footer.count, items.records().len()),
                ));
            }
            let (item, consumed) = ApeItem::parse(&region[pos..items_end])?;
            items.push(item);
            pos += consumed;
        }

        items.origin_length = Some(region.len() as u64);
        Ok(Self { items, header })
    }

    /// Attempts to write the tag, header and footer included, to the writer.
    pub fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        let mut body = Vec::new();
        for item in self.items.records() {
            item.write_to(&mut body)?;
        }

        // The tag size covers the items and the footer, never the header.
        let size = body.len() as u64 + EDGE_LEN;
        let base_flags = if self.header { FLAG_HAS_HEADER } else { 0 };

        if self.header {
            Edge { size, count: self.items.records().len() as u32, flags: base_flags | FLAG_IS_HEADER }
                .write_to(writer)?;
        }
        writer.write_all(&body)?;
        Edge { size, count: self.items.records().len() as u32, flags: base_flags }.write_to(writer)
    }

    /// Returns the external length of the tag in bytes.
    pub fn len(&self) -> u64 {
        let edges = if self.header { 2 * EDGE_LEN } else { EDGE_LEN };
        edges + self.items.records().iter().map(Record::len).sum::<u64>()
    }

    /// Returns whether the tag holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.records().is_empty()
    }

    /// Returns the on-disk byte length the tag had when it was read, if it was.
    pub fn origin_length(&self) -> Option<u64> {
        self.items.origin_length
    }

    pub(crate) fn set_origin_length(&mut self, len: u64) {
        self.items.origin_length = Some(len);
    }

    /// Returns the items in order.
    pub fn items(&self) -> &[ApeItem] {
        self.items.records()
    }

    /// Returns the item stored under the key. Keys are case-sensitive.
    pub fn get_item(&self, key: &str) -> Option<&ApeItem> {
        self.items.get_first(&key.to_owned())
    }

    /// Inserts an item. A key that already exists is replaced in place at its first match,
    /// never duplicated.
    pub fn set_item(&mut self, item: ApeItem) {
        match self.items.get_first_mut(&item.key) {
            Some(existing) => *existing = item,
            None => self.items.push(item),
        }
    }

    /// Removes every item stored under the key, returning the number removed.
    pub fn remove_item(&mut self, key: &str) -> usize {
        self.items.remove(&key.to_owned())
    }

    /// Returns the value of the abstract field, if set.
    pub fn get_field(&self, id: FieldId) -> Option<&str> {
        self.get_item(fields::mapping(id).ape)?.text_value()
    }

    /// Sets the abstract field to a text value.
    pub fn set_field(&mut self, id: FieldId, value: impl Into<String>) {
        self.set_item(ApeItem::text(fields::mapping(id).ape, value));
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
    pub fn remove_field(&mut self, id: FieldId) {
        self.remove_item(fields::mapping(id).ape);
    }

    /// Normalizes the stored metadata in place, returning the number of repairs.
    pub fn clean(&mut self, _metrics: &dyn ImageMetrics) -> usize {
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

        repairs
    }

    /// Returns the number of padding bytes. APEv2 defines no padding record; this is always 0.
    pub fn padding(&self) -> u64 {
        0
    }

    /// APEv2 tags carry no padding, so only a zero amount is representable.
    pub fn set_padding(&mut self, external: u64) -> bool {
        external == 0
    }
}

/// The decoded numeric fields of a tag header or footer.
struct Edge {
    size: u64,
    count: u32,
    flags: u32,
}

impl Edge {
    fn parse(bytes: &[u8]) -> crate::Result<Self> {
        let mut reader = bytes;
        let v = EDGE.parse(&mut reader)?;
        if v[0].bytes()? != MAGIC {
            return Err(crate::Error::new(
                ErrorKind::ForeignContainer(ContainerClass::Ape),
                "Missing APETAGEX preamble",
            ));
        }

        let version = v[1].uint()? as u32;
        if version != VERSION {
            return Err(crate::Error::new(
                ErrorKind::UnsupportedVersion((version / 1000) as u8),
                format!("Unknown APE tag version {}", version),
            ));
        }

        let size = v[2].uint()?;
        if size < EDGE_LEN {
            return Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("Tag size {} is smaller than the footer itself", size),
            ));
        }

        Ok(Self { size, count: v[3].uint()? as u32, flags: v[4].uint()? as u32 })
    }

    fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        EDGE.build(
            writer,
            &[
                Value::Bytes(MAGIC.to_vec()),
                Value::Uint(VERSION.into()),
                Value::Uint(self.size),
                Value::Uint(self.count.into()),
                Value::Uint(self.flags.into()),
            ],
        )
    }
}

#[cfg(test)]
mod test {
    use std::io::Cursor;

    use super::*;

    fn round_trip(tag: &ApeContainer) -> ApeContainer {
        let mut buf = Vec::new();
        tag.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, tag.len());
        ApeContainer::read_trailing(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn tag_round_trip() {
        let mut tag = ApeContainer::new();
        tag.set_field(FieldId::Title, "a title");
        tag.set_field_pair(FieldId::TrackNumber, 2, 9, &FormattingOptions::default());
        tag.set_item(ApeItem::binary("Cover Art (Front)", vec![1, 2, 3]));

        let parsed = round_trip(&tag);
        assert_eq!(parsed.get_field(FieldId::Title), Some("a title"));
        assert_eq!(parsed.get_field_pair(FieldId::TrackNumber), Some((2, 9)));
        assert_eq!(parsed.get_item("Cover Art (Front)").unwrap().value, vec![1, 2, 3]);
        assert_eq!(parsed.origin_length(), Some(tag.len()));
    }

    #[test]
    fn footer_only_round_trip() {
        let mut tag = ApeContainer::new();
        tag.header = false;
        tag.set_field(FieldId::Artist, "an artist");

        let parsed = round_trip(&tag);
        assert!(!parsed.header);
        assert_eq!(parsed.get_field(FieldId::Artist), Some("an artist"));
    }

    #[test]
    fn trailing_tag_is_found_behind_audio() {
        let mut tag = ApeContainer::new();
        tag.set_field(FieldId::Album, "an album");

        let mut file = Cursor::new(b"pretend audio bytes".to_vec());
        file.seek(SeekFrom::End(0)).unwrap();
        tag.write_to(&mut file).unwrap();

        let parsed = ApeContainer::read_trailing(&mut file).unwrap();
        assert_eq!(parsed.get_field(FieldId::Album), Some("an album"));
    }

    #[test]
    fn replacing_twice_leaves_one_item() {
        let mut tag = ApeContainer::new();
        tag.set_item(ApeItem::text("Title", "first"));
        tag.set_item(ApeItem::text("Title", "second"));

        assert_eq!(tag.items().len(), 1);
        assert_eq!(tag.get_field(FieldId::Title), Some("second"));
    }

    #[test]
    fn keys_are_case_sensitive() {
        let mut tag = ApeContainer::new();
        tag.set_item(ApeItem::text("Title", "one"));
        tag.set_item(ApeItem::text("TITLE", "two"));

        assert_eq!(tag.items().len(), 2);
        assert_eq!(tag.get_item("Title").unwrap().text_value(), Some("one"));
    }

    #[test]
    fn missing_preamble_is_foreign() {
        let mut file = Cursor::new(vec![0u8; 64]);
        let err = ApeContainer::read_trailing(&mut file).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ForeignContainer(ContainerClass::Ape)));
    }

    #[test]
    fn invalid_keys_are_rejected() {
        assert!(ApeItem::validate_key("Title").is_ok());
        assert!(ApeItem::validate_key("a").is_err());
        assert!(ApeItem::validate_key("Ti\tle").is_err());
    }

    #[test]
    fn apev1_is_unsupported() {
        let mut buf = Vec::new();
        EDGE.build(
            &mut buf,
            &[
                Value::Bytes(MAGIC.to_vec()),
                Value::Uint(1000),
                Value::Uint(EDGE_LEN),
                Value::Uint(0),
                Value::Uint(0),
            ],
        )
        .unwrap();

        let err = ApeContainer::read_trailing(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::UnsupportedVersion(1)));
    }
}
