//! Reading and writing FLAC metadata blocks.

use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;

use crate::container::{Record, TagContainer};
use crate::fields::{self, FieldId, FieldKind, FormattingOptions};
use crate::types::{ContainerClass, ImageMetrics};
use crate::ErrorKind;

pub use block::{Block, BlockType, Picture, SeekPoint, SeekTable, StreamInfo, VorbisComment};

mod block;

/// The marker at the start of every FLAC stream.
pub const MAGIC: [u8; 4] = *b"fLaC";

/// The compiled block header spec, shared with the update region scan.
pub(crate) fn block_header_spec() -> &'static crate::codec::FormatSpec {
    &block::BLOCK_HEADER
}

/// The maximum content length of a single metadata block, imposed by its 24 bit length field.
const MAX_BLOCK_LEN: u64 = (1 << 24) - 1;

/// The block kinds of which at most one may appear in a stream.
const UNIQUE: [BlockType; 4] =
    [BlockType::StreamInfo, BlockType::VorbisComment, BlockType::SeekTable, BlockType::Cuesheet];

/// The canonical block order when inserting: STREAMINFO first, padding last.
fn rank(kind: BlockType) -> u8 {
    match kind {
        BlockType::StreamInfo => 0,
        BlockType::Application => 1,
        BlockType::SeekTable => 2,
        BlockType::VorbisComment => 3,
        BlockType::Cuesheet => 4,
        BlockType::Picture => 5,
        BlockType::Padding => 6,
    }
}

/// A FLAC metadata container: the `fLaC` marker followed by a chain of metadata blocks.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FlacContainer {
    blocks: TagContainer<Block>,
}

impl FlacContainer {
    /// Creates a container holding only the STREAMINFO block.
    pub fn new(info: StreamInfo) -> Self {
        let mut blocks = TagContainer::new();
        blocks.push(Block::StreamInfo(info));
        Self { blocks }
    }

    /// Attempts to read a FLAC metadata container from the reader.
    ///
    /// The reader is left positioned at the first audio frame.
    pub fn read_from(reader: &mut impl Read) -> crate::Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(crate::Error::new(
                ErrorKind::ForeignContainer(ContainerClass::Flac),
                "Missing fLaC stream marker",
            ));
        }

        let mut blocks = TagContainer::new();
        let mut first = true;
        loop {
            let (block, last) = Block::parse(reader)?;

            if first && block.kind() != BlockType::StreamInfo {
                return Err(crate::Error::new(
                    ErrorKind::MalformedHeader,
                    format!("First metadata block is {}, expected STREAMINFO", block.kind()),
                ));
            }
            if !first && block.kind() == BlockType::StreamInfo {
                return Err(crate::Error::new(
                    ErrorKind::MalformedHeader,
                    "Duplicate STREAMINFO block",
                ));
            }
            if UNIQUE.contains(&block.kind())
                && blocks.get_first(&block.kind()).is_some()
            {
                return Err(crate::Error::new(
                    ErrorKind::MalformedHeader,
                    format!("Duplicate {} block", block.kind()),
                ));
            }

            first = false;
            blocks.push(block);
            if last {
                break;
            }
        }

        let mut container = Self { blocks };
        container.blocks.origin_length = Some(container.len());
        Ok(container)
    }

    /// Attempts to read a FLAC metadata container from the file at the path.
    pub fn read_from_path(path: impl AsRef<Path>) -> crate::Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::read_from(&mut reader)
    }

    /// Attempts to write the marker and every metadata block to the writer.
    ///
    /// Blocks whose content no longer fits the 24 bit length field are skipped with a warning
    /// rather than written corrupted.
    pub fn write_to(&self, writer: &mut impl Write) -> crate::Result<()> {
        if self.streaminfo().is_none() {
            return Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                "Cannot write a FLAC container without a STREAMINFO block",
            ));
        }

        writer.write_all(&MAGIC)?;

        let writable: Vec<&Block> = self
            .blocks
            .records()
            .iter()
            .filter(|b| {
                let fits = b.content_len() <= MAX_BLOCK_LEN;
                if !fits {
                    log::warn!(
                        "Skipping {} block of {} bytes, exceeding the 24 bit length field",
                        b.kind(),
                        b.content_len()
                    );
                }
                fits
            })
            .collect();

        for (i, block) in writable.iter().enumerate() {
            block.write_to(writer, i + 1 == writable.len())?;
        }
        Ok(())
    }

    /// Returns the external length of the container in bytes, marker included.
    pub fn len(&self) -> u64 {
        4 + self
            .blocks
            .records()
            .iter()
            .filter(|b| b.content_len() <= MAX_BLOCK_LEN)
            .map(Record::len)
            .sum::<u64>()
    }

    /// Returns whether the container holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.records().is_empty()
    }

    /// Returns the on-disk byte length the container had when it was read, if it was.
    pub fn origin_length(&self) -> Option<u64> {
        self.blocks.origin_length
    }

    pub(crate) fn set_origin_length(&mut self, len: u64) {
        self.blocks.origin_length = Some(len);
    }

    /// Returns the blocks in order.
    pub fn blocks(&self) -> &[Block] {
        self.blocks.records()
    }

    /// Inserts a block at its canonical position.
    ///
    /// For block kinds of which at most one may exist, an already present block is replaced in
    /// place instead.
    pub fn add_block(&mut self, block: Block) {
        let kind = block.kind();
        if UNIQUE.contains(&kind) {
            if let Some(existing) = self.blocks.get_first_mut(&kind) {
                *existing = block;
                return;
            }
        }
        self.blocks.insert_ranked(block, rank);
    }

    /// Removes every block of the kind, returning the number removed.
    pub fn remove_blocks(&mut self, kind: BlockType) -> usize {
        self.blocks.remove(&kind)
    }

    /// Returns the STREAMINFO block, if present.
    pub fn streaminfo(&self) -> Option<&StreamInfo> {
        match self.blocks.get_first(&BlockType::StreamInfo) {
            Some(Block::StreamInfo(info)) => Some(info),
            _ => None,
        }
    }

    /// Returns the VORBIS_COMMENT block, if present.
    pub fn vorbis_comment(&self) -> Option<&VorbisComment> {
        match self.blocks.get_first(&BlockType::VorbisComment) {
            Some(Block::VorbisComment(vc)) => Some(vc),
            _ => None,
        }
    }

    /// Returns the VORBIS_COMMENT block, inserting an empty one at its canonical position if
    /// none exists.
    pub fn vorbis_comment_mut(&mut self) -> &mut VorbisComment {
        if self.vorbis_comment().is_none() {
            self.add_block(Block::VorbisComment(VorbisComment::default()));
        }
        match self.blocks.get_first_mut(&BlockType::VorbisComment) {
            Some(Block::VorbisComment(vc)) => vc,
            _ => unreachable!("vorbis comment block was just inserted"),
        }
    }

    /// Returns the value of the abstract field, if set.
    pub fn get_field(&self, id: FieldId) -> Option<&str> {
        self.vorbis_comment()?.get(fields::mapping(id).vorbis)
    }

    /// Sets the abstract field to a text value.
    pub fn set_field(&mut self, id: FieldId, value: impl Into<String>) {
        self.vorbis_comment_mut().set(fields::mapping(id).vorbis, value);
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
        if let Some(Block::VorbisComment(vc)) = self.blocks.get_first_mut(&BlockType::VorbisComment)
        {
            vc.remove(fields::mapping(id).vorbis);
        }
    }

    /// Returns the embedded pictures in order.
    pub fn pictures(&self) -> impl Iterator<Item = &Picture> {
        self.blocks.records().iter().filter_map(|b| match b {
            Block::Picture(p) => Some(p),
            _ => None,
        })
    }

    /// Inserts an embedded picture at its canonical position.
    pub fn add_picture(&mut self, picture: Picture) {
        self.add_block(Block::Picture(picture));
    }

    /// Removes every embedded picture, returning the number removed.
    pub fn remove_pictures(&mut self) -> usize {
        self.blocks.remove(&BlockType::Picture)
    }

    /// Normalizes the stored metadata in place, returning the number of repairs.
    ///
    /// Text fields are trimmed, numeric pairs are rendered canonically and the redundant image
    /// metrics of every picture are recomputed from its payload.
    pub fn clean(&mut self, metrics: &dyn ImageMetrics) -> usize {
        let mut repairs = 0;

        if let Some(Block::VorbisComment(vc)) = self.blocks.get_first_mut(&BlockType::VorbisComment)
        {
            for mapping in &fields::FORMAT_TABLE {
                let value = match vc.get(mapping.vorbis) {
                    Some(v) => v,
                    None => continue,
                };
                let cleaned = match mapping.kind {
                    FieldKind::Text => fields::clean_text(value),
                    FieldKind::NumericPair => fields::clean_pair(value),
                };
                if let Some(cleaned) = cleaned {
                    vc.set(mapping.vorbis, cleaned);
                    repairs += 1;
                }
            }
        }

        for block in self.blocks.records_mut() {
            if let Block::Picture(p) = block {
                if p.repair_metrics(metrics) {
                    repairs += 1;
                }
            }
        }

        repairs
    }

    /// Returns the external byte length of all padding blocks.
    pub fn padding(&self) -> u64 {
        self.blocks
            .records()
            .iter()
            .filter(|b| b.kind() == BlockType::Padding)
            .map(Record::len)
            .sum()
    }

    /// Attempts to resize the padding so it occupies exactly `external` bytes, headers
    /// included. Returns whether the container could represent that amount; the container is
    /// left untouched when it cannot.
    ///
    /// Shrinking walks the padding blocks in order, emptying each before moving on and
    /// dropping fully emptied blocks once their content alone no longer covers the excess.
    /// Growing enlarges the first padding block. Amounts between 1 and 3 bytes cannot be
    /// expressed since every block carries a 4 byte header.
    pub fn set_padding(&mut self, external: u64) -> bool {
        let current = self.padding();
        if external == current {
            return true;
        }
        if external == 0 {
            self.blocks.remove(&BlockType::Padding);
            return true;
        }

        if current == 0 {
            if external < 4 || external - 4 > MAX_BLOCK_LEN {
                return false;
            }
            self.blocks.insert_ranked(Block::Padding((external - 4) as u32), rank);
            return true;
        }

        if external > current {
            let grow = external - current;
            for block in self.blocks.records_mut() {
                if let Block::Padding(size) = block {
                    let grown = u64::from(*size) + grow;
                    if grown > MAX_BLOCK_LEN {
                        return false;
                    }
                    *size = grown as u32;
                    return true;
                }
            }
            return false;
        }

        // Dry-run the shrink walk so a failure leaves the blocks untouched. Whatever the
        // content bytes cannot cover must be shed by dropping whole emptied blocks, 4 header
        // bytes at a time.
        let contents: u64 = self
            .blocks
            .records()
            .iter()
            .filter_map(|b| match b {
                Block::Padding(size) => Some(u64::from(*size)),
                _ => None,
            })
            .sum();
        let excess = current - external;
        let spill = excess.saturating_sub(contents);
        if spill % 4 != 0 {
            return false;
        }

        let mut remaining = excess;
        for block in self.blocks.records_mut() {
            if remaining == 0 {
                break;
            }
            if let Block::Padding(size) = block {
                let shrink = remaining.min(u64::from(*size));
                *size -= shrink as u32;
                remaining -= shrink;
            }
        }
        self.blocks.remove_where(|b| {
            if remaining >= 4 && matches!(b, Block::Padding(0)) {
                remaining -= 4;
                return true;
            }
            false
        });
        remaining == 0
    }
}
