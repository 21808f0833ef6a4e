//! Lossless preservation of foreign RIFF/AIFF chunks inside a tag container.
//!
//! Converting between audio formats must not discard chunks it does not understand. The
//! bridge splits a RIFF or AIFF file into opaque records around the raw audio payload; the
//! records ride along inside a FLAC APPLICATION block or an APEv2 binary item and are later
//! reassembled, together with the audio payload, into a byte-exact copy of the original
//! container.

use std::ops::Range;

use crate::ape::ApeItem;
use crate::flac::Block;
use crate::ErrorKind;

/// The foreign container format a chunk was lifted out of.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChunkOrigin {
    /// A RIFF/WAVE file with little-endian chunk lengths.
    Riff,
    /// An AIFF file with big-endian chunk lengths.
    Aiff,
}

impl ChunkOrigin {
    /// The application id marking bridge payloads in FLAC APPLICATION blocks.
    pub fn application_id(self) -> [u8; 4] {
        match self {
            Self::Riff => *b"riff",
            Self::Aiff => *b"aiff",
        }
    }

    fn audio_id(self) -> &'static [u8] {
        match self {
            Self::Riff => b"data",
            Self::Aiff => b"SSND",
        }
    }

    fn descriptor_id(self) -> &'static [u8] {
        match self {
            Self::Riff => b"fmt ",
            Self::Aiff => b"COMM",
        }
    }

    /// The fixed prefix inside the audio chunk that belongs to the chunk structure, not the
    /// samples: AIFF `SSND` starts with 8 offset/block-size bytes.
    fn audio_prefix(self) -> usize {
        match self {
            Self::Riff => 0,
            Self::Aiff => 8,
        }
    }

    fn read_len(self, bytes: &[u8]) -> u32 {
        let quad = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            Self::Riff => u32::from_le_bytes(quad),
            Self::Aiff => u32::from_be_bytes(quad),
        }
    }

    fn key_prefix(self) -> &'static str {
        match self {
            Self::Riff => "RIFF Chunk",
            Self::Aiff => "AIFF Chunk",
        }
    }
}

/// Whether an opaque record sits before or after the raw audio payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ChunkPosition {
    /// Everything up to and including the audio chunk's header.
    Header,
    /// Everything after the raw audio payload.
    Footer,
}

/// A foreign chunk preserved verbatim for lossless reconstruction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct OpaqueChunk {
    /// The container format the chunk was lifted out of.
    pub origin: ChunkOrigin,
    /// The side of the audio payload the chunk belongs to.
    pub position: ChunkPosition,
    /// The raw chunk bytes, header and pad byte included.
    pub data: Vec<u8>,
}

/// The result of splitting a foreign file: the opaque records and the location of the raw
/// audio payload within the original bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SplitForeignFile {
    /// The opaque records in file order.
    pub chunks: Vec<OpaqueChunk>,
    /// The byte range of the raw audio payload.
    pub audio: Range<usize>,
}

/// Attempts to split a RIFF or AIFF file into opaque records around its audio payload.
pub fn split(data: &[u8]) -> crate::Result<SplitForeignFile> {
    let origin = if data.len() >= 4 && data[..4] == *b"RIFF" {
        ChunkOrigin::Riff
    } else if data.len() >= 4 && data[..4] == *b"FORM" {
        ChunkOrigin::Aiff
    } else {
        return Err(crate::Error::new(
            ErrorKind::MalformedHeader,
            "Missing RIFF or FORM preamble",
        ));
    };
    if data.len() < 12 {
        return Err(crate::Error::new(
            ErrorKind::TruncatedStream,
            "File ends inside its form header",
        ));
    }

    let declared = origin.read_len(&data[4..8]) as usize;
    let end = declared.checked_add(8).filter(|e| *e <= data.len()).ok_or_else(|| {
        crate::Error::new(
            ErrorKind::TruncatedStream,
            format!("Form declares {} bytes, file holds {}", declared + 8, data.len()),
        )
    })?;
    // Bytes past the declared size would be lost on reassembly.
    if end != data.len() {
        return Err(crate::Error::new(
            ErrorKind::MalformedHeader,
            format!("{} bytes trail the declared form size", data.len() - end),
        ));
    }

    let form_type = &data[8..12];
    let expected: &[&[u8]] = match origin {
        ChunkOrigin::Riff => &[b"WAVE"],
        ChunkOrigin::Aiff => &[b"AIFF", b"AIFC"],
    };
    if !expected.contains(&form_type) {
        return Err(crate::Error::new(
            ErrorKind::MalformedHeader,
            format!("Unexpected form type {:?}", String::from_utf8_lossy(form_type)),
        ));
    }

    let mut chunks = vec![OpaqueChunk {
        origin,
        position: ChunkPosition::Header,
        data: data[..12].to_vec(),
    }];
    let mut audio: Option<Range<usize>> = None;
    let mut descriptors = 0usize;
    let mut pos = 12;

    while pos + 8 <= end {
        let id = &data[pos..pos + 4];
        if !is_printable_ascii(id) {
            return Err(crate::Error::new(
                ErrorKind::MalformedHeader,
                format!("Chunk id {:?} is not printable ASCII", id),
            ));
        }
        let len = origin.read_len(&data[pos + 4..pos + 8]) as usize;
        let padded = len + len % 2;
        if pos + 8 + len > end {
            return Err(crate::Error::new(
                ErrorKind::TruncatedStream,
                format!(
                    "Chunk {} declares {} bytes, {} left",
                    String::from_utf8_lossy(id),
                    len,
                    end - pos - 8
                ),
            ));
        }

        if id == origin.descriptor_id() {
            descriptors += 1;
        }

        if id == origin.audio_id() && audio.is_none() {
            let prefix = origin.audio_prefix();
            if len < prefix {
                return Err(crate::Error::new(
                    ErrorKind::TruncatedStream,
                    "Audio chunk ends inside its offset prefix",
                ));
            }
            // The audio chunk's header and fixed prefix close the header side.
            chunks.push(OpaqueChunk {
                origin,
                position: ChunkPosition::Header,
                data: data[pos..pos + 8 + prefix].to_vec(),
            });
            let start = pos + 8 + prefix;
            audio = Some(start..start + (len - prefix));
            pos = start + (len - prefix);
            // The pad byte of an odd audio chunk is structure, not samples.
            if padded != len {
                chunks.push(OpaqueChunk {
                    origin,
                    position: ChunkPosition::Footer,
                    data: data[pos..(pos + 1).min(end)].to_vec(),
                });
                pos += 1;
            }
            continue;
        }

        let chunk_end = (pos + 8 + padded).min(end);
        chunks.push(OpaqueChunk {
            origin,
            position: match audio {
                None => ChunkPosition::Header,
                Some(_) => ChunkPosition::Footer,
            },
            data: data[pos..chunk_end].to_vec(),
        });
        pos = chunk_end;
    }

    if descriptors != 1 {
        return Err(crate::Error::new(
            ErrorKind::MalformedHeader,
            format!(
                "Expected one {} chunk, found {}",
                String::from_utf8_lossy(origin.descriptor_id()),
                descriptors
            ),
        ));
    }
    let audio = audio.ok_or_else(|| {
        crate::Error::new(
            ErrorKind::MalformedHeader,
            format!("Missing {} chunk", String::from_utf8_lossy(origin.audio_id())),
        )
    })?;

    Ok(SplitForeignFile { chunks, audio })
}

/// Attempts to reassemble opaque records and the raw audio payload into the original
/// container bytes.
///
/// Reassembly never emits a partially valid file: any structural inconsistency fails with
/// [`ErrorKind::ReassemblyMismatch`].
pub fn reassemble(chunks: &[OpaqueChunk], audio: &[u8]) -> crate::Result<Vec<u8>> {
    let origin = match chunks.first() {
        Some(first) => first.origin,
        None => {
            return Err(crate::Error::new(
                ErrorKind::ReassemblyMismatch,
                "No records to reassemble",
            ));
        }
    };

    let mut out = Vec::new();
    let mut audio_chunks = 0usize;
    let mut descriptors = 0usize;
    let mut in_footer = false;

    for chunk in chunks {
        if chunk.origin != origin {
            return Err(mismatch("Records of mixed origin"));
        }
        match chunk.position {
            ChunkPosition::Header if in_footer => {
                return Err(mismatch("Header record after a footer record"));
            }
            ChunkPosition::Header => (),
            ChunkPosition::Footer => in_footer = true,
        }

        // Single pad bytes carry no chunk id; everything else must.
        if chunk.data.len() >= 8 {
            let id = &chunk.data[..4];
            if !is_printable_ascii(id) {
                return Err(mismatch(format!("Chunk id {:?} is not printable ASCII", id)));
            }
            if id == origin.descriptor_id() {
                descriptors += 1;
            }
            if id == origin.audio_id() {
                audio_chunks += 1;
                out.extend_from_slice(&chunk.data);
                out.extend_from_slice(audio);
                continue;
            }
        }
        out.extend_from_slice(&chunk.data);
    }

    if descriptors != 1 {
        return Err(mismatch(format!("Expected one descriptor chunk, found {}", descriptors)));
    }
    if audio_chunks != 1 {
        return Err(mismatch(format!("Expected one audio chunk, found {}", audio_chunks)));
    }

    let declared = origin.read_len(&out[4..8]) as usize;
    if out.len() != declared + 8 {
        return Err(mismatch(format!(
            "Reconstructed {} bytes, form declares {}",
            out.len(),
            declared + 8
        )));
    }

    Ok(out)
}

fn mismatch(description: impl Into<String>) -> crate::Error {
    crate::Error::new(ErrorKind::ReassemblyMismatch, description)
}

fn is_printable_ascii(bytes: &[u8]) -> bool {
    bytes.iter().all(|b| (0x20..=0x7e).contains(b))
}

impl OpaqueChunk {
    /// Converts the record into a FLAC APPLICATION block carrying the origin marker as its
    /// application id and the position tag as the first payload byte.
    pub fn to_application_block(&self) -> Block {
        let mut data = Vec::with_capacity(1 + self.data.len());
        data.push(self.position as u8);
        data.extend_from_slice(&self.data);
        Block::Application { id: self.origin.application_id(), data }
    }

    /// Attempts to read a record back out of a FLAC APPLICATION block. Returns `None` for
    /// application blocks that do not belong to the bridge.
    pub fn from_application_block(block: &Block) -> crate::Result<Option<Self>> {
        let (id, data) = match block {
            Block::Application { id, data } => (id, data),
            _ => return Ok(None),
        };
        let origin = match id {
            b"riff" => ChunkOrigin::Riff,
            b"aiff" => ChunkOrigin::Aiff,
            _ => return Ok(None),
        };

        let (position, data) = split_position(data)?;
        Ok(Some(Self { origin, position, data: data.to_vec() }))
    }

    /// Converts the record into an APEv2 binary item. The index keeps the keys unique, since
    /// inserting an existing key would replace it instead of accumulating.
    pub fn to_ape_item(&self, index: usize) -> ApeItem {
        let mut value = Vec::with_capacity(1 + self.data.len());
        value.push(self.position as u8);
        value.extend_from_slice(&self.data);
        ApeItem::binary(format!("{} {:03}", self.origin.key_prefix(), index), value)
    }

    /// Attempts to read a record back out of an APEv2 item. Returns `None` for items that do
    /// not belong to the bridge.
    pub fn from_ape_item(item: &ApeItem) -> crate::Result<Option<Self>> {
        let origin = if item.key.starts_with(ChunkOrigin::Riff.key_prefix()) {
            ChunkOrigin::Riff
        } else if item.key.starts_with(ChunkOrigin::Aiff.key_prefix()) {
            ChunkOrigin::Aiff
        } else {
            return Ok(None);
        };

        let (position, data) = split_position(&item.value)?;
        Ok(Some(Self { origin, position, data: data.to_vec() }))
    }
}

fn split_position(data: &[u8]) -> crate::Result<(ChunkPosition, &[u8])> {
    match data.split_first() {
        Some((0, rest)) => Ok((ChunkPosition::Header, rest)),
        Some((1, rest)) => Ok((ChunkPosition::Footer, rest)),
        Some((tag, _)) => Err(crate::Error::new(
            ErrorKind::ReassemblyMismatch,
            format!("Unknown position tag {}", tag),
        )),
        None => Err(crate::Error::new(
            ErrorKind::ReassemblyMismatch,
            "Empty bridge payload",
        )),
    }
}

/// Builds a minimal RIFF/WAVE file around the audio payload, used by tests and demos.
#[cfg(test)]
pub(crate) fn build_wave(audio: &[u8], extra: &[(&[u8; 4], &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(b"WAVE");

    let fmt = [1u8, 0, 2, 0, 0x44, 0xac, 0, 0, 0x10, 0xb1, 2, 0, 4, 0, 16, 0];
    for (id, data) in
        std::iter::once((b"fmt ", &fmt[..])).chain(extra.iter().map(|(id, d)| (*id, *d)))
    {
        body.extend_from_slice(&id[..]);
        body.extend_from_slice(&(data.len() as u32).to_le_bytes());
        body.extend_from_slice(data);
        if data.len() % 2 != 0 {
            body.push(0);
        }
    }

    body.extend_from_slice(b"data");
    body.extend_from_slice(&(audio.len() as u32).to_le_bytes());
    body.extend_from_slice(audio);
    if audio.len() % 2 != 0 {
        body.push(0);
    }

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn riff_round_trip_is_byte_exact() {
        let audio = [7u8; 1000];
        let file = build_wave(&audio, &[(b"LIST", b"INFOdata"), (b"id3 ", b"fake tag")]);

        let svc = split(&file).unwrap();
        assert_eq!(&file[svc.audio.clone()], &audio[..]);

        let reassembled = reassemble(&svc.chunks, &file[svc.audio.clone()]).unwrap();
        assert_eq!(reassembled, file);
    }

    #[test]
    fn odd_audio_chunk_tracks_its_pad_byte() {
        let audio = [1u8; 99];
        let file = build_wave(&audio, &[]);

        let svc = split(&file).unwrap();
        assert_eq!(svc.audio.len(), 99);
        // The pad byte becomes a 1 byte footer record.
        let pad: Vec<_> =
            svc.chunks.iter().filter(|c| c.position == ChunkPosition::Footer).collect();
        assert_eq!(pad.len(), 1);
        assert_eq!(pad[0].data, [0]);

        assert_eq!(reassemble(&svc.chunks, &file[svc.audio.clone()]).unwrap(), file);
    }

    #[test]
    fn aiff_round_trip_is_byte_exact() {
        let audio = [3u8; 64];

        let mut body = Vec::new();
        body.extend_from_slice(b"AIFF");
        body.extend_from_slice(b"COMM");
        body.extend_from_slice(&18u32.to_be_bytes());
        body.extend_from_slice(&[0u8; 18]);
        body.extend_from_slice(b"SSND");
        body.extend_from_slice(&(8 + audio.len() as u32).to_be_bytes());
        body.extend_from_slice(&[0u8; 8]);
        body.extend_from_slice(&audio);

        let mut file = Vec::new();
        file.extend_from_slice(b"FORM");
        file.extend_from_slice(&(body.len() as u32).to_be_bytes());
        file.extend_from_slice(&body);

        let svc = split(&file).unwrap();
        assert_eq!(&file[svc.audio.clone()], &audio[..]);
        // The SSND offset prefix stays with the header records.
        let last_header = svc
            .chunks
            .iter()
            .filter(|c| c.position == ChunkPosition::Header)
            .last()
            .unwrap();
        assert_eq!(last_header.data.len(), 16);

        assert_eq!(reassemble(&svc.chunks, &audio).unwrap(), file);
    }

    #[test]
    fn trailing_bytes_after_declared_size_are_rejected() {
        let mut file = build_wave(&[0u8; 16], &[]);
        file.push(0);

        let err = split(&file).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MalformedHeader));
    }

    #[test]
    fn missing_descriptor_is_rejected() {
        let mut file = Vec::new();
        let mut body = Vec::new();
        body.extend_from_slice(b"WAVE");
        body.extend_from_slice(b"data");
        body.extend_from_slice(&4u32.to_le_bytes());
        body.extend_from_slice(&[0; 4]);
        file.extend_from_slice(b"RIFF");
        file.extend_from_slice(&(body.len() as u32).to_le_bytes());
        file.extend_from_slice(&body);

        let err = split(&file).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::MalformedHeader));
    }

    #[test]
    fn reassembly_rejects_size_mismatch() {
        let audio = [0u8; 16];
        let file = build_wave(&audio, &[]);
        let svc = split(&file).unwrap();

        let err = reassemble(&svc.chunks, &[0u8; 8]).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ReassemblyMismatch));
    }

    #[test]
    fn reassembly_rejects_duplicate_audio_chunks() {
        let audio = [0u8; 16];
        let file = build_wave(&audio, &[]);
        let mut svc = split(&file).unwrap();

        let audio_header = svc.chunks[2].clone();
        svc.chunks.push(audio_header);
        let err = reassemble(&svc.chunks, &audio).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ReassemblyMismatch));
    }

    #[test]
    fn records_survive_an_application_block_detour() {
        let file = build_wave(&[9u8; 20], &[(b"LIST", b"info")]);
        let svc = split(&file).unwrap();

        let blocks: Vec<_> = svc.chunks.iter().map(OpaqueChunk::to_application_block).collect();
        let restored: Vec<_> = blocks
            .iter()
            .map(|b| OpaqueChunk::from_application_block(b).unwrap().unwrap())
            .collect();
        assert_eq!(restored, svc.chunks);

        assert_eq!(reassemble(&restored, &file[svc.audio.clone()]).unwrap(), file);
    }

    #[test]
    fn records_survive_an_ape_item_detour() {
        let file = build_wave(&[4u8; 30], &[]);
        let svc = split(&file).unwrap();

        let items: Vec<_> =
            svc.chunks.iter().enumerate().map(|(i, c)| c.to_ape_item(i)).collect();
        assert!(items.iter().map(|i| &i.key).collect::<std::collections::HashSet<_>>().len() == items.len());

        let restored: Vec<_> =
            items.iter().map(|i| OpaqueChunk::from_ape_item(i).unwrap().unwrap()).collect();
        assert_eq!(restored, svc.chunks);
    }

    #[test]
    fn foreign_application_blocks_pass_through() {
        let block = Block::Application { id: *b"atch", data: vec![1, 2, 3] };
        assert_eq!(OpaqueChunk::from_application_block(&block).unwrap(), None);
    }
}
