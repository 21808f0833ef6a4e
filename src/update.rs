//! Persisting a modified container back into its file.
//!
//! An update prefers absorbing the size change into the container's padding so only the
//! metadata region is overwritten in place and the audio payload is never touched. When the
//! padding cannot absorb the change, the whole file is rewritten through a temporary file in
//! the same directory and atomically renamed over the original.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::ape::ApeContainer;
use crate::codec::FormatSpec;
use crate::flac::FlacContainer;
use crate::id3::Id3Container;
use crate::types::ContainerClass;
use crate::ErrorKind;

/// Where a container's metadata region lives within its file.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Placement {
    /// At the start of the file, in front of the audio payload.
    Leading,
    /// At the end of the file, behind the audio payload.
    Trailing,
}

/// The state an update moves through while persisting a container.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UpdateState {
    /// No decision has been made yet.
    Unmodified,
    /// The existing metadata region is being re-scanned and diffed.
    ComputingDelta,
    /// The grown content is absorbed by shrinking padding; the region is overwritten in place.
    InPlaceShrink,
    /// The shrunk content is absorbed by growing padding; the region is overwritten in place.
    InPlaceGrow,
    /// The padding cannot absorb the change; the whole file is rewritten.
    FullRewrite,
    /// The update has been written out.
    Committed,
}

/// A container that can be persisted into an audio file.
///
/// Implemented independently by each concrete container and composed by delegation; the
/// update algorithm itself lives in [`update`].
pub trait TagPersistable {
    /// The container class, used for fail-fast mismatch errors.
    fn class(&self) -> ContainerClass;

    /// Where the metadata region lives within the file.
    fn placement(&self) -> Placement;

    /// The external length of the container as it would be written now.
    fn len(&self) -> u64;

    /// The external length of the container's padding records.
    fn padding(&self) -> u64;

    /// Attempts to resize the padding so the container occupies exactly its current length
    /// minus the old padding plus `external`. Returns whether the amount was representable.
    fn set_padding(&mut self, external: u64) -> bool;

    /// Writes the complete metadata region.
    fn write_metadata(&self, writer: &mut dyn Write) -> crate::Result<()>;

    /// Records the on-disk region length after a successful update.
    fn set_origin_length(&mut self, len: u64);

    /// Re-scans the file and returns the byte length of the existing metadata region of this
    /// class, or 0 when the file carries none yet. A region of a different container class
    /// fails fast with [`ErrorKind::ForeignContainer`] before anything is written.
    fn scan_region(&self, file: &mut File) -> crate::Result<u64>;
}

/// Attempts to persist the container into the file at the path.
///
/// The existing region length is always re-derived from the file, never taken from a cached
/// `origin_length`, so a container reused across two files diffs against the right baseline.
pub fn update(tag: &mut dyn TagPersistable, path: impl AsRef<Path>) -> crate::Result<()> {
    let path = path.as_ref();
    let mut state = UpdateState::Unmodified;
    log::debug!("Updating {} metadata in {}: {:?}", tag.class(), path.display(), state);
    let mut file = OpenOptions::new().read(true).write(true).open(path)?;

    state = UpdateState::ComputingDelta;
    let region = tag.scan_region(&mut file)?;
    let delta = tag.len() as i128 - region as i128;
    log::debug!(
        "Region of {} bytes, container of {} bytes: {:?}",
        region,
        tag.len(),
        state
    );

    if delta != 0 {
        let target = tag.padding() as i128 - delta;
        if target < 0 || !tag.set_padding(target as u64) {
            // The padding is fully consumed by the rewrite; fresh padding is only ever
            // introduced by the caller.
            tag.set_padding(0);
            state = UpdateState::FullRewrite;
        } else if delta > 0 {
            state = UpdateState::InPlaceShrink;
        } else {
            state = UpdateState::InPlaceGrow;
        }
    } else {
        state = UpdateState::InPlaceShrink;
    }
    log::debug!("Delta of {} bytes: {:?}", delta, state);

    match state {
        UpdateState::FullRewrite => rewrite(tag, path, &mut file, region)?,
        _ => overwrite_region(tag, &mut file, region)?,
    }

    tag.set_origin_length(tag.len());
    state = UpdateState::Committed;
    log::debug!("Update of {}: {:?}", path.display(), state);
    Ok(())
}

/// Overwrites only the metadata region in place. The container length must equal the region
/// length when this is called.
fn overwrite_region(
    tag: &dyn TagPersistable,
    file: &mut File,
    region: u64,
) -> crate::Result<()> {
    let mut buf = Vec::with_capacity(region as usize);
    tag.write_metadata(&mut buf)?;
    if buf.len() as u64 != region {
        return Err(crate::Error::new(
            ErrorKind::Parsing,
            format!("Rendered {} metadata bytes for a {} byte region", buf.len(), region),
        ));
    }

    let offset = match tag.placement() {
        Placement::Leading => 0,
        Placement::Trailing => file.seek(SeekFrom::End(0))? - region,
    };
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(&buf)?;
    file.flush().map_err(crate::Error::from)
}

/// Writes a full replacement file next to the original and atomically renames it into place.
fn rewrite(
    tag: &dyn TagPersistable,
    path: &Path,
    file: &mut File,
    region: u64,
) -> crate::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut temp = NamedTempFile::new_in(parent)?;

    let file_len = file.seek(SeekFrom::End(0))?;
    match tag.placement() {
        Placement::Leading => {
            tag.write_metadata(temp.as_file_mut())?;
            file.seek(SeekFrom::Start(region))?;
            io::copy(file, temp.as_file_mut())?;
        }
        Placement::Trailing => {
            file.seek(SeekFrom::Start(0))?;
            io::copy(&mut file.take(file_len - region), temp.as_file_mut())?;
            tag.write_metadata(temp.as_file_mut())?;
        }
    }

    temp.as_file_mut().flush()?;
    temp.persist(path).map_err(|e| crate::Error::from(e.error))?;
    Ok(())
}

impl TagPersistable for FlacContainer {
    fn class(&self) -> ContainerClass {
        ContainerClass::Flac
    }

    fn placement(&self) -> Placement {
        Placement::Leading
    }

    fn len(&self) -> u64 {
        self.len()
    }

    fn padding(&self) -> u64 {
        self.padding()
    }

    fn set_padding(&mut self, external: u64) -> bool {
        self.set_padding(external)
    }

    fn write_metadata(&self, mut writer: &mut dyn Write) -> crate::Result<()> {
        self.write_to(&mut writer)
    }

    fn set_origin_length(&mut self, len: u64) {
        self.set_origin_length(len);
    }

    /// Walks the block headers of the existing stream without parsing block contents.
    fn scan_region(&self, file: &mut File) -> crate::Result<u64> {
        file.seek(SeekFrom::Start(0))?;
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if magic != crate::flac::MAGIC {
            return Err(crate::Error::new(
                ErrorKind::ForeignContainer(ContainerClass::Flac),
                "File does not start with a fLaC stream marker",
            ));
        }

        let mut total = 4u64;
        loop {
            let head = crate::flac::block_header_spec().parse(file)?;
            let last = head[0].uint()? == 1;
            let len = head[2].uint()?;
            total += 4 + len;
            file.seek(SeekFrom::Current(len as i64))?;
            if last {
                break;
            }
        }
        Ok(total)
    }
}

impl TagPersistable for Id3Container {
    fn class(&self) -> ContainerClass {
        ContainerClass::Id3
    }

    fn placement(&self) -> Placement {
        Placement::Leading
    }

    fn len(&self) -> u64 {
        self.len()
    }

    fn padding(&self) -> u64 {
        self.padding()
    }

    fn set_padding(&mut self, external: u64) -> bool {
        self.set_padding(external)
    }

    fn write_metadata(&self, mut writer: &mut dyn Write) -> crate::Result<()> {
        self.write_to(&mut writer)
    }

    fn set_origin_length(&mut self, len: u64) {
        self.set_origin_length(len);
    }

    /// Reads the tag header of the existing file; a file without one gets a fresh tag
    /// prepended, but a file of another container class fails fast.
    fn scan_region(&self, file: &mut File) -> crate::Result<u64> {
        file.seek(SeekFrom::Start(0))?;
        let mut head = [0u8; 10];
        match file.read_exact(&mut head) {
            Ok(()) => (),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(0),
            Err(e) => return Err(e.into()),
        }

        if head.starts_with(&crate::flac::MAGIC) {
            return Err(crate::Error::new(
                ErrorKind::ForeignContainer(ContainerClass::Id3),
                "File holds a FLAC container",
            ));
        }
        if !head.starts_with(&crate::id3::MAGIC) {
            return Ok(0);
        }

        let spec = FormatSpec::compile("32u")?;
        let size = spec.parse(&mut &head[6..])?[0].uint()? as u32;
        Ok(10 + u64::from(crate::id3::decode_syncsafe(size)?))
    }
}

impl TagPersistable for ApeContainer {
    fn class(&self) -> ContainerClass {
        ContainerClass::Ape
    }

    fn placement(&self) -> Placement {
        Placement::Trailing
    }

    fn len(&self) -> u64 {
        self.len()
    }

    fn padding(&self) -> u64 {
        self.padding()
    }

    fn set_padding(&mut self, external: u64) -> bool {
        self.set_padding(external)
    }

    fn write_metadata(&self, mut writer: &mut dyn Write) -> crate::Result<()> {
        self.write_to(&mut writer)
    }

    fn set_origin_length(&mut self, len: u64) {
        self.set_origin_length(len);
    }

    /// Looks for an existing trailing tag; a file without one gets a fresh tag appended, but
    /// a file of another container class fails fast.
    fn scan_region(&self, file: &mut File) -> crate::Result<u64> {
        file.seek(SeekFrom::Start(0))?;
        let mut lead = [0u8; 4];
        if file.read_exact(&mut lead).is_ok() && lead == crate::flac::MAGIC {
            return Err(crate::Error::new(
                ErrorKind::ForeignContainer(ContainerClass::Ape),
                "File holds a FLAC container",
            ));
        }

        let file_len = file.seek(SeekFrom::End(0))?;
        if file_len < 32 {
            return Ok(0);
        }

        file.seek(SeekFrom::End(-32))?;
        let mut edge = [0u8; 32];
        file.read_exact(&mut edge)?;
        if !edge.starts_with(&crate::ape::MAGIC) {
            return Ok(0);
        }

        // The footer's size covers items and footer; a header adds another 32 bytes.
        let spec = FormatSpec::compile("<32u")?;
        let size = spec.parse(&mut &edge[12..16])?[0].uint()?;
        let flags = spec.parse(&mut &edge[20..24])?[0].uint()? as u32;
        let total = match flags & (1 << 31) {
            0 => size,
            _ => size + 32,
        };
        Ok(total.min(file_len))
    }
}
