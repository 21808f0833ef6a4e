//! A library for reading and writing FLAC, ID3v2 and APEv2 audio metadata.
//!
//! Every on-disk record is parsed and built through a compact format-string codec
//! ([`codec::FormatSpec`]), the three tag formats share one ordered container model, and
//! updates prefer absorbing size changes into padding so the audio payload is never moved.
//! Foreign RIFF/AIFF chunks can ride along losslessly inside a tag ([`bridge`]).
//!
//! ## Example
//!
//! ```no_run
//! use audiometa::{FieldId, FlacContainer};
//!
//! let mut tag = FlacContainer::read_from_path("music.flac")?;
//! println!("{:?}", tag.get_field(FieldId::Title));
//!
//! tag.set_field(FieldId::Title, "a new title");
//! audiometa::update(&mut tag, "music.flac")?;
//! # Ok::<(), audiometa::Error>(())
//! ```

#[macro_use]
extern crate lazy_static;

pub use crate::ape::{ApeContainer, ApeItem, ItemType};
pub use crate::bridge::{ChunkOrigin, ChunkPosition, OpaqueChunk, SplitForeignFile};
pub use crate::container::{Record, TagContainer};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::fields::{FieldId, FieldKind, FormattingOptions};
pub use crate::flac::{Block, BlockType, FlacContainer, Picture, StreamInfo, VorbisComment};
pub use crate::id3::{Encoding, Frame, FrameId, Id3Container, Id3Version};
pub use crate::types::{ContainerClass, ImageInfo, ImageMetrics, PcmSource};
pub use crate::update::{update, Placement, TagPersistable, UpdateState};

pub mod ape;
pub mod bridge;
pub mod codec;
pub mod container;
mod error;
pub mod fields;
pub mod flac;
pub mod id3;
mod types;
pub mod update;
