use std::fmt;
use std::io::Read;

/// The class of a tag container, used to detect callers passing a container of one class into an
/// update operation on a file of another.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContainerClass {
    /// A FLAC metadata block list.
    Flac,
    /// An ID3v2 frame list.
    Id3,
    /// An APEv2 item list.
    Ape,
}

impl fmt::Display for ContainerClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flac => write!(f, "FLAC"),
            Self::Id3 => write!(f, "ID3v2"),
            Self::Ape => write!(f, "APEv2"),
        }
    }
}

/// A source of raw PCM sample frames.
///
/// This crate never decodes or re-encodes samples; a PCM source only supplies the stream
/// parameters needed to seed metadata (such as a fresh STREAMINFO block) and a finite,
/// non-restartable sequence of raw frames.
pub trait PcmSource {
    /// Returns the number of channels.
    fn channels(&self) -> u32;
    /// Returns the sample rate in Hz.
    fn sample_rate(&self) -> u32;
    /// Returns the number of bits per sample.
    fn bits_per_sample(&self) -> u32;
    /// Returns the total number of sample frames.
    fn total_frames(&self) -> u64;
    /// Returns a reader over the raw sample frames.
    fn frames(&mut self) -> &mut dyn Read;
}

/// Image metrics collected from raw image bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImageInfo {
    /// The width in pixels.
    pub width: u32,
    /// The height in pixels.
    pub height: u32,
    /// The number of bits per pixel.
    pub bits_per_pixel: u32,
    /// The number of colors for indexed images, 0 otherwise.
    pub color_count: u32,
    /// The mime type of the image data.
    pub mime_type: String,
}

/// A collaborator that measures raw image bytes.
///
/// Embedded picture records store width, height, bit depth and color count redundantly next to
/// the image payload. The cleanup pass uses an implementation of this trait to recompute those
/// metrics and repair stale values; no pixel data is ever decoded by this crate itself.
pub trait ImageMetrics {
    /// Returns the metrics of the image data, or `None` if the data is not a known image format.
    fn measure(&self, data: &[u8]) -> Option<ImageInfo>;
}
