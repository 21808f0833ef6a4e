use std::{error, fmt, io, string};

use crate::ContainerClass;

/// Type alias for the result of tag operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Kinds of errors that may occur while performing metadata operations.
#[derive(Debug)]
pub enum ErrorKind {
    /// An error kind indicating that a magic number, preamble or record header is invalid, or
    /// that a reserved discriminant was encountered.
    MalformedHeader,
    /// An error kind indicating an unknown major or minor format version. Contains the version
    /// number that was read.
    UnsupportedVersion(u8),
    /// An error kind indicating that the stream ended in the middle of a record.
    TruncatedStream,
    /// An error kind indicating that a value exceeds the bit-width budget of the field it is
    /// written to.
    FieldOverflow,
    /// An error kind indicating that a container of the wrong class was passed into an update
    /// operation. Contains the class of the container that was passed in.
    ForeignContainer(ContainerClass),
    /// An error kind indicating that reassembled foreign chunks are structurally inconsistent
    /// with the originally recorded container.
    ReassemblyMismatch,
    /// An error kind indicating that an IO error has occurred. Contains the original io::Error.
    Io(io::Error),
    /// An error kind indicating that an error occurred during parsing.
    Parsing,
    /// An error kind indicating that a string decoding error has occurred. Contains the original
    /// error.
    Utf8StringDecoding(string::FromUtf8Error),
    /// An error kind indicating that a string decoding error has occurred. Contains the original
    /// error.
    Utf16StringDecoding(string::FromUtf16Error),
}

/// A structure able to represent any error that may occur while performing metadata operations.
pub struct Error {
    /// The kind of error.
    pub kind: ErrorKind,
    /// A human readable string describing the error.
    pub description: String,
}

impl Error {
    /// Creates a new `Error` using the error kind and description.
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self { kind, description: description.into() }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Io(err) => Some(err),
            ErrorKind::Utf8StringDecoding(err) => Some(err),
            ErrorKind::Utf16StringDecoding(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        // A short read in the middle of a record is a truncation, not a plain IO failure.
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Self {
                kind: ErrorKind::TruncatedStream,
                description: "Unexpected end of stream".to_owned(),
            },
            _ => Self { kind: ErrorKind::Io(err), description: String::new() },
        }
    }
}

impl From<string::FromUtf8Error> for Error {
    fn from(err: string::FromUtf8Error) -> Self {
        Self {
            kind: ErrorKind::Utf8StringDecoding(err),
            description: "Data is not valid utf-8".to_owned(),
        }
    }
}

impl From<string::FromUtf16Error> for Error {
    fn from(err: string::FromUtf16Error) -> Self {
        Self {
            kind: ErrorKind::Utf16StringDecoding(err),
            description: "Data is not valid utf-16".to_owned(),
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.description)
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.description.is_empty() {
            write!(f, "{:?}", self.kind)
        } else {
            write!(f, "{:?}: {}", self.kind, self.description)
        }
    }
}
