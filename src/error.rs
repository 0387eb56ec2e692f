use std::error;
use std::fmt;
use std::io;
use std::string::FromUtf8Error;

/// Type alias for the result of tag operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Kinds of errors that may occur while performing metadata operations.
#[derive(Debug)]
pub enum ErrorKind {
    /// An expected structure is missing where its absence is legal, e.g. a file without any tag.
    NoDataFound,
    /// A magic number or signature did not match, a length field is malformed or a field holds an
    /// impossible value.
    InvalidData,
    /// The input ended prematurely in the middle of a structure.
    TruncatedData,
    /// The structure was recognised but is not handled, e.g. an encrypted ID3 frame.
    UnsupportedFormat,
    /// The container or tag version lies outside the supported range.
    VersionNotSupported,
    /// Text data could not be decoded or re-encoded. Contains the offending bytes.
    StringDecoding(Vec<u8>),
    /// The underlying stream failed to read, write or seek. Contains the original io::Error.
    Io(io::Error),
}

/// A structure able to represent any error that may occur while performing metadata operations.
#[derive(Debug)]
pub struct Error {
    /// The kind of error.
    pub kind: ErrorKind,
    /// A human readable string describing the error.
    pub description: &'static str,
}

impl Error {
    /// Creates a new `Error` using the error kind and description.
    pub fn new(kind: ErrorKind, description: &'static str) -> Error {
        Error { kind, description }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self.kind {
            ErrorKind::Io(ref err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::new(ErrorKind::Io(err), "io error")
    }
}

impl From<FromUtf8Error> for Error {
    fn from(err: FromUtf8Error) -> Error {
        Error::new(
            ErrorKind::StringDecoding(err.into_bytes()),
            "data is not valid utf-8",
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ErrorKind::Io(ref err) => write!(f, "{}: {}", self.description, err),
            _ => f.write_str(self.description),
        }
    }
}
