use std::fmt;
use std::io;

use dhcproto::error::{DecodeError, EncodeError};

#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Encode(EncodeError),
    Decode(DecodeError),
    Config(String),
    InterfaceNotFound(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error {e}"),
            Error::Encode(e) => write!(f, "Encode error {e}"),
            Error::Decode(e) => write!(f, "Decode error {e}"),
            Error::Config(e) => write!(f, "Config error {e}"),
            Error::InterfaceNotFound(name) => write!(f, "Interface not found: {name}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Encode(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Config(_) | Error::InterfaceNotFound(_) => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<EncodeError> for Error {
    fn from(e: EncodeError) -> Self {
        Error::Encode(e)
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::Decode(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e.to_string())
    }
}
