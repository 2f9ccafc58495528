use crate::core::FXY;
use crate::core::tables::DataType;
use nom;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    #[error("Short write: expected {expected} bytes, wrote {actual}")]
    ShortWrite { expected: usize, actual: usize },

    #[error("File is not a valid BUFR message: {0}")]
    Nom(String),

    #[error("Truncated message in section {section}")]
    Truncated { section: u8 },

    #[error("Bad end section marker: {0:02X?}")]
    BadTerminator([u8; 4]),

    #[error("Message length mismatch: declared {declared}, found {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("Unsupported BUFR version: {0}")]
    UnsupportedVersion(u8),

    #[error("Message too long: {0} bytes")]
    MessageTooLong(usize),

    #[error("Bit position out of bounds: need {requested} bits, {available} available")]
    OutOfBounds { requested: usize, available: usize },

    #[error("Unsupported bit width: {0}")]
    BitWidth(u32),

    #[error("Value {value} of {descriptor} does not fit in {nbits} bits")]
    ValueOutOfRange {
        descriptor: FXY,
        value: f64,
        nbits: u32,
    },

    #[error("Value does not match {descriptor} of type {data_type:?}")]
    ValueType {
        descriptor: FXY,
        data_type: DataType,
    },

    #[error("Descriptor {0} not found in Table B")]
    TableBNotFound(FXY),

    #[error("Descriptor {0} not found in Table D")]
    TableDNotFound(FXY),

    #[error("Illegal number of data blocks: {0}")]
    IllegalBlockCount(usize),

    #[error("Data block {block} has {found} subsets, expected 1 or {expected}")]
    SubsetMismatch {
        block: usize,
        expected: usize,
        found: usize,
    },

    #[error("Malformed replication: {0}")]
    MalformedReplication(String),

    #[error("Index out of range: {0}")]
    IndexOutOfRange(String),

    #[error("Data block values were modified but not converted")]
    Unconverted,

    #[error("Parse Error: {0}")]
    ParseError(String),

    #[error("Config Error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Aborted: {0}")]
    Aborted(String),
}

impl Error {
    /// Failure of the byte transport underneath a message.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::ShortRead { .. } | Error::ShortWrite { .. }
        )
    }

    /// Failure of the message envelope itself. Callers reading a stream of
    /// messages may rescan for the next start marker after one of these.
    pub fn is_framing(&self) -> bool {
        matches!(
            self,
            Error::Nom(_)
                | Error::Truncated { .. }
                | Error::BadTerminator(_)
                | Error::LengthMismatch { .. }
                | Error::UnsupportedVersion(_)
                | Error::OutOfBounds { .. }
        )
    }
}

impl<'a> From<nom::Err<nom::error::Error<&'a [u8]>>> for Error {
    fn from(value: nom::Err<nom::error::Error<&'a [u8]>>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Self::Nom("incomplete input".to_string()),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Self::Nom(format!("{:?} with {} bytes left", e.code, e.input.len()))
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
