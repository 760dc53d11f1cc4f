// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    coding::{DecodeError, EncodeError},
    params::{ParamError, ParseError},
    IStr,
};

/// Represents errors that can occur in the table engine
#[derive(Debug)]
pub enum Error {
    /// I/O error
    Io(std::io::Error),

    /// Serialization failed
    Encode(EncodeError),

    /// Deserialization failed
    Decode(DecodeError),

    /// Invalid or unparsable data format version
    InvalidVersion(u32),

    /// Sub-tables of an overlay do not share one key type
    KeyTypeMismatch,

    /// No factory is registered under the requested class name
    UnknownClass(IStr),

    /// A typed parameter was missing or had the wrong tag
    Param(ParamError),

    /// The parameter text could not be parsed
    ParseConfig(ParseError),

    /// Mutation was attempted on a read-only table
    ReadOnlyTable,

    /// The table does not support access by index
    NoIndexedAccess,

    /// The table does not support abortable transactions
    NoAbortableTx,

    /// The factory flavor does not support this construction path
    UnsupportedFactoryOp,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "DTableError: {self:?}")
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<EncodeError> for Error {
    fn from(value: EncodeError) -> Self {
        Self::Encode(value)
    }
}

impl From<DecodeError> for Error {
    fn from(value: DecodeError) -> Self {
        Self::Decode(value)
    }
}

impl From<ParamError> for Error {
    fn from(value: ParamError) -> Self {
        Self::Param(value)
    }
}

impl From<ParseError> for Error {
    fn from(value: ParseError) -> Self {
        Self::ParseConfig(value)
    }
}

/// Table engine result
pub type Result<T> = std::result::Result<T, Error>;
