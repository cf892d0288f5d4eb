//! Protocol error types and reply codes.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding a server response.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The server answered with a non-success status frame.
    #[error("server replied {code}: {text}")]
    Reply { code: ReplyCode, text: String },

    #[error("element too large: {size} bytes buffered (max {max})")]
    ElementTooLarge { size: usize, max: usize },

    #[error("malformed element: {0}")]
    MalformedElement(String),

    #[error("invalid delimiter value: {0:?}")]
    InvalidDelimiter(String),

    #[error("tabular data received before any DELIMITER element")]
    MissingDelimiter,

    #[error("tabular data received before any COLUMNS element")]
    MissingColumns,

    #[error("row has {actual} fields but header has {expected}")]
    RowLength { expected: usize, actual: usize },

    #[error("response ended inside an unterminated element")]
    UnexpectedEof,

    #[error("response ended without a status frame")]
    MissingStatus,

    #[error("invalid UTF-8 in payload")]
    InvalidUtf8,

    #[error("XML error: {0}")]
    Xml(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<quick_xml::Error> for ProtocolError {
    fn from(err: quick_xml::Error) -> Self {
        ProtocolError::Xml(err.to_string())
    }
}

impl From<quick_xml::escape::EscapeError> for ProtocolError {
    fn from(err: quick_xml::escape::EscapeError) -> Self {
        ProtocolError::Xml(err.to_string())
    }
}

/// Numeric reply code carried by `ReplyCode` attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReplyCode(pub u32);

impl ReplyCode {
    pub const SUCCESS: ReplyCode = ReplyCode(0);
    pub const NO_RECORDS_FOUND: ReplyCode = ReplyCode(20201);
    pub const NO_METADATA_FOUND: ReplyCode = ReplyCode(20503);

    /// Returns whether the code means the request succeeded.
    ///
    /// "No records found" is reported with a non-zero code but is an empty
    /// result set, not a failure.
    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS || *self == Self::NO_RECORDS_FOUND
    }

    /// Parses the attribute value, tolerating surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        value.trim().parse().ok().map(ReplyCode)
    }
}

impl fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
