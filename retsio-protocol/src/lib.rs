//! # retsio-protocol
//!
//! Wire-level vocabulary for the RETS client.
//!
//! This crate provides:
//! - Incremental response decoding (status, login and COMPACT tabular frames)
//! - Output shaping of decoded rows into records or positional arrays
//! - Operation names, info tokens and request option types
//! - Metadata document parsing and normalization
//! - Reply codes and protocol error types
//!
//! No I/O happens here; bytes are pushed in by the caller.

pub mod codec;
pub mod datetime;
pub mod error;
pub mod message;
pub mod shape;
pub mod xml;

pub use codec::{DecodeEvent, FrameKind, ResponseDecoder};
pub use datetime::parse_rets_datetime;
pub use error::{ProtocolError, ReplyCode};
pub use message::{
    GetObjectOptions, InfoToken, MetadataOptions, Operation, OutputFormat, ResultFormat,
    SearchOptions, Shape,
};
pub use shape::{Record, RowShaper, ShapedItem};

/// Protocol version announced in the `RETS-Version` header.
pub const RETS_VERSION: &str = "RETS/1.7.2";

/// Default login capability path.
pub const DEFAULT_LOGIN_PATH: &str = "/Login.asmx/Login";

/// Maximum bytes a single element or text run may buffer (16 MiB).
pub const MAX_ELEMENT_SIZE: usize = 16 * 1024 * 1024;
