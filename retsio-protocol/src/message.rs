//! Operations, negotiated settings and request option types.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol operations a server may advertise as capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Operation {
    Action,
    ChangePassword,
    GetMetadata,
    GetObject,
    GetPayloadList,
    Login,
    Logout,
    PostObject,
    Search,
    Update,
}

impl Operation {
    /// All operations, in capability-name order.
    pub const ALL: [Operation; 10] = [
        Operation::Action,
        Operation::ChangePassword,
        Operation::GetMetadata,
        Operation::GetObject,
        Operation::GetPayloadList,
        Operation::Login,
        Operation::Logout,
        Operation::PostObject,
        Operation::Search,
        Operation::Update,
    ];

    /// The capability name used in login responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Action => "Action",
            Operation::ChangePassword => "ChangePassword",
            Operation::GetMetadata => "GetMetadata",
            Operation::GetObject => "GetObject",
            Operation::GetPayloadList => "GetPayloadList",
            Operation::Login => "Login",
            Operation::Logout => "Logout",
            Operation::PostObject => "PostObject",
            Operation::Search => "Search",
            Operation::Update => "Update",
        }
    }

    /// Returns whether this client has a body for the operation.
    ///
    /// The remaining operations are recognized but always fail with a
    /// not-implemented error.
    pub fn is_implemented(&self) -> bool {
        matches!(
            self,
            Operation::GetMetadata | Operation::Login | Operation::Logout | Operation::Search
        )
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a capability name is not a known operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOperation(pub String);

impl fmt::Display for UnknownOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown operation: {}", self.0)
    }
}

impl std::error::Error for UnknownOperation {}

impl FromStr for Operation {
    type Err = UnknownOperation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperation(s.to_string()))
    }
}

/// A single negotiated setting from a login response.
///
/// `Info=NAME;TYPE;VALUE` lines carry a type; legacy `Key=Value` lines
/// do not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InfoToken {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    pub value: String,
}

impl InfoToken {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: None,
            value: value.into(),
        }
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }

    /// Parses the right-hand side of an `Info=` line.
    ///
    /// Returns `None` when the line has no `;`-separated value.
    pub fn parse_info(rhs: &str) -> Option<Self> {
        let mut parts = rhs.splitn(3, ';');
        let name = parts.next()?.trim();
        let second = parts.next()?;
        if name.is_empty() {
            return None;
        }
        match parts.next() {
            Some(value) => Some(InfoToken::new(name, value.trim()).with_kind(second.trim())),
            None => Some(InfoToken::new(name, second.trim())),
        }
    }
}

/// Result encoding requested from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING-KEBAB-CASE")]
pub enum ResultFormat {
    Compact,
    #[default]
    CompactDecoded,
    StandardXml,
}

impl ResultFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultFormat::Compact => "COMPACT",
            ResultFormat::CompactDecoded => "COMPACT-DECODED",
            ResultFormat::StandardXml => "STANDARD-XML",
        }
    }
}

impl FromStr for ResultFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "COMPACT" => Ok(ResultFormat::Compact),
            "COMPACT-DECODED" => Ok(ResultFormat::CompactDecoded),
            "STANDARD-XML" => Ok(ResultFormat::StandardXml),
            other => Err(format!("unknown result format: {}", other)),
        }
    }
}

/// How decoded rows are shaped before emission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// One field-name to value mapping per row.
    #[default]
    Objects,
    /// One positional value sequence per row.
    Arrays,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "objects" => Ok(OutputFormat::Objects),
            "arrays" => Ok(OutputFormat::Arrays),
            other => Err(format!("unknown output format: {}", other)),
        }
    }
}

/// Output shaping for a tabular response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shape {
    pub format: OutputFormat,
    /// Emit typed values instead of serialized JSON lines.
    pub object_mode: bool,
    /// Emit the header row (arrays format only).
    pub headers: bool,
}

impl Default for Shape {
    fn default() -> Self {
        Self {
            format: OutputFormat::Objects,
            object_mode: false,
            headers: true,
        }
    }
}

/// Search request parameters.
///
/// Query fields are passed through verbatim; the query itself is never
/// inspected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchOptions {
    pub search_type: String,
    pub class: String,
    pub query: String,
    pub query_type: String,
    pub count: u8,
    pub format: ResultFormat,
    pub standard_names: u8,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub select: Option<String>,
    pub shape: Shape,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            search_type: "Property".to_string(),
            class: "ResidentialProperty".to_string(),
            query: "(Status=|A)".to_string(),
            query_type: "DMQL2".to_string(),
            count: 1,
            format: ResultFormat::CompactDecoded,
            standard_names: 1,
            offset: None,
            limit: None,
            select: None,
            shape: Shape::default(),
        }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, search_type: impl Into<String>, class: impl Into<String>) -> Self {
        self.search_type = search_type.into();
        self.class = class.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    pub fn with_query_type(mut self, query_type: impl Into<String>) -> Self {
        self.query_type = query_type.into();
        self
    }

    pub fn with_format(mut self, format: ResultFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_select(mut self, select: impl Into<String>) -> Self {
        self.select = Some(select.into());
        self
    }

    pub fn with_count(mut self, count: bool) -> Self {
        self.count = u8::from(count);
        self
    }

    pub fn with_standard_names(mut self, standard_names: bool) -> Self {
        self.standard_names = u8::from(standard_names);
        self
    }

    pub fn with_shape(mut self, shape: Shape) -> Self {
        self.shape = shape;
        self
    }

    /// Query parameters in protocol spelling. Unset optional fields are omitted.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut qs = vec![
            ("SearchType".to_string(), self.search_type.clone()),
            ("Class".to_string(), self.class.clone()),
            ("Query".to_string(), self.query.clone()),
            ("QueryType".to_string(), self.query_type.clone()),
            ("Count".to_string(), self.count.to_string()),
            ("Format".to_string(), self.format.as_str().to_string()),
            ("StandardNames".to_string(), self.standard_names.to_string()),
        ];
        if let Some(offset) = self.offset {
            qs.push(("Offset".to_string(), offset.to_string()));
        }
        if let Some(limit) = self.limit {
            qs.push(("Limit".to_string(), limit.to_string()));
        }
        if let Some(ref select) = self.select {
            qs.push(("Select".to_string(), select.clone()));
        }
        qs
    }
}

/// GetMetadata request parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetadataOptions {
    pub metadata_type: String,
    pub id: String,
    pub format: String,
}

impl Default for MetadataOptions {
    fn default() -> Self {
        Self {
            metadata_type: "METADATA-SYSTEM".to_string(),
            id: "*".to_string(),
            format: "STANDARD-XML".to_string(),
        }
    }
}

impl MetadataOptions {
    pub fn to_query(&self) -> Vec<(String, String)> {
        vec![
            ("Type".to_string(), self.metadata_type.clone()),
            ("ID".to_string(), self.id.clone()),
            ("Format".to_string(), self.format.clone()),
        ]
    }
}

/// GetObject request parameters. The operation itself is not implemented.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetObjectOptions {
    pub resource: String,
    pub object_type: String,
    pub id: String,
    /// Ask for URLs instead of binary payloads.
    pub location: bool,
}
