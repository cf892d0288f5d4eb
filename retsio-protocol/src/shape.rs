//! Output shaping for decoded tabular rows.

use crate::error::ProtocolError;
use crate::message::{OutputFormat, Shape};
use indexmap::IndexMap;
use serde::Serialize;

/// A record keyed by column name, in column order.
pub type Record = IndexMap<String, String>;

/// A shaped item ready for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ShapedItem {
    Header(Vec<String>),
    Row(Vec<String>),
    Record(Record),
}

impl ShapedItem {
    /// Serializes the item as a single JSON text line (no trailing newline).
    pub fn to_json_line(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Applies a [`Shape`] to the header and row events of one response.
#[derive(Debug, Clone)]
pub struct RowShaper {
    shape: Shape,
    header: Option<Vec<String>>,
}

impl RowShaper {
    pub fn new(shape: Shape) -> Self {
        Self {
            shape,
            header: None,
        }
    }

    pub fn shape(&self) -> Shape {
        self.shape
    }

    /// Returns the most recent header row.
    pub fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    /// Records a header row. Returns it as an item in arrays format when
    /// headers are enabled.
    pub fn columns(&mut self, columns: Vec<String>) -> Option<ShapedItem> {
        let item = match self.shape.format {
            OutputFormat::Arrays if self.shape.headers => Some(ShapedItem::Header(columns.clone())),
            _ => None,
        };
        self.header = Some(columns);
        item
    }

    /// Shapes one data row.
    pub fn row(&self, row: Vec<String>) -> Result<ShapedItem, ProtocolError> {
        let header = self.header.as_ref().ok_or(ProtocolError::MissingColumns)?;
        if header.len() != row.len() {
            return Err(ProtocolError::RowLength {
                expected: header.len(),
                actual: row.len(),
            });
        }

        match self.shape.format {
            OutputFormat::Arrays => Ok(ShapedItem::Row(row)),
            OutputFormat::Objects => Ok(ShapedItem::Record(
                header.iter().cloned().zip(row).collect(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_objects_merge_header() {
        let mut shaper = RowShaper::new(Shape::default());
        assert!(shaper.columns(strings(&["ListingID", "City"])).is_none());

        let item = shaper.row(strings(&["1001", "Springfield"])).unwrap();
        let ShapedItem::Record(record) = item else {
            panic!("expected record");
        };
        assert_eq!(record.get("ListingID").map(String::as_str), Some("1001"));
        let keys: Vec<_> = record.keys().cloned().collect();
        assert_eq!(keys, strings(&["ListingID", "City"]));
    }

    #[test]
    fn test_arrays_with_headers() {
        let shape = Shape {
            format: OutputFormat::Arrays,
            object_mode: true,
            headers: true,
        };
        let mut shaper = RowShaper::new(shape);
        assert_eq!(
            shaper.columns(strings(&["A", "B"])),
            Some(ShapedItem::Header(strings(&["A", "B"])))
        );
        assert_eq!(
            shaper.row(strings(&["1", "2"])).unwrap(),
            ShapedItem::Row(strings(&["1", "2"]))
        );
    }

    #[test]
    fn test_arrays_without_headers() {
        let shape = Shape {
            format: OutputFormat::Arrays,
            object_mode: true,
            headers: false,
        };
        let mut shaper = RowShaper::new(shape);
        assert!(shaper.columns(strings(&["A"])).is_none());
        assert_eq!(shaper.header(), Some(&strings(&["A"])[..]));
    }

    #[test]
    fn test_row_without_header() {
        let shaper = RowShaper::new(Shape::default());
        assert!(matches!(
            shaper.row(strings(&["1"])),
            Err(ProtocolError::MissingColumns)
        ));
    }

    #[test]
    fn test_row_length_checked() {
        let mut shaper = RowShaper::new(Shape::default());
        shaper.columns(strings(&["A", "B"]));
        assert!(matches!(
            shaper.row(strings(&["1"])),
            Err(ProtocolError::RowLength {
                expected: 2,
                actual: 1
            })
        ));
    }

    #[test]
    fn test_json_lines() {
        let mut shaper = RowShaper::new(Shape::default());
        shaper.columns(strings(&["B", "A"]));
        let line = shaper.row(strings(&["2", "1"])).unwrap().to_json_line().unwrap();
        assert_eq!(line, r#"{"B":"2","A":"1"}"#);

        let line = ShapedItem::Header(strings(&["A", "B"])).to_json_line().unwrap();
        assert_eq!(line, r#"["A","B"]"#);
    }
}
