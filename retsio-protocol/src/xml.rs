//! Metadata document parsing.
//!
//! Documents are parsed into a generic [`XmlNode`] tree first and then
//! normalized into a JSON value in a separate pass:
//! - tag and attribute names are lower-cased
//! - text is whitespace-normalized
//! - attributes are merged into their element
//! - repeated children become arrays, single children stay scalars
//! - the root element is unwrapped

use crate::error::{ProtocolError, ReplyCode};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Key holding element text when the element also has attributes or children.
pub const TEXT_KEY: &str = "_";

/// A parsed element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

/// Parses a complete document into its root element.
pub fn parse_document(xml: &str) -> Result<XmlNode, ProtocolError> {
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<XmlNode> = Vec::new();
    let mut root: Option<XmlNode> = None;

    loop {
        match reader.read_event()? {
            Event::Start(start) => stack.push(node_from_start(&start)?),
            Event::Empty(start) => {
                let node = node_from_start(&start)?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::End(_) => {
                let node = stack
                    .pop()
                    .ok_or_else(|| ProtocolError::Xml("unbalanced end tag".to_string()))?;
                attach(&mut stack, &mut root, node)?;
            }
            Event::Text(text) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(top) = stack.last_mut() {
                    let data = std::str::from_utf8(&data).map_err(|_| ProtocolError::InvalidUtf8)?;
                    top.text.push_str(data);
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !stack.is_empty() {
        return Err(ProtocolError::Xml("unclosed element".to_string()));
    }
    root.ok_or_else(|| ProtocolError::Xml("document has no root element".to_string()))
}

fn node_from_start(start: &BytesStart<'_>) -> Result<XmlNode, ProtocolError> {
    let mut node = XmlNode {
        name: String::from_utf8_lossy(start.name().as_ref()).into_owned(),
        ..Default::default()
    };
    for attr in start.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let value = attr.unescape_value()?.into_owned();
        node.attributes.push((key, value));
    }
    Ok(node)
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), ProtocolError> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => return Err(ProtocolError::Xml("multiple root elements".to_string())),
    }
    Ok(())
}

/// Normalizes a parsed tree into a JSON value, unwrapping the root.
pub fn normalize(root: &XmlNode) -> Value {
    node_value(root)
}

/// Parses and normalizes a metadata document.
pub fn parse_metadata(xml: &str) -> Result<Value, ProtocolError> {
    Ok(normalize(&parse_document(xml)?))
}

/// Reads the reply code and text merged into a normalized document root.
pub fn reply_status(value: &Value) -> Option<(ReplyCode, String)> {
    let code = ReplyCode::parse(value.get("replycode")?.as_str()?)?;
    let text = value
        .get("replytext")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    Some((code, text))
}

fn node_value(node: &XmlNode) -> Value {
    let text = normalize_whitespace(&node.text);
    if node.attributes.is_empty() && node.children.is_empty() {
        return Value::String(text);
    }

    let mut map = Map::new();
    for (key, value) in &node.attributes {
        insert_merged(&mut map, key.to_lowercase(), Value::String(value.clone()));
    }
    for child in &node.children {
        insert_merged(&mut map, child.name.to_lowercase(), node_value(child));
    }
    if !text.is_empty() {
        insert_merged(&mut map, TEXT_KEY.to_string(), Value::String(text));
    }
    Value::Object(map)
}

fn insert_merged(map: &mut Map<String, Value>, key: String, value: Value) {
    match map.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            map.insert(key, value);
        }
    }
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const METADATA: &str = r#"<?xml version="1.0"?>
<RETS ReplyCode="0" ReplyText="Operation Successful">
  <METADATA>
    <METADATA-SYSTEM Version="1.12.30" Date="2016-01-15T12:00:00Z">
      <SYSTEM SystemID="DEMO" SystemDescription="Demo   MLS"/>
      <COMMENTS>
        Line one
        line two
      </COMMENTS>
      <METADATA-RESOURCE Version="1.0" Date="2016-01-15T12:00:00Z">
        <Resource><ResourceID>Property</ResourceID></Resource>
        <Resource><ResourceID>Agent</ResourceID></Resource>
      </METADATA-RESOURCE>
    </METADATA-SYSTEM>
  </METADATA>
</RETS>"#;

    #[test]
    fn test_parse_document_tree() {
        let root = parse_document(METADATA).unwrap();
        assert_eq!(root.name, "RETS");
        assert_eq!(root.attributes[0], ("ReplyCode".to_string(), "0".to_string()));
        assert_eq!(root.children.len(), 1);
        assert_eq!(root.children[0].name, "METADATA");
    }

    #[test]
    fn test_normalize_metadata() {
        let value = parse_metadata(METADATA).unwrap();

        // Root unwrapped, attributes merged and lower-cased
        assert_eq!(value["replycode"], "0");
        assert_eq!(value["replytext"], "Operation Successful");

        let system = &value["metadata"]["metadata-system"];
        assert_eq!(system["version"], "1.12.30");
        assert_eq!(system["system"]["systemid"], "DEMO");

        // Attribute values are kept verbatim, element text is normalized
        assert_eq!(system["system"]["systemdescription"], "Demo   MLS");
        assert_eq!(system["comments"], "Line one line two");

        // Repeated children become arrays, single children stay scalars
        let resources = &system["metadata-resource"]["resource"];
        assert_eq!(
            resources,
            &json!([{"resourceid": "Property"}, {"resourceid": "Agent"}])
        );
    }

    #[test]
    fn test_mixed_text_and_children() {
        let value = parse_metadata("<A x=\"1\">hello <B>b</B> world</A>").unwrap();
        assert_eq!(value, json!({"x": "1", "b": "b", "_": "hello world"}));
    }

    #[test]
    fn test_empty_element() {
        assert_eq!(parse_metadata("<A/>").unwrap(), json!(""));
        assert_eq!(parse_metadata("<A><B/></A>").unwrap(), json!({"b": ""}));
    }

    #[test]
    fn test_entities_and_cdata() {
        let value = parse_metadata("<A><B>x &amp; y</B><C><![CDATA[<raw>]]></C></A>").unwrap();
        assert_eq!(value["b"], "x & y");
        assert_eq!(value["c"], "<raw>");
    }

    #[test]
    fn test_reply_status() {
        let value = parse_metadata(
            "<RETS ReplyCode=\"20503\" ReplyText=\"No Metadata Found\"/>",
        )
        .unwrap();
        assert_eq!(
            reply_status(&value),
            Some((ReplyCode::NO_METADATA_FOUND, "No Metadata Found".to_string()))
        );
        assert_eq!(reply_status(&json!("text")), None);
    }

    #[test]
    fn test_malformed_documents() {
        assert!(parse_metadata("").is_err());
        assert!(parse_metadata("<A><B></A>").is_err());
        assert!(parse_metadata("<A>").is_err());
    }
}
