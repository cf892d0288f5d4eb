//! Incremental decoder for response bodies.
//!
//! Bytes are pushed in with [`ResponseDecoder::extend`] as they arrive and
//! events are pulled out with [`ResponseDecoder::decode_next`]. The decoder
//! only consumes complete elements and complete text runs, so arbitrary
//! chunk boundaries yield the same event sequence as a single chunk.

use crate::error::{ProtocolError, ReplyCode};
use crate::message::{InfoToken, Operation};
use crate::MAX_ELEMENT_SIZE;
use bytes::{Buf, BytesMut};
use std::collections::VecDeque;

/// What kind of body the decoder is reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Only the status frame is inspected.
    Status,
    /// Status frame followed by `Key=Value` capability and setting lines.
    Login,
    /// Status frame followed by COMPACT tabular elements.
    Tabular,
}

/// Events produced while decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeEvent {
    /// Successful status frame.
    Status { code: ReplyCode, text: String },
    /// Advertised capability path.
    Capability { operation: Operation, path: String },
    /// Negotiated setting.
    Setting(InfoToken),
    /// Record count reported by the server.
    Count(u64),
    /// Column header row.
    Columns(Vec<String>),
    /// Data row, same length as the preceding header.
    Row(Vec<String>),
    /// The server truncated the result set.
    MaxRows,
}

enum Token {
    Text(String),
    Open { name: String, attrs: String },
    Empty { name: String, attrs: String },
    Close,
    Element { name: String, content: String },
}

/// Push-based decoder for a single response body.
pub struct ResponseDecoder {
    kind: FrameKind,
    buffer: BytesMut,
    pending: VecDeque<DecodeEvent>,
    status: Option<ReplyCode>,
    delimiter: Option<char>,
    header_len: Option<usize>,
    done: bool,
}

impl ResponseDecoder {
    pub fn new(kind: FrameKind) -> Self {
        Self {
            kind,
            buffer: BytesMut::with_capacity(8192),
            pending: VecDeque::new(),
            status: None,
            delimiter: None,
            header_len: None,
            done: false,
        }
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        if !self.done {
            self.buffer.extend_from_slice(data);
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns the delimiter named by the server, once seen.
    pub fn delimiter(&self) -> Option<char> {
        self.delimiter
    }

    /// Returns the next complete event, or `None` when more input is needed.
    ///
    /// After an error the decoder is spent and only returns `Ok(None)`.
    pub fn decode_next(&mut self) -> Result<Option<DecodeEvent>, ProtocolError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.done {
                return Ok(None);
            }
            let token = match self.next_token() {
                Ok(Some(token)) => token,
                Ok(None) => return Ok(None),
                Err(e) => return Err(self.fail(e)),
            };
            if let Err(e) = self.handle(token) {
                return Err(self.fail(e));
            }
        }
    }

    /// Signals end of input.
    ///
    /// Flushes a trailing text run, rejects a partial element and requires
    /// that a status frame was seen. Remaining events are still returned by
    /// [`decode_next`](Self::decode_next).
    pub fn finish(&mut self) -> Result<(), ProtocolError> {
        if self.done {
            return Ok(());
        }
        while let Some(token) = self.next_token()? {
            if let Err(e) = self.handle(token) {
                return Err(self.fail(e));
            }
        }
        if !self.buffer.is_empty() {
            if self.buffer[0] == b'<' {
                return Err(self.fail(ProtocolError::UnexpectedEof));
            }
            let raw = self.buffer.split();
            self.handle_text(&String::from_utf8_lossy(&raw));
        }
        if self.status.is_none() {
            return Err(self.fail(ProtocolError::MissingStatus));
        }
        self.done = true;
        Ok(())
    }

    fn fail(&mut self, err: ProtocolError) -> ProtocolError {
        self.done = true;
        self.pending.clear();
        self.buffer.clear();
        err
    }

    fn check_size(&self) -> Result<(), ProtocolError> {
        if self.buffer.len() > MAX_ELEMENT_SIZE {
            return Err(ProtocolError::ElementTooLarge {
                size: self.buffer.len(),
                max: MAX_ELEMENT_SIZE,
            });
        }
        Ok(())
    }

    fn next_token(&mut self) -> Result<Option<Token>, ProtocolError> {
        loop {
            if self.buffer.is_empty() {
                return Ok(None);
            }

            if self.buffer[0] != b'<' {
                let Some(end) = self.buffer.iter().position(|&b| b == b'<') else {
                    self.check_size()?;
                    return Ok(None);
                };
                let raw = self.buffer.split_to(end);
                return Ok(Some(Token::Text(String::from_utf8_lossy(&raw).into_owned())));
            }

            // Comments, declarations and processing instructions
            let skip_to: Option<&[u8]> = if self.buffer.starts_with(b"<!--") {
                Some(&b"-->"[..])
            } else if self.buffer.starts_with(b"<?") {
                Some(&b"?>"[..])
            } else if self.buffer.starts_with(b"<!") {
                Some(&b">"[..])
            } else {
                None
            };
            if let Some(terminator) = skip_to {
                match find(&self.buffer, terminator) {
                    Some(pos) => {
                        self.buffer.advance(pos + terminator.len());
                        continue;
                    }
                    None => {
                        self.check_size()?;
                        return Ok(None);
                    }
                }
            }

            let Some(close) = find_tag_end(&self.buffer) else {
                self.check_size()?;
                return Ok(None);
            };
            let tag = String::from_utf8_lossy(&self.buffer[1..close])
                .trim()
                .to_string();

            if tag.starts_with('/') {
                self.buffer.advance(close + 1);
                return Ok(Some(Token::Close));
            }

            let self_closing = tag.ends_with('/');
            let body = tag.trim_end_matches('/').trim();
            let (name, attrs) = match body.find(char::is_whitespace) {
                Some(pos) => (&body[..pos], body[pos..].trim()),
                None => (body, ""),
            };
            if name.is_empty() {
                return Err(ProtocolError::MalformedElement(tag.clone()));
            }
            let name = name.to_string();
            let attrs = attrs.to_string();

            if self_closing {
                self.buffer.advance(close + 1);
                return Ok(Some(Token::Empty { name, attrs }));
            }

            if is_row_element(&name) {
                let rest = &self.buffer[close + 1..];
                let Some((start, end)) = find_close_tag(rest, &name) else {
                    self.check_size()?;
                    return Ok(None);
                };
                let content = String::from_utf8_lossy(&rest[..start]).into_owned();
                self.buffer.advance(close + 1 + end);
                return Ok(Some(Token::Element { name, content }));
            }

            self.buffer.advance(close + 1);
            return Ok(Some(Token::Open { name, attrs }));
        }
    }

    fn handle(&mut self, token: Token) -> Result<(), ProtocolError> {
        match token {
            Token::Text(text) => {
                self.handle_text(&text);
                Ok(())
            }
            Token::Close => Ok(()),
            Token::Open { name, attrs } | Token::Empty { name, attrs } => {
                self.handle_tag(&name, &attrs)
            }
            Token::Element { name, content } => self.handle_row(&name, &content),
        }
    }

    fn handle_tag(&mut self, name: &str, attrs: &str) -> Result<(), ProtocolError> {
        if name.eq_ignore_ascii_case("RETS") || name.eq_ignore_ascii_case("RETS-STATUS") {
            return self.handle_status(name, attrs);
        }
        if self.kind != FrameKind::Tabular {
            return Ok(());
        }

        if name.eq_ignore_ascii_case("DELIMITER") {
            let value = attribute(attrs, "value")
                .ok_or_else(|| ProtocolError::MalformedElement(format!("<{} {}>", name, attrs)))?;
            self.delimiter = Some(parse_delimiter(&value)?);
        } else if name.eq_ignore_ascii_case("COUNT") {
            let records = attribute(attrs, "Records")
                .and_then(|v| v.trim().parse::<u64>().ok())
                .ok_or_else(|| ProtocolError::MalformedElement(format!("<{} {}>", name, attrs)))?;
            self.pending.push_back(DecodeEvent::Count(records));
        } else if name.eq_ignore_ascii_case("MAXROWS") {
            self.pending.push_back(DecodeEvent::MaxRows);
        }
        Ok(())
    }

    fn handle_status(&mut self, name: &str, attrs: &str) -> Result<(), ProtocolError> {
        let raw = attribute(attrs, "ReplyCode").ok_or_else(|| {
            ProtocolError::MalformedElement(format!("<{}> without ReplyCode", name))
        })?;
        let code = ReplyCode::parse(&raw)
            .ok_or_else(|| ProtocolError::MalformedElement(format!("ReplyCode {:?}", raw)))?;
        let text = attribute(attrs, "ReplyText").unwrap_or_default();

        if !code.is_success() {
            return Err(ProtocolError::Reply { code, text });
        }

        self.status = Some(code);
        self.pending.push_back(DecodeEvent::Status { code, text });
        Ok(())
    }

    fn handle_text(&mut self, text: &str) {
        if self.kind != FrameKind::Login || self.status.is_none() {
            return;
        }

        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = unescape(value.trim());

            if key.eq_ignore_ascii_case("Info") {
                if let Some(token) = InfoToken::parse_info(&value) {
                    self.pending.push_back(DecodeEvent::Setting(token));
                }
            } else if let Ok(operation) = key.parse::<Operation>() {
                self.pending.push_back(DecodeEvent::Capability {
                    operation,
                    path: value,
                });
            } else if !key.is_empty() {
                self.pending
                    .push_back(DecodeEvent::Setting(InfoToken::new(key, value)));
            }
        }
    }

    fn handle_row(&mut self, name: &str, content: &str) -> Result<(), ProtocolError> {
        if self.kind != FrameKind::Tabular {
            return Ok(());
        }
        let delimiter = self.delimiter.ok_or(ProtocolError::MissingDelimiter)?;
        let fields = split_fields(content, delimiter);

        if name.eq_ignore_ascii_case("COLUMNS") {
            self.header_len = Some(fields.len());
            self.pending.push_back(DecodeEvent::Columns(fields));
        } else {
            let expected = self.header_len.ok_or(ProtocolError::MissingColumns)?;
            if fields.len() != expected {
                return Err(ProtocolError::RowLength {
                    expected,
                    actual: fields.len(),
                });
            }
            self.pending.push_back(DecodeEvent::Row(fields));
        }
        Ok(())
    }
}

fn is_row_element(name: &str) -> bool {
    name.eq_ignore_ascii_case("COLUMNS") || name.eq_ignore_ascii_case("DATA")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Finds the `>` closing the tag at the start of `buf`, skipping any
/// inside quoted attribute values.
fn find_tag_end(buf: &[u8]) -> Option<usize> {
    let mut quote = None;
    for (i, &b) in buf.iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(i),
            None => {}
        }
    }
    None
}

/// Locates `</name>` in `buf`, returning the offset of `<` and the offset
/// just past `>`.
fn find_close_tag(buf: &[u8], name: &str) -> Option<(usize, usize)> {
    let name = name.as_bytes();
    let mut from = 0;
    while let Some(pos) = find(&buf[from..], b"</") {
        let start = from + pos;
        let name_start = start + 2;
        let name_end = name_start + name.len();
        if name_end > buf.len() {
            return None;
        }
        if buf[name_start..name_end].eq_ignore_ascii_case(name) {
            let rest = &buf[name_end..];
            let gt = rest.iter().position(|&b| b == b'>')?;
            if rest[..gt].iter().all(|b| b.is_ascii_whitespace()) {
                return Some((start, name_end + gt + 1));
            }
        }
        from = start + 2;
    }
    None
}

fn parse_delimiter(value: &str) -> Result<char, ProtocolError> {
    let byte = u8::from_str_radix(value.trim(), 16)
        .map_err(|_| ProtocolError::InvalidDelimiter(value.to_string()))?;
    if !byte.is_ascii() {
        return Err(ProtocolError::InvalidDelimiter(value.to_string()));
    }
    Ok(char::from(byte))
}

/// Splits a COLUMNS/DATA body. Bodies open and close with one delimiter.
///
/// A delimiter inside an entity reference such as `&amp;` or `&#59;` does
/// not end a field. Fields are unescaped after splitting, so an escaped
/// delimiter stays part of its field.
fn split_fields(content: &str, delimiter: char) -> Vec<String> {
    let inner = content.strip_prefix(delimiter).unwrap_or(content);
    let inner = inner.strip_suffix(delimiter).unwrap_or(inner);

    let mut fields = Vec::new();
    let mut start = 0;
    let mut pos = 0;
    while let Some(c) = inner[pos..].chars().next() {
        if c == '&' && delimiter != '&' {
            if let Some(len) = entity_len(&inner[pos..]) {
                pos += len;
                continue;
            }
        }
        if c == delimiter {
            fields.push(unescape(&inner[start..pos]));
            start = pos + c.len_utf8();
        }
        pos += c.len_utf8();
    }
    fields.push(unescape(&inner[start..]));
    fields
}

/// Length of the entity reference at the start of `text`, if there is one.
fn entity_len(text: &str) -> Option<usize> {
    let body = text.strip_prefix('&')?;
    let end = body.find(';')?;
    let name = &body[..end];
    let valid = if let Some(hex) = name.strip_prefix("#x").or_else(|| name.strip_prefix("#X")) {
        !hex.is_empty() && hex.chars().all(|c| c.is_ascii_hexdigit())
    } else if let Some(dec) = name.strip_prefix('#') {
        !dec.is_empty() && dec.chars().all(|c| c.is_ascii_digit())
    } else {
        name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
            && name.chars().all(|c| c.is_ascii_alphanumeric())
    };
    valid.then_some(end + 2)
}

/// Unescapes XML entities, keeping the raw text when it is not well formed.
fn unescape(raw: &str) -> String {
    match quick_xml::escape::unescape(raw) {
        Ok(text) => text.into_owned(),
        Err(_) => raw.to_string(),
    }
}

/// Reads one attribute value from the raw attribute text of a tag.
fn attribute(attrs: &str, wanted: &str) -> Option<String> {
    let mut rest = attrs.trim_start();
    while !rest.is_empty() {
        let name_end = rest.find(|c: char| c == '=' || c.is_whitespace())?;
        let name = &rest[..name_end];
        rest = rest[name_end..].trim_start();
        rest = rest.strip_prefix('=')?.trim_start();

        let quote = rest.chars().next()?;
        if quote != '"' && quote != '\'' {
            return None;
        }
        let value_end = rest[1..].find(quote)? + 1;
        let value = &rest[1..value_end];
        if name.eq_ignore_ascii_case(wanted) {
            return Some(unescape(value));
        }
        rest = rest[value_end + 1..].trim_start();
    }
    None
}
