//! Typed messages, per-type decoders, and the packet splitter.
//!
//! Only four message types are decoded: Parse and Bind from the frontend,
//! ErrorResponse and CommandComplete from the backend. Everything else is
//! walked over by its declared length and skipped. All integers are
//! big-endian; strings are NUL-terminated and decoded lossily (the protocol
//! does not guarantee UTF-8).

use pgscope_common::{Error, Result};
use tracing::debug;

use super::constants::{
    FIELD_MESSAGE, MIN_PACKET_LEN, MSG_BIND, MSG_COMMAND_COMPLETE, MSG_ERROR_RESPONSE, MSG_PARSE,
};
use super::packet::{is_cancel_request, is_ssl_request, is_startup_message, Origin, Packet};

/// One decoded protocol message of interest to the observer.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Parse(ParseMessage),
    Bind(BindMessage),
    ErrorResponse(ErrorResponseMessage),
    CommandComplete(CommandCompleteMessage),
}

/// Parse (F): a query string submitted for preparation.
///
/// `param_count` is the number of parameter types the frontend chose to
/// prespecify, not the number of placeholders in the query.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseMessage {
    pub query: String,
    pub param_count: u16,
    pub param_types: Vec<u32>,
}

/// Bind (F): parameter values bound to a prepared statement.
///
/// A value is `None` when the frontend declared the SQL NULL length
/// (`0xFFFFFFFF`).
#[derive(Debug, Clone, PartialEq)]
pub struct BindMessage {
    pub statement: String,
    pub format_count: u16,
    pub formats: Vec<u16>,
    pub value_count: u16,
    pub values: Vec<Option<Vec<u8>>>,
}

/// ErrorResponse (B): only the primary message field (`M`) is kept.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorResponseMessage {
    pub message: String,
}

/// CommandComplete (B): the command tag, e.g. `SELECT 5`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandCompleteMessage {
    pub tag: String,
}

/// Byte-slice reader for frame decoding.
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn skip(&mut self, n: usize) -> Result<()> {
        if self.data.len() - self.pos < n {
            return Err(Error::Decode("unexpected end of frame"));
        }
        self.pos += n;
        Ok(())
    }

    fn read_u8(&mut self) -> Result<u8> {
        if self.is_empty() {
            return Err(Error::Decode("unexpected end of frame"));
        }
        let b = self.data[self.pos];
        self.pos += 1;
        Ok(b)
    }

    fn read_u16(&mut self) -> Result<u16> {
        if self.data.len() - self.pos < 2 {
            return Err(Error::Decode("unexpected end of frame"));
        }
        let v = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(v)
    }

    fn read_u32(&mut self) -> Result<u32> {
        if self.data.len() - self.pos < 4 {
            return Err(Error::Decode("unexpected end of frame"));
        }
        let v = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(v)
    }

    fn read_bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.data.len() - self.pos < n {
            return Err(Error::Decode("unexpected end of frame"));
        }
        let bytes = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    fn read_cstring(&mut self) -> Result<String> {
        let rest = &self.data[self.pos..];
        let Some(nul) = rest.iter().position(|&b| b == 0) else {
            return Err(Error::Decode("unterminated string"));
        };
        let s = String::from_utf8_lossy(&rest[..nul]).into_owned();
        self.pos += nul + 1;
        Ok(s)
    }

    fn skip_cstring(&mut self) -> Result<()> {
        self.read_cstring().map(|_| ())
    }
}

/// Decode a Parse frame (header included).
pub fn decode_parse(frame: &[u8]) -> Result<ParseMessage> {
    let mut c = Cursor::new(frame);
    c.skip(MIN_PACKET_LEN)?;

    // Name of the destination prepared statement is not kept
    c.skip_cstring()?;
    let query = c.read_cstring()?;

    let param_count = c.read_u16()?;
    let mut param_types = Vec::with_capacity(param_count as usize);
    for _ in 0..param_count {
        param_types.push(c.read_u32()?);
    }

    Ok(ParseMessage {
        query,
        param_count,
        param_types,
    })
}

/// Decode a Bind frame (header included).
pub fn decode_bind(frame: &[u8]) -> Result<BindMessage> {
    let mut c = Cursor::new(frame);
    c.skip(MIN_PACKET_LEN)?;

    // Name of the destination portal is not kept
    c.skip_cstring()?;
    let statement = c.read_cstring()?;

    let format_count = c.read_u16()?;
    let mut formats = Vec::with_capacity(format_count as usize);
    for _ in 0..format_count {
        formats.push(c.read_u16()?);
    }

    let value_count = c.read_u16()?;
    let mut values = Vec::with_capacity(value_count as usize);
    for _ in 0..value_count {
        let len = c.read_u32()?;
        if len == u32::MAX {
            // SQL NULL is declared as length -1 and carries no bytes
            values.push(None);
        } else {
            values.push(Some(c.read_bytes(len as usize)?.to_vec()));
        }
    }

    Ok(BindMessage {
        statement,
        format_count,
        formats,
        value_count,
        values,
    })
}

/// Decode an ErrorResponse frame (header included), keeping only the `M`
/// field. Iteration stops at the field terminator or end of input.
pub fn decode_error_response(frame: &[u8]) -> Result<ErrorResponseMessage> {
    let mut c = Cursor::new(frame);
    c.skip(MIN_PACKET_LEN)?;

    let mut message = String::new();
    while let Ok(tag) = c.read_u8() {
        if tag == 0 {
            break;
        }
        match c.read_cstring() {
            Ok(s) if tag == FIELD_MESSAGE => message = s,
            Ok(_) => {}
            Err(_) => break,
        }
    }

    Ok(ErrorResponseMessage { message })
}

/// Decode a CommandComplete frame (header included).
pub fn decode_command_complete(frame: &[u8]) -> Result<CommandCompleteMessage> {
    let mut c = Cursor::new(frame);
    c.skip(MIN_PACKET_LEN)?;
    let tag = c.read_cstring()?;
    Ok(CommandCompleteMessage { tag })
}

impl Packet {
    /// Split the packet into the decoded messages matching its origin.
    ///
    /// Startup-class packets carry no typed frames and yield nothing. A
    /// frame of a recognized type that fails to decode is skipped and the
    /// walk continues with the next frame.
    pub fn messages(&self) -> Vec<Message> {
        if is_startup_message(&self.payload)
            || is_ssl_request(&self.payload)
            || is_cancel_request(&self.payload)
        {
            return Vec::new();
        }

        let mut messages = Vec::new();
        let mut offset = 0usize;
        while self.payload.len() - offset >= MIN_PACKET_LEN {
            let declared =
                u32::from_be_bytes([
                    self.payload[offset + 1],
                    self.payload[offset + 2],
                    self.payload[offset + 3],
                    self.payload[offset + 4],
                ]) as usize;
            let frame_len = declared + 1;
            if frame_len > self.payload.len() - offset || frame_len < MIN_PACKET_LEN {
                break;
            }
            let frame = &self.payload[offset..offset + frame_len];
            offset += frame_len;

            let decoded = match (self.origin, frame[0]) {
                (Origin::Frontend, MSG_PARSE) => decode_parse(frame).map(Message::Parse),
                (Origin::Frontend, MSG_BIND) => decode_bind(frame).map(Message::Bind),
                (Origin::Backend, MSG_ERROR_RESPONSE) => {
                    decode_error_response(frame).map(Message::ErrorResponse)
                }
                (Origin::Backend, MSG_COMMAND_COMPLETE) => {
                    decode_command_complete(frame).map(Message::CommandComplete)
                }
                _ => continue,
            };
            match decoded {
                Ok(message) => messages.push(message),
                Err(e) => debug!(kind = frame[0], error = %e, "skipping undecodable message"),
            }
        }

        messages
    }
}
