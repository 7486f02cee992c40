//! The slice of the beanstalkd text protocol a producer needs.
//!
//! Only two commands are spoken: `use <tube>` to select the tube new jobs go
//! to, and `put <pri> <delay> <ttr> <bytes>` followed by the job body. Every
//! command and reply is a single `\r\n` terminated line; the body of a `put`
//! is an extra `\r\n` terminated chunk of exactly `<bytes>` bytes.

use crate::{Error, PutParams, Result};
use bytes::{BufMut, BytesMut};

pub(crate) const CRLF: &[u8] = b"\r\n";

/// Longest tube name the broker accepts.
pub const MAX_TUBE_NAME_LEN: usize = 200;

/// Tube the broker assigns to a fresh connection.
pub const DEFAULT_TUBE: &str = "default";

/// Checks `tube` against the broker's naming rules.
///
/// # Errors
///
/// Returns [`Error::InvalidRequest`] when the name is empty, longer than
/// [`MAX_TUBE_NAME_LEN`], starts with `-`, or contains a byte outside
/// `A-Z a-z 0-9 - + / ; . $ _ ( )`.
pub fn validate_tube(tube: &str) -> Result<()> {
    let reason = if tube.is_empty() {
        "tube name must not be empty".to_string()
    } else if tube.len() > MAX_TUBE_NAME_LEN {
        format!(
            "tube name is {} bytes, maximum is {MAX_TUBE_NAME_LEN}",
            tube.len()
        )
    } else if tube.starts_with('-') {
        "tube name must not start with '-'".to_string()
    } else if let Some(c) = tube.chars().find(|c| !is_tube_char(*c)) {
        format!("tube name contains invalid character {c:?}")
    } else {
        return Ok(());
    };

    Err(Error::InvalidRequest { reason })
}

const fn is_tube_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '/' | ';' | '.' | '$' | '_' | '(' | ')')
}

pub(crate) fn encode_use(buf: &mut BytesMut, tube: &str) {
    buf.reserve(4 + tube.len() + CRLF.len());
    buf.put_slice(b"use ");
    buf.put_slice(tube.as_bytes());
    buf.put_slice(CRLF);
}

pub(crate) fn encode_put(buf: &mut BytesMut, params: &PutParams, body: &[u8]) {
    let header = format!(
        "put {} {} {} {}",
        params.priority,
        params.delay_secs(),
        params.ttr_secs(),
        body.len()
    );
    buf.reserve(header.len() + body.len() + 2 * CRLF.len());
    buf.put_slice(header.as_bytes());
    buf.put_slice(CRLF);
    buf.put_slice(body);
    buf.put_slice(CRLF);
}

/// Interprets the reply to `use <tube>`.
pub(crate) fn parse_use_response(line: &str, tube: &str) -> Result<()> {
    match line.strip_prefix("USING ") {
        Some(used) if used == tube => Ok(()),
        _ => Err(general_error(line)),
    }
}

/// Interprets the reply to `put`, yielding the id of the inserted job.
pub(crate) fn parse_put_response(line: &str) -> Result<u64> {
    let mut parts = line.split(' ');
    match (parts.next(), parts.next(), parts.next()) {
        (Some("INSERTED"), Some(id), None) => parse_id(line, id),
        (Some("BURIED"), Some(id), None) => Err(Error::Buried {
            id: parse_id(line, id)?,
        }),
        (Some("EXPECTED_CRLF"), None, None) => Err(Error::ExpectedCrlf),
        (Some("JOB_TOO_BIG"), None, None) => Err(Error::JobTooBig),
        (Some("DRAINING"), None, None) => Err(Error::Draining),
        _ => Err(general_error(line)),
    }
}

fn parse_id(line: &str, raw: &str) -> Result<u64> {
    raw.parse().map_err(|_| Error::UnexpectedResponse {
        line: line.to_string(),
    })
}

/// Maps the replies any command may receive.
fn general_error(line: &str) -> Error {
    match line {
        "OUT_OF_MEMORY" => Error::OutOfMemory,
        "INTERNAL_ERROR" => Error::InternalError,
        "BAD_FORMAT" => Error::BadFormat,
        "UNKNOWN_COMMAND" => Error::UnknownCommand,
        _ => Error::UnexpectedResponse {
            line: line.to_string(),
        },
    }
}
