//! multipart/byteranges response bodies
//!
//! ```text
//! --THIS_STRING_SEPARATES\r\n
//! Content-Type: application/octet-stream\r\n
//! Content-Range: bytes 0-99/1000\r\n
//! \r\n
//! <100 raw bytes>\r\n
//! --THIS_STRING_SEPARATES\r\n
//! ...
//! --THIS_STRING_SEPARATES--\r\n
//! ```
//!
//! Part bodies are binary, so the stream is read as bytes and only the
//! delimiter and header lines are interpreted as (Latin-1) text.

use super::range::ByteRange;
use crate::error::{Result, ZsyncError};
use std::io::{BufRead, Read, Take};

/// Longest delimiter or header line we are willing to buffer
const MAX_LINE_LEN: u64 = 8 * 1024;

/// Parse a `Content-Range` value: `bytes first-last/total`
///
/// `total` may be `*`. It is informational only, so a total that disagrees
/// with the range is logged rather than rejected.
pub fn parse_content_range(value: &str) -> Result<ByteRange> {
    let malformed = || ZsyncError::Protocol(format!("malformed Content-Range: {:?}", value));

    let value = value.trim();
    let spec = value
        .get(..6)
        .filter(|unit| unit.eq_ignore_ascii_case("bytes "))
        .map(|_| value[6..].trim_start())
        .ok_or_else(malformed)?;

    let (span, total) = spec.split_once('/').ok_or_else(malformed)?;
    let (first, last) = span.split_once('-').ok_or_else(malformed)?;
    let first: u64 = first.trim().parse().map_err(|_| malformed())?;
    let last: u64 = last.trim().parse().map_err(|_| malformed())?;
    if first > last {
        return Err(malformed());
    }

    let total = total.trim();
    if total != "*" {
        let total: u64 = total.parse().map_err(|_| malformed())?;
        if last >= total {
            tracing::debug!("Content-Range {} extends past total length {}", value, total);
        }
    }

    Ok(ByteRange::new(first, last))
}

/// Extract the `boundary` parameter of a `multipart/byteranges` content type
///
/// Returns `None` for any other media type.
pub fn boundary(content_type: &str) -> Option<String> {
    let mut params = content_type.split(';');
    let media_type = params.next()?.trim();
    if !media_type.eq_ignore_ascii_case("multipart/byteranges") {
        return None;
    }

    params.find_map(|param| {
        let (name, value) = param.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case("boundary") {
            return None;
        }
        let value = value.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(value);
        Some(value.to_string())
    })
}

/// Sequential reader over the parts of a multipart/byteranges body
pub struct MultipartReader<R> {
    reader: R,
    delimiter: Vec<u8>,
    finished: bool,
}

impl<R: BufRead> MultipartReader<R> {
    pub fn new(reader: R, boundary: &str) -> Self {
        Self {
            reader,
            delimiter: format!("--{}", boundary).into_bytes(),
            finished: false,
        }
    }

    /// Advance to the next part and return its range
    ///
    /// Returns `Ok(None)` after the closing delimiter. The caller must consume
    /// the part's body through [`MultipartReader::body`] before asking for the
    /// next part.
    pub fn next_part(&mut self) -> Result<Option<ByteRange>> {
        if self.finished {
            return Ok(None);
        }

        // The CRLF ending the previous body, and any preamble padding, show
        // up here as blank lines.
        loop {
            let line = self.read_line()?.ok_or_else(|| {
                ZsyncError::Protocol("multipart body ended before the closing boundary".to_string())
            })?;
            let line = trim_line(&line);
            if line.is_empty() {
                continue;
            }
            if line == self.delimiter.as_slice() {
                break;
            }
            if line.strip_prefix(self.delimiter.as_slice()) == Some(b"--".as_slice()) {
                self.finished = true;
                return Ok(None);
            }
            return Err(ZsyncError::Protocol(format!(
                "expected multipart boundary, found {:?}",
                latin1(line)
            )));
        }

        let mut range = None;
        loop {
            let line = self.read_line()?.ok_or_else(|| {
                ZsyncError::Protocol("multipart body ended inside part headers".to_string())
            })?;
            let line = trim_line(&line);
            if line.is_empty() {
                break;
            }

            let text = latin1(line);
            let (name, value) = text.split_once(':').ok_or_else(|| {
                ZsyncError::Protocol(format!("malformed multipart header: {:?}", text))
            })?;
            if name.trim().eq_ignore_ascii_case("content-range") {
                range = Some(parse_content_range(value)?);
            }
        }

        let range = range.ok_or_else(|| {
            ZsyncError::Protocol("multipart part has no Content-Range header".to_string())
        })?;
        tracing::trace!("multipart part {}", range);
        Ok(Some(range))
    }

    /// Length-bounded view of the current part's body
    pub fn body(&mut self, range: ByteRange) -> Take<&mut R> {
        (&mut self.reader).take(range.len())
    }

    fn read_line(&mut self) -> Result<Option<Vec<u8>>> {
        let mut line = Vec::new();
        let n = (&mut self.reader).take(MAX_LINE_LEN).read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if !line.ends_with(b"\n") && n as u64 == MAX_LINE_LEN {
            return Err(ZsyncError::Protocol(
                "multipart header line too long".to_string(),
            ));
        }
        Ok(Some(line))
    }
}

/// Strip the line terminator and trailing transport padding
fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && matches!(line[end - 1], b'\n' | b'\r' | b' ' | b'\t') {
        end -= 1;
    }
    &line[..end]
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|&b| b as char).collect()
}
