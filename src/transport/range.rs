use super::multipart::{self, MultipartReader};
use super::HttpTransport;
use crate::error::{Result, ZsyncError};
use std::collections::BTreeSet;
use std::fmt;
use std::io::{BufReader, Read};
use url::Url;

/// Default upper bound on ranges per request, keeping the `Range` header short
pub const MAX_RANGES_PER_REQUEST: usize = 100;

/// Inclusive byte range `first..=last` within the target file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteRange {
    pub first: u64,
    pub last: u64,
}

impl ByteRange {
    pub fn new(first: u64, last: u64) -> Self {
        debug_assert!(first <= last, "empty byte range {}-{}", first, last);
        Self { first, last }
    }

    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.first, self.last)
    }
}

/// Destination for byte ranges fetched from the server
pub trait RangeSink {
    /// Accept exactly `range.len()` bytes of target data from `data`
    fn receive(&mut self, range: ByteRange, data: &mut dyn Read) -> Result<()>;
}

/// Totals for one [`RangeFetcher::fetch`] call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchStats {
    pub requests: usize,
    pub ranges: usize,
    pub bytes: u64,
}

/// Downloads missing ranges with HTTP range requests
///
/// Ranges are sent in batches of at most `max_ranges`. Each response may be
/// a whole-file 200, a single-range 206 with `Content-Range`, or a 206
/// multipart/byteranges body. Ranges of a batch that the server left out are
/// requested again; a response that answers none of them is an error.
pub struct RangeFetcher<'a, T: HttpTransport + ?Sized> {
    transport: &'a T,
    max_ranges: usize,
    file_length: u64,
}

impl<'a, T: HttpTransport + ?Sized> RangeFetcher<'a, T> {
    pub fn new(transport: &'a T, file_length: u64) -> Self {
        Self {
            transport,
            max_ranges: MAX_RANGES_PER_REQUEST,
            file_length,
        }
    }

    pub fn with_max_ranges(mut self, max_ranges: usize) -> Self {
        self.max_ranges = max_ranges.max(1);
        self
    }

    pub fn fetch(&self, url: &Url, ranges: &[ByteRange], sink: &mut dyn RangeSink) -> Result<FetchStats> {
        let mut pending: BTreeSet<ByteRange> = ranges.iter().copied().collect();
        let mut stats = FetchStats::default();

        while !pending.is_empty() {
            let batch: Vec<ByteRange> = pending.iter().take(self.max_ranges).copied().collect();
            let mut requested: BTreeSet<ByteRange> = batch.iter().copied().collect();
            let header = range_header(&batch);

            tracing::debug!("Requesting {} ranges from {}", batch.len(), url);
            let mut response = self.transport.send(url, Some(&header))?;
            stats.requests += 1;

            match response.status {
                200 => {
                    // Server ignored Range: the body is the whole file
                    tracing::info!("Server sent the complete file instead of ranges");
                    let whole = ByteRange::new(0, self.file_length - 1);
                    sink.receive(whole, &mut response.body)?;
                    stats.ranges += 1;
                    stats.bytes += whole.len();
                    return Ok(stats);
                }
                206 => {
                    let content_type = response.header("Content-Type").unwrap_or("");
                    let received = if let Some(boundary) = multipart::boundary(content_type) {
                        let mut reader =
                            MultipartReader::new(BufReader::new(response.body), &boundary);
                        let mut received = Vec::new();
                        while let Some(range) = reader.next_part()? {
                            take_requested(&mut requested, range)?;
                            sink.receive(range, &mut reader.body(range))?;
                            received.push(range);
                        }
                        received
                    } else {
                        let value = response.header("Content-Range").ok_or_else(|| {
                            ZsyncError::Protocol("206 response without Content-Range".to_string())
                        })?;
                        let range = multipart::parse_content_range(value)?;
                        take_requested(&mut requested, range)?;
                        sink.receive(range, &mut response.body)?;
                        vec![range]
                    };

                    if received.is_empty() {
                        return Err(ZsyncError::Protocol(
                            "206 response contained none of the requested ranges".to_string(),
                        ));
                    }
                    for range in &received {
                        pending.remove(range);
                        stats.ranges += 1;
                        stats.bytes += range.len();
                    }
                    if !requested.is_empty() {
                        tracing::debug!(
                            "{} ranges of the batch not returned, requesting again",
                            requested.len()
                        );
                    }
                }
                status => {
                    return Err(ZsyncError::Protocol(format!(
                        "unexpected HTTP status {} for range request to {}",
                        status, url
                    )));
                }
            }
        }

        Ok(stats)
    }
}

/// `Range` header value for a batch: `bytes=0-99,300-399`
pub fn range_header(ranges: &[ByteRange]) -> String {
    let spec: Vec<String> = ranges.iter().map(ByteRange::to_string).collect();
    format!("bytes={}", spec.join(","))
}

fn take_requested(requested: &mut BTreeSet<ByteRange>, range: ByteRange) -> Result<()> {
    if requested.remove(&range) {
        Ok(())
    } else {
        Err(ZsyncError::Protocol(format!(
            "server returned range {} which was not requested",
            range
        )))
    }
}
