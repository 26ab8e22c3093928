//! zsync control file (`.zsync`) parsing
//!
//! A control file is a text header of `Key: value` lines, a blank line, then
//! one (weak, strong) checksum pair per block of the target file:
//!
//! ```text
//! zsync: 0.6.2
//! Filename: ubuntu.iso
//! MTime: Tue, 15 Aug 2023 10:00:00 +0000
//! Blocksize: 2048
//! Length: 1048576
//! Hash-Lengths: 2,2,5
//! URL: ubuntu.iso
//! SHA-1: 3e1f...
//!
//! <num_blocks * (weak_len + strong_len) raw bytes>
//! ```

pub mod index;

pub use index::BlockIndex;

use crate::delta::checksum::{self, StrongSum, SHA1_LEN};
use crate::error::{Result, ZsyncError};
use chrono::{DateTime, Utc};
use std::collections::HashSet;

/// Parsed header of a control file
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub version: String,
    pub filename: String,
    pub mtime: DateTime<Utc>,
    pub block_size: u32,
    pub file_length: u64,
    /// Hash-Lengths "seq_matches" == 2
    pub double_block_matching: bool,
    pub weak_checksum_len: usize,
    pub strong_checksum_len: usize,
    /// Target URL, absolute or relative to the control file
    pub url: String,
    pub expected_sha1: [u8; SHA1_LEN],
    pub producer: Option<String>,
    pub min_version: Option<String>,
}

impl Header {
    /// ceil(file_length / block_size)
    pub fn num_blocks(&self) -> usize {
        self.file_length.div_ceil(self.block_size as u64) as usize
    }

    /// Logical size of block `position` (the last block may be short)
    pub fn block_len(&self, position: usize) -> usize {
        let offset = position as u64 * self.block_size as u64;
        (self.file_length - offset).min(self.block_size as u64) as usize
    }
}

/// Checksums of one target block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockSum {
    /// Rolling checksum, only the low `weak_checksum_len` bytes are set
    pub weak: u32,
    /// MD4 prefix, zero-filled past `strong_checksum_len`
    pub strong: StrongSum,
}

/// A parsed control file: header plus per-block checksums in target order
#[derive(Debug)]
pub struct ControlFile {
    header: Header,
    blocks: Vec<BlockSum>,
    index: BlockIndex,
}

impl ControlFile {
    /// Parse a complete control file
    pub fn parse(data: &[u8]) -> Result<Self> {
        let (fields, body_start) = split_header(data)?;
        let header = parse_header(&fields)?;

        let entry_len = header.weak_checksum_len + header.strong_checksum_len;
        let num_blocks = usize::try_from(header.file_length.div_ceil(header.block_size as u64))
            .ok()
            .filter(|&n| n.checked_mul(entry_len).is_some())
            .ok_or_else(|| {
                ZsyncError::Format(format!(
                    "Length {} with Blocksize {} describes too many blocks",
                    header.file_length, header.block_size
                ))
            })?;
        let body = &data[body_start..];
        let expected = num_blocks * entry_len;
        if body.len() != expected {
            return Err(ZsyncError::Format(format!(
                "expected {} bytes of block checksums for {} blocks, found {}",
                expected,
                num_blocks,
                body.len()
            )));
        }

        let blocks: Vec<BlockSum> = body
            .chunks_exact(entry_len)
            .map(|entry| {
                let (weak, strong) = entry.split_at(header.weak_checksum_len);
                BlockSum {
                    weak: weak.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32),
                    strong: checksum::truncate(strong, header.strong_checksum_len),
                }
            })
            .collect();

        let index = BlockIndex::build(&blocks, header.double_block_matching);

        if let Some(producer) = &header.producer {
            tracing::debug!("Control file produced by {}", producer);
        }
        if let Some(min_version) = &header.min_version {
            tracing::debug!("Control file requires client version {} or later", min_version);
        }

        tracing::debug!(
            "Parsed zsync {} control file for {}: {} bytes, {} blocks of {}, hash lengths {},{},{}",
            header.version,
            header.filename,
            header.file_length,
            num_blocks,
            header.block_size,
            if header.double_block_matching { 2 } else { 1 },
            header.weak_checksum_len,
            header.strong_checksum_len
        );

        Ok(Self {
            header,
            blocks,
            index,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn blocks(&self) -> &[BlockSum] {
        &self.blocks
    }

    pub fn index(&self) -> &BlockIndex {
        &self.index
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }
}

/// Split off header lines, returning `(key, value)` pairs and the offset of
/// the first checksum byte.
fn split_header(data: &[u8]) -> Result<(Vec<(String, String)>, usize)> {
    let mut fields = Vec::new();
    let mut pos = 0;

    loop {
        let rest = &data[pos..];
        let newline = rest.iter().position(|&b| b == b'\n').ok_or_else(|| {
            ZsyncError::Format("header is not terminated by a blank line".to_string())
        })?;
        let line = &rest[..newline];
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        pos += newline + 1;

        if line.is_empty() {
            return Ok((fields, pos));
        }

        let line = std::str::from_utf8(line)
            .map_err(|_| ZsyncError::Format("header line is not valid text".to_string()))?;
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ZsyncError::Format(format!("malformed header line: {:?}", line)))?;
        fields.push((key.trim().to_string(), value.trim().to_string()));
    }
}

fn parse_header(fields: &[(String, String)]) -> Result<Header> {
    let mut seen = HashSet::new();
    let mut version = None;
    let mut filename = None;
    let mut mtime = None;
    let mut block_size = None;
    let mut file_length = None;
    let mut hash_lengths = None;
    let mut url = None;
    let mut sha1 = None;
    let mut producer = None;
    let mut min_version = None;

    for (key, value) in fields {
        if !seen.insert(key.as_str()) {
            return Err(ZsyncError::Format(format!("duplicate header: {}", key)));
        }

        match key.as_str() {
            "zsync" => version = Some(value.clone()),
            "Filename" => filename = Some(value.clone()),
            "MTime" => {
                let parsed = DateTime::parse_from_rfc2822(value).map_err(|e| {
                    ZsyncError::Format(format!("invalid MTime {:?}: {}", value, e))
                })?;
                mtime = Some(parsed.with_timezone(&Utc));
            }
            "Blocksize" => {
                let size: u32 = parse_number(key, value)?;
                if size == 0 || !size.is_power_of_two() {
                    return Err(ZsyncError::Format(format!(
                        "Blocksize {} is not a power of two",
                        size
                    )));
                }
                block_size = Some(size);
            }
            "Length" => file_length = Some(parse_number::<u64>(key, value)?),
            "Hash-Lengths" => hash_lengths = Some(parse_hash_lengths(value)?),
            "URL" => url = Some(value.clone()),
            "SHA-1" => {
                let digest = hex::decode(value)
                    .ok()
                    .and_then(|bytes| <[u8; SHA1_LEN]>::try_from(bytes).ok())
                    .ok_or_else(|| ZsyncError::Format(format!("invalid SHA-1: {:?}", value)))?;
                sha1 = Some(digest);
            }
            "Producer" => producer = Some(value.clone()),
            "Min-Version" => min_version = Some(value.clone()),
            other => {
                return Err(ZsyncError::Format(format!("unsupported header: {}", other)));
            }
        }
    }

    let (seq_matches, weak_checksum_len, strong_checksum_len) =
        hash_lengths.ok_or_else(|| missing("Hash-Lengths"))?;

    Ok(Header {
        version: version.ok_or_else(|| missing("zsync"))?,
        filename: filename.ok_or_else(|| missing("Filename"))?,
        mtime: mtime.ok_or_else(|| missing("MTime"))?,
        block_size: block_size.ok_or_else(|| missing("Blocksize"))?,
        file_length: file_length.ok_or_else(|| missing("Length"))?,
        double_block_matching: seq_matches == 2,
        weak_checksum_len,
        strong_checksum_len,
        url: url.ok_or_else(|| missing("URL"))?,
        expected_sha1: sha1.ok_or_else(|| missing("SHA-1"))?,
        producer,
        min_version,
    })
}

/// `seq_matches,weak_len,strong_len`
fn parse_hash_lengths(value: &str) -> Result<(u8, usize, usize)> {
    let parts: Vec<&str> = value.split(',').map(str::trim).collect();
    if parts.len() != 3 {
        return Err(ZsyncError::Format(format!(
            "Hash-Lengths must have three fields: {:?}",
            value
        )));
    }

    let seq: u8 = parse_number("Hash-Lengths", parts[0])?;
    let weak: usize = parse_number("Hash-Lengths", parts[1])?;
    let strong: usize = parse_number("Hash-Lengths", parts[2])?;

    if !(1..=2).contains(&seq) {
        return Err(ZsyncError::Format(format!(
            "sequential matches must be 1 or 2, got {}",
            seq
        )));
    }
    if !(2..=4).contains(&weak) {
        return Err(ZsyncError::Format(format!(
            "weak checksum length must be 2-4 bytes, got {}",
            weak
        )));
    }
    if !(3..=16).contains(&strong) {
        return Err(ZsyncError::Format(format!(
            "strong checksum length must be 3-16 bytes, got {}",
            strong
        )));
    }

    Ok((seq, weak, strong))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| ZsyncError::Format(format!("invalid {} value: {:?}", key, value)))
}

fn missing(key: &str) -> ZsyncError {
    ZsyncError::Format(format!("missing required header: {}", key))
}
