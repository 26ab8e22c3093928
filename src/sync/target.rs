use crate::control::ControlFile;
use crate::delta::checksum;
use crate::error::{Result, ZsyncError};
use crate::fs_util;
use crate::transport::range::{ByteRange, RangeSink};
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Temporary sibling the target is assembled in: `<path>.part`
pub fn part_path(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".part");
    PathBuf::from(name)
}

/// The target file under reconstruction
///
/// Blocks arrive in any order, from local matches or from the server, and
/// are written into `<path>.part`. Each block is written at most once. The
/// file only reaches `path` through [`OutputFile::close`], after its SHA-1
/// matches the control file.
pub struct OutputFile {
    control: Arc<ControlFile>,
    path: PathBuf,
    temp_path: PathBuf,
    file: File,
    completed: Vec<bool>,
    blocks_remaining: usize,
}

impl OutputFile {
    /// Create (or truncate) `<path>.part`, sized to the target length
    pub fn create(control: Arc<ControlFile>, path: &Path) -> Result<Self> {
        let temp_path = part_path(path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.set_len(control.header().file_length)?;

        let num_blocks = control.num_blocks();
        tracing::debug!(
            "Assembling {} in {} ({} blocks)",
            path.display(),
            temp_path.display(),
            num_blocks
        );

        Ok(Self {
            control,
            path: path.to_path_buf(),
            temp_path,
            file,
            completed: vec![false; num_blocks],
            blocks_remaining: num_blocks,
        })
    }

    /// Write target block `position` from `data`
    ///
    /// Only the block's logical length is taken from `data`, so a full-size
    /// window may be passed for a short last block. Returns `false` without
    /// touching the file if the block is already complete.
    pub fn write(&mut self, position: usize, data: &[u8]) -> Result<bool> {
        if self.completed[position] {
            return Ok(false);
        }

        let header = self.control.header();
        let len = header.block_len(position);
        let offset = position as u64 * header.block_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(&data[..len])?;

        self.completed[position] = true;
        self.blocks_remaining -= 1;
        Ok(true)
    }

    /// Byte ranges still needed, with runs of missing blocks coalesced
    pub fn missing_ranges(&self) -> Vec<ByteRange> {
        let header = self.control.header();
        let block_size = header.block_size as u64;
        let mut ranges = Vec::new();
        let mut run_start = None;

        for (position, &done) in self.completed.iter().enumerate() {
            match (done, run_start) {
                (false, None) => run_start = Some(position),
                (true, Some(start)) => {
                    ranges.push(ByteRange::new(
                        start as u64 * block_size,
                        position as u64 * block_size - 1,
                    ));
                    run_start = None;
                }
                _ => {}
            }
        }
        if let Some(start) = run_start {
            ranges.push(ByteRange::new(start as u64 * block_size, header.file_length - 1));
        }

        ranges
    }

    pub fn is_complete(&self) -> bool {
        self.blocks_remaining == 0
    }

    pub fn blocks_remaining(&self) -> usize {
        self.blocks_remaining
    }

    pub fn num_blocks(&self) -> usize {
        self.completed.len()
    }

    pub fn control(&self) -> &Arc<ControlFile> {
        &self.control
    }

    /// Verify the assembled file and move it to its final path
    ///
    /// On a SHA-1 mismatch the `.part` file is deleted and the final path is
    /// left as it was.
    pub fn close(mut self) -> Result<()> {
        if !self.is_complete() {
            return Err(ZsyncError::Incomplete {
                remaining: self.blocks_remaining,
            });
        }

        self.file.sync_all()?;
        self.file.seek(SeekFrom::Start(0))?;
        let actual = checksum::sha1_reader(&mut self.file)?;
        let expected = self.control.header().expected_sha1;
        drop(self.file);

        if actual != expected {
            fs::remove_file(&self.temp_path)?;
            return Err(ZsyncError::ChecksumValidation {
                path: self.path,
                expected: hex::encode(expected),
                actual: hex::encode(actual),
            });
        }

        fs_util::publish(&self.temp_path, &self.path)?;
        fs_util::set_mtime(&self.path, self.control.header().mtime)?;
        tracing::info!("Verified and wrote {}", self.path.display());
        Ok(())
    }

    /// Abandon the download and delete the `.part` file
    #[allow(dead_code)]
    pub fn discard(self) -> Result<()> {
        drop(self.file);
        match fs::remove_file(&self.temp_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    fn check_alignment(&self, range: ByteRange) -> Result<()> {
        let header = self.control.header();
        let block_size = header.block_size as u64;
        let end = range.last + 1;

        let aligned = range.first % block_size == 0
            && (end % block_size == 0 || end == header.file_length)
            && range.last < header.file_length;
        if aligned {
            Ok(())
        } else {
            Err(ZsyncError::Alignment {
                first: range.first,
                last: range.last,
                block_size: header.block_size,
                file_length: header.file_length,
            })
        }
    }
}

impl RangeSink for OutputFile {
    fn receive(&mut self, range: ByteRange, data: &mut dyn Read) -> Result<()> {
        self.check_alignment(range)?;

        self.file.seek(SeekFrom::Start(range.first))?;
        let copied = io::copy(&mut (&mut *data).take(range.len()), &mut self.file)?;
        if copied != range.len() {
            return Err(ZsyncError::Protocol(format!(
                "range {} ended after {} of {} bytes",
                range,
                copied,
                range.len()
            )));
        }

        let block_size = self.control.header().block_size as u64;
        let first_block = (range.first / block_size) as usize;
        let end_block = (range.last + 1).div_ceil(block_size) as usize;
        for done in &mut self.completed[first_block..end_block] {
            if !*done {
                *done = true;
                self.blocks_remaining -= 1;
            }
        }

        tracing::trace!("Received range {} (blocks {}..{})", range, first_block, end_block);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::testutil::ControlSpec;
    use proptest::prelude::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 251) as u8).collect()
    }

    fn control(data: &[u8], block_size: usize) -> Arc<ControlFile> {
        Arc::new(ControlFile::parse(&ControlSpec::new(data, block_size).encode()).unwrap())
    }

    /// Output with every block except `missing` already written
    fn output_missing(dir: &Path, data: &[u8], block_size: usize, missing: &[usize]) -> OutputFile {
        let mut output = OutputFile::create(control(data, block_size), &dir.join("target.bin")).unwrap();
        for position in 0..output.num_blocks() {
            if !missing.contains(&position) {
                let start = position * block_size;
                let end = (start + block_size).min(data.len());
                output.write(position, &data[start..end]).unwrap();
            }
        }
        output
    }

    #[test]
    fn test_part_path() {
        assert_eq!(part_path(Path::new("/tmp/a.iso")), PathBuf::from("/tmp/a.iso.part"));
        assert_eq!(part_path(Path::new("a")), PathBuf::from("a.part"));
    }

    #[test]
    fn test_write_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let mut output = OutputFile::create(control(&data, 128), &temp.path().join("target.bin")).unwrap();
        assert_eq!(output.blocks_remaining(), 8);

        assert!(output.write(3, &data[384..512]).unwrap());
        assert!(!output.write(3, &data[384..512]).unwrap());
        assert_eq!(output.blocks_remaining(), 7);
    }

    #[test]
    fn test_write_short_last_block_from_full_window() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let mut output = output_missing(temp.path(), &data, 128, &[7]);

        // Window holds the 104 real bytes plus zero padding
        let mut window = data[896..].to_vec();
        window.resize(128, 0);
        assert!(output.write(7, &window).unwrap());
        assert!(output.is_complete());

        output.close().unwrap();
        assert_eq!(fs::read(temp.path().join("target.bin")).unwrap(), data);
    }

    #[test]
    fn test_missing_ranges_coalesce() {
        let temp = TempDir::new().unwrap();
        let output = output_missing(temp.path(), &data(1280), 128, &[2, 3, 7]);
        assert_eq!(
            output.missing_ranges(),
            vec![ByteRange::new(256, 511), ByteRange::new(896, 1023)]
        );
    }

    #[test]
    fn test_missing_ranges_last_block_ends_at_file_length() {
        let temp = TempDir::new().unwrap();
        let output = output_missing(temp.path(), &data(1200), 128, &[2, 3, 9]);
        assert_eq!(
            output.missing_ranges(),
            vec![ByteRange::new(256, 511), ByteRange::new(1152, 1199)]
        );
    }

    #[test]
    fn test_missing_ranges_all_and_none() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let output = OutputFile::create(control(&data, 128), &temp.path().join("a")).unwrap();
        assert_eq!(output.missing_ranges(), vec![ByteRange::new(0, 999)]);

        let output = output_missing(temp.path(), &data, 128, &[]);
        assert!(output.missing_ranges().is_empty());
    }

    #[test]
    fn test_receive_marks_blocks() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let mut output = output_missing(temp.path(), &data, 128, &[2, 3, 7]);

        output
            .receive(ByteRange::new(256, 511), &mut Cursor::new(&data[256..512]))
            .unwrap();
        assert_eq!(output.blocks_remaining(), 1);
        output
            .receive(ByteRange::new(896, 999), &mut Cursor::new(&data[896..]))
            .unwrap();
        assert!(output.is_complete());

        output.close().unwrap();
        assert_eq!(fs::read(temp.path().join("target.bin")).unwrap(), data);
    }

    #[test]
    fn test_receive_overlapping_completed_blocks() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let mut output = output_missing(temp.path(), &data, 128, &[7]);

        output
            .receive(ByteRange::new(0, 999), &mut Cursor::new(data.clone()))
            .unwrap();
        assert!(output.is_complete());
        output.close().unwrap();
    }

    #[test]
    fn test_misaligned_receive_leaves_state_untouched() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let mut output = output_missing(temp.path(), &data, 128, &[2, 3]);
        let before = output.missing_ranges();

        for range in [
            ByteRange::new(250, 511),  // start not aligned
            ByteRange::new(256, 500),  // end not aligned
            ByteRange::new(896, 1023), // past file length
        ] {
            let err = output
                .receive(range, &mut Cursor::new(vec![0u8; range.len() as usize]))
                .unwrap_err();
            assert!(matches!(err, ZsyncError::Alignment { .. }), "{}", range);
        }

        assert_eq!(output.missing_ranges(), before);
        assert_eq!(output.blocks_remaining(), 2);
    }

    #[test]
    fn test_short_body_is_protocol_error() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let mut output = output_missing(temp.path(), &data, 128, &[2]);

        let err = output
            .receive(ByteRange::new(256, 383), &mut Cursor::new(&data[256..300]))
            .unwrap_err();
        assert!(matches!(err, ZsyncError::Protocol(_)));
        assert_eq!(output.blocks_remaining(), 1);
    }

    #[test]
    fn test_close_publishes_with_mtime() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let output = output_missing(temp.path(), &data, 128, &[]);
        let dest = temp.path().join("target.bin");

        output.close().unwrap();

        assert_eq!(fs::read(&dest).unwrap(), data);
        assert!(!part_path(&dest).exists());
        let meta = fs::metadata(&dest).unwrap();
        let mtime = filetime::FileTime::from_last_modification_time(&meta);
        assert_eq!(mtime.unix_seconds(), 1692093600);
    }

    #[test]
    fn test_close_incomplete_fails() {
        let temp = TempDir::new().unwrap();
        let output = output_missing(temp.path(), &data(1000), 128, &[1, 4]);

        let err = output.close().unwrap_err();
        assert!(matches!(err, ZsyncError::Incomplete { remaining: 2 }));
        assert!(!temp.path().join("target.bin").exists());
    }

    #[test]
    fn test_bit_flip_fails_checksum_and_keeps_old_file() {
        let temp = TempDir::new().unwrap();
        let data = data(1000);
        let dest = temp.path().join("target.bin");
        fs::write(&dest, b"previous version").unwrap();

        let mut output = output_missing(temp.path(), &data, 128, &[5]);
        let mut block = data[640..768].to_vec();
        block[17] ^= 0x04;
        output.write(5, &block).unwrap();

        let err = output.close().unwrap_err();
        assert!(matches!(err, ZsyncError::ChecksumValidation { .. }));
        assert_eq!(fs::read(&dest).unwrap(), b"previous version");
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn test_discard_removes_part_file() {
        let temp = TempDir::new().unwrap();
        let output = output_missing(temp.path(), &data(1000), 128, &[0]);
        let part = part_path(&temp.path().join("target.bin"));
        assert!(part.exists());

        output.discard().unwrap();
        assert!(!part.exists());
    }

    #[test]
    fn test_empty_target() {
        let temp = TempDir::new().unwrap();
        let output = OutputFile::create(control(&[], 64), &temp.path().join("empty")).unwrap();
        assert!(output.is_complete());
        assert!(output.missing_ranges().is_empty());
        output.close().unwrap();
        assert_eq!(fs::read(temp.path().join("empty")).unwrap().len(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_missing_ranges_cover_exactly_missing_blocks(
            done in proptest::collection::vec(any::<bool>(), 1..40),
            tail in 1usize..=16,
        ) {
            let temp = TempDir::new().unwrap();
            let len = (done.len() - 1) * 16 + tail;
            let data = data(len);
            let missing: Vec<usize> = (0..done.len()).filter(|&i| !done[i]).collect();
            let output = output_missing(temp.path(), &data, 16, &missing);

            let ranges = output.missing_ranges();
            let mut covered = Vec::new();
            for pair in ranges.windows(2) {
                // Sorted and never adjacent
                prop_assert!(pair[0].last + 1 < pair[1].first);
            }
            for range in &ranges {
                prop_assert_eq!(range.first % 16, 0);
                prop_assert!(range.last < len as u64);
                covered.extend((range.first / 16) as usize..=(range.last / 16) as usize);
            }
            prop_assert_eq!(covered, missing);
        }
    }
}
