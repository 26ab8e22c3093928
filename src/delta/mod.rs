pub mod checksum;
pub mod matcher;
pub mod rolling;
pub mod window;

/// Default read-ahead for scanning candidate files
pub const READ_BUFFER_SIZE: usize = 1024 * 1024;
