use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

const BUFFER_SIZE: usize = 1024 * 1024; // 1MB buffer

/// Running CRC-32C (Castagnoli) over a byte stream that may be restarted.
///
/// This is the checksum the backup catalog records for every file.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumAccumulator {
    crc: u32,
    bytes: u64,
}

impl ChecksumAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.crc = crc32c::crc32c_append(self.crc, data);
        self.bytes += data.len() as u64;
    }

    /// Drop everything accumulated so far.
    pub fn reset(&mut self) {
        self.crc = 0;
        self.bytes = 0;
    }

    /// Bytes fed since the last reset
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Current checksum value, without consuming the accumulator.
    pub fn value(&self) -> u32 {
        self.crc
    }
}

/// Calculate the CRC-32C of an in-memory buffer
pub fn crc32_bytes(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Calculate the CRC-32C of a file, independently of any upload
pub fn crc32_file(path: &Path) -> io::Result<u32> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut crc = 0;
    let mut buffer = vec![0; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        crc = crc32c::crc32c_append(crc, &buffer[..bytes_read]);
    }

    Ok(crc)
}

/// Render a checksum the way log lines and summaries show it
pub fn format_crc(crc: u32) -> String {
    format!("{:08X}", crc)
}
