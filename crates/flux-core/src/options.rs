use std::path::PathBuf;

/// Compression applied to a codec's encoded payload, independent of the
/// codec itself (spec §3 "WriteOptions"/"ReadOptions").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lz4,
}

/// Options governing how a disk-backed pipe writes its temp files.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub compression: Compression,
    pub buffer_size: usize,
    pub temp: PathBuf,
}

impl WriteOptions {
    pub fn new(temp: impl Into<PathBuf>) -> Self {
        Self {
            compression: Compression::None,
            buffer_size: 64 * 1024,
            temp: temp.into(),
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }
}

/// Options governing how a disk-backed pipe reads files it (or a peer)
/// previously wrote.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub compression: Compression,
    pub buffer_size: usize,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self {
            compression: Compression::None,
            buffer_size: 64 * 1024,
        }
    }

    pub fn with_compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }
}
