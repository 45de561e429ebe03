use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use flux_core::{Codec, FluxError, Result};

/// Length-prefixed record file, shared by every disk-backed operator in
/// this crate (external sort runs, sharder outputs, reductor buckets).
///
/// Framing is the same `u32` big-endian length prefix the teacher's
/// transport framing uses on the wire (`spark-transport-tcp/src/
/// channel.rs`), applied here to files instead of sockets.
pub struct FramedWriter<C> {
    writer: BufWriter<File>,
    codec: C,
    path: PathBuf,
    count: u64,
}

impl<C> FramedWriter<C> {
    pub fn create(path: impl Into<PathBuf>, codec: C) -> Result<Self> {
        let path = path.into();
        let file = File::create(&path)
            .map_err(|err| FluxError::io_from(err, format!("FramedWriter::create {path:?}")))?;
        Ok(Self {
            writer: BufWriter::new(file),
            codec,
            path,
            count: 0,
        })
    }

    pub fn write<T>(&mut self, value: &T) -> Result<()>
    where
        C: Codec<T>,
    {
        let mut payload = Vec::new();
        self.codec.encode(value, &mut payload)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| FluxError::excessive_resources("FramedWriter::write: record too large"))?;
        self.writer
            .write_all(&len.to_be_bytes())
            .and_then(|()| self.writer.write_all(&payload))
            .map_err(|err| FluxError::io_from(err, "FramedWriter::write"))?;
        self.count += 1;
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn finish(mut self) -> Result<PathBuf> {
        self.writer
            .flush()
            .map_err(|err| FluxError::io_from(err, "FramedWriter::finish"))?;
        Ok(self.path)
    }
}

/// Reads back records written by [`FramedWriter`], in write order.
pub struct FramedReader<C> {
    reader: BufReader<File>,
    codec: C,
}

impl<C> FramedReader<C> {
    pub fn open(path: impl AsRef<Path>, codec: C) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|err| FluxError::io_from(err, format!("FramedReader::open {path:?}")))?;
        Ok(Self {
            reader: BufReader::new(file),
            codec,
        })
    }

    pub fn read_next<T>(&mut self) -> Result<Option<T>>
    where
        C: Codec<T>,
    {
        let mut len_bytes = [0u8; 4];
        match self.reader.read_exact(&mut len_bytes) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(err) => return Err(FluxError::io_from(err, "FramedReader::read_next: length")),
        }
        let len = u32::from_be_bytes(len_bytes) as usize;
        let mut payload = vec![0u8; len];
        self.reader
            .read_exact(&mut payload)
            .map_err(|err| FluxError::io_from(err, "FramedReader::read_next: payload"))?;
        let (value, consumed) = self.codec.decode(&payload, 0)?;
        debug_assert_eq!(consumed, payload.len());
        Ok(Some(value))
    }
}
