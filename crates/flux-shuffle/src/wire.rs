use std::io::{Read, Write};

use flux_core::{FluxError, Result};

/// Sent in place of a length prefix to mark that a producing thread's
/// connection has no more data; followed by an `i64` total byte count for
/// the receiver to validate against (spec §4.J wire protocol).
pub const CHANNEL_DONE: i32 = -1;

/// Sent alone, over a fresh connection, once a worker has closed every
/// outbound connection to a peer — the peer's completion latch treats this
/// as the signal that worker will never send again.
pub const WORKER_DONE: i32 = -2;

/// One frame of the shuffle wire protocol. Frames are length-prefixed
/// (`i32`, big-endian) so a zero-byte payload (`Data(vec![])`) is distinct
/// from the two control markers, which borrow negative lengths no payload
/// frame can produce.
#[derive(Debug, PartialEq, Eq)]
pub enum Frame {
    Data(Vec<u8>),
    ChannelDone { bytes_sent: i64 },
    WorkerDone,
}

pub fn write_data(w: &mut impl Write, payload: &[u8]) -> Result<()> {
    let len = i32::try_from(payload.len())
        .map_err(|_| FluxError::validation("flux-shuffle: frame payload exceeds i32::MAX"))?;
    w.write_all(&len.to_be_bytes())
        .map_err(|err| FluxError::io_from(err, "flux-shuffle: write frame length"))?;
    w.write_all(payload)
        .map_err(|err| FluxError::io_from(err, "flux-shuffle: write frame payload"))
}

pub fn write_channel_done(w: &mut impl Write, bytes_sent: i64) -> Result<()> {
    w.write_all(&CHANNEL_DONE.to_be_bytes())
        .map_err(|err| FluxError::io_from(err, "flux-shuffle: write channel-done marker"))?;
    w.write_all(&bytes_sent.to_be_bytes())
        .map_err(|err| FluxError::io_from(err, "flux-shuffle: write channel-done byte count"))
}

pub fn write_worker_done(w: &mut impl Write) -> Result<()> {
    w.write_all(&WORKER_DONE.to_be_bytes())
        .map_err(|err| FluxError::io_from(err, "flux-shuffle: write worker-done marker"))
}

/// Reads one frame. `Ok(None)` means the peer closed the connection before
/// sending a length prefix — a plain TCP close rather than either marker,
/// which callers treat the same as an unexpected disconnect.
pub fn read_frame(r: &mut impl Read) -> Result<Option<Frame>> {
    let mut len_buf = [0u8; 4];
    if let Err(err) = r.read_exact(&mut len_buf) {
        return if err.kind() == std::io::ErrorKind::UnexpectedEof {
            Ok(None)
        } else {
            Err(FluxError::io_from(err, "flux-shuffle: read frame length"))
        };
    }
    match i32::from_be_bytes(len_buf) {
        CHANNEL_DONE => {
            let mut count_buf = [0u8; 8];
            r.read_exact(&mut count_buf)
                .map_err(|err| FluxError::io_from(err, "flux-shuffle: read channel-done byte count"))?;
            Ok(Some(Frame::ChannelDone {
                bytes_sent: i64::from_be_bytes(count_buf),
            }))
        }
        WORKER_DONE => Ok(Some(Frame::WorkerDone)),
        length if length >= 0 => {
            let mut payload = vec![0u8; length as usize];
            r.read_exact(&mut payload)
                .map_err(|err| FluxError::io_from(err, "flux-shuffle: read frame payload"))?;
            Ok(Some(Frame::Data(payload)))
        }
        other => Err(FluxError::validation(format!("flux-shuffle: invalid frame length {other}"))),
    }
}

/// Optional LZ4 block compression over a single frame's payload (spec §4.J
/// "frames coalesced and optionally LZ4-compressed"). Prepends the
/// decompressed size so the receiver doesn't need to track it separately.
pub fn maybe_compress(payload: Vec<u8>, compress: bool) -> Vec<u8> {
    if compress {
        lz4_flex::block::compress_prepend_size(&payload)
    } else {
        payload
    }
}

pub fn maybe_decompress(payload: Vec<u8>, compress: bool) -> Result<Vec<u8>> {
    if compress {
        lz4_flex::block::decompress_size_prepended(&payload)
            .map_err(|err| FluxError::validation(format!("flux-shuffle: lz4 decompress failed: {err}")))
    } else {
        Ok(payload)
    }
}
