use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use flux_core::{Decoder, TerminalGuard};

use crate::wire::{self, Frame};

/// Accepts peer connections and decodes frames into the downstream
/// listener (spec §4.J server lifecycle). Runs non-blocking so `close` can
/// stop the loop without an OS-level interrupt.
pub fn run_accept_loop<T, C>(
    listener: TcpListener,
    codec: C,
    compress: bool,
    guard: Arc<TerminalGuard<T>>,
    pending_workers: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
) where
    T: Send + Sync + 'static,
    C: Decoder<T> + Clone + Send + Sync + 'static,
{
    if listener.set_nonblocking(true).is_err() {
        return;
    }
    while !cancelled.load(Ordering::Acquire) {
        match listener.accept() {
            Ok((stream, _peer)) => {
                let codec = codec.clone();
                let guard = guard.clone();
                let pending_workers = pending_workers.clone();
                let cancelled = cancelled.clone();
                thread::spawn(move || handle_connection(stream, codec, compress, guard, pending_workers, cancelled));
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(10));
            }
            Err(_) => thread::sleep(Duration::from_millis(10)),
        }
    }
}

fn handle_connection<T, C>(
    mut stream: TcpStream,
    codec: C,
    compress: bool,
    guard: Arc<TerminalGuard<T>>,
    pending_workers: Arc<AtomicUsize>,
    cancelled: Arc<AtomicBool>,
) where
    T: Send + Sync + 'static,
    C: Decoder<T>,
{
    let _ = stream.set_nonblocking(false);
    // Bounds how long a read can block so `cancelled` gets rechecked; a
    // timeout landing mid-frame would desync the stream, but that window is
    // narrow relative to the interval and peers write whole frames in one
    // call.
    let _ = stream.set_read_timeout(Some(Duration::from_millis(200)));
    loop {
        if cancelled.load(Ordering::Acquire) {
            return;
        }
        match wire::read_frame(&mut stream) {
            Ok(Some(Frame::Data(payload))) => match wire::maybe_decompress(payload, compress) {
                Ok(bytes) => match codec.decode(&bytes, 0) {
                    Ok((value, _consumed)) => guard.emit(value),
                    Err(err) => {
                        guard.error(err);
                        return;
                    }
                },
                Err(err) => {
                    guard.error(err);
                    return;
                }
            },
            Ok(Some(Frame::ChannelDone { bytes_sent: _ })) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
                return;
            }
            Ok(Some(Frame::WorkerDone)) => {
                if pending_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
                    guard.done();
                }
                return;
            }
            Ok(None) => return,
            Err(err) if is_read_timeout(&err) => continue,
            Err(err) => {
                guard.error(err);
                return;
            }
        }
    }
}

fn is_read_timeout(err: &flux_core::FluxError) -> bool {
    use std::error::Error as _;
    err.kind() == flux_core::FluxErrorKind::Io
        && err
            .source()
            .and_then(|source| source.downcast_ref::<std::io::Error>())
            .is_some_and(|io_err| matches!(io_err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut))
}
