use std::collections::HashMap;
use std::error::Error as _;
use std::io::Read;
use std::net::{SocketAddr, TcpStream};
use std::sync::Mutex;
use std::thread::{self, ThreadId};
use std::time::Duration;

use flux_core::{FluxError, FluxErrorKind, Result};
use flux_util::Retrier;

use crate::wire;

struct Connection {
    stream: TcpStream,
    bytes_sent: i64,
}

fn is_connect_refused(err: &FluxError) -> bool {
    if err.kind() != FluxErrorKind::Io {
        return false;
    }
    err.source()
        .and_then(|source| source.downcast_ref::<std::io::Error>())
        .is_some_and(|io_err| {
            matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::TimedOut
            )
        })
}

/// One peer's outbound connections (spec §4.J): opens lazily, one
/// connection per producing thread so a slow peer only blocks the threads
/// actually sending to it rather than every shard at once.
pub struct PeerClient {
    addr: SocketAddr,
    compress: bool,
    connections: Mutex<HashMap<ThreadId, Connection>>,
}

impl PeerClient {
    pub fn new(addr: SocketAddr, compress: bool) -> Self {
        Self {
            addr,
            compress,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Fixed-interval retry, bounded at roughly three minutes total, that
    /// only retries connect-refused/timed-out style failures — anything
    /// else (DNS failure, permission denied) propagates on the first try.
    fn connect_with_retry(&self) -> Result<TcpStream> {
        let retrier = Retrier::new(Duration::from_secs(1), 1.0, 180).with_terminal(|err| !is_connect_refused(err));
        retrier.run(
            || false,
            |_attempt| TcpStream::connect(self.addr).map_err(|err| FluxError::io_from(err, "flux-shuffle: connect to peer")),
        )
    }

    pub fn send(&self, payload: &[u8]) -> Result<()> {
        let thread_id = thread::current().id();
        let mut connections = self.connections.lock().unwrap();
        if !connections.contains_key(&thread_id) {
            let stream = self.connect_with_retry()?;
            connections.insert(thread_id, Connection { stream, bytes_sent: 0 });
        }
        let conn = connections.get_mut(&thread_id).expect("inserted above");
        let framed = wire::maybe_compress(payload.to_vec(), self.compress);
        wire::write_data(&mut conn.stream, &framed)?;
        conn.bytes_sent += framed.len() as i64 + 4;
        Ok(())
    }

    /// Sends a channel-done marker on every open connection, waits for the
    /// peer to close each one, then opens a fresh connection carrying only
    /// the worker-done marker (spec §4.J client lifecycle step 3).
    pub fn done(&self) -> Result<()> {
        let connections = {
            let mut guard = self.connections.lock().unwrap();
            std::mem::take(&mut *guard)
        };
        for (_, mut conn) in connections {
            wire::write_channel_done(&mut conn.stream, conn.bytes_sent)?;
            let mut discard = [0u8; 256];
            loop {
                match conn.stream.read(&mut discard) {
                    Ok(0) => break,
                    Ok(_) => continue,
                    Err(err) => return Err(FluxError::io_from(err, "flux-shuffle: await peer channel close")),
                }
            }
        }
        let mut fresh = self.connect_with_retry()?;
        wire::write_worker_done(&mut fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn send_lazily_opens_one_connection_per_thread_and_frames_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            match wire::read_frame(&mut stream).unwrap() {
                Some(wire::Frame::Data(payload)) => payload,
                other => panic!("expected data frame, got {other:?}"),
            }
        });

        let client = PeerClient::new(addr, false);
        client.send(b"shard-item").unwrap();
        let received = accepted.join().unwrap();
        assert_eq!(received, b"shard-item");
    }

    #[test]
    fn done_sends_channel_done_then_a_fresh_worker_done_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut first, _) = listener.accept().unwrap();
            let data = wire::read_frame(&mut first).unwrap();
            assert!(matches!(data, Some(wire::Frame::Data(_))));
            let channel_done = wire::read_frame(&mut first).unwrap();
            drop(first);
            let (mut second, _) = listener.accept().unwrap();
            let worker_done = wire::read_frame(&mut second).unwrap();
            (channel_done, worker_done)
        });

        let client = PeerClient::new(addr, false);
        client.send(b"x").unwrap();
        client.done().unwrap();

        let (channel_done, worker_done) = server.join().unwrap();
        assert!(matches!(channel_done, Some(wire::Frame::ChannelDone { .. })));
        assert_eq!(worker_done, Some(wire::Frame::WorkerDone));
    }
}
