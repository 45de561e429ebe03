use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use flux_core::{BoxPullPipe, Codec, Encoder, FluxError, Listener, PushPipe, Result, TerminalGuard};

use crate::client::PeerClient;
use crate::server;

/// Configuration for one worker's [`Shuffler`] (spec §4.J).
///
/// `peer_addresses` lists every peer in the shuffle group, including this
/// worker's own listening address. Peers are sorted into a canonical order
/// to assign shard ids — a worker's shard id is its index in that sorted
/// list, so every worker derives the same assignment independently without
/// a separate coordination round.
pub struct ShufflerConfig<F> {
    pub peer_addresses: Vec<SocketAddr>,
    pub shard_function: F,
    pub compress: bool,
}

/// TCP push pipe that repartitions a local pull-pipe source across a fixed
/// set of peers by a caller-supplied shard function (spec §4.J). Each
/// worker is simultaneously a server, accepting items routed to its own
/// shard, and a client to every other peer.
pub struct Shuffler<T, F, C> {
    source: Mutex<Option<BoxPullPipe<T>>>,
    listener: Mutex<Option<TcpListener>>,
    peer_order: Vec<SocketAddr>,
    local_shard_id: usize,
    shard_function: Arc<F>,
    codec: C,
    compress: bool,
    clients: Vec<Option<Arc<PeerClient>>>,
    downstream: Mutex<Option<Arc<dyn Listener<T>>>>,
    cancelled: Arc<AtomicBool>,
    pending_workers: Arc<AtomicUsize>,
    finished: Arc<AtomicBool>,
}

impl<T, F, C> Shuffler<T, F, C>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> usize + Send + Sync + 'static,
    C: Codec<T> + Clone + Send + Sync + 'static,
{
    /// `listener` must already be bound to the address this worker
    /// advertises in `config.peer_addresses` — binding happens first so
    /// every peer can be told a real, listening address rather than a
    /// promise of one.
    pub fn new(source: BoxPullPipe<T>, listener: TcpListener, config: ShufflerConfig<F>, codec: C) -> Result<Self> {
        let local_addr = listener
            .local_addr()
            .map_err(|err| FluxError::io_from(err, "flux-shuffle: read bound listener address"))?;

        let mut peer_order = config.peer_addresses;
        peer_order.sort();
        let local_shard_id = peer_order
            .iter()
            .position(|addr| *addr == local_addr)
            .ok_or_else(|| FluxError::validation("flux-shuffle: listener address not present in peer_addresses"))?;

        let clients = peer_order
            .iter()
            .enumerate()
            .map(|(index, addr)| {
                if index == local_shard_id {
                    None
                } else {
                    Some(Arc::new(PeerClient::new(*addr, config.compress)))
                }
            })
            .collect();

        let peer_count = peer_order.len();
        Ok(Self {
            source: Mutex::new(Some(source)),
            listener: Mutex::new(Some(listener)),
            peer_order,
            local_shard_id,
            shard_function: Arc::new(config.shard_function),
            codec,
            compress: config.compress,
            clients,
            downstream: Mutex::new(None),
            cancelled: Arc::new(AtomicBool::new(false)),
            // One worker-done marker from every other peer, plus one for
            // this worker's own local source reaching end-of-stream.
            pending_workers: Arc::new(AtomicUsize::new(peer_count)),
            finished: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.peer_order.len()
    }

    pub fn local_shard_id(&self) -> usize {
        self.local_shard_id
    }
}

impl<T, F, C> PushPipe<T> for Shuffler<T, F, C>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> usize + Send + Sync + 'static,
    C: Codec<T> + Clone + Send + Sync + 'static,
{
    fn set_listener(&self, listener: Arc<dyn Listener<T>>) {
        *self.downstream.lock().unwrap() = Some(listener);
    }

    fn start(&self) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FluxError::internal("Shuffler::start called more than once"))?;
        let downstream = self
            .downstream
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FluxError::internal("Shuffler::start called before set_listener"))?;
        let source = self
            .source
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FluxError::internal("Shuffler::start called more than once"))?;

        let guard = Arc::new(TerminalGuard::new(downstream));

        thread::spawn({
            let codec = self.codec.clone();
            let compress = self.compress;
            let guard = guard.clone();
            let pending_workers = self.pending_workers.clone();
            let cancelled = self.cancelled.clone();
            move || server::run_accept_loop(listener, codec, compress, guard, pending_workers, cancelled)
        });

        thread::spawn({
            let shard_count = self.peer_order.len();
            let local_shard_id = self.local_shard_id;
            let shard_function = self.shard_function.clone();
            let clients = self.clients.clone();
            let codec = self.codec.clone();
            let cancelled = self.cancelled.clone();
            let pending_workers = self.pending_workers.clone();
            let finished = self.finished.clone();
            let guard = guard.clone();
            let mut source = source;
            move || {
                let result = run_producer(
                    &mut source,
                    shard_count,
                    local_shard_id,
                    &*shard_function,
                    &clients,
                    &codec,
                    &cancelled,
                    &guard,
                );
                let _ = source.close();
                finished.store(true, Ordering::Release);

                if cancelled.load(Ordering::Acquire) {
                    return;
                }
                match result {
                    Ok(()) => {
                        for client in clients.iter().flatten() {
                            if let Err(err) = client.done() {
                                guard.error(err);
                                return;
                            }
                        }
                        if pending_workers.fetch_sub(1, Ordering::AcqRel) == 1 {
                            guard.done();
                        }
                    }
                    Err(err) => guard.error(err),
                }
            }
        });

        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.cancelled.store(true, Ordering::Release);
        Ok(())
    }

    fn progress(&self) -> f64 {
        if self.finished.load(Ordering::Acquire) {
            1.0
        } else {
            0.0
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn run_producer<T, F, C>(
    source: &mut BoxPullPipe<T>,
    shard_count: usize,
    local_shard_id: usize,
    shard_function: &F,
    clients: &[Option<Arc<PeerClient>>],
    codec: &C,
    cancelled: &AtomicBool,
    guard: &TerminalGuard<T>,
) -> Result<()>
where
    F: Fn(&T) -> usize,
    C: Codec<T>,
{
    source.start()?;
    loop {
        if cancelled.load(Ordering::Acquire) {
            return Ok(());
        }
        match source.next()? {
            Some(item) => {
                let shard = shard_function(&item) % shard_count;
                if shard == local_shard_id {
                    guard.emit(item);
                } else if let Some(client) = &clients[shard] {
                    let mut bytes = Vec::new();
                    codec.encode(&item, &mut bytes)?;
                    client.send(&bytes)?;
                }
            }
            None => return Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flux_core::Decoder;
    use flux_io::collection_source;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct I32Codec;

    impl Encoder<i32> for I32Codec {
        fn encode(&self, value: &i32, out: &mut Vec<u8>) -> Result<()> {
            out.extend_from_slice(&value.to_be_bytes());
            Ok(())
        }
    }

    impl Decoder<i32> for I32Codec {
        fn decode(&self, bytes: &[u8], offset: usize) -> Result<(i32, usize)> {
            let slice = &bytes[offset..offset + 4];
            Ok((i32::from_be_bytes(slice.try_into().unwrap()), 4))
        }
    }

    struct CollectingListener {
        items: StdMutex<Vec<i32>>,
        done_tx: crossbeam_channel::Sender<()>,
    }

    impl Listener<i32> for CollectingListener {
        fn on_next(&self, item: i32) {
            self.items.lock().unwrap().push(item);
        }
        fn on_done(&self) {
            let _ = self.done_tx.send(());
        }
        fn on_error(&self, err: flux_core::FluxError) {
            panic!("unexpected shuffler error: {err}");
        }
    }

    /// spec §8 scenario 4: three workers, shard fn `item % 3`. A source
    /// emitting 0..30 on worker 0 only must leave each peer's downstream
    /// with exactly `{x : x % 3 == peer_shard_id}`, and every peer must
    /// terminate with `done`.
    #[test]
    fn three_peer_shuffle_routes_by_shard_and_every_peer_completes() {
        let listeners: Vec<_> = (0..3).map(|_| std::net::TcpListener::bind("127.0.0.1:0").unwrap()).collect();
        let peer_addresses: Vec<SocketAddr> = listeners.iter().map(|l| l.local_addr().unwrap()).collect();

        let sources: Vec<BoxPullPipe<i32>> = vec![
            Box::new(collection_source((0..30).collect::<Vec<i32>>())),
            Box::new(collection_source(Vec::<i32>::new())),
            Box::new(collection_source(Vec::<i32>::new())),
        ];

        let mut shufflers = Vec::new();
        let mut receivers = Vec::new();
        for (source, listener) in sources.into_iter().zip(listeners) {
            let config = ShufflerConfig {
                peer_addresses: peer_addresses.clone(),
                shard_function: |item: &i32| (*item % 3) as usize,
                compress: false,
            };
            let shuffler = Shuffler::new(source, listener, config, I32Codec).unwrap();
            let (tx, rx) = crossbeam_channel::bounded(1);
            let listener = Arc::new(CollectingListener {
                items: StdMutex::new(Vec::new()),
                done_tx: tx,
            });
            shuffler.set_listener(listener.clone());
            shufflers.push((shuffler, listener));
            receivers.push(rx);
        }

        for (shuffler, _) in &shufflers {
            shuffler.start().unwrap();
        }

        for rx in &receivers {
            rx.recv_timeout(Duration::from_secs(10)).expect("peer did not complete in time");
        }

        let mut seen_shard_ids = Vec::new();
        for (shuffler, listener) in &shufflers {
            let shard_id = shuffler.local_shard_id();
            seen_shard_ids.push(shard_id);
            let mut items = listener.items.lock().unwrap().clone();
            items.sort();
            let expected: Vec<i32> = (0..30).filter(|x| (*x % 3) as usize == shard_id).collect();
            assert_eq!(items, expected, "shard {shard_id} saw the wrong subset");
        }
        seen_shard_ids.sort();
        assert_eq!(seen_shard_ids, vec![0, 1, 2]);
    }

    #[derive(Clone, Default)]
    struct U64Codec;

    impl Encoder<u64> for U64Codec {
        fn encode(&self, value: &u64, out: &mut Vec<u8>) -> Result<()> {
            out.extend_from_slice(&value.to_be_bytes());
            Ok(())
        }
    }

    impl Decoder<u64> for U64Codec {
        fn decode(&self, bytes: &[u8], offset: usize) -> Result<(u64, usize)> {
            let slice = &bytes[offset..offset + 8];
            Ok((u64::from_be_bytes(slice.try_into().unwrap()), 8))
        }
    }

    struct CountingListener {
        done_tx: crossbeam_channel::Sender<()>,
    }

    impl Listener<u64> for CountingListener {
        fn on_next(&self, _item: u64) {}
        fn on_done(&self) {
            let _ = self.done_tx.send(());
        }
        fn on_error(&self, err: flux_core::FluxError) {
            panic!("unexpected shuffler error: {err}");
        }
    }

    /// spec §4.E/§8 "on external close before completion, workers are
    /// interrupted and the listener is not further notified" — verified
    /// here for the shuffle pipe the same way `flux-io`'s `SyncToAsync`
    /// close test verifies it for a plain push pipe.
    #[test]
    fn close_before_completion_suppresses_the_done_notification() {
        let listener_a = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let listener_b = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr_a = listener_a.local_addr().unwrap();
        let addr_b = listener_b.local_addr().unwrap();
        let (real_listener, real_addr, dummy_addr) = if addr_a < addr_b {
            drop(listener_b);
            (listener_a, addr_a, addr_b)
        } else {
            drop(listener_a);
            (listener_b, addr_b, addr_a)
        };

        // Everything routes to this worker's own shard, so the unreachable
        // `dummy_addr` peer is never actually dialed.
        let config = ShufflerConfig {
            peer_addresses: vec![real_addr, dummy_addr],
            shard_function: |_: &u64| 0usize,
            compress: false,
        };
        let source: BoxPullPipe<u64> = Box::new(flux_io::SeqGenSource::new(|i| Some(i)));
        let shuffler = Shuffler::new(source, real_listener, config, U64Codec).unwrap();
        assert_eq!(shuffler.local_shard_id(), 0);

        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        shuffler.set_listener(Arc::new(CountingListener { done_tx: tx }));
        shuffler.start().unwrap();
        std::thread::sleep(Duration::from_millis(30));
        shuffler.close().unwrap();

        let result = rx.recv_timeout(Duration::from_millis(300));
        assert!(result.is_err(), "close() must suppress the terminal done notification");
    }
}
