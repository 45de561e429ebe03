use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use flux_core::{BoxPullPipe, FluxError, Listener, Pipe, PullPipe, PushPipe, Result, TerminalGuard};
use flux_util::ParallelTaskProcessor;

/// Drains a fixed set of pull pipes, one worker thread per pipe (bounded by
/// `worker_count`), into a single push [`Listener`] (spec §4.E
/// "`SyncToAsync`"). `start` returns once every worker is dispatched;
/// emission continues on the owned threads.
pub struct SyncToAsync<T> {
    upstreams: Mutex<Option<Vec<BoxPullPipe<T>>>>,
    worker_count: usize,
    listener: Mutex<Option<Arc<dyn Listener<T>>>>,
    cancelled: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
}

impl<T: Send + 'static> SyncToAsync<T> {
    pub fn new(upstreams: Vec<BoxPullPipe<T>>, worker_count: usize) -> Self {
        Self {
            upstreams: Mutex::new(Some(upstreams)),
            worker_count: worker_count.max(1),
            listener: Mutex::new(None),
            cancelled: Arc::new(AtomicBool::new(false)),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }
}

impl<T: Send + 'static> PushPipe<T> for SyncToAsync<T> {
    fn set_listener(&self, listener: Arc<dyn Listener<T>>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    fn start(&self) -> Result<()> {
        let pipes = self
            .upstreams
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| FluxError::internal("SyncToAsync::start called more than once"))?;
        let listener = self
            .listener
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| FluxError::internal("SyncToAsync::start called before set_listener"))?;

        let guard = Arc::new(TerminalGuard::new(listener));
        let worker_count = self.worker_count;
        let cancelled = self.cancelled.clone();
        let finished = self.finished.clone();

        thread::spawn(move || {
            let task_cancelled = cancelled.clone();
            let task_guard = guard.clone();
            let result = ParallelTaskProcessor::run(pipes, worker_count, move |mut pipe| {
                pipe.start()?;
                let mut loop_result = Ok(());
                loop {
                    if task_cancelled.load(Ordering::Acquire) {
                        break;
                    }
                    match pipe.next() {
                        Ok(Some(item)) => task_guard.emit(item),
                        Ok(None) => break,
                        Err(err) => {
                            loop_result = Err(err);
                            break;
                        }
                    }
                }
                let close_result = pipe.close();
                loop_result?;
                close_result
            });
            finished.store(true, Ordering::Release);
            // close() having fired means no terminal call should be made;
            // the cancelling thread already chose silence over a result.
            if !cancelled.load(Ordering::Acquire) {
                match result {
                    Ok(()) => guard.done(),
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

enum BridgeMessage<T> {
    Value(T),
    End,
    Error(FluxError),
}

struct QueueListener<T> {
    queue: Arc<flux_util::BlockingQueue<BridgeMessage<T>>>,
}

impl<T: Send + Sync> Listener<T> for QueueListener<T> {
    fn on_next(&self, item: T) {
        let _ = self.queue.put(BridgeMessage::Value(item));
    }

    fn on_done(&self) {
        let _ = self.queue.put(BridgeMessage::End);
    }

    fn on_error(&self, err: FluxError) {
        let _ = self.queue.put(BridgeMessage::Error(err));
    }
}

/// Bridges a push source into pull semantics via a bounded queue (spec
/// §4.E "`AsyncToSync`"): `start` registers a listener that forwards every
/// push event onto the queue, and `next`/`peek` block on it.
pub struct AsyncToSync<T> {
    push: Box<dyn PushPipe<T>>,
    queue: Arc<flux_util::BlockingQueue<BridgeMessage<T>>>,
    started: bool,
    done: bool,
    cached: Option<T>,
}

impl<T: Send + Sync + 'static> AsyncToSync<T> {
    pub fn new(push: Box<dyn PushPipe<T>>, queue_capacity: usize) -> Self {
        Self {
            push,
            queue: Arc::new(flux_util::BlockingQueue::bounded(queue_capacity.max(1))),
            started: false,
            done: false,
            cached: None,
        }
    }

    fn pull_one(&mut self) -> Result<Option<T>> {
        if self.done {
            return Ok(None);
        }
        match self.queue.take()? {
            BridgeMessage::Value(item) => Ok(Some(item)),
            BridgeMessage::End => {
                self.done = true;
                Ok(None)
            }
            BridgeMessage::Error(err) => {
                self.done = true;
                Err(err)
            }
        }
    }
}

impl<T: Send + Sync + 'static> Pipe for AsyncToSync<T> {
    fn start(&mut self) -> Result<()> {
        if self.started {
            return Ok(());
        }
        self.started = true;
        self.push.set_listener(Arc::new(QueueListener {
            queue: self.queue.clone(),
        }));
        self.push.start()
    }

    fn close(&mut self) -> Result<()> {
        self.done = true;
        self.push.close()
    }

    fn progress(&self) -> f64 {
        self.push.progress()
    }
}

impl<T: Send + Sync + 'static> PullPipe<T> for AsyncToSync<T> {
    fn next(&mut self) -> Result<Option<T>> {
        if let Some(item) = self.cached.take() {
            return Ok(Some(item));
        }
        self.pull_one()
    }

    fn peek(&mut self) -> Result<Option<&T>> {
        if self.cached.is_none() {
            self.cached = self.pull_one()?;
        }
        Ok(self.cached.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{SeqGenSource, collection_source};
    use std::time::Duration;

    struct VecPush<T> {
        items: Mutex<Option<Vec<T>>>,
        listener: Mutex<Option<Arc<dyn Listener<T>>>>,
    }

    impl<T> VecPush<T> {
        fn new(items: Vec<T>) -> Self {
            Self {
                items: Mutex::new(Some(items)),
                listener: Mutex::new(None),
            }
        }
    }

    impl<T: Send + Sync + 'static> PushPipe<T> for VecPush<T> {
        fn set_listener(&self, listener: Arc<dyn Listener<T>>) {
            *self.listener.lock().unwrap() = Some(listener);
        }

        fn start(&self) -> Result<()> {
            let items = self.items.lock().unwrap().take().unwrap_or_default();
            let listener = self.listener.lock().unwrap().clone().unwrap();
            thread::spawn(move || {
                for item in items {
                    listener.on_next(item);
                }
                listener.on_done();
            });
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }

        fn progress(&self) -> f64 {
            0.0
        }
    }

    #[test]
    fn async_to_sync_yields_pushed_items_in_order_then_ends() {
        let push = VecPush::new(vec![1, 2, 3]);
        let mut bridge = AsyncToSync::new(Box::new(push), 8);
        bridge.start().unwrap();
        assert_eq!(bridge.next().unwrap(), Some(1));
        assert_eq!(bridge.next().unwrap(), Some(2));
        assert_eq!(bridge.next().unwrap(), Some(3));
        assert_eq!(bridge.next().unwrap(), None);
        assert_eq!(bridge.next().unwrap(), None);
    }

    struct CollectingListener<T> {
        items: Mutex<Vec<T>>,
        done_tx: crossbeam_channel::Sender<std::result::Result<(), String>>,
    }

    impl<T: Clone + Send + Sync> Listener<T> for CollectingListener<T> {
        fn on_next(&self, item: T) {
            self.items.lock().unwrap().push(item);
        }

        fn on_done(&self) {
            let _ = self.done_tx.send(Ok(()));
        }

        fn on_error(&self, err: FluxError) {
            let _ = self.done_tx.send(Err(err.to_string()));
        }
    }

    #[test]
    fn sync_to_async_drains_every_pipe_into_the_listener() {
        let pipes: Vec<BoxPullPipe<i32>> = vec![
            Box::new(collection_source(vec![1, 2])),
            Box::new(collection_source(vec![3, 4])),
        ];
        let bridge = SyncToAsync::new(pipes, 2);
        let (tx, rx) = crossbeam_channel::bounded(1);
        let listener = Arc::new(CollectingListener {
            items: Mutex::new(Vec::new()),
            done_tx: tx,
        });
        bridge.set_listener(listener.clone());
        bridge.start().unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap().unwrap();

        let mut items = listener.items.lock().unwrap().clone();
        items.sort();
        assert_eq!(items, vec![1, 2, 3, 4]);
    }

    #[test]
    fn sync_to_async_close_suppresses_terminal_notification() {
        let infinite: BoxPullPipe<u64> = Box::new(SeqGenSource::new(|i| Some(i)));
        let bridge = SyncToAsync::new(vec![infinite], 1);
        let (tx, rx) = crossbeam_channel::bounded(1);
        let listener = Arc::new(CollectingListener {
            items: Mutex::new(Vec::new()),
            done_tx: tx,
        });
        bridge.set_listener(listener);
        bridge.start().unwrap();
        thread::sleep(Duration::from_millis(20));
        bridge.close().unwrap();

        let result = rx.recv_timeout(Duration::from_millis(200));
        assert!(result.is_err());
    }

    struct CountingPush {
        total: u64,
        emitted: std::sync::atomic::AtomicU64,
        listener: Mutex<Option<Arc<dyn Listener<u64>>>>,
    }

    impl CountingPush {
        fn new(total: u64) -> Self {
            Self {
                total,
                emitted: std::sync::atomic::AtomicU64::new(0),
                listener: Mutex::new(None),
            }
        }
    }

    impl PushPipe<u64> for CountingPush {
        fn set_listener(&self, listener: Arc<dyn Listener<u64>>) {
            *self.listener.lock().unwrap() = Some(listener);
        }

        fn start(&self) -> Result<()> {
            let listener = self.listener.lock().unwrap().clone().unwrap();
            let total = self.total;
            thread::spawn(move || {
                for i in 0..total {
                    listener.on_next(i);
                }
                listener.on_done();
            });
            Ok(())
        }

        fn close(&self) -> Result<()> {
            Ok(())
        }

        fn progress(&self) -> f64 {
            if self.total == 0 {
                1.0
            } else {
                (self.emitted.load(Ordering::Acquire) as f64) / (self.total as f64)
            }
        }
    }

    /// spec §8 scenario 5: 100 items through a capacity-10 queue yield
    /// exactly `{0,...,99}` then null.
    #[test]
    fn scenario_5_async_to_sync_completion_through_capacity_ten_queue() {
        let push = CountingPush::new(100);
        let mut bridge = AsyncToSync::new(Box::new(push), 10);
        bridge.start().unwrap();

        let mut items = Vec::new();
        while let Some(item) = bridge.next().unwrap() {
            items.push(item);
        }
        assert_eq!(items, (0..100).collect::<Vec<u64>>());
        assert_eq!(bridge.next().unwrap(), None);
    }

    /// spec §8 scenario 6: two infinite sync sources behind 2 workers;
    /// `close` from another thread after 300ms stops emission with no
    /// lingering threads still pushing items.
    #[test]
    fn scenario_6_sync_to_async_cancellation_with_two_workers() {
        let infinite_a: BoxPullPipe<u64> = Box::new(SeqGenSource::new(|i| Some(i)));
        let infinite_b: BoxPullPipe<u64> = Box::new(SeqGenSource::new(|i| Some(i)));
        let bridge = Arc::new(SyncToAsync::new(vec![infinite_a, infinite_b], 2));

        let (tx, _rx) = crossbeam_channel::bounded(1);
        let listener = Arc::new(CollectingListener {
            items: Mutex::new(Vec::new()),
            done_tx: tx,
        });
        bridge.set_listener(listener.clone());
        bridge.start().unwrap();

        let closer = bridge.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(300));
            closer.close().unwrap();
        });

        let started = std::time::Instant::now();
        handle.join().unwrap();
        assert!(started.elapsed() < Duration::from_secs(30));

        let count_right_after_close = listener.items.lock().unwrap().len();
        thread::sleep(Duration::from_millis(300));
        let count_later = listener.items.lock().unwrap().len();
        assert_eq!(
            count_right_after_close, count_later,
            "workers kept emitting items after close returned"
        );
    }
}
