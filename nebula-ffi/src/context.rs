//! FFI request pipeline
//!
//! One dedicated worker thread per context runs a current-thread runtime.
//! Foreign callers enqueue requests through a single-slot channel guarded
//! by a submission lock; two signals complete the handshake: the request
//! signal wakes the worker (fired with a bounded timeout), the ack signal
//! tells the submitter the worker owns the request (awaited without a
//! deadline). Completion flows through the request's callback on the
//! worker thread.

use crate::request::Request;
use nebula_core::error::{NebulaError, Result};
use nebula_node::NebulaNode;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Synchronous dispatch results shared with the C header.
pub const RET_OK: i32 = 0;
pub const RET_ERR: i32 = 1;
pub const RET_MISSING_CALLBACK: i32 = 2;
pub const RET_PROGRESS: i32 = 3;

/// How long a submitter waits for the request signal to become free
/// before the dispatch fails.
const FIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// A one-shot thread signal: fire, then wait for it on another thread.
struct Signal {
    state: Mutex<bool>,
    cv: Condvar,
}

impl Signal {
    fn new() -> Self {
        Self {
            state: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn fire(&self) {
        let mut fired = self.state.lock();
        *fired = true;
        self.cv.notify_one();
    }

    /// Wait for the signal without a deadline; consumes it.
    fn wait(&self) {
        let mut fired = self.state.lock();
        while !*fired {
            self.cv.wait(&mut fired);
        }
        *fired = false;
    }

    /// Wait for the signal with a deadline. Returns false on timeout;
    /// the signal is consumed on success.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let mut fired = self.state.lock();
        let deadline = Instant::now() + timeout;
        while !*fired {
            if self.cv.wait_until(&mut fired, deadline).timed_out() {
                return false;
            }
        }
        *fired = false;
        true
    }
}

/// Foreign-to-worker wake signal. The worker awaits it on its event loop;
/// the foreign side fires it with a bounded timeout, failing the dispatch
/// when the worker has stopped draining.
struct ReqSignal {
    tx: tokio::sync::mpsc::Sender<()>,
}

impl ReqSignal {
    fn new() -> (Self, tokio::sync::mpsc::Receiver<()>) {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        (Self { tx }, rx)
    }

    /// Fire the signal, waiting up to `timeout` for the slot to free up
    /// when a previous wake is still pending. Returns false on timeout or
    /// when the worker is gone.
    fn fire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.tx.try_send(()) {
                Ok(()) => return true,
                Err(tokio::sync::mpsc::error::TrySendError::Full(())) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(tokio::sync::mpsc::error::TrySendError::Closed(())) => return false,
            }
        }
    }
}

/// A NebulaStore node embedded behind the FFI boundary.
pub struct Context {
    node: Arc<RwLock<Option<Arc<NebulaNode>>>>,
    /// Serializes foreign submitters.
    submit_lock: Mutex<()>,
    tx: SyncSender<Request>,
    req_signal: ReqSignal,
    ack_signal: Arc<Signal>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Context {
    /// Spawn the worker thread around an already-created node.
    pub fn spawn(node: NebulaNode) -> Arc<Self> {
        let node = Arc::new(node);
        let node_slot = Arc::new(RwLock::new(Some(node)));
        let (tx, rx) = std::sync::mpsc::sync_channel::<Request>(1);
        let (req_signal, wake_rx) = ReqSignal::new();
        let ack_signal = Arc::new(Signal::new());
        let running = Arc::new(AtomicBool::new(true));

        let worker = {
            let node_slot = Arc::clone(&node_slot);
            let ack_signal = Arc::clone(&ack_signal);
            let running = Arc::clone(&running);
            std::thread::Builder::new()
                .name("nebula-worker".to_string())
                .spawn(move || worker_main(node_slot, rx, wake_rx, ack_signal, running))
                .expect("worker thread should spawn")
        };

        Arc::new(Self {
            node: node_slot,
            submit_lock: Mutex::new(()),
            tx,
            req_signal,
            ack_signal,
            running,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Submit a request to the worker. The callback is invoked later on
    /// the worker thread.
    pub fn submit(&self, request: Request) -> i32 {
        match self.try_submit(request) {
            Ok(()) => RET_OK,
            Err(e) => {
                debug!(error = %e, "Request dispatch failed");
                RET_ERR
            }
        }
    }

    /// The submission sequence: enqueue into the slot, fire the request
    /// signal with a bounded timeout, then wait for the ack without a
    /// deadline. Holds the submission lock throughout so multiple foreign
    /// threads may call concurrently. On failure the request envelope is
    /// dropped and its payload freed.
    fn try_submit(&self, request: Request) -> Result<()> {
        let _guard = self.submit_lock.lock();
        if !self.running.load(Ordering::SeqCst) {
            return Err(NebulaError::DispatchFailed(
                "context has been destroyed".to_string(),
            ));
        }
        match self.tx.try_send(request) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                return Err(NebulaError::DispatchFailed(
                    "request slot still occupied".to_string(),
                ));
            }
            Err(TrySendError::Disconnected(_)) => {
                return Err(NebulaError::DispatchFailed(
                    "worker is gone".to_string(),
                ));
            }
        }
        if !self.req_signal.fire_timeout(FIRE_TIMEOUT) {
            return Err(NebulaError::DispatchFailed(
                "request signal timed out".to_string(),
            ));
        }
        self.ack_signal.wait();
        Ok(())
    }

    /// Stop the worker: clear the running flag, wake the loop, join the
    /// thread and drop the node.
    pub fn destroy(&self) {
        self.running.store(false, Ordering::SeqCst);
        // A full slot already carries a pending wake for the worker.
        let _ = self.req_signal.fire_timeout(Duration::from_millis(100));
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                error!("Worker thread panicked during shutdown");
            }
        }
        *self.node.write() = None;
    }
}

fn worker_main(
    node: Arc<RwLock<Option<Arc<NebulaNode>>>>,
    rx: Receiver<Request>,
    mut wake_rx: tokio::sync::mpsc::Receiver<()>,
    ack_signal: Arc<Signal>,
    running: Arc<AtomicBool>,
) {
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Worker runtime failed to start");
            return;
        }
    };

    runtime.block_on(async move {
        loop {
            if wake_rx.recv().await.is_none() {
                break;
            }
            if !running.load(Ordering::SeqCst) {
                break;
            }
            let Ok(request) = rx.try_recv() else {
                // Woken without a queued request; nothing to ack.
                continue;
            };

            let node = node.read().clone();
            tokio::task::spawn(async move {
                request.process(node).await;
            });

            // The request is safely owned; unblock the submitter. The
            // spawned task runs when this loop next yields.
            ack_signal.fire();
        }
        debug!("Worker loop exited");
    });
    // Dropping the runtime cancels any in-flight request tasks, so no
    // callbacks fire after destroy returns.
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_fire_then_wait() {
        let signal = Signal::new();
        signal.fire();
        assert!(signal.wait_timeout(Duration::from_millis(10)));
        // Consumed: a second wait times out.
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_signal_cross_thread() {
        let signal = Arc::new(Signal::new());
        let remote = Arc::clone(&signal);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.fire();
        });
        signal.wait();
        handle.join().unwrap();
    }

    #[test]
    fn test_req_signal_fire_times_out_when_not_drained() {
        let (signal, rx) = ReqSignal::new();
        // First fire occupies the slot.
        assert!(signal.fire_timeout(Duration::from_millis(10)));
        // Nobody drains it, so a second fire must time out.
        assert!(!signal.fire_timeout(Duration::from_millis(20)));
        drop(rx);
        // A closed receiver fails immediately.
        assert!(!signal.fire_timeout(Duration::from_millis(10)));
    }
}
