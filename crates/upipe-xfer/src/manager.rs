//! The transfer manager: a worker thread with its own pump manager and a
//! cross-thread command queue (spec §4.7).
//!
//! Grounded on the original's `upipe_xfer_mgr_create`/`upipe_xfer_alloc`
//! pair: `xfer_alloc` wraps an inner pipe that lives on the worker thread
//! with a [`XferProxy`] that lives on the caller's thread, forwarding
//! `input`/`control` by enqueuing commands the worker thread drains on an
//! idler pump. `freeze`/`thaw` suspend the worker's event loop so
//! [`XferManager::get_remote`] can be called safely from outside.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, trace};
use upipe_core::uref::Uref;
use upipe_pipe::{ControlCommand, Pipe, PipeError, PipeResult, PumpSource};
use upipe_runtime::{PumpKind, PumpManager, PumpStatus};

use crate::error::{Result, XferError};
use crate::proxy::XferProxy;

pub(crate) enum WorkerCommand {
    Input { id: usize, uref: Uref, pump_source: Option<PumpSource> },
    Control { id: usize, command: ControlCommand, reply: crossbeam_channel::Sender<PipeResult> },
}

struct Shared {
    pipes: Mutex<HashMap<usize, Arc<dyn Pipe>>>,
}

/// Owns a worker thread, its pump manager, and the registry of pipes that
/// thread runs. Every `XferManager` leaks one `Mutex<()>` for its lifetime
/// (see [`Self::new`]) so [`Self::freeze`] can hold a `'static` guard
/// across calls without unsafe lifetime extension; this is fine because a
/// transfer manager is a long-lived, typically process-lifetime object.
pub struct XferManager {
    pump_mgr: Arc<dyn PumpManager>,
    shared: Arc<Shared>,
    commands_tx: crossbeam_channel::Sender<WorkerCommand>,
    next_id: AtomicUsize,
    freeze_gate: &'static Mutex<()>,
    freeze_guard: Mutex<Option<MutexGuard<'static, ()>>>,
    drain_pump: upipe_runtime::Pump,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl XferManager {
    /// Spawn a worker thread driven by `pump_mgr` (typically a fresh
    /// [`upipe_runtime::ManualPumpManager`] or [`upipe_runtime::MioPumpManager`]
    /// dedicated to this manager - pump managers bind to exactly one OS
    /// thread).
    pub fn new(pump_mgr: Arc<dyn PumpManager>) -> Result<Arc<Self>> {
        let shared = Arc::new(Shared { pipes: Mutex::new(HashMap::new()) });
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded::<WorkerCommand>();

        let drain_shared = shared.clone();
        let drain_pump = pump_mgr.alloc_pump(
            PumpKind::Idler,
            Box::new(move || {
                while let Ok(cmd) = commands_rx.try_recv() {
                    dispatch(&drain_shared, cmd);
                }
            }),
        )?;
        pump_mgr.start(drain_pump)?;
        pump_mgr.set_status(drain_pump, PumpStatus::Blocking)?;

        let freeze_gate: &'static Mutex<()> = Box::leak(Box::new(Mutex::new(())));
        let run_mgr = pump_mgr.clone();
        let join = std::thread::Builder::new()
            .name("upipe-xfer-worker".into())
            .spawn(move || {
                if let Err(err) = run_mgr.run(Some(freeze_gate)) {
                    tracing::warn!(%err, "xfer worker event loop exited with an error");
                }
            })
            .map_err(|e| XferError::Runtime(upipe_runtime::RuntimeError::External(e)))?;

        debug!("xfer manager started worker thread");

        Ok(Arc::new(Self {
            pump_mgr,
            shared,
            commands_tx,
            next_id: AtomicUsize::new(0),
            freeze_gate,
            freeze_guard: Mutex::new(None),
            drain_pump,
            join: Mutex::new(Some(join)),
        }))
    }

    /// Wrap `inner` (a pipe that will run exclusively on the worker
    /// thread) in a proxy pipe usable from the calling thread.
    pub fn xfer_alloc(&self, inner: Arc<dyn Pipe>) -> Arc<XferProxy> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared.pipes.lock().insert(id, inner);
        trace!(id, "xfer manager registered proxy");
        XferProxy::new(id, self.commands_tx.clone())
    }

    /// Drop a proxy's registration once it is no longer needed.
    pub fn xfer_free(&self, proxy: &XferProxy) {
        self.shared.pipes.lock().remove(&proxy.id());
    }

    /// Suspend the worker's event loop. Blocks until the worker thread
    /// reaches a point between pump dispatches. Idempotent: a second
    /// `freeze` while already frozen is a no-op.
    pub fn freeze(&self) {
        let mut guard = self.freeze_guard.lock();
        if guard.is_some() {
            return;
        }
        *guard = Some(self.freeze_gate.lock());
        debug!("xfer manager frozen");
    }

    /// Resume the worker's event loop.
    pub fn thaw(&self) {
        let mut guard = self.freeze_guard.lock();
        if guard.take().is_some() {
            debug!("xfer manager thawed");
        }
    }

    pub fn is_frozen(&self) -> bool {
        self.freeze_guard.lock().is_some()
    }

    /// Obtain the inner pipe a proxy wraps. Only valid while frozen (spec:
    /// "xfer-get-remote(proxy) -> inner pipe: only valid while frozen").
    pub fn get_remote(&self, proxy: &XferProxy) -> Result<Arc<dyn Pipe>> {
        if !self.is_frozen() {
            return Err(XferError::NotFrozen);
        }
        self.shared.pipes.lock().get(&proxy.id()).cloned().ok_or(XferError::UnknownProxy)
    }

    /// Stop the worker thread and wait for it to exit. Any proxy still
    /// registered becomes unreachable afterwards.
    pub fn shutdown(&self) {
        let _ = self.pump_mgr.stop(self.drain_pump);
        self.thaw();
        if let Some(handle) = self.join.lock().take() {
            let _ = handle.join();
        }
        debug!("xfer manager shut down");
    }
}

impl Drop for XferManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for XferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XferManager")
            .field("registered_pipes", &self.shared.pipes.lock().len())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

fn dispatch(shared: &Shared, cmd: WorkerCommand) {
    match cmd {
        WorkerCommand::Input { id, uref, pump_source } => {
            if let Some(pipe) = shared.pipes.lock().get(&id).cloned() {
                pipe.input(uref, pump_source);
            }
        }
        WorkerCommand::Control { id, command, reply } => {
            let result = match shared.pipes.lock().get(&id).cloned() {
                Some(pipe) => pipe.control(command),
                None => Err(PipeError::Invalid("unknown xfer proxy".into())),
            };
            let _ = reply.send(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize as StdAtomicUsize;
    use upipe_core::refcount::Refcount;
    use upipe_pipe::{ControlAnswer, PumpSource as PS};
    use upipe_runtime::ManualPumpManager;

    #[derive(Debug)]
    struct CountingPipe {
        refcount: Refcount,
        inputs: StdAtomicUsize,
    }

    impl Pipe for CountingPipe {
        fn refcount(&self) -> &Refcount {
            &self.refcount
        }
        fn input(&self, _uref: Uref, _pump_source: Option<PS>) {
            self.inputs.fetch_add(1, Ordering::SeqCst);
        }
        fn control(&self, command: ControlCommand) -> PipeResult {
            match command {
                ControlCommand::GetUri => Ok(ControlAnswer::Uri("worker://remote".into())),
                _ => Err(PipeError::Unhandled),
            }
        }
    }

    fn wait_for<F: Fn() -> bool>(cond: F) {
        for _ in 0..200 {
            if cond() {
                return;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        panic!("condition never became true");
    }

    #[test]
    fn input_is_forwarded_to_worker_thread_pipe() {
        let worker_pumps = ManualPumpManager::new() as Arc<dyn PumpManager>;
        let manager = XferManager::new(worker_pumps).unwrap();

        let inner = Arc::new(CountingPipe { refcount: Refcount::new(), inputs: StdAtomicUsize::new(0) });
        let proxy = manager.xfer_alloc(inner.clone());

        proxy.input(Uref::new(), None);
        wait_for(|| inner.inputs.load(Ordering::SeqCst) == 1);

        manager.shutdown();
    }

    #[test]
    fn control_round_trips_to_worker_thread_pipe() {
        let worker_pumps = ManualPumpManager::new() as Arc<dyn PumpManager>;
        let manager = XferManager::new(worker_pumps).unwrap();

        let inner = Arc::new(CountingPipe { refcount: Refcount::new(), inputs: StdAtomicUsize::new(0) });
        let proxy = manager.xfer_alloc(inner);

        match proxy.control(ControlCommand::GetUri) {
            Ok(ControlAnswer::Uri(uri)) => assert_eq!(uri, "worker://remote"),
            other => panic!("unexpected {other:?}"),
        }

        manager.shutdown();
    }

    #[test]
    fn get_remote_requires_frozen_manager() {
        let worker_pumps = ManualPumpManager::new() as Arc<dyn PumpManager>;
        let manager = XferManager::new(worker_pumps).unwrap();

        let inner = Arc::new(CountingPipe { refcount: Refcount::new(), inputs: StdAtomicUsize::new(0) });
        let proxy = manager.xfer_alloc(inner.clone());

        assert!(matches!(manager.get_remote(&proxy), Err(XferError::NotFrozen)));
        manager.freeze();
        let remote = manager.get_remote(&proxy).unwrap();
        assert!(Arc::ptr_eq(&remote, &(inner as Arc<dyn Pipe>)));
        manager.thaw();

        manager.shutdown();
    }
}
