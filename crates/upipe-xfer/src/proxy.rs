//! The proxy pipe a caller holds for a pipe that actually lives on a
//! transfer manager's worker thread.

use upipe_core::refcount::Refcount;
use upipe_core::uref::Uref;
use upipe_pipe::{ControlCommand, Pipe, PipeError, PipeResult, PumpSource};

use crate::manager::WorkerCommand;

/// A pipe handle usable from the allocating thread; every call is
/// marshalled to the worker thread that owns the real pipe.
pub struct XferProxy {
    id: usize,
    refcount: Refcount,
    commands: crossbeam_channel::Sender<WorkerCommand>,
}

impl XferProxy {
    pub(crate) fn new(id: usize, commands: crossbeam_channel::Sender<WorkerCommand>) -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self { id, refcount: Refcount::new(), commands })
    }

    /// The proxy id used to look this pipe up on the manager that created
    /// it - see [`crate::XferManager::get_remote`].
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Pipe for XferProxy {
    fn refcount(&self) -> &Refcount {
        &self.refcount
    }

    /// Enqueue the uref for the worker thread; never blocks the caller.
    fn input(&self, uref: Uref, pump_source: Option<PumpSource>) {
        let _ = self.commands.send(WorkerCommand::Input { id: self.id, uref, pump_source });
    }

    /// Enqueue the command and block until the worker thread answers it.
    /// `control` on a proxy is therefore synchronous from the caller's
    /// point of view even though the real pipe runs elsewhere - matching
    /// the original's blocking `upipe_control` semantics across an xfer
    /// boundary.
    fn control(&self, command: ControlCommand) -> PipeResult {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.commands
            .send(WorkerCommand::Control { id: self.id, command, reply: reply_tx })
            .map_err(|_| PipeError::External(std::io::Error::other("xfer worker disconnected")))?;
        reply_rx
            .recv()
            .map_err(|_| PipeError::External(std::io::Error::other("xfer worker dropped the reply channel")))?
    }
}

impl std::fmt::Debug for XferProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XferProxy").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::XferManager;
    use std::sync::Arc;
    use upipe_pipe::PumpManager as _;
    use upipe_runtime::ManualPumpManager;

    #[derive(Debug)]
    struct EchoPipe {
        refcount: Refcount,
    }

    impl Pipe for EchoPipe {
        fn refcount(&self) -> &Refcount {
            &self.refcount
        }
        fn input(&self, _uref: Uref, _pump_source: Option<PumpSource>) {}
        fn control(&self, command: ControlCommand) -> PipeResult {
            match command {
                ControlCommand::SetUri(uri) => Ok(upipe_pipe::ControlAnswer::Uri(uri)),
                _ => Err(PipeError::Unhandled),
            }
        }
    }

    #[test]
    fn proxy_id_is_stable() {
        let pumps = ManualPumpManager::new() as Arc<dyn upipe_runtime::PumpManager>;
        let manager = XferManager::new(pumps).unwrap();
        let proxy = manager.xfer_alloc(Arc::new(EchoPipe { refcount: Refcount::new() }));
        let id = proxy.id();
        assert_eq!(proxy.id(), id);
        manager.shutdown();
    }

    #[test]
    fn control_echoes_through_worker_thread() {
        let pumps = ManualPumpManager::new() as Arc<dyn upipe_runtime::PumpManager>;
        let manager = XferManager::new(pumps).unwrap();
        let proxy = manager.xfer_alloc(Arc::new(EchoPipe { refcount: Refcount::new() }));

        match proxy.control(ControlCommand::SetUri("rtp://host/stream".into())) {
            Ok(upipe_pipe::ControlAnswer::Uri(uri)) => assert_eq!(uri, "rtp://host/stream"),
            other => panic!("unexpected {other:?}"),
        }
        manager.shutdown();
    }
}
