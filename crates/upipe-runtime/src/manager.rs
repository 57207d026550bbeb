//! Pump managers: own the event loop, allocate and drive pumps.
//!
//! Two reference implementations are provided, mirroring the upstream
//! project's own two backends (an event-loop-library-backed manager, and a
//! dependency-free fallback):
//!
//! - [`MioPumpManager`] - timers, idlers, and fd-read/fd-write pumps
//!   multiplexed through [`mio`]'s portable `epoll`/`kqueue`/IOCP backend.
//! - [`ManualPumpManager`] - timers and idlers only, driven by a plain
//!   sleep-and-poll loop with no OS multiplexing API at all; sufficient to
//!   run pipelines that do no direct fd I/O of their own.

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use slab::Slab;
use tracing::{debug, trace};

use crate::blocker::Blocker;
use crate::config::PumpManagerConfig;
use crate::error::{Result, RuntimeError};
use crate::pump::{Pump, PumpKind, PumpStatus};

/// Public contract every pump manager implements (spec §4.5).
///
/// `allocate_blocker` takes `self: Arc<Self>` rather than `&self` because
/// the returned [`Blocker`] must hold a strong reference back to the
/// manager so it can release itself on drop; callers therefore need an
/// `Arc<M>` handle (every constructor here returns one).
pub trait PumpManager: Send + Sync {
    /// Allocate a new pump. It is not started until [`Self::start`] is
    /// called.
    fn alloc_pump(&self, kind: PumpKind, callback: Box<dyn FnMut() + Send>) -> Result<Pump>;

    /// Arm a pump so its callback may fire.
    fn start(&self, id: Pump) -> Result<()>;

    /// Disarm a pump. A callback currently executing is allowed to
    /// complete; it will not fire again until restarted.
    fn stop(&self, id: Pump) -> Result<()>;

    /// Change whether this pump keeps the loop alive.
    fn set_status(&self, id: Pump, status: PumpStatus) -> Result<()>;

    /// Current blocking/non-blocking status.
    fn status(&self, id: Pump) -> Result<PumpStatus>;

    /// Stop (if running) and deallocate a pump.
    fn free(&self, id: Pump) -> Result<()>;

    /// Attach a blocker that suspends this pump's callback until released.
    fn allocate_blocker(self: Arc<Self>, id: Pump) -> Result<Blocker>
    where
        Self: Sized + 'static;

    /// Release one blocker previously attached via [`Self::allocate_blocker`].
    /// Called by [`Blocker::release`]; not normally called directly.
    fn release_blocker(&self, id: Pump);

    /// Run the loop until no running `Blocking`-status pump remains.
    ///
    /// `mutex` is released while polling for readiness and reacquired
    /// immediately before each callback dispatch, so a controlling thread
    /// may safely enter the pipe graph from outside between iterations.
    fn run(&self, mutex: Option<&Mutex<()>>) -> Result<()>;

    /// Reclaim storage held by freed pumps. Pure housekeeping; never
    /// changes observable behavior.
    fn vacuum(&self);
}

struct PumpEntry {
    kind: PumpKind,
    callback: Box<dyn FnMut() + Send>,
    status: PumpStatus,
    running: bool,
    blockers: usize,
    /// For timers: the next time the callback should fire.
    deadline: Option<Instant>,
}

impl PumpEntry {
    fn ready(&self, now: Instant) -> bool {
        if self.blockers > 0 || !self.running {
            return false;
        }
        match &self.kind {
            PumpKind::Idler => true,
            PumpKind::TimerOnce(_) | PumpKind::TimerInterval(_) => self.deadline.is_some_and(|d| now >= d),
            PumpKind::FdRead(_) | PumpKind::FdWrite(_) | PumpKind::Signal(_) => false,
        }
    }
}

/// Dependency-free manager: timers and idlers only, no fd/signal support.
pub struct ManualPumpManager {
    pumps: Mutex<Slab<PumpEntry>>,
    retained: AtomicUsize,
    config: PumpManagerConfig,
}

impl ManualPumpManager {
    /// Create an empty manager with default tunables.
    pub fn new() -> Arc<Self> {
        Self::with_config(PumpManagerConfig::default())
    }

    /// Create an empty manager with explicit tunables.
    pub fn with_config(config: PumpManagerConfig) -> Arc<Self> {
        Arc::new(Self { pumps: Mutex::new(Slab::new()), retained: AtomicUsize::new(0), config })
    }

    fn next_deadline(&self, now: Instant) -> Option<Duration> {
        let guard = self.pumps.lock();
        guard
            .iter()
            .filter_map(|(_, p)| if p.running && p.blockers == 0 { p.deadline } else { None })
            .map(|d| d.saturating_duration_since(now))
            .min()
    }
}

impl PumpManager for ManualPumpManager {
    fn alloc_pump(&self, kind: PumpKind, callback: Box<dyn FnMut() + Send>) -> Result<Pump> {
        if matches!(kind, PumpKind::FdRead(_) | PumpKind::FdWrite(_) | PumpKind::Signal(_)) {
            return Err(RuntimeError::Unsupported(
                "ManualPumpManager supports only timers and idlers".into(),
            ));
        }
        let entry = PumpEntry { kind, callback, status: PumpStatus::Blocking, running: false, blockers: 0, deadline: None };
        let id = self.pumps.lock().insert(entry);
        Ok(Pump(id))
    }

    fn start(&self, id: Pump) -> Result<()> {
        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        if !entry.running {
            entry.running = true;
            entry.deadline = match entry.kind {
                PumpKind::TimerOnce(d) | PumpKind::TimerInterval(d) => Some(Instant::now() + d),
                _ => None,
            };
            if entry.status == PumpStatus::Blocking {
                self.retained.fetch_add(1, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    fn stop(&self, id: Pump) -> Result<()> {
        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        if entry.running {
            entry.running = false;
            if entry.status == PumpStatus::Blocking {
                self.retained.fetch_sub(1, Ordering::AcqRel);
            }
        }
        Ok(())
    }

    fn set_status(&self, id: Pump, status: PumpStatus) -> Result<()> {
        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        if entry.running && entry.status != status {
            match status {
                PumpStatus::Blocking => self.retained.fetch_add(1, Ordering::AcqRel),
                PumpStatus::NonBlocking => self.retained.fetch_sub(1, Ordering::AcqRel),
            };
        }
        entry.status = status;
        Ok(())
    }

    fn status(&self, id: Pump) -> Result<PumpStatus> {
        Ok(self.pumps.lock().get(id.0).ok_or(RuntimeError::InvalidPump)?.status)
    }

    fn free(&self, id: Pump) -> Result<()> {
        self.stop(id)?;
        self.pumps.lock().try_remove(id.0).ok_or(RuntimeError::InvalidPump)?;
        Ok(())
    }

    fn allocate_blocker(self: Arc<Self>, id: Pump) -> Result<Blocker> {
        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        entry.blockers += 1;
        drop(guard);
        Ok(Blocker::new(self as Arc<dyn PumpManager>, id))
    }

    fn release_blocker(&self, id: Pump) {
        if let Some(entry) = self.pumps.lock().get_mut(id.0) {
            entry.blockers = entry.blockers.saturating_sub(1);
        }
    }

    fn run(&self, mutex: Option<&Mutex<()>>) -> Result<()> {
        while self.retained.load(Ordering::Acquire) > 0 {
            let now = Instant::now();
            let ready_ids: Vec<usize> = {
                let guard = self.pumps.lock();
                guard.iter().filter(|(_, p)| p.ready(now)).map(|(id, _)| id).collect()
            };

            for id in ready_ids {
                let _guard = mutex.map(parking_lot::Mutex::lock);

                // Take the callback out of the slab and drop the lock before
                // invoking it: the callback may call back into this manager
                // (stop/start/set_status/allocate_blocker/free), and
                // `parking_lot::Mutex` is not reentrant.
                let (mut callback, kind, status) = {
                    let mut slab = self.pumps.lock();
                    let Some(entry) = slab.get_mut(id) else { continue };
                    if entry.blockers > 0 || !entry.running {
                        continue;
                    }
                    let callback = std::mem::replace(&mut entry.callback, Box::new(|| {}));
                    (callback, entry.kind, entry.status)
                };

                callback();

                let mut slab = self.pumps.lock();
                if let Some(entry) = slab.get_mut(id) {
                    entry.callback = callback;
                    match kind {
                        PumpKind::TimerOnce(_) => {
                            entry.running = false;
                            if status == PumpStatus::Blocking {
                                drop(slab);
                                self.retained.fetch_sub(1, Ordering::AcqRel);
                            }
                        }
                        PumpKind::TimerInterval(d) => entry.deadline = Some(Instant::now() + d),
                        _ => {}
                    }
                }
            }

            if self.retained.load(Ordering::Acquire) == 0 {
                break;
            }
            let sleep_for = self.next_deadline(Instant::now()).unwrap_or(self.config.idle_poll_interval);
            std::thread::sleep(sleep_for.min(self.config.max_idle_sleep));
        }
        Ok(())
    }

    fn vacuum(&self) {
        self.pumps.lock().shrink_to_fit();
    }
}

/// `mio`-backed manager: timers, idlers, and fd-read/fd-write pumps, driven
/// by the OS's native readiness multiplexer. Signal pumps are not
/// implemented (`Self::start` returns [`RuntimeError::Unsupported`]).
pub struct MioPumpManager {
    poll: Mutex<mio::Poll>,
    pumps: Mutex<Slab<PumpEntry>>,
    fd_tokens: Mutex<HashMap<usize, RawFd>>,
    retained: AtomicUsize,
    config: PumpManagerConfig,
}

impl MioPumpManager {
    /// Create a manager with its own `mio::Poll` instance and default
    /// tunables.
    pub fn new() -> Result<Arc<Self>> {
        Self::with_config(PumpManagerConfig::default())
    }

    /// Create a manager with its own `mio::Poll` instance and explicit
    /// tunables.
    pub fn with_config(config: PumpManagerConfig) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            poll: Mutex::new(mio::Poll::new()?),
            pumps: Mutex::new(Slab::new()),
            fd_tokens: Mutex::new(HashMap::new()),
            retained: AtomicUsize::new(0),
            config,
        }))
    }

    fn next_timeout(&self, now: Instant) -> Option<Duration> {
        let guard = self.pumps.lock();
        let timer_deadline = guard
            .iter()
            .filter_map(|(_, p)| if p.running && p.blockers == 0 { p.deadline } else { None })
            .map(|d| d.saturating_duration_since(now))
            .min();
        let has_idler = guard.iter().any(|(_, p)| matches!(p.kind, PumpKind::Idler) && p.running && p.blockers == 0);
        if has_idler {
            Some(Duration::from_millis(0))
        } else {
            timer_deadline
        }
    }
}

impl PumpManager for MioPumpManager {
    fn alloc_pump(&self, kind: PumpKind, callback: Box<dyn FnMut() + Send>) -> Result<Pump> {
        let entry = PumpEntry { kind, callback, status: PumpStatus::Blocking, running: false, blockers: 0, deadline: None };
        let id = self.pumps.lock().insert(entry);
        Ok(Pump(id))
    }

    fn start(&self, id: Pump) -> Result<()> {
        use mio::{Interest, Token};

        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        if entry.running {
            return Ok(());
        }
        entry.running = true;
        match entry.kind {
            PumpKind::TimerOnce(d) | PumpKind::TimerInterval(d) => entry.deadline = Some(Instant::now() + d),
            PumpKind::FdRead(fd) => {
                let mut source = mio::unix::SourceFd(&fd);
                self.poll.lock().registry().register(&mut source, Token(id.0), Interest::READABLE)?;
                self.fd_tokens.lock().insert(id.0, fd);
            }
            PumpKind::FdWrite(fd) => {
                let mut source = mio::unix::SourceFd(&fd);
                self.poll.lock().registry().register(&mut source, Token(id.0), Interest::WRITABLE)?;
                self.fd_tokens.lock().insert(id.0, fd);
            }
            PumpKind::Signal(_) => {
                entry.running = false;
                return Err(RuntimeError::Unsupported("signal pumps are not implemented".into()));
            }
            PumpKind::Idler => {}
        }
        if entry.status == PumpStatus::Blocking {
            self.retained.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn stop(&self, id: Pump) -> Result<()> {
        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        if !entry.running {
            return Ok(());
        }
        entry.running = false;
        if let Some(fd) = self.fd_tokens.lock().remove(&id.0) {
            let mut source = mio::unix::SourceFd(&fd);
            let _ = self.poll.lock().registry().deregister(&mut source);
        }
        if entry.status == PumpStatus::Blocking {
            self.retained.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(())
    }

    fn set_status(&self, id: Pump, status: PumpStatus) -> Result<()> {
        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        if entry.running && entry.status != status {
            match status {
                PumpStatus::Blocking => self.retained.fetch_add(1, Ordering::AcqRel),
                PumpStatus::NonBlocking => self.retained.fetch_sub(1, Ordering::AcqRel),
            };
        }
        entry.status = status;
        Ok(())
    }

    fn status(&self, id: Pump) -> Result<PumpStatus> {
        Ok(self.pumps.lock().get(id.0).ok_or(RuntimeError::InvalidPump)?.status)
    }

    fn free(&self, id: Pump) -> Result<()> {
        self.stop(id)?;
        self.pumps.lock().try_remove(id.0).ok_or(RuntimeError::InvalidPump)?;
        Ok(())
    }

    fn allocate_blocker(self: Arc<Self>, id: Pump) -> Result<Blocker> {
        let mut guard = self.pumps.lock();
        let entry = guard.get_mut(id.0).ok_or(RuntimeError::InvalidPump)?;
        entry.blockers += 1;
        drop(guard);
        Ok(Blocker::new(self as Arc<dyn PumpManager>, id))
    }

    fn release_blocker(&self, id: Pump) {
        if let Some(entry) = self.pumps.lock().get_mut(id.0) {
            entry.blockers = entry.blockers.saturating_sub(1);
        }
    }

    fn run(&self, mutex: Option<&Mutex<()>>) -> Result<()> {
        let mut events = mio::Events::with_capacity(self.config.event_capacity);
        while self.retained.load(Ordering::Acquire) > 0 {
            let timeout = self.next_timeout(Instant::now());
            match self.poll.lock().poll(&mut events, timeout) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }

            let mut fired: Vec<usize> = events.iter().map(|e| e.token().0).collect();
            let now = Instant::now();
            {
                let guard = self.pumps.lock();
                fired.extend(guard.iter().filter(|(_, p)| p.ready(now)).map(|(id, _)| id));
            }
            fired.sort_unstable();
            fired.dedup();

            for id in fired {
                let _guard = mutex.map(parking_lot::Mutex::lock);

                // Take the callback out of the slab and drop the lock before
                // invoking it: the callback may call back into this manager
                // (stop/start/set_status/allocate_blocker/free), and
                // `parking_lot::Mutex` is not reentrant.
                let (mut callback, kind, status) = {
                    let mut slab = self.pumps.lock();
                    let Some(entry) = slab.get_mut(id) else { continue };
                    if entry.blockers > 0 || !entry.running {
                        continue;
                    }
                    let callback = std::mem::replace(&mut entry.callback, Box::new(|| {}));
                    (callback, entry.kind, entry.status)
                };

                trace!(pump = id, "dispatching pump callback");
                callback();

                let mut slab = self.pumps.lock();
                if let Some(entry) = slab.get_mut(id) {
                    entry.callback = callback;
                    match kind {
                        PumpKind::TimerOnce(_) => {
                            entry.running = false;
                            if status == PumpStatus::Blocking {
                                drop(slab);
                                self.retained.fetch_sub(1, Ordering::AcqRel);
                            }
                        }
                        PumpKind::TimerInterval(d) => entry.deadline = Some(Instant::now() + d),
                        _ => {}
                    }
                }
            }

            if self.retained.load(Ordering::Acquire) == 0 {
                debug!("pump loop terminating: no retained pumps remain");
                break;
            }
        }
        Ok(())
    }

    fn vacuum(&self) {
        self.pumps.lock().shrink_to_fit();
    }
}
