//! Execution-time supervision for admitted work.
//!
//! A [`Watchdog`] is told about work before it starts and cancelled when it ends.
//! If the deadline passes first, the handle is marked expired and the watchdog's
//! timeout hook runs. Threads cannot be killed safely, so expiry is reported rather
//! than enforced; the work's lease is still released when it eventually returns.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Timeout supervisor.
pub trait Watchdog: Send + Sync {
    /// Start supervising `task` for at most `timeout`.
    fn monitor(&self, task: &str, timeout: Duration) -> WatchHandle;
}

#[derive(Debug, Default)]
struct WatchState {
    cancelled: AtomicBool,
    expired: AtomicBool,
}

/// Registration returned by [`Watchdog::monitor`].
#[derive(Debug, Clone)]
pub struct WatchHandle {
    state: Arc<WatchState>,
}

impl WatchHandle {
    /// A handle not tracked by any watchdog.
    #[must_use]
    pub fn detached() -> Self {
        Self {
            state: Arc::new(WatchState::default()),
        }
    }

    /// Stop supervising. Has no effect once expired.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    /// Whether [`cancel`](Self::cancel) was called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Whether the deadline passed before cancellation.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.state.expired.load(Ordering::Acquire)
    }
}

/// Watchdog that never fires.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWatchdog;

impl Watchdog for NoopWatchdog {
    fn monitor(&self, _task: &str, _timeout: Duration) -> WatchHandle {
        WatchHandle::detached()
    }
}

/// Callback run on the watchdog thread when a deadline passes.
pub type TimeoutHook = Arc<dyn Fn(&str, Duration) + Send + Sync>;

enum Command {
    Watch {
        deadline: Instant,
        task: String,
        timeout: Duration,
        state: Arc<WatchState>,
    },
    Shutdown,
}

struct Watched {
    task: String,
    timeout: Duration,
    state: Arc<WatchState>,
}

/// Watchdog backed by a deadline heap on a dedicated thread.
pub struct ThreadWatchdog {
    cmd_tx: Sender<Command>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ThreadWatchdog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadWatchdog").finish_non_exhaustive()
    }
}

impl ThreadWatchdog {
    /// Start a watchdog that logs expired work at warn level.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the watchdog thread cannot be spawned.
    pub fn new() -> std::io::Result<Self> {
        Self::with_hook(Arc::new(|task: &str, timeout: Duration| {
            warn!(task = task, timeout = ?timeout, "work exceeded its execution timeout");
        }))
    }

    /// Start a watchdog that calls `hook` for expired work.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the watchdog thread cannot be spawned.
    pub fn with_hook(hook: TimeoutHook) -> std::io::Result<Self> {
        let (cmd_tx, cmd_rx) = unbounded();
        let join = thread::Builder::new()
            .name("fs-watchdog".into())
            .spawn(move || run_watchdog(&cmd_rx, &*hook))?;
        Ok(Self {
            cmd_tx,
            join: Mutex::new(Some(join)),
        })
    }

    /// Stop the watchdog thread. Pending deadlines never fire.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown);
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

impl Watchdog for ThreadWatchdog {
    fn monitor(&self, task: &str, timeout: Duration) -> WatchHandle {
        let handle = WatchHandle::detached();
        // a deadline past the end of `Instant` can never fire
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            debug!(task = task, timeout = ?timeout, "timeout out of range; work runs unsupervised");
            return handle;
        };
        let cmd = Command::Watch {
            deadline,
            task: task.to_string(),
            timeout,
            state: Arc::clone(&handle.state),
        };
        if self.cmd_tx.send(cmd).is_err() {
            debug!(task = task, "watchdog stopped; work runs unsupervised");
        }
        handle
    }
}

impl Drop for ThreadWatchdog {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_watchdog(cmd_rx: &Receiver<Command>, hook: &(dyn Fn(&str, Duration) + Send + Sync)) {
    let mut deadlines: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut watched: HashMap<u64, Watched> = HashMap::new();
    let mut next_id = 0_u64;

    loop {
        let cmd = match deadlines.peek() {
            Some(Reverse((deadline, _))) => {
                let wait = deadline.saturating_duration_since(Instant::now());
                cmd_rx.recv_timeout(wait)
            }
            None => cmd_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match cmd {
            Ok(Command::Watch {
                deadline,
                task,
                timeout,
                state,
            }) => {
                next_id += 1;
                deadlines.push(Reverse((deadline, next_id)));
                watched.insert(next_id, Watched { task, timeout, state });
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        while let Some(Reverse((deadline, id))) = deadlines.peek().copied() {
            if deadline > now {
                break;
            }
            deadlines.pop();
            let Some(entry) = watched.remove(&id) else {
                continue;
            };
            if entry.state.cancelled.load(Ordering::Acquire) {
                continue;
            }
            entry.state.expired.store(true, Ordering::Release);
            hook(&entry.task, entry.timeout);
        }

        // cancelled entries with far deadlines are dropped eagerly
        if watched.len() > 1024 {
            watched.retain(|_, w| !w.state.cancelled.load(Ordering::Acquire));
        }
    }

    debug!(pending = watched.len(), "watchdog thread exiting");
}
