//! Process-wide lifetime of the store client library.
//!
//! The S3 backend drives its requests on a tokio runtime. The runtime is
//! created once, shared by every worker, and torn down exactly once when the
//! process exits, whether `main` returns or something calls `exit`.

use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError};

use lazy_static::lazy_static;
use log::{debug, warn};
use tokio::runtime::{Builder, Runtime};

use crate::error::DetachError;

/// Threads driving in-flight requests; workers block on them, so a couple is enough.
const IO_THREADS: usize = 2;

enum LifecycleState {
    Uninitialized,
    Ready(Arc<Runtime>),
    TornDown,
}

/// Owner of the client runtime.
pub struct ClientLifecycle {
    state: Mutex<LifecycleState>,
}

impl Default for ClientLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientLifecycle {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LifecycleState::Uninitialized),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LifecycleState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create the runtime if needed. Repeated calls return the same runtime.
    pub fn initialize(&self) -> Result<Arc<Runtime>, DetachError> {
        let mut state = self.lock();
        match &*state {
            LifecycleState::Ready(runtime) => Ok(Arc::clone(runtime)),
            LifecycleState::TornDown => Err(DetachError::Initialization(
                "client library already deinitialized".to_string(),
            )),
            LifecycleState::Uninitialized => {
                let runtime = Builder::new_multi_thread()
                    .worker_threads(IO_THREADS)
                    .thread_name("detach-io")
                    .enable_all()
                    .build()
                    .map_err(|e| DetachError::Initialization(format!("Failed to create runtime: {}", e)))?;
                let runtime = Arc::new(runtime);
                *state = LifecycleState::Ready(Arc::clone(&runtime));
                debug!("Store client library initialized");
                Ok(runtime)
            }
        }
    }

    /// Runtime of an initialized library.
    pub fn runtime(&self) -> Result<Arc<Runtime>, DetachError> {
        match &*self.lock() {
            LifecycleState::Ready(runtime) => Ok(Arc::clone(runtime)),
            LifecycleState::Uninitialized => Err(DetachError::Initialization(
                "client library not initialized".to_string(),
            )),
            LifecycleState::TornDown => Err(DetachError::Initialization(
                "client library already deinitialized".to_string(),
            )),
        }
    }

    pub fn is_initialized(&self) -> bool {
        matches!(&*self.lock(), LifecycleState::Ready(_))
    }

    /// Tear the library down. Returns `true` only for the call that did it.
    pub fn deinitialize(&self) -> bool {
        let previous = std::mem::replace(&mut *self.lock(), LifecycleState::TornDown);
        match previous {
            LifecycleState::Ready(runtime) => {
                match Arc::try_unwrap(runtime) {
                    Ok(runtime) => runtime.shutdown_background(),
                    Err(_) => warn!("Store client runtime still in use at teardown"),
                }
                debug!("Store client library deinitialized");
                true
            }
            LifecycleState::Uninitialized | LifecycleState::TornDown => false,
        }
    }
}

lazy_static! {
    static ref GLOBAL_LIFECYCLE: ClientLifecycle = ClientLifecycle::new();
}

static EXIT_HOOK: Once = Once::new();

/// The process-wide lifecycle.
pub fn global() -> &'static ClientLifecycle {
    &GLOBAL_LIFECYCLE
}

/// Initialize the process-wide library and register its teardown at exit.
pub fn initialize_global() -> Result<Arc<Runtime>, DetachError> {
    let runtime = GLOBAL_LIFECYCLE.initialize()?;
    EXIT_HOOK.call_once(|| {
        // SAFETY: the handler is a plain extern "C" fn with no captured state.
        let rc = unsafe { libc::atexit(deinitialize_at_exit) };
        if rc != 0 {
            warn!("Failed to register store client teardown at exit");
        }
    });
    Ok(runtime)
}

extern "C" fn deinitialize_at_exit() {
    GLOBAL_LIFECYCLE.deinitialize();
}
