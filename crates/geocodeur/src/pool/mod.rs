//! Named pool of expensive, shareable handles with idle eviction.
//!
//! Handles are created lazily on first [`ResourcePool::acquire`], shared as
//! `Arc`s, and closed by a background sweep once they have been idle for
//! twice the sweep interval and nobody else holds them.

use std::{
    sync::{
        Arc, Weak,
        mpsc::{self, RecvTimeoutError},
    },
    thread::JoinHandle,
    time::{Duration, Instant},
};

use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use tracing::{debug, info, instrument, warn};

pub use error::{PoolError, Result};

mod error {
    use thiserror::Error;

    type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

    #[derive(Error, Debug)]
    pub enum PoolError {
        #[error("Failed to open '{name}': {source}")]
        Open {
            name: String,
            #[source]
            source: BoxError,
        },
        #[error("'{name}' is unreachable: {source}")]
        Probe {
            name: String,
            #[source]
            source: BoxError,
        },
        #[error("Failed to start sweeper: {0}")]
        Sweeper(#[from] std::io::Error),
    }

    pub type Result<T> = std::result::Result<T, PoolError>;
}

/// A backing-store handle that can live in a [`ResourcePool`].
pub trait PooledResource: Send + Sync + Sized + 'static {
    type Config: ?Sized;
    type Error: std::error::Error + Send + Sync + 'static;

    /// Construct the handle for the logical `name`.
    fn open(name: &str, config: &Self::Config) -> std::result::Result<Self, Self::Error>;

    /// Check the handle is usable.
    fn probe(&self) -> std::result::Result<(), Self::Error>;

    /// Release whatever the handle holds. Called once, when the pool drops it.
    fn close(&self);
}

struct PoolEntry<R> {
    handle: Arc<R>,
    last_used: Instant,
}

struct PoolInner<R> {
    entries: Mutex<HashMap<String, PoolEntry<R>>>,
    sweep_interval: Duration,
}

impl<R: PooledResource> PoolInner<R> {
    fn evict_idle_at(&self, now: Instant) -> usize {
        let max_idle = self.sweep_interval * 2;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|name, entry| {
            let idle = now.saturating_duration_since(entry.last_used);
            // The pool's own reference is the only one when nobody borrows the handle.
            let evict = idle > max_idle && Arc::strong_count(&entry.handle) == 1;
            if evict {
                entry.handle.close();
                debug!(name = %name, idle = ?idle, "Evicted idle resource");
            }
            !evict
        });
        before - entries.len()
    }
}

struct Sweeper {
    stop: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

pub struct ResourcePool<R: PooledResource> {
    inner: Arc<PoolInner<R>>,
    sweeper: Mutex<Option<Sweeper>>,
}

impl<R: PooledResource> ResourcePool<R> {
    /// A pool without a running sweeper. See [`ResourcePool::start_sweeper`].
    pub fn new(sweep_interval: Duration) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                entries: Mutex::new(HashMap::new()),
                sweep_interval,
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// A pool whose background sweep is already running.
    pub fn with_sweeper(sweep_interval: Duration) -> Result<Self> {
        let pool = Self::new(sweep_interval);
        pool.start_sweeper()?;
        Ok(pool)
    }

    pub fn sweep_interval(&self) -> Duration {
        self.inner.sweep_interval
    }

    /// The handle registered under `name`, opening and probing it first if needed.
    #[instrument(name = "Acquire resource", skip(self, config), level = "debug")]
    pub fn acquire(&self, name: &str, config: &R::Config) -> Result<Arc<R>> {
        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(name) {
            entry.last_used = Instant::now();
            return Ok(Arc::clone(&entry.handle));
        }

        let handle = R::open(name, config).map_err(|e| PoolError::Open {
            name: name.to_string(),
            source: Box::new(e),
        })?;
        if let Err(e) = handle.probe() {
            handle.close();
            return Err(PoolError::Probe {
                name: name.to_string(),
                source: Box::new(e),
            });
        }

        let handle = Arc::new(handle);
        entries.insert(
            name.to_string(),
            PoolEntry {
                handle: Arc::clone(&handle),
                last_used: Instant::now(),
            },
        );
        debug!(name, "Opened resource");
        Ok(handle)
    }

    /// Close and drop every registered handle.
    pub fn release_all(&self) {
        let drained: Vec<(String, PoolEntry<R>)> = self.inner.entries.lock().drain().collect();
        for (name, entry) in &drained {
            entry.handle.close();
            debug!(name = %name, "Released resource");
        }
        if !drained.is_empty() {
            info!(count = drained.len(), "Released all pooled resources");
        }
    }

    /// Remove one handle, closing it. Returns whether it was registered.
    pub fn release(&self, name: &str) -> bool {
        let removed = self.inner.entries.lock().remove(name);
        if let Some(entry) = &removed {
            entry.handle.close();
            debug!(name, "Released resource");
        }
        removed.is_some()
    }

    /// Evict handles idle for more than twice the sweep interval as of `now`
    /// and not currently borrowed. Returns how many were evicted.
    pub fn evict_idle_at(&self, now: Instant) -> usize {
        self.inner.evict_idle_at(now)
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.entries.lock().contains_key(name)
    }

    /// Start the periodic sweep. Does nothing when one is already running.
    pub fn start_sweeper(&self) -> Result<()> {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_some() {
            return Ok(());
        }

        let (stop, stopped) = mpsc::channel::<()>();
        let weak: Weak<PoolInner<R>> = Arc::downgrade(&self.inner);
        let interval = self.inner.sweep_interval;
        let thread = std::thread::Builder::new()
            .name("geocodeur-pool-sweeper".to_string())
            .spawn(move || {
                loop {
                    match stopped.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let Some(inner) = weak.upgrade() else { break };
                            let evicted = inner.evict_idle_at(Instant::now());
                            if evicted > 0 {
                                debug!(evicted, "Pool sweep");
                            }
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })?;
        *sweeper = Some(Sweeper { stop, thread });
        debug!(interval = ?interval, "Started pool sweeper");
        Ok(())
    }

    /// Stop the sweep and wait for it to exit.
    pub fn stop_sweeper(&self) {
        let Some(Sweeper { stop, thread }) = self.sweeper.lock().take() else {
            return;
        };
        // A send error means the thread already exited.
        let _ = stop.send(());
        if thread.join().is_err() {
            warn!("Pool sweeper panicked");
        }
    }

    /// Stop the sweep and release every handle.
    pub fn shutdown(&self) {
        self.stop_sweeper();
        self.release_all();
    }
}

impl<R: PooledResource> Drop for ResourcePool<R> {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

impl<R: PooledResource> std::fmt::Debug for ResourcePool<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourcePool")
            .field("entries", &self.len())
            .field("sweep_interval", &self.inner.sweep_interval)
            .field("sweeping", &self.sweeper.lock().is_some())
            .finish()
    }
}
