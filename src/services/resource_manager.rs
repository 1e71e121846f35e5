//! Concurrency limits derived from host capacity.
//!
//! The manager owns one counting semaphore sized by
//! [`ResourceManager::recommended_parallelism`]. The orchestrator takes permits
//! for a layer, spreads them across that layer's tasks, and gives them back at
//! the layer barrier. Utilisation is tracked so a run that keeps the host
//! saturated for too long can be told to back off.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{CpuRefreshKind, MemoryRefreshKind, RefreshKind, System};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::domain::models::{ResourceConfig, ResourceSnapshot};

/// Host capacity the parallelism calculation works from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapacity {
    pub cpu_cores: usize,
    pub memory_mb: u64,
}

impl HostCapacity {
    /// Probe the host with sysinfo.
    pub fn detect() -> Self {
        let refresh_kind = RefreshKind::new()
            .with_cpu(CpuRefreshKind::new())
            .with_memory(MemoryRefreshKind::everything());
        let system = System::new_with_specifics(refresh_kind);

        let cpu_cores = match system.cpus().len() {
            0 => std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            n => n,
        };

        Self {
            cpu_cores,
            memory_mb: system.total_memory() / 1024 / 1024,
        }
    }
}

/// Safe worker count: CPU-bound estimate capped by the memory budget.
pub fn recommended_parallelism(config: &ResourceConfig, host: HostCapacity) -> usize {
    let cores = config.cpu_cores.unwrap_or(host.cpu_cores).max(1);
    let by_cpu = config.workers_per_core.max(1).saturating_mul(cores);

    let budget_mb = config.memory_budget_mb.unwrap_or(host.memory_mb);
    let by_memory = usize::try_from(budget_mb / config.worker_memory_mb.max(1)).unwrap_or(usize::MAX);

    let mut workers = by_cpu.min(by_memory).max(1);
    if let Some(cap) = config.max_workers {
        workers = workers.min(cap.max(1));
    }
    workers
}

#[derive(Debug)]
struct PressureTracker {
    threshold: f64,
    window: Duration,
    above_since: Option<Instant>,
    /// Set once a full window above threshold has elapsed; cleared when taken.
    pending: bool,
}

impl PressureTracker {
    fn observe(&mut self, utilization: f64, now: Instant) {
        if utilization > self.threshold {
            let since = *self.above_since.get_or_insert(now);
            if now.duration_since(since) >= self.window {
                self.pending = true;
                self.above_since = Some(now);
            }
        } else {
            self.above_since = None;
        }
    }

    fn take(&mut self) -> bool {
        std::mem::take(&mut self.pending)
    }
}

#[derive(Debug)]
struct Inner {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    in_use: AtomicUsize,
    pressure: Mutex<PressureTracker>,
}

impl Inner {
    fn utilization(&self) -> f64 {
        self.in_use.load(Ordering::SeqCst) as f64 / self.capacity as f64
    }

    fn observe(&self) {
        let utilization = self.utilization();
        if let Ok(mut tracker) = self.pressure.lock() {
            tracker.observe(utilization, Instant::now());
        }
    }

    fn granted(self: &Arc<Self>, permits: Vec<OwnedSemaphorePermit>, count: usize) -> PermitSet {
        self.in_use.fetch_add(count, Ordering::SeqCst);
        self.observe();
        PermitSet {
            permits,
            count,
            owner: Arc::clone(self),
        }
    }
}

/// Permits held by one caller. Released on drop.
#[derive(Debug)]
pub struct PermitSet {
    permits: Vec<OwnedSemaphorePermit>,
    count: usize,
    owner: Arc<Inner>,
}

impl PermitSet {
    pub const fn len(&self) -> usize {
        self.count
    }

    pub const fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Fold another set into this one.
    pub fn merge(&mut self, mut other: Self) {
        self.permits.append(&mut other.permits);
        self.count += other.count;
        other.count = 0;
    }
}

impl Drop for PermitSet {
    fn drop(&mut self) {
        if self.count > 0 {
            // Last sample at the utilisation these permits held.
            self.owner.observe();
            self.owner.in_use.fetch_sub(self.count, Ordering::SeqCst);
            self.permits.clear();
            self.owner.observe();
        }
    }
}

/// Outcome of a non-blocking acquire.
#[derive(Debug)]
pub struct PartialGrant {
    pub granted: PermitSet,
    pub shortfall: usize,
    /// Present when the request could not be met in full.
    pub continuation: Option<QueuedAcquire>,
}

/// The unmet remainder of a [`ResourceManager::try_acquire`] call.
#[derive(Debug)]
pub struct QueuedAcquire {
    owner: Arc<Inner>,
    wanted: usize,
}

impl QueuedAcquire {
    pub const fn wanted(&self) -> usize {
        self.wanted
    }

    /// Wait cooperatively for the remaining permits.
    pub async fn wait(self) -> PermitSet {
        acquire_from(&self.owner, self.wanted).await
    }
}

async fn acquire_from(owner: &Arc<Inner>, n: usize) -> PermitSet {
    let n = n.min(owner.capacity);
    if n == 0 {
        return owner.granted(Vec::new(), 0);
    }
    let count = u32::try_from(n).unwrap_or(u32::MAX);
    match Arc::clone(&owner.semaphore).acquire_many_owned(count).await {
        Ok(permit) => owner.granted(vec![permit], n),
        Err(_) => {
            // The semaphore is never closed while the manager is alive.
            warn!("resource semaphore closed, granting nothing");
            owner.granted(Vec::new(), 0)
        }
    }
}

/// Counting-semaphore gate over worker slots.
#[derive(Debug, Clone)]
pub struct ResourceManager {
    inner: Arc<Inner>,
}

impl ResourceManager {
    /// Manager with an explicit capacity.
    pub fn new(capacity: usize, pressure_threshold: f64, pressure_window: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity)),
                capacity,
                in_use: AtomicUsize::new(0),
                pressure: Mutex::new(PressureTracker {
                    threshold: pressure_threshold,
                    window: pressure_window,
                    above_since: None,
                    pending: false,
                }),
            }),
        }
    }

    /// Size the manager from configuration and the detected host.
    pub fn from_config(config: &ResourceConfig) -> Self {
        Self::with_host(config, HostCapacity::detect())
    }

    pub fn with_host(config: &ResourceConfig, host: HostCapacity) -> Self {
        let capacity = recommended_parallelism(config, host);
        info!(
            capacity,
            cpu_cores = host.cpu_cores,
            memory_mb = host.memory_mb,
            "resource manager initialised"
        );
        Self::new(
            capacity,
            config.pressure_threshold,
            Duration::from_secs(config.pressure_window_secs),
        )
    }

    /// Worker count this manager was sized for.
    pub fn recommended_parallelism(&self) -> usize {
        self.inner.capacity
    }

    pub fn available(&self) -> usize {
        self.inner.semaphore.available_permits()
    }

    pub fn in_use(&self) -> usize {
        self.inner.in_use.load(Ordering::SeqCst)
    }

    /// Block until `n` permits are free. `n` is clamped to capacity.
    pub async fn acquire(&self, n: usize) -> PermitSet {
        acquire_from(&self.inner, n).await
    }

    /// Take whatever is free right now, up to `n`.
    pub fn try_acquire(&self, n: usize) -> PartialGrant {
        let wanted = n.min(self.inner.capacity);
        let mut permits = Vec::with_capacity(wanted);
        while permits.len() < wanted {
            match Arc::clone(&self.inner.semaphore).try_acquire_owned() {
                Ok(permit) => permits.push(permit),
                Err(_) => break,
            }
        }

        let got = permits.len();
        let shortfall = wanted - got;
        if shortfall > 0 {
            debug!(wanted, got, "partial permit grant");
        }

        PartialGrant {
            granted: self.inner.granted(permits, got),
            shortfall,
            continuation: (shortfall > 0).then(|| QueuedAcquire {
                owner: Arc::clone(&self.inner),
                wanted: shortfall,
            }),
        }
    }

    /// Return permits early. Dropping the set has the same effect.
    pub fn release(&self, permits: PermitSet) {
        drop(permits);
    }

    pub fn utilization(&self) -> f64 {
        self.inner.utilization()
    }

    pub fn snapshot(&self, target_concurrency: usize) -> ResourceSnapshot {
        ResourceSnapshot {
            capacity: self.inner.capacity,
            in_use: self.in_use(),
            utilization: self.utilization(),
            target_concurrency,
        }
    }

    /// True once per pressure window spent above threshold.
    ///
    /// Pressure sustained by permits that have since been released still
    /// counts until it is taken here.
    pub fn take_degrade_signal(&self) -> bool {
        let utilization = self.utilization();
        let Ok(mut tracker) = self.inner.pressure.lock() else {
            return false;
        };
        tracker.observe(utilization, Instant::now());
        let fired = tracker.take();
        if fired {
            warn!(utilization, "sustained resource pressure, degrading concurrency");
        }
        fired
    }
}
