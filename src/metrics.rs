//! Host metric sampler
//!
//! A background task reads CPU, memory, disk I/O and network I/O counters on a
//! fixed interval and publishes each reading as one immutable
//! [`MetricSnapshot`]. Readers always see a whole snapshot from a single tick;
//! a counter that fails to read keeps its previous value and is listed in
//! `stale` for that tick.

use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use sysinfo::{Networks, System};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SamplerError {
    #[error("counter '{counter}' could not be read: {reason}")]
    ReadFailure { counter: MetricField, reason: String },
    #[error("sampler is already running")]
    AlreadyRunning,
    #[error("sampling interval must be greater than zero")]
    InvalidInterval,
    #[error("sampler lost its counter source and cannot be restarted")]
    SourceLost,
}

impl SamplerError {
    pub fn read_failure(counter: MetricField, reason: impl Into<String>) -> Self {
        SamplerError::ReadFailure {
            counter,
            reason: reason.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricField {
    Cpu,
    Memory,
    DiskIo,
    NetworkIo,
}

impl MetricField {
    pub const ALL: [MetricField; 4] = [
        MetricField::Cpu,
        MetricField::Memory,
        MetricField::DiskIo,
        MetricField::NetworkIo,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricField::Cpu => "cpu",
            MetricField::Memory => "memory",
            MetricField::DiskIo => "disk_io",
            MetricField::NetworkIo => "network_io",
        }
    }
}

impl fmt::Display for MetricField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryStats {
    /// Physical memory in bytes
    pub total: u64,
    /// Bytes that can be handed to new allocations without swapping
    pub available: u64,
    /// Used share of total, 0-100
    pub percent: f32,
}

impl MemoryStats {
    pub fn new(total: u64, available: u64) -> Self {
        let percent = if total == 0 {
            0.0
        } else {
            (total.saturating_sub(available) as f64 / total as f64 * 100.0) as f32
        };
        Self {
            total,
            available,
            percent,
        }
    }
}

/// Cumulative byte counters since boot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIo {
    /// Bytes read from disk
    pub read_bytes: u64,
    /// Bytes written to disk
    pub write_bytes: u64,
}

/// Cumulative byte counters since boot, summed over all interfaces
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIo {
    /// Bytes transmitted
    pub bytes_sent: u64,
    /// Bytes received
    pub bytes_recv: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// Global CPU usage across all cores, 0-100
    pub cpu_percent: f32,
    /// Physical memory totals
    pub memory: MemoryStats,
    /// Disk traffic counters
    pub disk_io: DiskIo,
    /// Network traffic counters
    pub network_io: NetworkIo,
    /// When this tick was taken
    pub timestamp: DateTime<Utc>,
    /// 0 before the first tick
    pub tick: u64,
    /// Fields carried over from an earlier tick because their read failed
    pub stale: Vec<MetricField>,
}

impl MetricSnapshot {
    /// Placeholder published before the first tick; every field is stale.
    pub fn empty() -> Self {
        Self {
            cpu_percent: 0.0,
            memory: MemoryStats::default(),
            disk_io: DiskIo::default(),
            network_io: NetworkIo::default(),
            timestamp: Utc::now(),
            tick: 0,
            stale: MetricField::ALL.to_vec(),
        }
    }

    pub fn is_stale(&self, field: MetricField) -> bool {
        self.stale.contains(&field)
    }
}

/// Where the sampler gets its raw counters from
pub trait CounterSource: Send + 'static {
    fn cpu_percent(&mut self) -> Result<f32, SamplerError>;
    fn memory(&mut self) -> Result<MemoryStats, SamplerError>;
    fn disk_io(&mut self) -> Result<DiskIo, SamplerError>;
    fn network_io(&mut self) -> Result<NetworkIo, SamplerError>;
}

/// Counters read from the OS through sysinfo.
///
/// Disk I/O is the sum of per-process read/write totals, which is what sysinfo
/// exposes portably.
pub struct SysinfoSource {
    system: System,
    networks: Networks,
}

impl SysinfoSource {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first tick has a baseline
        system.refresh_cpu();
        Self {
            system,
            networks: Networks::new_with_refreshed_list(),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterSource for SysinfoSource {
    fn cpu_percent(&mut self) -> Result<f32, SamplerError> {
        self.system.refresh_cpu();
        if self.system.cpus().is_empty() {
            return Err(SamplerError::read_failure(MetricField::Cpu, "no CPUs reported"));
        }
        let usage = self.system.global_cpu_info().cpu_usage();
        if usage.is_finite() {
            Ok(usage.clamp(0.0, 100.0))
        } else {
            Err(SamplerError::read_failure(MetricField::Cpu, "usage is not a number"))
        }
    }

    fn memory(&mut self) -> Result<MemoryStats, SamplerError> {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return Err(SamplerError::read_failure(MetricField::Memory, "total memory is zero"));
        }
        Ok(MemoryStats::new(total, self.system.available_memory()))
    }

    fn disk_io(&mut self) -> Result<DiskIo, SamplerError> {
        self.system.refresh_processes();
        let processes = self.system.processes();
        if processes.is_empty() {
            return Err(SamplerError::read_failure(MetricField::DiskIo, "no processes visible"));
        }
        Ok(processes.values().fold(DiskIo::default(), |acc, process| {
            let usage = process.disk_usage();
            DiskIo {
                read_bytes: acc.read_bytes.saturating_add(usage.total_read_bytes),
                write_bytes: acc.write_bytes.saturating_add(usage.total_written_bytes),
            }
        }))
    }

    fn network_io(&mut self) -> Result<NetworkIo, SamplerError> {
        self.networks.refresh();
        let mut totals = NetworkIo::default();
        let mut interfaces = 0usize;
        for (_name, data) in &self.networks {
            interfaces += 1;
            totals.bytes_sent = totals.bytes_sent.saturating_add(data.total_transmitted());
            totals.bytes_recv = totals.bytes_recv.saturating_add(data.total_received());
        }
        if interfaces == 0 {
            return Err(SamplerError::read_failure(MetricField::NetworkIo, "no network interfaces"));
        }
        Ok(totals)
    }
}

/// Read every counter once. Failed reads keep the value from `previous` and
/// are marked stale.
pub fn sample(source: &mut dyn CounterSource, previous: &MetricSnapshot) -> MetricSnapshot {
    let mut stale = Vec::new();
    let cpu_percent = read_or_keep(source.cpu_percent(), previous.cpu_percent, MetricField::Cpu, &mut stale);
    let memory = read_or_keep(source.memory(), previous.memory, MetricField::Memory, &mut stale);
    let disk_io = read_or_keep(source.disk_io(), previous.disk_io, MetricField::DiskIo, &mut stale);
    let network_io = read_or_keep(
        source.network_io(),
        previous.network_io,
        MetricField::NetworkIo,
        &mut stale,
    );

    MetricSnapshot {
        cpu_percent,
        memory,
        disk_io,
        network_io,
        timestamp: Utc::now(),
        tick: previous.tick + 1,
        stale,
    }
}

fn read_or_keep<T>(
    reading: Result<T, SamplerError>,
    previous: T,
    field: MetricField,
    stale: &mut Vec<MetricField>,
) -> T {
    match reading {
        Ok(value) => value,
        Err(e) => {
            warn!(field = %field, error = %e, "counter read failed, keeping previous value");
            stale.push(field);
            previous
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Delay between ticks
    pub interval_ms: u64,
    /// Snapshots retained for `history()`
    pub history_len: usize,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 1000,
            history_len: 60,
        }
    }
}

enum SamplerState {
    Idle(Box<dyn CounterSource>),
    Running {
        shutdown: oneshot::Sender<()>,
        handle: JoinHandle<()>,
    },
    /// Shutdown signalled; the task returns the source through `handback`
    Stopping,
    Failed,
}

/// What the sampling task leaves behind when it exits
enum Handback {
    Source(Box<dyn CounterSource>),
    Lost,
}

type HandbackSlot = Arc<Mutex<Option<Handback>>>;

/// Periodic sampler publishing through a watch channel.
///
/// `start` spawns the sampling task on the current tokio runtime; `stop`
/// waits for any in-flight tick and hands the source back so the sampler can
/// be started again.
pub struct MetricSampler {
    publisher: Arc<watch::Sender<Arc<MetricSnapshot>>>,
    history: Arc<Mutex<VecDeque<Arc<MetricSnapshot>>>>,
    history_len: usize,
    state: Mutex<SamplerState>,
    handback: HandbackSlot,
}

impl MetricSampler {
    pub fn new(source: impl CounterSource) -> Self {
        Self::with_history(source, SamplerConfig::default().history_len)
    }

    pub fn with_history(source: impl CounterSource, history_len: usize) -> Self {
        let (publisher, _) = watch::channel(Arc::new(MetricSnapshot::empty()));
        Self {
            publisher: Arc::new(publisher),
            history: Arc::new(Mutex::new(VecDeque::with_capacity(history_len))),
            history_len,
            state: Mutex::new(SamplerState::Idle(Box::new(source))),
            handback: Arc::new(Mutex::new(None)),
        }
    }

    /// Sampler over the host's real counters
    pub fn system(config: &SamplerConfig) -> Self {
        Self::with_history(SysinfoSource::new(), config.history_len)
    }

    pub fn start(&self, interval: Duration) -> Result<(), SamplerError> {
        if interval.is_zero() {
            return Err(SamplerError::InvalidInterval);
        }

        let mut state = self.lock_state();
        self.settle(&mut state);
        let source = match std::mem::replace(&mut *state, SamplerState::Failed) {
            SamplerState::Idle(source) => source,
            SamplerState::Failed => return Err(SamplerError::SourceLost),
            other => {
                *state = other;
                return Err(SamplerError::AlreadyRunning);
            }
        };

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(run_sampler(
            source,
            interval,
            self.publisher.clone(),
            self.history.clone(),
            self.history_len,
            shutdown_rx,
            self.handback.clone(),
        ));
        *state = SamplerState::Running { shutdown, handle };
        info!(interval_ms = interval.as_millis() as u64, "metric sampler started");
        Ok(())
    }

    /// Stop sampling. Returns once the task has finished its current tick;
    /// a no-op when not running. If this future is dropped early the task
    /// still winds down and the next `start` picks the source back up.
    pub async fn stop(&self) {
        let running = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, SamplerState::Stopping) {
                SamplerState::Running { shutdown, handle } => Some((shutdown, handle)),
                other => {
                    *state = other;
                    None
                }
            }
        };
        let Some((shutdown, handle)) = running else {
            return;
        };

        let _ = shutdown.send(());
        if let Err(e) = handle.await {
            error!(error = %e, "metric sampler task failed");
        }

        let mut state = self.lock_state();
        self.settle(&mut state);
        if matches!(*state, SamplerState::Stopping) {
            *state = SamplerState::Failed;
        }
        info!("metric sampler stopped");
    }

    /// Finish a stop whose caller went away, once the task has handed back
    fn settle(&self, state: &mut SamplerState) {
        if !matches!(state, SamplerState::Stopping) {
            return;
        }
        let handback = self.handback.lock().ok().and_then(|mut slot| slot.take());
        match handback {
            Some(Handback::Source(source)) => *state = SamplerState::Idle(source),
            Some(Handback::Lost) => *state = SamplerState::Failed,
            None => {}
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(&*self.lock_state(), SamplerState::Running { .. })
    }

    /// Most recent complete snapshot
    pub fn latest(&self) -> Arc<MetricSnapshot> {
        self.publisher.borrow().clone()
    }

    /// Receiver notified on every published tick
    pub fn subscribe(&self) -> watch::Receiver<Arc<MetricSnapshot>> {
        self.publisher.subscribe()
    }

    /// Retained snapshots, oldest first
    pub fn history(&self) -> Vec<Arc<MetricSnapshot>> {
        self.history
            .lock()
            .map(|history| history.iter().cloned().collect())
            .unwrap_or_default()
    }

    fn lock_state(&self) -> MutexGuard<'_, SamplerState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn run_sampler(
    mut source: Box<dyn CounterSource>,
    interval: Duration,
    publisher: Arc<watch::Sender<Arc<MetricSnapshot>>>,
    history: Arc<Mutex<VecDeque<Arc<MetricSnapshot>>>>,
    history_len: usize,
    mut shutdown: oneshot::Receiver<()>,
    handback: HandbackSlot,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            _ = ticker.tick() => {
                let previous = publisher.borrow().clone();
                // sysinfo reads block on /proc; keep them off the async workers
                let reading = tokio::task::spawn_blocking(move || {
                    let snapshot = sample(&mut *source, &previous);
                    (source, snapshot)
                })
                .await;
                let snapshot = match reading {
                    Ok((returned, snapshot)) => {
                        source = returned;
                        Arc::new(snapshot)
                    }
                    Err(e) => {
                        error!(error = %e, "metric sampling panicked");
                        hand_back(&handback, Handback::Lost);
                        return;
                    }
                };

                if let Ok(mut history) = history.lock() {
                    history.push_back(snapshot.clone());
                    while history.len() > history_len {
                        history.pop_front();
                    }
                }
                debug!(tick = snapshot.tick, stale = snapshot.stale.len(), "published metric snapshot");
                publisher.send_replace(snapshot);
            }
        }
    }
    hand_back(&handback, Handback::Source(source));
}

fn hand_back(slot: &HandbackSlot, handback: Handback) {
    if let Ok(mut slot) = slot.lock() {
        *slot = Some(handback);
    }
}

static GLOBAL_SAMPLER: OnceCell<Arc<MetricSampler>> = OnceCell::new();

/// Register the process-wide sampler. Fails with the given sampler if one is
/// already installed.
pub fn install_global(sampler: Arc<MetricSampler>) -> Result<(), Arc<MetricSampler>> {
    GLOBAL_SAMPLER.set(sampler)
}

pub fn global_sampler() -> Option<&'static Arc<MetricSampler>> {
    GLOBAL_SAMPLER.get()
}

/// Latest snapshot from the global sampler, if one is installed
pub fn latest_metrics() -> Option<Arc<MetricSnapshot>> {
    GLOBAL_SAMPLER.get().map(|sampler| sampler.latest())
}

/// Static facts about the host
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    /// Distribution or OS name, e.g. "Ubuntu"
    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub kernel_version: Option<String>,
    pub host_name: Option<String>,
    /// Logical CPUs
    pub cpu_count: usize,
    /// None when the platform does not report it
    pub physical_cores: Option<usize>,
    /// Physical memory in bytes
    pub total_memory: u64,
    pub uptime_secs: u64,
    /// Derived from sysinfo's boot timestamp
    pub boot_time: Option<DateTime<Utc>>,
}

pub fn host_info() -> HostInfo {
    let mut system = System::new();
    system.refresh_cpu();
    system.refresh_memory();
    HostInfo {
        os_name: System::name(),
        os_version: System::os_version(),
        kernel_version: System::kernel_version(),
        host_name: System::host_name(),
        cpu_count: system.cpus().len(),
        physical_cores: system.physical_core_count(),
        total_memory: system.total_memory(),
        uptime_secs: System::uptime(),
        boot_time: Utc.timestamp_opt(System::boot_time() as i64, 0).single(),
    }
}

/// Human-readable byte count, 1024-based
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["B", "KB", "MB", "GB", "TB", "PB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fails every read of `failing`, returns `value` for the rest
    struct FlakySource {
        value: u64,
        failing: Vec<MetricField>,
    }

    impl FlakySource {
        fn check(&self, field: MetricField) -> Result<(), SamplerError> {
            if self.failing.contains(&field) {
                Err(SamplerError::read_failure(field, "scripted failure"))
            } else {
                Ok(())
            }
        }
    }

    impl CounterSource for FlakySource {
        fn cpu_percent(&mut self) -> Result<f32, SamplerError> {
            self.check(MetricField::Cpu)?;
            Ok(self.value as f32)
        }
        fn memory(&mut self) -> Result<MemoryStats, SamplerError> {
            self.check(MetricField::Memory)?;
            Ok(MemoryStats::new(self.value * 2, self.value))
        }
        fn disk_io(&mut self) -> Result<DiskIo, SamplerError> {
            self.check(MetricField::DiskIo)?;
            Ok(DiskIo { read_bytes: self.value, write_bytes: self.value })
        }
        fn network_io(&mut self) -> Result<NetworkIo, SamplerError> {
            self.check(MetricField::NetworkIo)?;
            Ok(NetworkIo { bytes_sent: self.value, bytes_recv: self.value })
        }
    }

    #[test]
    fn test_sample_fresh_values() {
        let mut source = FlakySource { value: 40, failing: vec![] };
        let snap = sample(&mut source, &MetricSnapshot::empty());

        assert_eq!(snap.tick, 1);
        assert_eq!(snap.cpu_percent, 40.0);
        assert_eq!(snap.memory.percent, 50.0);
        assert!(snap.stale.is_empty());
    }

    #[test]
    fn test_failed_read_keeps_previous_value() {
        let mut source = FlakySource { value: 10, failing: vec![] };
        let first = sample(&mut source, &MetricSnapshot::empty());

        let mut source = FlakySource { value: 99, failing: vec![MetricField::NetworkIo] };
        let second = sample(&mut source, &first);

        assert_eq!(second.cpu_percent, 99.0);
        assert_eq!(second.network_io, first.network_io);
        assert_eq!(second.stale, vec![MetricField::NetworkIo]);
        assert!(second.is_stale(MetricField::NetworkIo));
        assert!(!second.is_stale(MetricField::Cpu));
    }

    #[test]
    fn test_empty_snapshot_is_all_stale() {
        let snap = MetricSnapshot::empty();
        assert_eq!(snap.tick, 0);
        for field in MetricField::ALL {
            assert!(snap.is_stale(field));
        }
    }

    #[test]
    fn test_memory_percent() {
        assert_eq!(MemoryStats::new(0, 0).percent, 0.0);
        assert_eq!(MemoryStats::new(100, 25).percent, 75.0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024 * 1024), "5.00 GB");
        assert_eq!(format_bytes(3 * 1024u64.pow(5)), "3.00 PB");
    }

    #[test]
    fn test_snapshot_serializes_stale_names() {
        let mut snap = MetricSnapshot::empty();
        snap.stale = vec![MetricField::DiskIo];
        let json = serde_json::to_value(&snap).unwrap();
        assert_eq!(json["stale"], serde_json::json!(["disk_io"]));
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let sampler = MetricSampler::new(FlakySource { value: 1, failing: vec![] });
        sampler.start(Duration::from_millis(20)).unwrap();
        assert_eq!(
            sampler.start(Duration::from_millis(20)),
            Err(SamplerError::AlreadyRunning)
        );
        sampler.stop().await;
        assert!(!sampler.is_running());
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let sampler = MetricSampler::new(FlakySource { value: 1, failing: vec![] });
        assert_eq!(sampler.start(Duration::ZERO), Err(SamplerError::InvalidInterval));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let sampler = MetricSampler::new(FlakySource { value: 1, failing: vec![] });
        sampler.stop().await;
        assert!(!sampler.is_running());
        assert_eq!(sampler.latest().tick, 0);
    }

    #[test]
    fn test_sysinfo_source_reads_memory() {
        let mut source = SysinfoSource::new();
        let memory = source.memory().unwrap();
        assert!(memory.total > 0);
        assert!(memory.percent >= 0.0 && memory.percent <= 100.0);
        assert!(source.cpu_percent().unwrap().is_finite());
    }
}
