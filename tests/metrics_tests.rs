// tests/metrics_tests.rs
// Sampler lifecycle, snapshot atomicity and stale-field handling

use nlshell_core::metrics::{
    install_global, latest_metrics, CounterSource, DiskIo, MemoryStats, MetricField,
    MetricSampler, MetricSnapshot, NetworkIo, SamplerError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Every counter reports the number of the tick it was read in
struct TickSource {
    tick: u64,
}

impl CounterSource for TickSource {
    fn cpu_percent(&mut self) -> Result<f32, SamplerError> {
        self.tick += 1;
        Ok(self.tick as f32)
    }
    fn memory(&mut self) -> Result<MemoryStats, SamplerError> {
        std::thread::sleep(Duration::from_micros(200));
        Ok(MemoryStats::new(self.tick, 0))
    }
    fn disk_io(&mut self) -> Result<DiskIo, SamplerError> {
        Ok(DiskIo {
            read_bytes: self.tick,
            write_bytes: self.tick,
        })
    }
    fn network_io(&mut self) -> Result<NetworkIo, SamplerError> {
        std::thread::sleep(Duration::from_micros(200));
        Ok(NetworkIo {
            bytes_sent: self.tick,
            bytes_recv: self.tick,
        })
    }
}

fn assert_consistent(snapshot: &MetricSnapshot) {
    let t = snapshot.cpu_percent as u64;
    assert_eq!(snapshot.memory.total, t);
    assert_eq!(snapshot.disk_io.read_bytes, t);
    assert_eq!(snapshot.disk_io.write_bytes, t);
    assert_eq!(snapshot.network_io.bytes_sent, t);
    assert_eq!(snapshot.network_io.bytes_recv, t);
    assert_eq!(snapshot.tick, t);
}

async fn wait_for_tick(sampler: &MetricSampler, tick: u64) {
    let mut updates = sampler.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        while updates.borrow_and_update().tick < tick {
            if updates.changed().await.is_err() {
                break;
            }
        }
    })
    .await
    .expect("sampler did not reach the expected tick");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_readers_never_see_mixed_ticks() {
    let sampler = Arc::new(MetricSampler::new(TickSource { tick: 0 }));
    sampler.start(Duration::from_millis(1)).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let sampler = sampler.clone();
            let done = done.clone();
            tokio::spawn(async move {
                let mut seen = 0u64;
                while !done.load(Ordering::Relaxed) {
                    let snapshot = sampler.latest();
                    if snapshot.tick > 0 {
                        assert_consistent(&snapshot);
                        assert!(snapshot.tick >= seen, "ticks went backwards");
                        seen = snapshot.tick;
                    }
                    tokio::task::yield_now().await;
                }
                seen
            })
        })
        .collect();

    wait_for_tick(&sampler, 50).await;
    done.store(true, Ordering::Relaxed);
    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
    sampler.stop().await;
}

#[tokio::test]
async fn test_stop_waits_and_freezes_snapshot() {
    let sampler = MetricSampler::new(TickSource { tick: 0 });
    sampler.start(Duration::from_millis(5)).unwrap();
    wait_for_tick(&sampler, 3).await;

    sampler.stop().await;
    assert!(!sampler.is_running());
    let frozen = sampler.latest();

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sampler.latest().tick, frozen.tick);
}

#[tokio::test]
async fn test_restart_continues_from_same_source() {
    let sampler = MetricSampler::new(TickSource { tick: 0 });
    sampler.start(Duration::from_millis(5)).unwrap();
    wait_for_tick(&sampler, 2).await;
    sampler.stop().await;
    let before = sampler.latest().tick;

    sampler.start(Duration::from_millis(5)).unwrap();
    wait_for_tick(&sampler, before + 2).await;
    sampler.stop().await;

    assert_consistent(&sampler.latest());
}

#[tokio::test]
async fn test_history_is_bounded() {
    let sampler = MetricSampler::with_history(TickSource { tick: 0 }, 5);
    sampler.start(Duration::from_millis(2)).unwrap();
    wait_for_tick(&sampler, 12).await;
    sampler.stop().await;

    let history = sampler.history();
    assert_eq!(history.len(), 5);
    let ticks: Vec<u64> = history.iter().map(|s| s.tick).collect();
    let mut sorted = ticks.clone();
    sorted.sort_unstable();
    assert_eq!(ticks, sorted);
    assert_eq!(history.last().map(|s| s.tick), Some(sampler.latest().tick));
}

/// Every read blocks long enough for a stop to arrive mid-tick
struct SlowSource;

impl CounterSource for SlowSource {
    fn cpu_percent(&mut self) -> Result<f32, SamplerError> {
        std::thread::sleep(Duration::from_millis(150));
        Ok(1.0)
    }
    fn memory(&mut self) -> Result<MemoryStats, SamplerError> {
        Ok(MemoryStats::new(1, 0))
    }
    fn disk_io(&mut self) -> Result<DiskIo, SamplerError> {
        Ok(DiskIo::default())
    }
    fn network_io(&mut self) -> Result<NetworkIo, SamplerError> {
        Ok(NetworkIo::default())
    }
}

#[tokio::test]
async fn test_abandoned_stop_does_not_wedge_the_sampler() {
    let sampler = MetricSampler::new(SlowSource);
    sampler.start(Duration::from_millis(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Give up on stop while the tick is still reading
    let abandoned = tokio::time::timeout(Duration::from_millis(10), sampler.stop()).await;
    assert!(abandoned.is_err());
    assert!(!sampler.is_running());

    // The task finishes its tick and returns the source on its own
    tokio::time::sleep(Duration::from_millis(400)).await;
    sampler.start(Duration::from_millis(1)).unwrap();
    assert!(sampler.is_running());
    sampler.stop().await;
    assert!(!sampler.is_running());
}

/// Network reads fail on every other tick
struct FlakyNetwork {
    tick: u64,
}

impl CounterSource for FlakyNetwork {
    fn cpu_percent(&mut self) -> Result<f32, SamplerError> {
        self.tick += 1;
        Ok(10.0)
    }
    fn memory(&mut self) -> Result<MemoryStats, SamplerError> {
        Ok(MemoryStats::new(100, 50))
    }
    fn disk_io(&mut self) -> Result<DiskIo, SamplerError> {
        Ok(DiskIo::default())
    }
    fn network_io(&mut self) -> Result<NetworkIo, SamplerError> {
        if self.tick % 2 == 0 {
            Err(SamplerError::read_failure(MetricField::NetworkIo, "interface gone"))
        } else {
            Ok(NetworkIo {
                bytes_sent: self.tick,
                bytes_recv: self.tick,
            })
        }
    }
}

#[tokio::test]
async fn test_transient_failure_marks_field_stale() {
    let sampler = MetricSampler::new(FlakyNetwork { tick: 0 });
    sampler.start(Duration::from_millis(5)).unwrap();
    wait_for_tick(&sampler, 4).await;
    sampler.stop().await;

    for snapshot in sampler.history() {
        if snapshot.tick % 2 == 0 {
            assert_eq!(snapshot.stale, vec![MetricField::NetworkIo]);
            assert_eq!(snapshot.network_io.bytes_sent, snapshot.tick - 1);
        } else {
            assert!(snapshot.stale.is_empty());
            assert_eq!(snapshot.network_io.bytes_sent, snapshot.tick);
        }
    }
}

#[tokio::test]
async fn test_global_accessor() {
    let sampler = Arc::new(MetricSampler::new(TickSource { tick: 0 }));
    assert!(install_global(sampler.clone()).is_ok());
    assert!(install_global(Arc::new(MetricSampler::new(TickSource { tick: 0 }))).is_err());

    assert_eq!(latest_metrics().map(|s| s.tick), Some(0));

    sampler.start(Duration::from_millis(5)).unwrap();
    wait_for_tick(&sampler, 1).await;
    sampler.stop().await;

    let latest = latest_metrics().unwrap();
    assert!(latest.tick >= 1);
    assert_consistent(&latest);
}
