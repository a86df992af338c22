use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::cache::SensorCache;
use super::noise::{drift, NoiseSource};
use crate::types::{MachineId, SensorVector, ValidationError};

const READING_CHANNEL_CAPACITY: usize = 1024;

/// One simulated emission for one machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    pub machine_id: MachineId,
    pub reading: SensorVector,
    pub at: DateTime<Utc>,
}

/// Owns one periodic simulator task per machine.
///
/// The timer map lock is only held to swap handles and is never held across
/// an await. Timers are aborted when the manager is dropped.
pub struct TelemetryManager {
    cache: Arc<dyn SensorCache>,
    noise: Arc<dyn NoiseSource>,
    sender: broadcast::Sender<TelemetryReading>,
    timers: Mutex<HashMap<MachineId, JoinHandle<()>>>,
}

impl TelemetryManager {
    pub fn new(cache: Arc<dyn SensorCache>, noise: Arc<dyn NoiseSource>) -> Self {
        let (sender, _) = broadcast::channel(READING_CHANNEL_CAPACITY);
        Self {
            cache,
            noise,
            sender,
            timers: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> Arc<dyn SensorCache> {
        Arc::clone(&self.cache)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TelemetryReading> {
        self.sender.subscribe()
    }

    fn timers(&self) -> Result<MutexGuard<'_, HashMap<MachineId, JoinHandle<()>>>> {
        self.timers
            .lock()
            .map_err(|_| anyhow!("telemetry timer registry lock poisoned"))
    }

    /// Starts, or restarts with a new interval, the simulator for `machine_id`.
    ///
    /// A vector already in the cache wins over `initial`, so a restart keeps
    /// drifting from where it left off.
    pub async fn start(
        &self,
        machine_id: MachineId,
        initial: SensorVector,
        interval_secs: u64,
    ) -> Result<()> {
        if interval_secs == 0 {
            return Err(ValidationError::NotPositive {
                field: "interval_secs",
            }
            .into());
        }

        let seed = match self.cache.get(machine_id).await? {
            Some(cached) => cached,
            None => {
                self.cache.put(machine_id, initial).await?;
                initial
            }
        };

        let period = Duration::from_secs(interval_secs);
        let task = tokio::spawn(run_timer(
            machine_id,
            seed,
            period,
            Arc::clone(&self.cache),
            Arc::clone(&self.noise),
            self.sender.clone(),
        ));

        let previous = self.timers()?.insert(machine_id, task);
        match previous {
            Some(old) => {
                old.abort();
                log::info!(
                    "Restarted telemetry for machine {} every {}s",
                    machine_id,
                    interval_secs
                );
            }
            None => log::info!(
                "Started telemetry for machine {} every {}s",
                machine_id,
                interval_secs
            ),
        }
        Ok(())
    }

    /// Returns whether a timer was running. The cached vector is left as is.
    pub fn stop(&self, machine_id: MachineId) -> Result<bool> {
        let handle = self.timers()?.remove(&machine_id);
        match handle {
            Some(task) => {
                let was_running = !task.is_finished();
                task.abort();
                log::info!("Stopped telemetry for machine {}", machine_id);
                Ok(was_running)
            }
            None => Ok(false),
        }
    }

    pub fn is_running(&self, machine_id: MachineId) -> bool {
        self.timers()
            .map(|timers| timers.get(&machine_id).is_some_and(|t| !t.is_finished()))
            .unwrap_or(false)
    }

    /// Ids with live timers, ascending.
    pub fn running(&self) -> Vec<MachineId> {
        let mut ids: Vec<MachineId> = match self.timers() {
            Ok(timers) => timers
                .iter()
                .filter(|(_, task)| !task.is_finished())
                .map(|(id, _)| *id)
                .collect(),
            Err(_) => Vec::new(),
        };
        ids.sort_unstable();
        ids
    }

    pub fn shutdown(&self) {
        let drained: Vec<(MachineId, JoinHandle<()>)> = match self.timers() {
            Ok(mut timers) => timers.drain().collect(),
            Err(_) => return,
        };
        for (_, task) in &drained {
            task.abort();
        }
        if !drained.is_empty() {
            log::info!("Stopped {} telemetry timer(s)", drained.len());
        }
    }
}

impl Drop for TelemetryManager {
    fn drop(&mut self) {
        if let Ok(timers) = self.timers.get_mut() {
            for (_, task) in timers.drain() {
                task.abort();
            }
        }
    }
}

async fn run_timer(
    machine_id: MachineId,
    seed: SensorVector,
    period: Duration,
    cache: Arc<dyn SensorCache>,
    noise: Arc<dyn NoiseSource>,
    sender: broadcast::Sender<TelemetryReading>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = seed;

    loop {
        ticker.tick().await;

        let current = match cache.get(machine_id).await {
            Ok(Some(cached)) => cached,
            Ok(None) => last,
            Err(e) => {
                log::warn!("Sensor cache read failed for machine {}: {}", machine_id, e);
                last
            }
        };

        let next = drift(&current, noise.as_ref());
        if let Err(e) = cache.put(machine_id, next).await {
            log::warn!("Sensor cache write failed for machine {}: {}", machine_id, e);
        }
        last = next;

        // No subscribers is not an error.
        let _ = sender.send(TelemetryReading {
            machine_id,
            reading: next,
            at: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{FixedNoise, InMemorySensorCache};

    fn manager(cache: Arc<InMemorySensorCache>) -> TelemetryManager {
        TelemetryManager::new(cache, Arc::new(FixedNoise(1.0)))
    }

    async fn no_emission_within(rx: &mut broadcast::Receiver<TelemetryReading>, secs: u64) -> bool {
        tokio::time::timeout(Duration::from_secs(secs), rx.recv())
            .await
            .is_err()
    }

    #[tokio::test(start_paused = true)]
    async fn test_emits_on_interval() {
        let cache = Arc::new(InMemorySensorCache::new());
        let telemetry = manager(cache.clone());
        let mut rx = telemetry.subscribe();

        telemetry.start(1, SensorVector::default(), 5).await.unwrap();
        let started = Instant::now();

        let first = rx.recv().await.unwrap();
        assert_eq!(first.machine_id, 1);
        assert_eq!(first.reading, SensorVector::new(51.0, 1.5, 42.0));
        assert!(started.elapsed() >= Duration::from_secs(5));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.reading, SensorVector::new(52.0, 1.8, 44.0));
        assert_eq!(cache.get(1).await.unwrap(), Some(second.reading));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_rejected() {
        let telemetry = manager(Arc::new(InMemorySensorCache::new()));
        let err = telemetry.start(1, SensorVector::default(), 0).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<ValidationError>(),
            Some(&ValidationError::NotPositive {
                field: "interval_secs"
            })
        );
        assert!(!telemetry.is_running(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_vector_wins_over_initial() {
        let cache = Arc::new(InMemorySensorCache::new());
        cache.put(3, SensorVector::new(70.0, 2.0, 60.0)).await.unwrap();
        let telemetry = manager(cache.clone());
        let mut rx = telemetry.subscribe();

        telemetry.start(3, SensorVector::default(), 1).await.unwrap();
        let reading = rx.recv().await.unwrap();
        assert_eq!(reading.reading, SensorVector::new(71.0, 2.3, 62.0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_emissions() {
        let cache = Arc::new(InMemorySensorCache::new());
        let telemetry = manager(cache.clone());
        let mut rx = telemetry.subscribe();

        telemetry.start(1, SensorVector::default(), 2).await.unwrap();
        let last = rx.recv().await.unwrap();

        assert!(telemetry.stop(1).unwrap());
        assert!(!telemetry.stop(1).unwrap());
        assert!(!telemetry.is_running(1));
        assert!(no_emission_within(&mut rx, 60).await);
        assert_eq!(cache.get(1).await.unwrap(), Some(last.reading));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_vector_and_replaces_interval() {
        let cache = Arc::new(InMemorySensorCache::new());
        let telemetry = manager(cache.clone());
        let mut rx = telemetry.subscribe();

        telemetry.start(1, SensorVector::default(), 1).await.unwrap();
        let first = rx.recv().await.unwrap();

        telemetry.start(1, SensorVector::new(10.0, 0.0, 0.0), 30).await.unwrap();
        assert_eq!(telemetry.running(), vec![1]);
        assert!(no_emission_within(&mut rx, 29).await);

        let next = rx.recv().await.unwrap();
        assert_eq!(next.reading.temperature, first.reading.temperature + 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_machines_tick_independently() {
        let telemetry = manager(Arc::new(InMemorySensorCache::new()));
        let mut rx = telemetry.subscribe();

        telemetry.start(2, SensorVector::default(), 3).await.unwrap();
        telemetry.start(1, SensorVector::default(), 10).await.unwrap();
        assert_eq!(telemetry.running(), vec![1, 2]);

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(rx.recv().await.unwrap().machine_id);
        }
        assert_eq!(seen, vec![2, 2, 2, 1]);

        telemetry.shutdown();
        assert!(telemetry.running().is_empty());
    }
}
