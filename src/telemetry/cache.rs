use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::types::{MachineId, SensorVector};

/// Last-known sensor vector per machine.
#[async_trait]
pub trait SensorCache: Send + Sync {
    async fn get(&self, machine_id: MachineId) -> Result<Option<SensorVector>>;
    async fn put(&self, machine_id: MachineId, reading: SensorVector) -> Result<()>;
    async fn remove(&self, machine_id: MachineId) -> Result<bool>;
}

#[derive(Clone, Default)]
pub struct InMemorySensorCache {
    readings: Arc<RwLock<HashMap<MachineId, SensorVector>>>,
}

impl InMemorySensorCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SensorCache for InMemorySensorCache {
    async fn get(&self, machine_id: MachineId) -> Result<Option<SensorVector>> {
        let readings = self
            .readings
            .read()
            .map_err(|_| anyhow!("sensor cache lock poisoned"))?;
        Ok(readings.get(&machine_id).copied())
    }

    async fn put(&self, machine_id: MachineId, reading: SensorVector) -> Result<()> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| anyhow!("sensor cache lock poisoned"))?;
        readings.insert(machine_id, reading);
        Ok(())
    }

    async fn remove(&self, machine_id: MachineId) -> Result<bool> {
        let mut readings = self
            .readings
            .write()
            .map_err(|_| anyhow!("sensor cache lock poisoned"))?;
        Ok(readings.remove(&machine_id).is_some())
    }
}
