use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use crate::storage::Storage;
use crate::types::{NewJob, NewMachine, ValidationError};

const DEMO_FLEET: &str = include_str!("../fixtures/demo_fleet.yaml");

/// Machines and jobs used to seed an empty store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fleet {
    #[serde(default)]
    pub machines: Vec<NewMachine>,
    #[serde(default)]
    pub jobs: Vec<NewJob>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedSummary {
    pub machines: usize,
    pub jobs: usize,
}

impl Fleet {
    pub fn from_yaml(content: &str) -> Result<Self> {
        let fleet: Fleet = serde_yaml::from_str(content).context("Failed to parse fleet YAML")?;
        fleet.validate()?;
        Ok(fleet)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fleet file {}", path.display()))?;
        Self::from_yaml(&content)
    }

    /// The bundled five-machine plant.
    pub fn demo() -> Result<Self> {
        Self::from_yaml(DEMO_FLEET)
    }

    /// Jobs may only reference machines with a pinned id in the same fleet.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut ids = HashSet::new();
        for machine in &self.machines {
            machine.validate()?;
            if let Some(id) = machine.id {
                if !ids.insert(id) {
                    return Err(ValidationError::DuplicateMachine(id));
                }
            }
        }
        for job in &self.jobs {
            job.validate()?;
            if let Some(machine_id) = job.machine_id {
                if !ids.contains(&machine_id) {
                    return Err(ValidationError::UnknownMachine(machine_id));
                }
            }
        }
        Ok(())
    }

    pub async fn seed(&self, store: &dyn Storage) -> Result<SeedSummary> {
        if !store.list_machines(None).await?.is_empty() {
            bail!("Refusing to seed a store that already holds machines");
        }
        for machine in &self.machines {
            store.insert_machine(machine.clone()).await?;
        }
        for job in &self.jobs {
            store.insert_job(job.clone()).await?;
        }
        log::info!(
            "Seeded {} machine(s) and {} job(s)",
            self.machines.len(),
            self.jobs.len()
        );
        Ok(SeedSummary {
            machines: self.machines.len(),
            jobs: self.jobs.len(),
        })
    }
}
