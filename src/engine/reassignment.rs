use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::storage::Storage;
use crate::types::{Job, JobFilter, JobId, JobStatus, Machine, MachineId, MachineStatus};

/// One job move in a reassignment report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub job_id: JobId,
    pub job_name: String,
    pub from: MachineId,
    pub to: MachineId,
    pub target_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReassignmentOutcome {
    NoActiveJobs,
    NoHealthyMachineAvailable,
    Reassigned {
        count: usize,
        assignments: Vec<Assignment>,
    },
}

impl ReassignmentOutcome {
    pub fn count(&self) -> usize {
        match self {
            ReassignmentOutcome::Reassigned { count, .. } => *count,
            _ => 0,
        }
    }
}

/// Pairs jobs with candidates round-robin, starting at the first candidate.
/// Both slices must already be in ascending id order.
pub fn plan(source: MachineId, jobs: &[Job], candidates: &[Machine]) -> Vec<Assignment> {
    if candidates.is_empty() {
        return Vec::new();
    }
    jobs.iter()
        .enumerate()
        .map(|(i, job)| {
            let target = &candidates[i % candidates.len()];
            Assignment {
                job_id: job.id,
                job_name: job.name.clone(),
                from: source,
                to: target.id,
                target_name: target.name.clone(),
            }
        })
        .collect()
}

/// Moves a machine's running and pending jobs onto healthy peers.
pub struct ReassignmentScheduler {
    store: Arc<dyn Storage>,
}

impl ReassignmentScheduler {
    pub fn new(store: Arc<dyn Storage>) -> Self {
        Self { store }
    }

    /// Each update is persisted on its own; a failure part-way leaves earlier
    /// moves in place.
    pub async fn reassign(&self, source: MachineId) -> Result<ReassignmentOutcome> {
        let eligible = self
            .store
            .list_jobs(&JobFilter::for_machine(source).with_statuses(&JobStatus::ACTIVE))
            .await?;
        if eligible.is_empty() {
            log::info!("Machine {} has no active jobs to reassign", source);
            return Ok(ReassignmentOutcome::NoActiveJobs);
        }

        let candidates: Vec<Machine> = self
            .store
            .list_machines(Some(MachineStatus::Healthy))
            .await?
            .into_iter()
            .filter(|m| m.id != source)
            .collect();
        if candidates.is_empty() {
            log::warn!(
                "No healthy machine available to take {} job(s) from machine {}",
                eligible.len(),
                source
            );
            return Ok(ReassignmentOutcome::NoHealthyMachineAvailable);
        }

        let assignments = plan(source, &eligible, &candidates);
        for assignment in &assignments {
            self.store
                .assign_job(assignment.job_id, assignment.to)
                .await?;
            log::debug!(
                "Job {} ({}) moved from machine {} to {}",
                assignment.job_id,
                assignment.job_name,
                assignment.from,
                assignment.to
            );
        }

        log::info!(
            "Reassigned {} job(s) from machine {} across {} healthy machine(s)",
            assignments.len(),
            source,
            candidates.len()
        );
        Ok(ReassignmentOutcome::Reassigned {
            count: assignments.len(),
            assignments,
        })
    }
}
