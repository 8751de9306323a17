// crates/core/src/registry.rs
//! Client id → active job mapping, and cancellation.
//!
//! A job enters the registry as a `pending` reservation before anything is
//! allocated for it, becomes `running` once its process is registered, and is
//! removed when it ends by any path. Cancellation takes the entry out of the
//! map under the lock and only then kills the process tree, so concurrent
//! cancels for the same client see exactly one winner and a late event from
//! the dying process finds no live entry to publish through.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::error::DownloadError;
use crate::process::{KillOutcome, ProcessKiller};

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Client {0} already has an active job")]
    Busy(String),

    #[error("Reservation for client {0} was removed before the process was registered")]
    Vacated(String),
}

impl From<RegistryError> for DownloadError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Busy(client_id) => DownloadError::AlreadyRunning { client_id },
            RegistryError::Vacated(_) => DownloadError::Cancelled,
        }
    }
}

/// Outcome of [`JobRegistry::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Accepted,
    NotFound,
}

/// Read-only view of an active job.
#[derive(Debug, Clone, Serialize)]
pub struct JobSnapshot {
    pub client_id: String,
    pub job_id: String,
    pub locator: String,
    pub output: String,
    pub status: JobStatus,
    pub started_at: DateTime<Utc>,
    pub pid: Option<u32>,
}

#[derive(Debug)]
struct JobEntry {
    job_id: String,
    locator: String,
    output: String,
    status: JobStatus,
    started_at: DateTime<Utc>,
    killer: Option<ProcessKiller>,
}

#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, JobEntry>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, JobEntry>> {
        self.jobs.lock().unwrap_or_else(|poisoned| {
            tracing::error!("Job registry mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Claim `client_id` for a new job. Fails if the client already has a
    /// pending or running job.
    pub fn reserve(
        &self,
        client_id: &str,
        job_id: &str,
        locator: &str,
        output: &str,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.jobs();
        if jobs.contains_key(client_id) {
            return Err(RegistryError::Busy(client_id.to_string()));
        }
        jobs.insert(
            client_id.to_string(),
            JobEntry {
                job_id: job_id.to_string(),
                locator: locator.to_string(),
                output: output.to_string(),
                status: JobStatus::Pending,
                started_at: Utc::now(),
                killer: None,
            },
        );
        tracing::debug!(client_id, job_id, "Job reserved");
        Ok(())
    }

    /// Attach a spawned process to the reservation made for `job_id`.
    ///
    /// Returns [`RegistryError::Vacated`] when the reservation is gone (it was
    /// cancelled while the job was starting); the caller owns the process and
    /// must kill it.
    pub fn register(
        &self,
        client_id: &str,
        job_id: &str,
        killer: ProcessKiller,
    ) -> Result<(), RegistryError> {
        let mut jobs = self.jobs();
        match jobs.get_mut(client_id) {
            Some(entry) if entry.job_id == job_id => {
                tracing::debug!(client_id, job_id, pid = killer.pid(), "Job running");
                entry.killer = Some(killer);
                entry.status = JobStatus::Running;
                Ok(())
            }
            _ => Err(RegistryError::Vacated(client_id.to_string())),
        }
    }

    pub fn lookup(&self, client_id: &str) -> Option<JobSnapshot> {
        self.jobs()
            .get(client_id)
            .map(|entry| snapshot_of(client_id, entry))
    }

    /// True while `job_id` still owns the entry for `client_id`.
    pub fn is_active(&self, client_id: &str, job_id: &str) -> bool {
        self.jobs()
            .get(client_id)
            .is_some_and(|entry| entry.job_id == job_id)
    }

    /// Run `f` only if `job_id` still owns `client_id`, holding the registry
    /// lock for the duration so a concurrent cancel cannot interleave.
    /// `f` must not block.
    pub fn while_active<R>(&self, client_id: &str, job_id: &str, f: impl FnOnce() -> R) -> Option<R> {
        let jobs = self.jobs();
        match jobs.get(client_id) {
            Some(entry) if entry.job_id == job_id => Some(f()),
            _ => None,
        }
    }

    /// Remove the entry and kill its process tree.
    pub fn cancel(&self, client_id: &str) -> CancelOutcome {
        let removed = self.jobs().remove(client_id);
        let Some(entry) = removed else {
            tracing::debug!(client_id, "Cancel requested with no active job");
            return CancelOutcome::NotFound;
        };

        match entry.killer {
            Some(killer) => {
                let outcome = killer.kill();
                tracing::info!(
                    client_id,
                    job_id = %entry.job_id,
                    pid = killer.pid(),
                    already_exited = outcome == KillOutcome::AlreadyExited,
                    "Job cancelled"
                );
            }
            None => {
                tracing::info!(client_id, job_id = %entry.job_id, "Pending job cancelled before spawn");
            }
        }
        CancelOutcome::Accepted
    }

    /// Drop the entry for a finished job. A no-op if the entry now belongs to
    /// another job or was already removed by a cancel.
    pub fn release(&self, client_id: &str, job_id: &str) -> bool {
        let mut jobs = self.jobs();
        if jobs.get(client_id).is_some_and(|entry| entry.job_id == job_id) {
            jobs.remove(client_id);
            true
        } else {
            false
        }
    }

    /// Cancel every job. Used on shutdown.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(String, JobEntry)> = self.jobs().drain().collect();
        let count = drained.len();
        for (client_id, entry) in drained {
            if let Some(killer) = entry.killer {
                killer.kill();
            }
            tracing::info!(client_id = %client_id, job_id = %entry.job_id, "Job cancelled on shutdown");
        }
        count
    }

    pub fn snapshot(&self) -> Vec<JobSnapshot> {
        let mut list: Vec<JobSnapshot> = self
            .jobs()
            .iter()
            .map(|(client_id, entry)| snapshot_of(client_id, entry))
            .collect();
        list.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        list
    }

    pub fn active_count(&self) -> usize {
        self.jobs().len()
    }
}

fn snapshot_of(client_id: &str, entry: &JobEntry) -> JobSnapshot {
    JobSnapshot {
        client_id: client_id.to_string(),
        job_id: entry.job_id.clone(),
        locator: entry.locator.clone(),
        output: entry.output.clone(),
        status: entry.status,
        started_at: entry.started_at,
        pid: entry.killer.as_ref().map(ProcessKiller::pid),
    }
}
