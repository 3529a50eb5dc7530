//! Scheduler configuration: which scheduler owns which engine, and the
//! per-engine stream-assignment flags downstream passes query.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Stream-policy flags for one engine under one scheduler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStreamPolicy {
    /// Engine id; keys the policy inside its scheduler.
    pub id: String,
    /// Human-readable engine label.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub independent_stream: bool,
    #[serde(default)]
    pub attach_stream: bool,
    #[serde(default)]
    pub skip_assign_stream: bool,
    /// Filled from the owning scheduler while building the table.
    #[serde(default)]
    pub scheduler_id: String,
}

/// One scheduler record as handed over by the external config reader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub scheduler_id: String,
    #[serde(default)]
    pub engine_policies: Vec<EngineStreamPolicy>,
}

/// Malformed scheduler records; all fatal at load time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerConfigError {
    #[error("scheduler config is missing a scheduler id")]
    MissingSchedulerId,
    #[error("scheduler '{scheduler}' contains an engine policy without an engine id")]
    MissingEngineId { scheduler: String },
    #[error("engine '{engine}' appears twice in scheduler '{scheduler}'")]
    DuplicateEngine { scheduler: String, engine: String },
}

/// The validated scheduler table. Read-only after construction.
#[derive(Debug, Default)]
pub struct SchedulerTable {
    schedulers: Vec<(String, BTreeMap<String, EngineStreamPolicy>)>,
}

impl SchedulerTable {
    /// Builds the table from reader-supplied records, rejecting malformed
    /// ones: a missing scheduler id, a missing engine id, or a duplicate
    /// engine id within one scheduler.
    pub fn from_configs(
        configs: impl IntoIterator<Item = SchedulerConfig>,
    ) -> Result<Self, SchedulerConfigError> {
        let mut schedulers = Vec::new();
        for config in configs {
            if config.scheduler_id.is_empty() {
                return Err(SchedulerConfigError::MissingSchedulerId);
            }
            let mut policies = BTreeMap::new();
            for mut policy in config.engine_policies {
                if policy.id.is_empty() {
                    return Err(SchedulerConfigError::MissingEngineId {
                        scheduler: config.scheduler_id.clone(),
                    });
                }
                policy.scheduler_id = config.scheduler_id.clone();
                if let Some(previous) = policies.insert(policy.id.clone(), policy) {
                    return Err(SchedulerConfigError::DuplicateEngine {
                        scheduler: config.scheduler_id.clone(),
                        engine: previous.id,
                    });
                }
            }
            schedulers.push((config.scheduler_id, policies));
        }
        Ok(Self { schedulers })
    }

    pub fn is_empty(&self) -> bool {
        self.schedulers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.schedulers.len()
    }

    pub fn scheduler_ids(&self) -> impl Iterator<Item = &str> {
        self.schedulers.iter().map(|(id, _)| id.as_str())
    }

    /// Number of schedulers whose policy map contains the engine. Registry
    /// validation requires exactly one.
    pub fn occurrences(&self, engine: &str) -> usize {
        self.schedulers
            .iter()
            .filter(|(_, policies)| policies.contains_key(engine))
            .count()
    }

    /// First policy found for the engine, scanning schedulers in load order.
    pub fn policy(&self, engine: &str) -> Option<&EngineStreamPolicy> {
        self.schedulers
            .iter()
            .find_map(|(_, policies)| policies.get(engine))
    }

    /// Whether the engine opts out of downstream stream assignment.
    ///
    /// Falls back to `false` with a warning when the engine is absent from
    /// every scheduler, where
    /// [`EngineRegistry::validate`](super::EngineRegistry::validate) treats
    /// the same absence as fatal. Both behaviors are load-bearing; keep them
    /// apart.
    pub fn is_stream_assign_skip(&self, engine: &str) -> bool {
        match self.policy(engine) {
            Some(policy) => policy.skip_assign_stream,
            None => {
                warn!(
                    engine,
                    "engine missing from every scheduler config; assuming stream assignment applies"
                );
                false
            }
        }
    }
}
