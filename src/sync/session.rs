//! Binds the planner's engines to the signed-in owner.

use log::info;
use std::sync::Arc;

use super::engine::SyncEngine;
use crate::error::SyncResult;
use crate::models::{PoolTask, ScheduleItem};
use crate::notify::Notifier;
use crate::persistence::Backend;
use crate::utils::retry::RetryPolicies;

/// The engines of one signed-in owner.
pub struct OwnerEngines {
    pub schedule: SyncEngine<ScheduleItem>,
    pub pool: SyncEngine<PoolTask>,
}

impl OwnerEngines {
    pub fn owner_id(&self) -> &str {
        self.schedule.owner_id()
    }

    fn shutdown(&self) {
        self.schedule.shutdown();
        self.pool.shutdown();
    }
}

pub struct PlannerSession {
    backend: Backend,
    policies: RetryPolicies,
    notifier: Arc<dyn Notifier>,
    active: Option<Arc<OwnerEngines>>,
}

impl PlannerSession {
    pub fn new(backend: Backend, policies: RetryPolicies, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            backend,
            policies,
            notifier,
            active: None,
        }
    }

    /// Tear down the previous owner's engines, then start fresh ones for
    /// `owner_id`. Nothing from the previous owner is carried over.
    pub async fn sign_in(&mut self, owner_id: &str) -> SyncResult<Arc<OwnerEngines>> {
        self.sign_out();

        let engines = Arc::new(OwnerEngines {
            schedule: SyncEngine::new(owner_id, self.backend.clone(), self.policies, self.notifier.clone()),
            pool: SyncEngine::new(owner_id, self.backend.clone(), self.policies, self.notifier.clone()),
        });

        let started = tokio::try_join!(engines.schedule.start(), engines.pool.start());
        let (items, tasks) = match started {
            Ok(counts) => counts,
            Err(e) => {
                engines.shutdown();
                return Err(e);
            }
        };

        info!(
            "[Session] Signed in {} ({} schedule items, {} pool tasks)",
            owner_id, items, tasks
        );
        self.active = Some(engines.clone());
        Ok(engines)
    }

    pub fn sign_out(&mut self) {
        if let Some(engines) = self.active.take() {
            info!("[Session] Signing out {}", engines.owner_id());
            engines.shutdown();
        }
    }

    pub fn engines(&self) -> Option<Arc<OwnerEngines>> {
        self.active.clone()
    }

    pub fn owner_id(&self) -> Option<&str> {
        self.active.as_deref().map(OwnerEngines::owner_id)
    }

    pub fn is_signed_in(&self) -> bool {
        self.active.is_some()
    }
}

impl Drop for PlannerSession {
    fn drop(&mut self) {
        self.sign_out();
    }
}
