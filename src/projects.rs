//! Project collaborator contract
//!
//! The project/milestone service owns project records; the escrow subsystem
//! only needs to resolve the contractor behind a project when a deposit
//! picks its beneficiary.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{error::EscrowError, EscrowResult};

/// Lookup of the contractor assigned to a project
#[async_trait]
pub trait ProjectDirectory: Send + Sync {
    async fn contractor_for(&self, project_id: Uuid) -> EscrowResult<Uuid>;
}

/// In-memory project directory
#[derive(Default)]
pub struct StaticProjectDirectory {
    contractors: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl StaticProjectDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the contractor for a project
    pub async fn assign(&self, project_id: Uuid, contractor_id: Uuid) {
        self.contractors
            .write()
            .await
            .insert(project_id, contractor_id);
    }
}

#[async_trait]
impl ProjectDirectory for StaticProjectDirectory {
    async fn contractor_for(&self, project_id: Uuid) -> EscrowResult<Uuid> {
        self.contractors
            .read()
            .await
            .get(&project_id)
            .copied()
            .ok_or_else(|| {
                EscrowError::validation(format!(
                    "Project {} has no contractor assigned",
                    project_id
                ))
            })
    }
}
