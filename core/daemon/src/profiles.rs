//! Patient intake profiles. Plain per-user record storage next to the frame
//! pipeline; nothing here touches evaluators.

use chrono::Utc;
use formcoach_protocol::{PatientIntakeRequest, PatientProfile};
use tracing::{error, info};

use crate::db::{run_blocking, Db};
use crate::error::ApiError;

pub struct ProfileStore {
    db: Db,
}

impl ProfileStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn save_intake(
        &self,
        user_id: &str,
        request: PatientIntakeRequest,
    ) -> Result<PatientProfile, ApiError> {
        let profile = request.into_profile(user_id, Utc::now());
        let db = self.db.clone();
        let stored = run_blocking(move || db.upsert_profile(&profile))
            .await
            .map_err(|err| {
                error!(user_id = %user_id, error = %err, "Failed to save intake profile");
                ApiError::from(err)
            })?;
        info!(user_id = %user_id, affected_area = %stored.affected_area, "Intake profile saved");
        Ok(stored)
    }

    pub async fn get_intake(&self, user_id: &str) -> Result<Option<PatientProfile>, ApiError> {
        let db = self.db.clone();
        let owner = user_id.to_string();
        run_blocking(move || db.get_profile(&owner))
            .await
            .map_err(|err| {
                error!(user_id = %user_id, error = %err, "Failed to read intake profile");
                ApiError::from(err)
            })
    }
}
