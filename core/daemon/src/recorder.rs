//! Turns an ended session into a durable record.
//!
//! The evaluator is reset only after the record is written, so a storage
//! failure leaves the session intact for a retry. A session the user started
//! while the write was in flight is left alone.

use chrono::Utc;
use formcoach_protocol::{EndSessionRequest, ErrorCode, SessionRecord};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::EndPolicy;
use crate::db::{run_blocking, Db};
use crate::error::ApiError;
use crate::registry::{lock_evaluator, EvaluatorRegistry};

pub struct SessionRecorder {
    registry: Arc<EvaluatorRegistry>,
    db: Db,
    policy: EndPolicy,
}

impl SessionRecorder {
    pub fn new(registry: Arc<EvaluatorRegistry>, db: Db, policy: EndPolicy) -> Self {
        Self {
            registry,
            db,
            policy,
        }
    }

    pub fn policy(&self) -> EndPolicy {
        self.policy
    }

    pub async fn end_session(
        &self,
        user_id: &str,
        request: &EndSessionRequest,
    ) -> Result<SessionRecord, ApiError> {
        let evaluator = self.registry.get(user_id);
        let (record, generation) = {
            let evaluator = lock_evaluator(&evaluator);
            if !evaluator.is_active() && self.policy == EndPolicy::Reject {
                return Err(ApiError::new(
                    ErrorCode::NoActiveSession,
                    "No active session to end",
                ));
            }

            let data = evaluator.session_data();
            let record = SessionRecord {
                id: ulid::Ulid::new().to_string(),
                user_id: user_id.to_string(),
                exercise_name: evaluator.exercise_name().to_string(),
                target_reps: data.target_reps,
                completed_reps: data.completed_reps,
                avg_angle: data.avg_angle,
                max_angle: data.max_angle,
                min_angle: data.min_angle,
                total_frames: data.total_frames,
                correct_form_frames: data.correct_form_frames,
                accuracy: compute_accuracy(data.completed_reps, data.target_reps),
                duration_seconds: data.duration_seconds,
                llm_notes: request.llm_notes.clone().unwrap_or_default(),
                created_at: Utc::now(),
            };
            (record, evaluator.generation())
        };

        let db = self.db.clone();
        let to_store = record.clone();
        run_blocking(move || db.insert_session_record(&to_store))
            .await
            .map_err(|err| {
                error!(user_id = %user_id, error = %err, "Failed to save session record");
                ApiError::from(err)
            })?;

        if !lock_evaluator(&evaluator).reset_if_generation(generation) {
            debug!(user_id = %user_id, "Session restarted during save; keeping the new one");
        }
        info!(
            user_id = %user_id,
            record_id = %record.id,
            completed_reps = record.completed_reps,
            accuracy = record.accuracy,
            "Session saved"
        );
        Ok(record)
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionRecord>, ApiError> {
        let db = self.db.clone();
        let owner = user_id.to_string();
        run_blocking(move || db.list_session_records(&owner))
            .await
            .map_err(|err| {
                error!(user_id = %user_id, error = %err, "Failed to list session records");
                ApiError::from(err)
            })
    }
}

/// Whole-number percentage of the goal; 0 when there is no goal.
pub fn compute_accuracy(completed_reps: u32, target_reps: u32) -> u32 {
    if target_reps == 0 {
        return 0;
    }
    (f64::from(completed_reps) / f64::from(target_reps) * 100.0).round() as u32
}
