//! Frame analysis pipeline.
//!
//! One request flows: validate payload -> upstream gateway -> normalize ->
//! user's evaluator -> response. Evaluator mutation only happens after the
//! upstream answer arrives, so a failed or timed-out call changes nothing.

use formcoach_protocol::{
    AnalyzeRequest, AnalyzeResponse, DoneResponse, ProgressResponse, StartSessionRequest,
    StartSessionResponse, TARGET_COMPLETED_MESSAGE,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::gateway::UpstreamGateway;
use crate::registry::{lock_evaluator, EvaluatorRegistry};

pub struct FrameAnalysisOrchestrator {
    registry: Arc<EvaluatorRegistry>,
    gateway: Arc<UpstreamGateway>,
}

impl FrameAnalysisOrchestrator {
    pub fn new(registry: Arc<EvaluatorRegistry>, gateway: Arc<UpstreamGateway>) -> Self {
        Self { registry, gateway }
    }

    pub async fn analyze_frame(
        &self,
        user_id: &str,
        request: &AnalyzeRequest,
    ) -> Result<AnalyzeResponse, ApiError> {
        let image = request.image()?;
        let frame = self.gateway.analyze(image).await?.normalize();

        let evaluator = self.registry.get(user_id);
        let (stats, target_reps) = {
            let mut evaluator = lock_evaluator(&evaluator);
            evaluator.process_frame(frame.angle, &frame.stage, frame.reps);
            (evaluator.stats(), evaluator.target_reps())
        };

        if frame.reps >= target_reps {
            info!(
                user_id = %user_id,
                reps = frame.reps,
                target_reps,
                "Target reached"
            );
            return Ok(AnalyzeResponse::Done(DoneResponse {
                done: true,
                reps: frame.reps,
                message: TARGET_COMPLETED_MESSAGE.to_string(),
                stats,
            }));
        }

        debug!(
            user_id = %user_id,
            reps = frame.reps,
            stage = %frame.stage,
            "Frame analyzed"
        );
        Ok(AnalyzeResponse::Progress(ProgressResponse {
            reps: frame.reps,
            count: frame.reps,
            stage: frame.stage,
            angle: frame.angle,
            guidance: frame.guidance,
            warning: frame.warning,
            event: frame.event,
            stats,
        }))
    }

    /// Starts (or restarts) the user's session, then clears the upstream
    /// model state. The local session stays started if the reset fails.
    pub async fn start_session(
        &self,
        user_id: &str,
        request: &StartSessionRequest,
    ) -> Result<StartSessionResponse, ApiError> {
        let evaluator = self.registry.get(user_id);
        let (exercise_name, target_reps) = {
            let mut evaluator = lock_evaluator(&evaluator);
            evaluator.start_session(user_id, request.exercise_name(), request.target_reps());
            (
                evaluator.exercise_name().to_string(),
                evaluator.target_reps(),
            )
        };
        info!(
            user_id = %user_id,
            exercise = %exercise_name,
            target_reps,
            "Session started"
        );

        if let Err(err) = self.gateway.reset().await {
            warn!(user_id = %user_id, error = %err, "Vision service reset failed");
            return Err(err.into());
        }

        Ok(StartSessionResponse { success: true })
    }
}
