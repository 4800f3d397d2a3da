//! HTTP wire types and validation for formcoach-daemon.
//!
//! This crate is shared by the daemon and its clients to prevent schema drift.
//! The daemon remains the authority on validation, but clients can reuse the
//! same types to build requests and decode responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

pub const DEFAULT_TARGET_REPS: u32 = 10;
pub const DEFAULT_EXERCISE_NAME: &str = "Bicep Curl";
pub const BAD_FORM_STAGE: &str = "bad_form";
pub const NO_STAGE: &str = "none";
pub const TARGET_COMPLETED_MESSAGE: &str = "Target completed";
pub const MAX_FRAME_BYTES: usize = 20 * 1024 * 1024; // 20MB
pub const WRIST_HAND_AREA: &str = "Wrist / Hand";

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Machine-readable error codes returned in the `error` field of a failed
/// response. The string forms are part of the client contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    MissingImage,
    InvalidParams,
    PayloadTooLarge,
    MissingToken,
    InvalidToken,
    NoActiveSession,
    PythonUnavailable,
    PythonCooldown,
    PythonUnreachable,
    PythonTimeout,
    PythonError,
    StorageError,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MissingImage => "missing_image",
            ErrorCode::InvalidParams => "invalid_params",
            ErrorCode::PayloadTooLarge => "payload_too_large",
            ErrorCode::MissingToken => "missing_token",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::NoActiveSession => "no_active_session",
            ErrorCode::PythonUnavailable => "python_unavailable",
            ErrorCode::PythonCooldown => "python_cooldown",
            ErrorCode::PythonUnreachable => "python_unreachable",
            ErrorCode::PythonTimeout => "python_timeout",
            ErrorCode::PythonError => "python_error",
            ErrorCode::StorageError => "storage_error",
            ErrorCode::Internal => "internal_error",
        }
    }

    /// HTTP status class for the code.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::MissingImage | ErrorCode::InvalidParams => 400,
            ErrorCode::MissingToken | ErrorCode::InvalidToken => 401,
            ErrorCode::NoActiveSession => 409,
            ErrorCode::PayloadTooLarge => 413,
            ErrorCode::PythonUnavailable | ErrorCode::PythonCooldown => 503,
            ErrorCode::PythonUnreachable | ErrorCode::PythonError => 502,
            ErrorCode::PythonTimeout => 504,
            ErrorCode::StorageError | ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorCode,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl ErrorBody {
    pub fn new(error: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error,
            message: message.into(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Inbound requests
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub image: Option<String>,
}

impl AnalyzeRequest {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: Some(image.into()),
        }
    }

    /// Returns the encoded frame, rejecting absent or blank payloads.
    pub fn image(&self) -> Result<&str, ErrorBody> {
        match self.image.as_deref() {
            Some(image) if !image.trim().is_empty() => Ok(image),
            _ => Err(ErrorBody::new(ErrorCode::MissingImage, "image is required")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartSessionRequest {
    /// Accepts a number or a numeric string; anything else falls back to the default.
    #[serde(default)]
    pub target_reps: Option<Value>,
    #[serde(default)]
    pub exercise_name: Option<String>,
}

impl StartSessionRequest {
    pub fn new(exercise_name: &str, target_reps: u32) -> Self {
        Self {
            target_reps: Some(Value::from(target_reps)),
            exercise_name: Some(exercise_name.to_string()),
        }
    }

    /// Coerced rep goal; `None` when absent or below one.
    pub fn target_reps(&self) -> Option<u32> {
        let value = coerce_number(self.target_reps.as_ref())?;
        if value < 1.0 {
            return None;
        }
        Some(value.min(u32::MAX as f64).floor() as u32)
    }

    pub fn exercise_name(&self) -> Option<&str> {
        self.exercise_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndSessionRequest {
    #[serde(default)]
    pub llm_notes: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Upstream vision service
// ═══════════════════════════════════════════════════════════════════════════════

/// Body returned by the vision service's `/analyze` endpoint.
///
/// Historical field names are accepted side by side (`count`/`reps`,
/// `guidance`/`feedback`) and numbers may arrive as strings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawAnalysis {
    #[serde(default)]
    pub count: Option<Value>,
    #[serde(default)]
    pub reps: Option<Value>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub angle: Option<Value>,
    #[serde(default)]
    pub guidance: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub warning: Option<String>,
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default)]
    pub landmarks: Option<Value>,
}

/// Canonical per-frame analysis after normalization.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrameAnalysis {
    pub reps: u32,
    pub stage: String,
    pub angle: f64,
    pub guidance: String,
    pub warning: String,
    pub event: Option<Value>,
}

impl RawAnalysis {
    pub fn normalize(self) -> FrameAnalysis {
        let reps = coerce_number(self.count.as_ref())
            .or_else(|| coerce_number(self.reps.as_ref()))
            .filter(|value| *value > 0.0)
            .map(|value| value.min(u32::MAX as f64).floor() as u32)
            .unwrap_or(0);

        FrameAnalysis {
            reps,
            stage: self.stage.unwrap_or_else(|| NO_STAGE.to_string()),
            angle: coerce_number(self.angle.as_ref()).unwrap_or(0.0),
            guidance: self.guidance.or(self.feedback).unwrap_or_default(),
            warning: self.warning.unwrap_or_default(),
            event: self.event.filter(|value| !value.is_null()),
        }
    }
}

fn coerce_number(value: Option<&Value>) -> Option<f64> {
    let number = match value? {
        Value::Number(number) => number.as_f64()?,
        Value::String(text) => text.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    number.is_finite().then_some(number)
}

// ═══════════════════════════════════════════════════════════════════════════════
// Responses
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub completed_reps: u32,
    pub target_reps: u32,
    pub total_frames: u64,
    pub correct_form_frames: u64,
}

/// Response to `POST /api/analyze`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnalyzeResponse {
    Done(DoneResponse),
    Progress(ProgressResponse),
}

impl AnalyzeResponse {
    pub fn is_done(&self) -> bool {
        matches!(self, AnalyzeResponse::Done(_))
    }

    pub fn reps(&self) -> u32 {
        match self {
            AnalyzeResponse::Done(done) => done.reps,
            AnalyzeResponse::Progress(progress) => progress.reps,
        }
    }

    pub fn stats(&self) -> &SessionStats {
        match self {
            AnalyzeResponse::Done(done) => &done.stats,
            AnalyzeResponse::Progress(progress) => &progress.stats,
        }
    }
}

/// Sent once the reported rep count reaches the session goal. The client
/// treats this as the only authoritative end-of-capture signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoneResponse {
    pub done: bool,
    pub reps: u32,
    pub message: String,
    pub stats: SessionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub reps: u32,
    /// Same value as `reps`; older clients read this name.
    pub count: u32,
    pub stage: String,
    pub angle: f64,
    pub guidance: String,
    pub warning: String,
    pub event: Option<Value>,
    pub stats: SessionStats,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartSessionResponse {
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndSessionResponse {
    pub success: bool,
    pub saved: SessionRecord,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionRecord>,
}

/// Durable summary written once per ended session. Never updated in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub exercise_name: String,
    pub target_reps: u32,
    pub completed_reps: u32,
    pub avg_angle: f64,
    pub max_angle: f64,
    pub min_angle: f64,
    pub total_frames: u64,
    pub correct_form_frames: u64,
    pub accuracy: u32,
    pub duration_seconds: u64,
    pub llm_notes: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpstreamState {
    Closed,
    Open,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamHealth {
    pub configured: bool,
    pub state: UpstreamState,
    pub failure_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub tracked_evaluators: usize,
    pub upstream: UpstreamHealth,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Patient intake
// ═══════════════════════════════════════════════════════════════════════════════

/// Body of `POST /api/patient/intake`. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PatientIntakeRequest {
    pub age: Option<Value>,
    pub gender: Option<String>,
    pub affected_area: Option<String>,
    pub primary_complaint: Option<String>,
    pub pain_duration: Option<String>,
    pub pain_level: Option<Value>,
    pub pain_pattern: Option<Vec<String>>,
    pub movement_limitations: Option<Vec<String>>,
    pub wrist_limitations: Option<Vec<String>>,
    pub wrist_issue_type: Option<String>,
    pub injury_cause: Option<String>,
    pub onset: Option<String>,
    pub previous_surgeries: Option<String>,
    pub medical_conditions: Option<String>,
    pub medications: Option<String>,
    pub exercise_experience: Option<String>,
    pub goals: Option<Vec<String>>,
    pub custom_goal: Option<String>,
    pub diagnosis: Option<String>,
    pub pain_area: Option<String>,
    pub history: Option<String>,
}

impl PatientIntakeRequest {
    /// Builds the stored profile. `limitations` follows the affected area and
    /// `painArea` falls back to it.
    pub fn into_profile(self, user_id: &str, now: DateTime<Utc>) -> PatientProfile {
        let affected_area = self.affected_area.unwrap_or_default();
        let movement_limitations = self.movement_limitations.unwrap_or_default();
        let wrist_limitations = self.wrist_limitations.unwrap_or_default();
        let limitations = if affected_area == WRIST_HAND_AREA {
            wrist_limitations.clone()
        } else {
            movement_limitations.clone()
        };
        let pain_area = self
            .pain_area
            .filter(|area| !area.is_empty())
            .unwrap_or_else(|| affected_area.clone());

        PatientProfile {
            user_id: user_id.to_string(),
            age: coerce_number(self.age.as_ref())
                .filter(|age| *age >= 0.0)
                .map(|age| age.min(u32::MAX as f64).floor() as u32),
            gender: self.gender.unwrap_or_default(),
            affected_area,
            primary_complaint: self.primary_complaint.unwrap_or_default(),
            pain_duration: self.pain_duration.unwrap_or_default(),
            pain_level: coerce_number(self.pain_level.as_ref()).unwrap_or(0.0),
            pain_pattern: self.pain_pattern.unwrap_or_default(),
            movement_limitations,
            wrist_limitations,
            limitations,
            wrist_issue_type: self.wrist_issue_type.unwrap_or_default(),
            injury_cause: self.injury_cause.unwrap_or_default(),
            onset: self.onset.unwrap_or_default(),
            previous_surgeries: self.previous_surgeries.unwrap_or_default(),
            medical_conditions: self.medical_conditions.unwrap_or_default(),
            medications: self.medications.unwrap_or_default(),
            exercise_experience: self.exercise_experience.unwrap_or_default(),
            goals: self.goals.unwrap_or_default(),
            custom_goal: self.custom_goal.unwrap_or_default(),
            diagnosis: self.diagnosis.unwrap_or_default(),
            pain_area,
            history: self.history.unwrap_or_default(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One intake profile per user, replaced on every save.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatientProfile {
    pub user_id: String,
    pub age: Option<u32>,
    pub gender: String,
    pub affected_area: String,
    pub primary_complaint: String,
    pub pain_duration: String,
    pub pain_level: f64,
    pub pain_pattern: Vec<String>,
    pub movement_limitations: Vec<String>,
    pub wrist_limitations: Vec<String>,
    pub limitations: Vec<String>,
    pub wrist_issue_type: String,
    pub injury_cause: String,
    pub onset: String,
    pub previous_surgeries: String,
    pub medical_conditions: String,
    pub medications: String,
    pub exercise_experience: String,
    pub goals: Vec<String>,
    pub custom_goal: String,
    pub diagnosis: String,
    pub pain_area: String,
    pub history: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeSaveResponse {
    pub success: bool,
    pub profile: PatientProfile,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntakeResponse {
    pub profile: Option<PatientProfile>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn raw(value: Value) -> RawAnalysis {
        serde_json::from_value(value).expect("raw analysis")
    }

    #[test]
    fn normalize_fills_defaults_for_empty_payload() {
        let frame = raw(json!({})).normalize();
        assert_eq!(frame.reps, 0);
        assert_eq!(frame.stage, NO_STAGE);
        assert_eq!(frame.angle, 0.0);
        assert_eq!(frame.guidance, "");
        assert_eq!(frame.warning, "");
        assert_eq!(frame.event, None);
    }

    #[test]
    fn normalize_prefers_count_and_falls_back_to_reps() {
        assert_eq!(raw(json!({"count": 4, "reps": 9})).normalize().reps, 4);
        assert_eq!(raw(json!({"reps": 9})).normalize().reps, 9);
        assert_eq!(raw(json!({"count": null, "reps": 2})).normalize().reps, 2);
    }

    #[test]
    fn normalize_accepts_numeric_strings() {
        let frame = raw(json!({"count": "3", "angle": " 142.5 "})).normalize();
        assert_eq!(frame.reps, 3);
        assert_eq!(frame.angle, 142.5);
    }

    #[test]
    fn normalize_zeroes_garbage_numbers() {
        let frame = raw(json!({"count": "many", "angle": true})).normalize();
        assert_eq!(frame.reps, 0);
        assert_eq!(frame.angle, 0.0);

        let negative = raw(json!({"count": -2})).normalize();
        assert_eq!(negative.reps, 0);
    }

    #[test]
    fn normalize_uses_feedback_when_guidance_missing() {
        let frame = raw(json!({"feedback": "Keep elbow still"})).normalize();
        assert_eq!(frame.guidance, "Keep elbow still");

        let both = raw(json!({"guidance": "Lower slowly", "feedback": "ignored"})).normalize();
        assert_eq!(both.guidance, "Lower slowly");
    }

    #[test]
    fn raw_analysis_keeps_landmarks() {
        let analysis = raw(json!({"count": 1, "landmarks": [[0.1, 0.2]]}));
        assert!(analysis.landmarks.is_some());
    }

    #[test]
    fn target_reps_coercion() {
        let request: StartSessionRequest =
            serde_json::from_value(json!({"targetReps": "12"})).expect("request");
        assert_eq!(request.target_reps(), Some(12));

        let request: StartSessionRequest =
            serde_json::from_value(json!({"targetReps": 0})).expect("request");
        assert_eq!(request.target_reps(), None);

        let request: StartSessionRequest =
            serde_json::from_value(json!({"targetReps": "abc"})).expect("request");
        assert_eq!(request.target_reps(), None);

        let request: StartSessionRequest = serde_json::from_value(json!({})).expect("request");
        assert_eq!(request.target_reps(), None);
        assert_eq!(request.exercise_name(), None);
    }

    #[test]
    fn blank_image_is_missing() {
        let request = AnalyzeRequest::new("   ");
        let err = request.image().expect_err("blank image");
        assert_eq!(err.error, ErrorCode::MissingImage);
        assert!(AnalyzeRequest::default().image().is_err());
    }

    #[test]
    fn error_codes_serialize_as_snake_case() {
        let body = ErrorBody::new(ErrorCode::PythonCooldown, "");
        let value = serde_json::to_value(&body).expect("serialize");
        assert_eq!(value, json!({"error": "python_cooldown"}));
        assert_eq!(ErrorCode::PythonCooldown.as_str(), "python_cooldown");
        assert_eq!(ErrorCode::PythonTimeout.http_status(), 504);
    }

    #[test]
    fn analyze_response_decodes_both_shapes() {
        let stats = json!({
            "completedReps": 3,
            "targetReps": 3,
            "totalFrames": 7,
            "correctFormFrames": 6
        });
        let done: AnalyzeResponse = serde_json::from_value(json!({
            "done": true,
            "reps": 3,
            "message": TARGET_COMPLETED_MESSAGE,
            "stats": stats
        }))
        .expect("done");
        assert!(done.is_done());

        let progress: AnalyzeResponse = serde_json::from_value(json!({
            "reps": 1,
            "count": 1,
            "stage": "up",
            "angle": 40.0,
            "guidance": "",
            "warning": "",
            "event": null,
            "stats": stats
        }))
        .expect("progress");
        assert!(!progress.is_done());
        assert_eq!(progress.reps(), 1);
    }

    #[test]
    fn health_uses_camel_case_fields() {
        let health = HealthResponse {
            status: "ok".to_string(),
            version: "0.1.0".to_string(),
            tracked_evaluators: 2,
            upstream: UpstreamHealth {
                configured: true,
                state: UpstreamState::Closed,
                failure_count: 1,
                cooldown_until: None,
            },
        };
        let value = serde_json::to_value(&health).expect("serialize");
        assert_eq!(value["trackedEvaluators"], json!(2));
        assert_eq!(value["upstream"]["failureCount"], json!(1));
        assert_eq!(value["upstream"]["state"], json!("closed"));
        assert!(value.get("tracked_evaluators").is_none());
    }

    #[test]
    fn intake_fills_defaults_and_derives_fields() {
        let now = Utc::now();
        let request: PatientIntakeRequest = serde_json::from_value(json!({
            "age": "34",
            "affectedArea": "Shoulder",
            "painLevel": "6",
            "movementLimitations": ["Overhead reach"],
            "wristLimitations": ["Gripping"]
        }))
        .expect("intake");
        let profile = request.into_profile("user-1", now);

        assert_eq!(profile.age, Some(34));
        assert_eq!(profile.pain_level, 6.0);
        assert_eq!(profile.limitations, vec!["Overhead reach".to_string()]);
        assert_eq!(profile.pain_area, "Shoulder");
        assert_eq!(profile.gender, "");
        assert!(profile.goals.is_empty());
        assert_eq!(profile.created_at, now);
    }

    #[test]
    fn wrist_intake_uses_wrist_limitations() {
        let request: PatientIntakeRequest = serde_json::from_value(json!({
            "affectedArea": WRIST_HAND_AREA,
            "painArea": "Left wrist",
            "age": -3,
            "movementLimitations": ["Overhead reach"],
            "wristLimitations": ["Gripping"]
        }))
        .expect("intake");
        let profile = request.into_profile("user-1", Utc::now());

        assert_eq!(profile.limitations, vec!["Gripping".to_string()]);
        assert_eq!(profile.pain_area, "Left wrist");
        assert_eq!(profile.age, None);
        assert_eq!(profile.pain_level, 0.0);
    }
}
