//! Per-user session evaluator.
//!
//! Tracks one active exercise session: rep count, form tally, angle samples
//! and timing. Rep detection itself belongs to the vision service; the
//! evaluator only confirms reps by watching the reported counter rise.

use chrono::{DateTime, Utc};
use formcoach_protocol::{SessionStats, BAD_FORM_STAGE, DEFAULT_EXERCISE_NAME, DEFAULT_TARGET_REPS};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluatorDefaults {
    pub target_reps: u32,
    pub exercise_name: String,
}

impl Default for EvaluatorDefaults {
    fn default() -> Self {
        Self {
            target_reps: DEFAULT_TARGET_REPS,
            exercise_name: DEFAULT_EXERCISE_NAME.to_string(),
        }
    }
}

/// Aggregates read from an evaluator at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub completed_reps: u32,
    pub target_reps: u32,
    pub total_frames: u64,
    pub correct_form_frames: u64,
    pub avg_angle: f64,
    pub max_angle: f64,
    pub min_angle: f64,
    pub duration_seconds: u64,
}

#[derive(Debug, Clone)]
pub struct SessionEvaluator {
    defaults: EvaluatorDefaults,
    session_active: bool,
    user_id: Option<String>,
    exercise_name: String,
    target_reps: u32,
    completed_reps: u32,
    last_reps: u32,
    total_frames: u64,
    correct_form_frames: u64,
    angles: Vec<f64>,
    start_time: Option<DateTime<Utc>>,
    generation: u64,
}

impl Default for SessionEvaluator {
    fn default() -> Self {
        Self::new(EvaluatorDefaults::default())
    }
}

impl SessionEvaluator {
    pub fn new(defaults: EvaluatorDefaults) -> Self {
        let defaults = EvaluatorDefaults {
            target_reps: defaults.target_reps.max(1),
            exercise_name: defaults.exercise_name,
        };
        Self {
            exercise_name: defaults.exercise_name.clone(),
            target_reps: defaults.target_reps,
            defaults,
            session_active: false,
            user_id: None,
            completed_reps: 0,
            last_reps: 0,
            total_frames: 0,
            correct_form_frames: 0,
            angles: Vec::new(),
            start_time: None,
            generation: 0,
        }
    }

    /// Returns the evaluator to its inactive default state. The session
    /// generation survives.
    pub fn reset(&mut self) {
        let generation = self.generation;
        *self = Self::new(self.defaults.clone());
        self.generation = generation;
    }

    /// Resets only if no session was started since `generation` was read.
    /// Returns whether the reset happened.
    pub fn reset_if_generation(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.reset();
        true
    }

    pub fn start_session(
        &mut self,
        user_id: &str,
        exercise_name: Option<&str>,
        target_reps: Option<u32>,
    ) {
        self.start_session_at(user_id, exercise_name, target_reps, Utc::now());
    }

    pub fn start_session_at(
        &mut self,
        user_id: &str,
        exercise_name: Option<&str>,
        target_reps: Option<u32>,
        now: DateTime<Utc>,
    ) {
        self.reset();
        self.generation = self.generation.wrapping_add(1);
        self.session_active = true;
        self.user_id = Some(user_id.to_string());
        if let Some(name) = exercise_name.map(str::trim).filter(|name| !name.is_empty()) {
            self.exercise_name = name.to_string();
        }
        self.target_reps = target_reps
            .filter(|reps| *reps >= 1)
            .unwrap_or(self.defaults.target_reps);
        self.start_time = Some(now);
    }

    /// Folds one analyzed frame into the session. No-op while inactive.
    ///
    /// A rep is confirmed when the reported counter strictly exceeds the last
    /// one seen, and counts as exactly one regardless of the jump size.
    pub fn process_frame(&mut self, angle: f64, stage: &str, reported_reps: u32) {
        if !self.session_active {
            return;
        }

        self.total_frames += 1;
        self.angles.push(angle);

        if stage != BAD_FORM_STAGE {
            self.correct_form_frames += 1;
        }

        if reported_reps > self.last_reps {
            self.completed_reps += 1;
        }
        self.last_reps = reported_reps;
    }

    pub fn session_data(&self) -> SessionData {
        self.session_data_at(Utc::now())
    }

    pub fn session_data_at(&self, now: DateTime<Utc>) -> SessionData {
        let (avg_angle, max_angle, min_angle) = angle_stats(&self.angles);
        let duration_seconds = self
            .start_time
            .map(|start| {
                let millis = now.signed_duration_since(start).num_milliseconds().max(0);
                ((millis as f64) / 1000.0).round() as u64
            })
            .unwrap_or(0);

        SessionData {
            completed_reps: self.completed_reps,
            target_reps: self.target_reps,
            total_frames: self.total_frames,
            correct_form_frames: self.correct_form_frames,
            avg_angle,
            max_angle,
            min_angle,
            duration_seconds,
        }
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            completed_reps: self.completed_reps,
            target_reps: self.target_reps,
            total_frames: self.total_frames,
            correct_form_frames: self.correct_form_frames,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session_active
    }

    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    pub fn exercise_name(&self) -> &str {
        &self.exercise_name
    }

    pub fn target_reps(&self) -> u32 {
        self.target_reps
    }

    pub fn completed_reps(&self) -> u32 {
        self.completed_reps
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Bumped by every session start.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// (avg, max, min); all zero for an empty sample set. The average is
/// rounded to a whole degree.
fn angle_stats(angles: &[f64]) -> (f64, f64, f64) {
    if angles.is_empty() {
        return (0.0, 0.0, 0.0);
    }

    let sum: f64 = angles.iter().sum();
    let avg = (sum / angles.len() as f64).round();
    let max = angles.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = angles.iter().copied().fold(f64::INFINITY, f64::min);
    (avg, max, min)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn started(target: u32) -> SessionEvaluator {
        let mut evaluator = SessionEvaluator::default();
        evaluator.start_session("user-1", Some("Bicep Curl"), Some(target));
        evaluator
    }

    #[test]
    fn process_frame_is_noop_while_inactive() {
        let mut evaluator = SessionEvaluator::default();
        evaluator.process_frame(90.0, "up", 1);
        let data = evaluator.session_data();
        assert_eq!(data.total_frames, 0);
        assert_eq!(data.completed_reps, 0);
        assert!(!evaluator.is_active());
    }

    #[test]
    fn strictly_increasing_reps_count_once_each() {
        let mut evaluator = started(10);
        for (index, reps) in [1, 3, 4, 9].into_iter().enumerate() {
            evaluator.process_frame(100.0 + index as f64, "up", reps);
        }
        assert_eq!(evaluator.completed_reps(), 4);
        assert_eq!(evaluator.total_frames(), 4);
    }

    #[test]
    fn repeated_or_decreasing_reps_do_not_count() {
        let mut evaluator = started(10);
        evaluator.process_frame(90.0, "up", 2);
        assert_eq!(evaluator.completed_reps(), 1);

        evaluator.process_frame(91.0, "up", 2);
        evaluator.process_frame(92.0, "down", 1);
        evaluator.process_frame(93.0, "down", 0);
        assert_eq!(evaluator.completed_reps(), 1);

        // Upstream counter restarted; the next rise counts again.
        evaluator.process_frame(94.0, "up", 1);
        assert_eq!(evaluator.completed_reps(), 2);
    }

    #[test]
    fn bad_form_frames_are_not_counted_as_correct() {
        let mut evaluator = started(10);
        evaluator.process_frame(90.0, "up", 0);
        evaluator.process_frame(90.0, BAD_FORM_STAGE, 0);
        evaluator.process_frame(90.0, "none", 0);
        let data = evaluator.session_data();
        assert_eq!(data.total_frames, 3);
        assert_eq!(data.correct_form_frames, 2);
    }

    #[test]
    fn angle_statistics() {
        let mut evaluator = started(10);
        for angle in [30.0, 150.0, 91.0] {
            evaluator.process_frame(angle, "up", 0);
        }
        let data = evaluator.session_data();
        assert_eq!(data.avg_angle, 90.0);
        assert_eq!(data.max_angle, 150.0);
        assert_eq!(data.min_angle, 30.0);
    }

    #[test]
    fn empty_session_has_zero_angles_and_elapsed_duration() {
        let start = Utc::now();
        let mut evaluator = SessionEvaluator::default();
        evaluator.start_session_at("user-1", None, Some(5), start);

        let data = evaluator.session_data_at(start + Duration::milliseconds(4_600));
        assert_eq!(data.avg_angle, 0.0);
        assert_eq!(data.max_angle, 0.0);
        assert_eq!(data.min_angle, 0.0);
        assert_eq!(data.duration_seconds, 5);
    }

    #[test]
    fn duration_is_zero_without_a_session() {
        let evaluator = SessionEvaluator::default();
        assert_eq!(evaluator.session_data().duration_seconds, 0);
    }

    #[test]
    fn invalid_target_falls_back_to_default() {
        let mut evaluator = SessionEvaluator::default();
        evaluator.start_session("user-1", None, Some(0));
        assert_eq!(evaluator.target_reps(), DEFAULT_TARGET_REPS);

        evaluator.start_session("user-1", Some("  "), None);
        assert_eq!(evaluator.target_reps(), DEFAULT_TARGET_REPS);
        assert_eq!(evaluator.exercise_name(), DEFAULT_EXERCISE_NAME);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut evaluator = started(3);
        evaluator.process_frame(45.0, "up", 1);
        evaluator.reset();
        evaluator.reset();

        let data = evaluator.session_data();
        assert_eq!(data.completed_reps, 0);
        assert_eq!(data.total_frames, 0);
        assert_eq!(data.correct_form_frames, 0);
        assert_eq!(data.avg_angle, 0.0);
        assert_eq!(data.duration_seconds, 0);
        assert_eq!(data.target_reps, DEFAULT_TARGET_REPS);
        assert!(!evaluator.is_active());
        assert_eq!(evaluator.user_id(), None);
    }

    #[test]
    fn start_session_discards_previous_state() {
        let mut evaluator = started(3);
        evaluator.process_frame(45.0, "up", 1);
        evaluator.start_session("user-1", Some("Squat"), Some(8));
        assert_eq!(evaluator.completed_reps(), 0);
        assert_eq!(evaluator.total_frames(), 0);
        assert_eq!(evaluator.exercise_name(), "Squat");
        assert_eq!(evaluator.target_reps(), 8);
        assert_eq!(evaluator.user_id(), Some("user-1"));
    }

    #[test]
    fn stale_generation_does_not_reset_new_session() {
        let mut evaluator = started(3);
        let ended = evaluator.generation();

        evaluator.start_session("user-1", Some("Squat"), Some(8));
        assert!(!evaluator.reset_if_generation(ended));
        assert!(evaluator.is_active());
        assert_eq!(evaluator.target_reps(), 8);

        let current = evaluator.generation();
        assert!(evaluator.reset_if_generation(current));
        assert!(!evaluator.is_active());
        assert_eq!(evaluator.generation(), current);
    }

    #[test]
    fn configured_defaults_survive_reset() {
        let mut evaluator = SessionEvaluator::new(EvaluatorDefaults {
            target_reps: 12,
            exercise_name: "Squat".to_string(),
        });
        evaluator.start_session("user-1", Some("Lunge"), Some(4));
        evaluator.reset();
        assert_eq!(evaluator.target_reps(), 12);
        assert_eq!(evaluator.exercise_name(), "Squat");
    }
}
