//! formcoach-daemon: live exercise-form coaching service.
//!
//! Clients stream webcam frames; the daemon forwards each frame to an
//! external pose-estimation service, folds the answer into the caller's
//! session, and persists a summary when the session ends.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod evaluator;
pub mod gateway;
pub mod logging;
pub mod orchestrator;
pub mod profiles;
pub mod recorder;
pub mod registry;
pub mod server;
pub mod state;
pub mod vision;
