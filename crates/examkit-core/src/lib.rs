//! examkit core library
//!
//! Builds coding exams with an LLM agent working inside a sandbox container,
//! then solves and grades them the same way.
//!
//! ## Modules
//!
//! - [`repository`] - `GitRepository` command wrapper
//! - [`exam`]       - `Topic`, `ExamRecord`, exam ids and branch names
//! - [`agent`]      - `Agent` contract and the `CommandAgent` adapter
//! - [`sandbox`]    - per-workspace container sessions for agent turns
//! - [`builder`]    - `ExamBuilder`, two-phase exam authoring
//! - [`runner`]     - `ExamRunner`, solve and evaluate
//! - [`verify`]     - `verify_exam`
//! - [`score`]      - `parse_total_score`

pub mod agent;
pub mod builder;
pub mod config;
pub mod error;
pub mod exam;
pub mod fakes;
pub mod obs;
pub mod prompts;
pub mod repository;
pub mod runner;
pub mod sandbox;
pub mod score;
pub mod telemetry;
pub mod verify;

pub use agent::{Agent, AgentError, AgentOutcome, AgentRequest, CommandAgent, TurnMessage};
pub use builder::{BuildPhase, BuiltExam, ExamBuilder};
pub use config::ExamConfig;
pub use error::{ExamError, RepositoryCommandError, Result};
pub use exam::{branch_name, exam_id, ExamRecord, Topic};
pub use repository::{GitRepository, RepositoryRef};
pub use runner::{ExamRunner, NO_REPORT};
pub use sandbox::Sandbox;
pub use score::{parse_total_score, Score};
pub use telemetry::init_tracing;
pub use verify::{verify_exam, VerificationReport};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
