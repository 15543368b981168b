//! 核心编排层：错误、身份、状态投影、对话监管、单轮编排与组装

pub mod builder;
pub mod error;
pub mod identity;
pub mod orchestrator;
pub mod state;
pub mod supervisor;

pub use builder::{create_builder, SwitchboardBuilder};
pub use error::AgentError;
pub use identity::{is_national_id_format, is_valid_national_id, IdentityVerifier, VerificationResult};
pub use orchestrator::{normalize_reply, TurnOrchestrator, TurnOutcome};
pub use state::{AgentStateSnapshot, FullState};
pub use supervisor::{Decision, DialogueSupervisor, SupervisorVerdict};
