pub mod executor;
pub mod input;
pub mod outcome;
pub mod prompts;
pub mod registry;
pub mod schema;
pub mod telecom;

pub use executor::{ChainReport, StepResult, ToolChainExecutor};
pub use input::{ConsoleInput, DeferredInput, ParameterSource, QueuedInput};
pub use outcome::ToolOutcome;
pub use registry::{Tool, ToolCatalog};
pub use schema::{plan_schema_json, ParamKind, ParamSpec};
pub use telecom::{telecom_catalog, OperationTool};
