//! Switchboard - 电信客服对话状态管理器
//!
//! 模块划分：
//! - **backend**: 业务数据操作（DataOperations）与 SQLite 演示后端
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 身份解析、对话监管、单轮编排、组装
//! - **engine**: 推理引擎（工具链规划与续跑）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 会话存储（交互历史、上下文、挂起栈、持久化）
//! - **tools**: 工具目录、参数收集与工具链执行器

pub mod backend;
pub mod config;
pub mod core;
pub mod engine;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod tools;

pub use crate::core::{TurnOrchestrator, TurnOutcome};
pub use crate::memory::SessionStore;
