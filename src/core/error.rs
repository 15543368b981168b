//! Agent 错误类型
//!
//! 按处理方式分层：认证错误终止本轮；Oracle 解析错误本地降级；工具错误由执行器归一化为 ToolOutcome；
//! 持久化错误向上传播，由调用方决定是否忽略。

use thiserror::Error;

/// 对话处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 身份无法验证；文本直接展示给用户
    #[error("Kullanıcı doğrulama hatası: {0}")]
    Authentication(String),

    /// 验证通过但拿不到 user_id
    #[error("Kimlik doğrulama başarısız: user_id bulunamadı.")]
    MissingUserId,

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Oracle output parse error: {0}")]
    OracleParse(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Tool execution failed: {0}")]
    ToolExecutionFailed(String),

    #[error("Tool timeout: {0}")]
    ToolTimeout(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// 缺少参数（非交互模式或输入超时），可重试
    #[error("Missing parameter: {0}")]
    MissingParameter(String),

    #[error("Backend error: {0}")]
    Backend(#[from] crate::backend::BackendError),

    #[error("Config error: {0}")]
    ConfigError(String),
}

impl AgentError {
    /// 是否可在下一轮补齐输入后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::MissingParameter(_) | AgentError::ToolTimeout(_) | AgentError::LlmError(_)
        )
    }
}
