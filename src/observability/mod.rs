//! 可观测性：tracing 订阅器与 token 统计

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::llm::LlmClient;

/// 日志：默认 info，可通过 RUST_LOG 覆盖
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

/// 输出 LLM 累计 token 使用
pub fn report_token_usage(llm: &dyn LlmClient) {
    let (prompt, completion, total) = llm.token_usage();
    tracing::info!(prompt, completion, total, "LLM token usage");
}
