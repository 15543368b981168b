//! LLM 层：客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）

pub mod deepseek;
pub mod mock;
pub mod openai;
pub mod traits;

use std::sync::Arc;

pub use deepseek::{create_deepseek_client, DEEPSEEK_CHAT, DEEPSEEK_REASONER};
pub use mock::{MockLlmClient, ScriptedLlmClient};
pub use openai::{OpenAiClient, TokenUsage};
pub use traits::{LlmClient, Message, MessageRole};

use crate::config::LlmSection;

/// 根据 [llm] 配置选择后端；缺少 API Key 时退回 Mock
pub fn create_llm_from_config(cfg: &LlmSection) -> Arc<dyn LlmClient> {
    match cfg.provider.to_lowercase().as_str() {
        "deepseek" if has_key(&["DEEPSEEK_API_KEY", "OPENAI_API_KEY"]) => {
            let model = if cfg.model.starts_with("deepseek") {
                cfg.model.as_str()
            } else {
                DEEPSEEK_CHAT
            };
            tracing::info!("Using DeepSeek LLM ({})", model);
            Arc::new(create_deepseek_client(Some(model)))
        }
        "openai" => {
            tracing::info!(
                "Using OpenAI-compatible LLM ({}, base_url={:?})",
                cfg.model,
                cfg.base_url
            );
            Arc::new(OpenAiClient::new(cfg.base_url.as_deref(), &cfg.model, None))
        }
        "mock" => Arc::new(MockLlmClient),
        other => {
            tracing::warn!("LLM provider '{}' unavailable or missing API key, using Mock LLM", other);
            Arc::new(MockLlmClient)
        }
    }
}

fn has_key(names: &[&str]) -> bool {
    names.iter().any(|n| std::env::var(n).is_ok())
}
