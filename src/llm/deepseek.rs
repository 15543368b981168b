//! DeepSeek 预设（OpenAI 兼容端点）
//!
//! - Base URL: https://api.deepseek.com
//! - 模型: deepseek-chat（常规对话）、deepseek-reasoner（思考模式，回复可能带 <think> 段）

use crate::llm::OpenAiClient;

pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
pub const DEEPSEEK_CHAT: &str = "deepseek-chat";
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// 创建 DeepSeek 客户端：Key 优先 DEEPSEEK_API_KEY，其次 OPENAI_API_KEY；
/// 模型依次取参数、DEEPSEEK_MODEL、deepseek-chat
pub fn create_deepseek_client(model: Option<&str>) -> OpenAiClient {
    let api_key = std::env::var("DEEPSEEK_API_KEY")
        .ok()
        .or_else(|| std::env::var("OPENAI_API_KEY").ok());

    let model = model
        .map(String::from)
        .or_else(|| std::env::var("DEEPSEEK_MODEL").ok())
        .unwrap_or_else(|| DEEPSEEK_CHAT.to_string());

    OpenAiClient::new(Some(DEEPSEEK_BASE_URL), &model, api_key.as_deref())
}
