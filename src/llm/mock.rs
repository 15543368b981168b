//! 离线 LLM 客户端（测试 / 无 API Key 时使用）
//!
//! - MockLlmClient：监管器 prompt 一律回 NoChange；其余回显用户最后一条消息，不触发工具。
//! - ScriptedLlmClient：按顺序返回预置回复，并记录收到的消息，供测试断言。

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::{LlmClient, Message, MessageRole};

/// 监管器 prompt 中的固定标记，Mock 据此区分调用方
pub const SUPERVISOR_MARKER: &str = "\"decision\"";

/// Mock 客户端：确定性输出，无网络
#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if last_user.contains(SUPERVISOR_MARKER) {
            return Ok(r#"{"decision": "NoChange", "should_apply_system_prompt": false, "detected_new_intent": null, "notes": "mock"}"#.to_string());
        }
        Ok(format!("Mock yanıt: {}", last_user))
    }
}

/// 脚本客户端：每次 complete 弹出一条预置回复；用尽后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条回复（Err 模拟后端故障）
    pub fn push(&self, reply: Result<String, String>) {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(reply);
        }
    }

    /// 已收到的请求数
    pub fn calls(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// 第 i 次请求中最后一条 user 消息
    pub fn user_prompt(&self, i: usize) -> Option<String> {
        let seen = self.seen.lock().ok()?;
        seen.get(i)?
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.clone())
    }

    /// 第 i 次请求中的 system 消息
    pub fn system_prompt(&self, i: usize) -> Option<String> {
        let seen = self.seen.lock().ok()?;
        seen.get(i)?
            .iter()
            .find(|m| m.role == MessageRole::System)
            .map(|m| m.content.clone())
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front();
        next.unwrap_or_else(|| Err("scripted replies exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_answers_supervisor_with_no_change() {
        let mock = MockLlmClient;
        let out = mock
            .complete(&[Message::user(r#"Return {"decision": ...}"#)])
            .await
            .unwrap();
        assert!(out.contains("NoChange"));
        let echo = mock.complete(&[Message::user("merhaba")]).await.unwrap();
        assert_eq!(echo, "Mock yanıt: merhaba");
    }

    #[tokio::test]
    async fn test_scripted_pops_in_order() {
        let llm = ScriptedLlmClient::new(["a", "b"]);
        llm.push(Err("down".into()));
        assert_eq!(llm.complete(&[Message::user("1")]).await.unwrap(), "a");
        assert_eq!(llm.complete(&[Message::user("2")]).await.unwrap(), "b");
        assert_eq!(llm.complete(&[]).await.unwrap_err(), "down");
        assert!(llm.complete(&[]).await.is_err());
        assert_eq!(llm.calls(), 4);
        assert_eq!(llm.user_prompt(1).as_deref(), Some("2"));
    }
}
