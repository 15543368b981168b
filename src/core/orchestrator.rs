//! 单轮编排
//!
//! process(handle, message)：解析身份 → 标记 entry → 监管判定 → 记录用户消息 → 推理引擎 → 规整回复 → 记录回复。
//! 认证失败立即结束本轮；监管器出错只记日志；引擎出错返回 `engine error: ...`。

use std::sync::{Arc, OnceLock};

use regex::Regex;
use serde::Serialize;

use crate::core::identity::{is_national_id_format, is_valid_national_id, IdentityVerifier};
use crate::core::supervisor::{DialogueSupervisor, SupervisorVerdict, ENTRY_TASK};
use crate::core::AgentError;
use crate::engine::{strip_reasoning, tag_message, ReasoningEngine, TurnRequest};
use crate::memory::{InteractionKind, Role, SessionStore};

/// 规整后为空时的回复
pub const EMPTY_REPLY_FALLBACK: &str = "Üzgünüm, şu an yanıt üretemedim.";

/// 单轮结果 `{success, response | error}`
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TurnOutcome {
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: Some(response.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(error.into()),
        }
    }
}

static FENCE_RE: OnceLock<Regex> = OnceLock::new();

/// 去掉推理标记与代码围栏，trim；为空时给固定兜底句
pub fn normalize_reply(raw: &str) -> String {
    let text = strip_reasoning(raw);
    let text = FENCE_RE
        .get_or_init(|| Regex::new(r"```[A-Za-z0-9_-]*").unwrap())
        .replace_all(&text, "");
    let text = text.trim();
    if text.is_empty() {
        EMPTY_REPLY_FALLBACK.to_string()
    } else {
        text.to_string()
    }
}

/// 对话编排器
pub struct TurnOrchestrator {
    store: Arc<SessionStore>,
    supervisor: DialogueSupervisor,
    engine: Arc<dyn ReasoningEngine>,
    verifier: Arc<dyn IdentityVerifier>,
    enforce_checksum: bool,
}

impl TurnOrchestrator {
    pub fn new(
        store: Arc<SessionStore>,
        supervisor: DialogueSupervisor,
        engine: Arc<dyn ReasoningEngine>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self {
            store,
            supervisor,
            engine,
            verifier,
            enforce_checksum: false,
        }
    }

    /// 是否要求 TC 号通过校验位
    pub fn with_checksum(mut self, enforce: bool) -> Self {
        self.enforce_checksum = enforce;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    /// 登录：校验 TC 号、调用验证方，成功后保存 TC 号到 user_id 的映射
    pub async fn login(&self, national_id: &str) -> Result<String, AgentError> {
        let national_id = national_id.trim();
        if !is_national_id_format(national_id) {
            return Err(AgentError::Authentication(
                "T.C. kimlik numarası 11 haneli olmalıdır.".into(),
            ));
        }
        if self.enforce_checksum && !is_valid_national_id(national_id) {
            return Err(AgentError::Authentication(
                "Geçersiz T.C. kimlik numarası.".into(),
            ));
        }
        let result = self.verifier.verify(national_id, national_id).await;
        if !result.success {
            return Err(AgentError::Authentication(
                result
                    .error
                    .unwrap_or_else(|| "Kimlik doğrulama başarısız.".to_string()),
            ));
        }
        let user_id = result.user_id().ok_or(AgentError::MissingUserId)?.to_string();
        self.store.set_authenticated_user(national_id, &user_id).await?;
        tracing::info!(user_id = %user_id, "Login succeeded");
        Ok(user_id)
    }

    pub async fn logout(&self, national_id: &str) -> Result<(), AgentError> {
        self.store.clear_authenticated_user(national_id.trim()).await
    }

    /// TC 号形式的 handle 走登录映射或验证方；其他 handle 原样作为身份
    pub async fn resolve_identity(&self, handle: &str) -> Result<String, AgentError> {
        let handle = handle.trim();
        if !is_national_id_format(handle) {
            return Ok(handle.to_string());
        }
        if let Some(user_id) = self.store.authenticated_user(handle).await {
            return Ok(user_id);
        }
        self.login(handle).await
    }

    /// 处理一轮对话
    pub async fn process(&self, handle: &str, message: &str) -> TurnOutcome {
        let identity = match self.resolve_identity(handle).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(handle, error = %e, "Authentication failed");
                return TurnOutcome::failed(e.to_string());
            }
        };

        if let Err(e) = self.store.mark_entry(&identity, ENTRY_TASK).await {
            tracing::warn!(identity = %identity, error = %e, "Entry bookkeeping failed");
        }

        let verdict = match self.supervisor.supervise(&identity, message).await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(identity = %identity, error = %e, "Supervisor failed, continuing without verdict");
                SupervisorVerdict::default()
            }
        };

        match self.run_turn(&identity, message, &verdict).await {
            Ok(reply) => TurnOutcome::ok(reply),
            Err(e) => {
                tracing::error!(identity = %identity, retryable = e.is_retryable(), error = %e, "Turn failed");
                TurnOutcome::failed(format!("engine error: {}", e))
            }
        }
    }

    async fn run_turn(
        &self,
        identity: &str,
        message: &str,
        verdict: &SupervisorVerdict,
    ) -> Result<String, AgentError> {
        self.store
            .record(identity, Role::Human, message, InteractionKind::Message, None)
            .await?;
        let tagged = tag_message(identity, message);
        let raw = self
            .engine
            .respond(TurnRequest {
                identity,
                message: &tagged,
                raw_message: message,
                verdict,
            })
            .await?;
        let reply = normalize_reply(&raw);
        self.store
            .record(identity, Role::Agent, reply.as_str(), InteractionKind::Message, None)
            .await?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::VerificationResult;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ReasoningEngine for Echo {
        async fn respond(&self, request: TurnRequest<'_>) -> Result<String, AgentError> {
            Ok(format!("<think>...</think>```text\n{}\n```", request.message))
        }
    }

    struct Broken;

    #[async_trait]
    impl ReasoningEngine for Broken {
        async fn respond(&self, _request: TurnRequest<'_>) -> Result<String, AgentError> {
            Err(AgentError::LlmError("connection refused".into()))
        }
    }

    struct FixedVerifier;

    #[async_trait]
    impl IdentityVerifier for FixedVerifier {
        async fn verify(&self, national_id: &str, _challenge: &str) -> VerificationResult {
            match national_id {
                "12345678901" => VerificationResult::verified("U1"),
                "22222222222" => VerificationResult {
                    success: true,
                    data: None,
                    error: None,
                },
                _ => VerificationResult::rejected("Kullanıcı bulunamadı."),
            }
        }
    }

    fn orchestrator(engine: Arc<dyn ReasoningEngine>) -> TurnOrchestrator {
        let store = Arc::new(SessionStore::in_memory(20));
        let supervisor = DialogueSupervisor::new(Arc::new(MockLlmClient), store.clone());
        TurnOrchestrator::new(store, supervisor, engine, Arc::new(FixedVerifier))
    }

    #[test]
    fn test_normalize_reply() {
        assert_eq!(normalize_reply("<think>a</think>\n```json\nmerhaba\n```"), "merhaba");
        assert_eq!(normalize_reply("  <think>yarım"), EMPTY_REPLY_FALLBACK);
        assert_eq!(normalize_reply(""), EMPTY_REPLY_FALLBACK);
    }

    #[tokio::test]
    async fn test_national_id_routes_to_user() {
        let orch = orchestrator(Arc::new(Echo));
        let out = orch.process("12345678901", "merhaba").await;
        assert!(out.success);
        assert_eq!(out.response.as_deref(), Some("[user_id:U1] merhaba"));
        assert_eq!(orch.store().current_task("U1").await.as_deref(), Some(ENTRY_TASK));
        assert_eq!(orch.store().recent("U1", 2).await, "Human: merhaba\nAgent: [user_id:U1] merhaba");
        assert_eq!(orch.store().authenticated_user("12345678901").await.as_deref(), Some("U1"));
    }

    #[tokio::test]
    async fn test_authentication_failure_stops_turn() {
        let orch = orchestrator(Arc::new(Echo));
        let out = orch.process("99999999999", "merhaba").await;
        assert!(!out.success);
        assert_eq!(
            out.error.as_deref(),
            Some("Kullanıcı doğrulama hatası: Kullanıcı bulunamadı.")
        );
        let missing = orch.process("22222222222", "merhaba").await;
        assert_eq!(
            missing.error.as_deref(),
            Some("Kimlik doğrulama başarısız: user_id bulunamadı.")
        );
        assert!(orch.store().raw_interactions("99999999999", 10).await.is_empty());
    }

    #[tokio::test]
    async fn test_checksum_enforced_at_login() {
        let orch = orchestrator(Arc::new(Echo)).with_checksum(true);
        assert!(matches!(
            orch.login("12345678901").await,
            Err(AgentError::Authentication(_))
        ));
        assert!(orch.login("1234").await.is_err());
    }

    #[tokio::test]
    async fn test_engine_failure_reported() {
        let orch = orchestrator(Arc::new(Broken));
        let out = orch.process("U7", "selam").await;
        assert!(!out.success);
        assert_eq!(out.error.as_deref(), Some("engine error: LLM error: connection refused"));
    }

    #[tokio::test]
    async fn test_supervisor_failure_is_swallowed() {
        let store = Arc::new(SessionStore::in_memory(20));
        let supervisor = DialogueSupervisor::new(Arc::new(ScriptedLlmClient::new(Vec::<String>::new())), store.clone());
        let orch = TurnOrchestrator::new(store, supervisor, Arc::new(Echo), Arc::new(FixedVerifier));
        let out = orch.process("U7", "selam").await;
        assert_eq!(out.response.as_deref(), Some("[user_id:U7] selam"));
    }
}
