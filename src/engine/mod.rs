//! 推理引擎：决定本轮执行哪条工具链
//!
//! ToolChainEngine 先看有没有待补参数的意图（上一轮缺参中止），有则把本轮消息绑定到第一个缺失参数后直接续跑；
//! 否则让 LLM 规划：system prompt 含工具目录、规划格式、agent 状态与最近对话，输出直接回答或工具链 JSON。
//! 工具链全部成功且存在挂起任务时，恢复最近挂起的任务。

pub mod planner;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::core::supervisor::{Decision, SupervisorVerdict, ENTRY_TASK};
use crate::core::AgentError;
use crate::llm::{LlmClient, Message};
use crate::memory::{ResumedTask, SessionStore};
use crate::tools::prompts::parameter_prompt;
use crate::tools::{plan_schema_json, ChainReport, ToolChainExecutor};

pub use planner::{parse_plan, strip_reasoning, PlanOutput};

/// 单轮输入
#[derive(Clone, Copy, Debug)]
pub struct TurnRequest<'a> {
    pub identity: &'a str,
    /// 带身份标签的消息：`[user_id:U1] ...`
    pub message: &'a str,
    /// 用户原文
    pub raw_message: &'a str,
    pub verdict: &'a SupervisorVerdict,
}

/// 推理引擎
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    /// 生成本轮回复文本（未经规整）
    async fn respond(&self, request: TurnRequest<'_>) -> Result<String, AgentError>;
}

/// 给消息加上身份标签
pub fn tag_message(identity: &str, message: &str) -> String {
    format!("[user_id:{}] {}", identity, message)
}

const BASE_PROMPT: &str = "Sen bir telekom çağrı merkezi asistanısın. Kullanıcıyla Türkçe konuş.
Araç gerekiyorsa yalnızca aşağıdaki şemaya uyan JSON döndür; araç gerekmiyorsa doğrudan yanıt ver.
Parametre adlarını araç tanımlarındaki gibi kullan, kendin parametre uydurma.
user_id parametresini kullanıcıya sorma, sistem ekler.
Kullanıcı paket ID'si verirse (örnek 'P3') initiate_package_change aracını kullan.
Hiçbir araç uymuyorsa tool_chain alanını boş dizi olarak döndür.";

const CONTEXT_RULES: &str = "Bağlam kuralları:
- Kullanıcı yeni bir konuya geçtiyse önce yeni isteği tamamla; askıdaki işlem sonra sürdürülecek.
- Araç çalışırken gelen girdiyi beklenen parametreye bağla, başka araca yönlendirme.
- Her zaman kullanıcının en son isteğini öncele.
- Yanıtında mevcut aşamayı ve bir sonraki adımı açıkça belirt.";

enum Planned {
    Answer(String),
    Ran(ChainReport),
}

/// 基于工具链规划的引擎
pub struct ToolChainEngine {
    llm: Arc<dyn LlmClient>,
    executor: ToolChainExecutor,
    store: Arc<SessionStore>,
    transcript_turns: usize,
}

impl ToolChainEngine {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        executor: ToolChainExecutor,
        store: Arc<SessionStore>,
        transcript_turns: usize,
    ) -> Self {
        Self {
            llm,
            executor,
            store,
            transcript_turns,
        }
    }

    async fn system_prompt(&self, identity: &str, verdict: &SupervisorVerdict) -> String {
        let state = self.store.format_agent_state(identity).await;
        let transcript = self.store.recent(identity, self.transcript_turns).await;
        let mut prompt = format!(
            "{}\n\n## Araçlar\n{}\n\n## Plan biçimi (JSON Schema)\n{}\n\n## Ajan durumu\n{}\n\n## Son konuşma\n{}",
            BASE_PROMPT,
            self.executor.catalog().to_schema_json(),
            plan_schema_json(),
            state,
            if transcript.is_empty() { "(yok)" } else { transcript.as_str() },
        );
        if verdict.should_apply_system_prompt {
            prompt.push_str("\n\n");
            prompt.push_str(CONTEXT_RULES);
            if let Some(intent) = &verdict.detected_new_intent {
                prompt.push_str(&format!("\n- Algılanan yeni niyet: {}", intent));
            }
        }
        prompt
    }

    /// 上一轮缺参中止的意图：本轮消息作为第一个缺失参数的值
    async fn resume_pending(
        &self,
        identity: &str,
        raw_message: &str,
    ) -> Result<Option<ChainReport>, AgentError> {
        let Some(intent) = self.store.take_pending_intent(identity).await? else {
            return Ok(None);
        };
        let mut pool = intent.parameters;
        if let Some(first) = intent.missing_parameters.first() {
            pool.insert(first.clone(), Value::String(raw_message.trim().to_string()));
        }
        pool.insert("user_id".into(), Value::String(identity.to_string()));
        tracing::info!(identity, chain = ?intent.tool_chain, "Resuming pending intent");
        let report = self.executor.run(identity, &intent.tool_chain, &mut pool).await?;
        Ok(Some(report))
    }

    async fn plan_and_run(&self, request: TurnRequest<'_>) -> Result<Planned, AgentError> {
        let system = self.system_prompt(request.identity, request.verdict).await;
        let output = self
            .llm
            .complete(&[Message::system(system), Message::user(request.message)])
            .await
            .map_err(AgentError::LlmError)?;

        let (tool_chain, mut pool) = match parse_plan(&output) {
            PlanOutput::Answer(text) => return Ok(Planned::Answer(text)),
            PlanOutput::Chain {
                tool_chain,
                parameters,
            } => (tool_chain, parameters),
        };
        if let Some(first) = tool_chain.first() {
            self.store
                .update_context(request.identity, |ctx| {
                    let idle = ctx
                        .current_task()
                        .map_or(true, |t| t == ENTRY_TASK);
                    if idle {
                        ctx.set_current_task(Some(first.as_str()));
                    }
                })
                .await?;
        }
        pool.insert("user_id".into(), Value::String(request.identity.to_string()));
        let report = self
            .executor
            .run(request.identity, &tool_chain, &mut pool)
            .await?;
        Ok(Planned::Ran(report))
    }

    /// 链条全部成功后恢复挂起任务，返回附加到回复中的说明
    async fn resume_suspended(&self, identity: &str) -> Result<Option<String>, AgentError> {
        let Some(resumed) = self.store.resume_suspended(identity).await? else {
            return Ok(None);
        };
        Ok(Some(describe_resumed(&resumed)))
    }
}

fn describe_resumed(resumed: &ResumedTask) -> String {
    let mut text = format!(
        "Askıdaki işleme geri dönüyoruz ({}): \"{}\"",
        resumed.task.as_deref().unwrap_or("önceki görev"),
        resumed.message
    );
    if let Some(param) = resumed.missing_parameters.first() {
        text.push('\n');
        text.push_str(parameter_prompt(param).trim_end());
    }
    text
}

/// 回复：逐工具摘要 + 汇总；缺参中止时以参数提问结尾
pub fn compose_reply(report: &ChainReport) -> String {
    if report.steps.is_empty() {
        return report.reply.clone();
    }
    format!("{}\n\n{}", report.details(), report.reply)
}

#[async_trait]
impl ReasoningEngine for ToolChainEngine {
    async fn respond(&self, request: TurnRequest<'_>) -> Result<String, AgentError> {
        let resumable = matches!(
            request.verdict.decision,
            Decision::InputForRunningTool | Decision::NoChange
        );
        let resumed = if resumable {
            self.resume_pending(request.identity, request.raw_message).await?
        } else {
            None
        };

        let report = match resumed {
            Some(report) => report,
            None => match self.plan_and_run(request).await? {
                Planned::Ran(report) => report,
                Planned::Answer(answer) => return Ok(answer),
            },
        };

        let mut reply = compose_reply(&report);
        if report.awaiting.is_none() {
            // 链条已结束（无待补参数），当前任务回到空闲，避免之后被当作进行中的任务挂起
            self.store
                .update_context(request.identity, |ctx| ctx.set_current_task(Some(ENTRY_TASK)))
                .await?;
        }
        if report.success {
            if let Some(note) = self.resume_suspended(request.identity).await? {
                reply.push_str("\n\n");
                reply.push_str(&note);
            }
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SqliteBackend;
    use crate::llm::ScriptedLlmClient;
    use crate::tools::executor::{ALL_DONE_REPLY, CLARIFY_REPLY};
    use crate::tools::{telecom_catalog, DeferredInput};

    struct Fixture {
        engine: ToolChainEngine,
        store: Arc<SessionStore>,
        llm: Arc<ScriptedLlmClient>,
    }

    fn fixture(replies: &[&str]) -> Fixture {
        let store = Arc::new(SessionStore::in_memory(20));
        let backend = Arc::new(SqliteBackend::in_memory().unwrap());
        let executor = ToolChainExecutor::new(
            Arc::new(telecom_catalog(backend)),
            store.clone(),
            Arc::new(DeferredInput),
            5,
        );
        let llm = Arc::new(ScriptedLlmClient::new(replies.iter().copied()));
        Fixture {
            engine: ToolChainEngine::new(llm.clone(), executor, store.clone(), 6),
            store,
            llm,
        }
    }

    fn request<'a>(message: &'a str, verdict: &'a SupervisorVerdict) -> TurnRequest<'a> {
        TurnRequest {
            identity: "U1",
            message,
            raw_message: message,
            verdict,
        }
    }

    #[tokio::test]
    async fn test_direct_answer() {
        let f = fixture(&["<think>x</think>Size nasıl yardımcı olabilirim?"]);
        let verdict = SupervisorVerdict::default();
        let reply = f.engine.respond(request("merhaba", &verdict)).await.unwrap();
        assert_eq!(reply, "Size nasıl yardımcı olabilirim?");
    }

    #[tokio::test]
    async fn test_empty_plan_asks_for_clarification() {
        let f = fixture(&[r#"{"tool_chain": [], "parameters": {}}"#]);
        let verdict = SupervisorVerdict::default();
        let reply = f.engine.respond(request("şey", &verdict)).await.unwrap();
        assert_eq!(reply, CLARIFY_REPLY);
    }

    #[tokio::test]
    async fn test_deferred_then_resumed_with_next_message() {
        let f = fixture(&[r#"{"tool_chain": ["get_bill_info"], "parameters": {}}"#]);
        let verdict = SupervisorVerdict::default();
        let first = f.engine.respond(request("faturamı göster", &verdict)).await.unwrap();
        assert_eq!(first, parameter_prompt("month").trim_end());
        assert_eq!(f.store.current_task("U1").await.as_deref(), Some("get_bill_info"));

        let input = SupervisorVerdict {
            decision: Decision::InputForRunningTool,
            ..SupervisorVerdict::default()
        };
        let second = f.engine.respond(request("2024-05", &input)).await.unwrap();
        assert!(second.contains("150.50 TL"));
        assert!(second.ends_with(ALL_DONE_REPLY));
        assert!(f.store.pending_intent("U1").await.is_none());
        assert_eq!(f.llm.calls(), 1);
    }

    #[tokio::test]
    async fn test_system_prompt_rules_only_when_flagged() {
        let f = fixture(&["tamam", "tamam"]);
        let plain = SupervisorVerdict::default();
        f.engine.respond(request("a", &plain)).await.unwrap();
        let flagged = SupervisorVerdict {
            should_apply_system_prompt: true,
            ..SupervisorVerdict::default()
        };
        f.engine.respond(request("b", &flagged)).await.unwrap();

        let system = |i: usize| f.llm.system_prompt(i).unwrap_or_default();
        assert!(!system(0).contains("Bağlam kuralları"));
        assert!(system(1).contains("Bağlam kuralları"));
        assert!(system(1).contains("get_bill_info"));
    }

    #[tokio::test]
    async fn test_success_resumes_suspended_task() {
        let f = fixture(&[r#"{"tool": "get_line_status", "args": {}}"#]);
        f.store
            .update_context("U1", |ctx| ctx.set_current_task(Some("paket_degisikligi")))
            .await
            .unwrap();
        f.store
            .set_tool_chain("U1", &["initiate_package_change".to_string()])
            .await
            .unwrap();
        f.store.switch_task("U1", "hat_durumu", &[ENTRY_TASK]).await.unwrap();

        let verdict = SupervisorVerdict::default();
        let reply = f.engine.respond(request("hattım açık mı", &verdict)).await.unwrap();
        assert!(reply.contains("faturalı"));
        assert!(reply.contains("paket_degisikligi"));
        assert_eq!(f.store.current_task("U1").await.as_deref(), Some("paket_degisikligi"));
        assert_eq!(f.store.suspended_task("U1").await, None);
        assert_eq!(f.store.suspended_depth("U1").await, 0);
    }

    #[test]
    fn test_tag_message() {
        assert_eq!(tag_message("U1", "merhaba"), "[user_id:U1] merhaba");
    }
}
