//! 对话监管：每轮一次 Oracle 判定
//!
//! 判定用户是切换话题（ContextSwitch）、为进行中的工具补参数（InputForRunningTool），还是继续当前任务（NoChange），
//! 并据此更新会话状态。Oracle 输出无法解析时按 NoChange 处理，不修改任何状态。

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::AgentError;
use crate::engine::planner::{extract_json_block, strip_reasoning};
use crate::llm::{LlmClient, Message};
use crate::memory::SessionStore;

/// 首次接触时的任务标记；不会被挂起
pub const ENTRY_TASK: &str = "entry";
/// ContextSwitch 未给出新意图时使用
pub const CONTEXT_SWITCH_TASK: &str = "context_switch";
/// InputForRunningTool 且没有当前任务时使用
pub const RUNNING_TOOL_TASK: &str = "running_tool";

/// 监管判定
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Decision {
    ContextSwitch,
    InputForRunningTool,
    NoChange,
}

impl Decision {
    /// 容忍大小写与分隔符差异：`ContextSwitch` / `context_switch` / `CONTEXT-SWITCH`
    pub fn parse(raw: &str) -> Option<Self> {
        let key: String = raw
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "contextswitch" => Some(Decision::ContextSwitch),
            "inputforrunningtool" => Some(Decision::InputForRunningTool),
            "nochange" => Some(Decision::NoChange),
            _ => None,
        }
    }
}

/// 监管结果
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SupervisorVerdict {
    pub decision: Decision,
    pub should_apply_system_prompt: bool,
    pub detected_new_intent: Option<String>,
    pub notes: Option<String>,
}

impl SupervisorVerdict {
    pub fn no_change(notes: impl Into<String>) -> Self {
        Self {
            decision: Decision::NoChange,
            should_apply_system_prompt: false,
            detected_new_intent: None,
            notes: Some(notes.into()),
        }
    }
}

impl Default for SupervisorVerdict {
    fn default() -> Self {
        Self {
            decision: Decision::NoChange,
            should_apply_system_prompt: false,
            detected_new_intent: None,
            notes: None,
        }
    }
}

#[derive(Deserialize)]
struct RawVerdict {
    decision: String,
    #[serde(default)]
    should_apply_system_prompt: bool,
    #[serde(default)]
    detected_new_intent: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

/// 解析 Oracle 输出
pub fn parse_verdict(output: &str) -> Result<SupervisorVerdict, AgentError> {
    let cleaned = strip_reasoning(output);
    let json_str = extract_json_block(&cleaned)
        .ok_or_else(|| AgentError::OracleParse(format!("no JSON object: {}", cleaned)))?;
    let raw: RawVerdict = serde_json::from_str(json_str)
        .map_err(|e| AgentError::OracleParse(format!("{}: {}", e, json_str)))?;
    let decision = Decision::parse(&raw.decision)
        .ok_or_else(|| AgentError::OracleParse(format!("unknown decision: {}", raw.decision)))?;
    Ok(SupervisorVerdict {
        decision,
        should_apply_system_prompt: raw.should_apply_system_prompt,
        detected_new_intent: raw
            .detected_new_intent
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty() && s != "null"),
        notes: raw.notes,
    })
}

fn build_prompt(
    current_task: Option<&str>,
    suspended_task: Option<&str>,
    pending_params: &[String],
    message: &str,
) -> String {
    format!(
        r#"Bir telekom müşteri hizmetleri asistanının diyalog denetleyicisisin.
Kullanıcının son mesajını mevcut görev durumuna göre sınıflandır.

Mevcut görev: {current}
Askıdaki görev: {suspended}
Beklenen parametreler: {pending}
Kullanıcı mesajı: "{message}"

Kararlar:
- ContextSwitch: kullanıcı yeni bir konuya geçti; detected_new_intent alanına yeni niyeti yaz.
- InputForRunningTool: mesaj, devam eden işlemin beklediği bir parametre değeri.
- NoChange: kullanıcı mevcut görevle devam ediyor.

Yalnızca şu biçimde JSON döndür:
{{"decision": "ContextSwitch | InputForRunningTool | NoChange", "should_apply_system_prompt": true, "detected_new_intent": "...", "notes": "..."}}"#,
        current = current_task.unwrap_or("yok"),
        suspended = suspended_task.unwrap_or("yok"),
        pending = if pending_params.is_empty() {
            "yok".to_string()
        } else {
            pending_params.join(", ")
        },
        message = message.replace('"', "'"),
    )
}

/// 对话监管器
pub struct DialogueSupervisor {
    llm: Arc<dyn LlmClient>,
    store: Arc<SessionStore>,
}

impl DialogueSupervisor {
    pub fn new(llm: Arc<dyn LlmClient>, store: Arc<SessionStore>) -> Self {
        Self { llm, store }
    }

    /// 判定并更新状态；LLM 调用失败返回 Err（由调用方吞掉），解析失败降级为 NoChange
    pub async fn supervise(&self, identity: &str, message: &str) -> Result<SupervisorVerdict, AgentError> {
        let snapshot = self.store.snapshot(identity).await;
        let prompt = build_prompt(
            snapshot.current_task.as_deref(),
            snapshot.suspended_task.as_deref(),
            &snapshot.pending_params,
            message,
        );
        let output = self
            .llm
            .complete(&[Message::user(prompt)])
            .await
            .map_err(AgentError::LlmError)?;

        let verdict = match parse_verdict(&output) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(identity, error = %e, "Supervisor output unparseable, treating as NoChange");
                return Ok(SupervisorVerdict::no_change("parse_error"));
            }
        };
        tracing::debug!(identity, decision = ?verdict.decision, intent = ?verdict.detected_new_intent, "Supervisor verdict");

        match verdict.decision {
            Decision::ContextSwitch => {
                let intent = verdict
                    .detected_new_intent
                    .as_deref()
                    .unwrap_or(CONTEXT_SWITCH_TASK);
                let suspended = self.store.switch_task(identity, intent, &[ENTRY_TASK]).await?;
                if let Some(task) = suspended {
                    tracing::info!(identity, suspended = %task, new_task = %intent, "Context switch");
                }
            }
            Decision::InputForRunningTool => {
                let task = snapshot
                    .current_task
                    .unwrap_or_else(|| RUNNING_TOOL_TASK.to_string());
                self.store
                    .update_context(identity, |ctx| ctx.set_current_task(Some(task.as_str())))
                    .await?;
            }
            Decision::NoChange => {}
        }
        Ok(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::SUPERVISOR_MARKER;
    use crate::llm::ScriptedLlmClient;
    use crate::memory::{InteractionKind, Role};

    fn supervisor(replies: &[&str]) -> (DialogueSupervisor, Arc<SessionStore>, Arc<ScriptedLlmClient>) {
        let store = Arc::new(SessionStore::in_memory(20));
        let llm = Arc::new(ScriptedLlmClient::new(replies.iter().copied()));
        (DialogueSupervisor::new(llm.clone(), store.clone()), store, llm)
    }

    #[test]
    fn test_decision_aliases() {
        assert_eq!(Decision::parse("context_switch"), Some(Decision::ContextSwitch));
        assert_eq!(Decision::parse("INPUT-FOR-RUNNING-TOOL"), Some(Decision::InputForRunningTool));
        assert_eq!(Decision::parse("No Change"), Some(Decision::NoChange));
        assert_eq!(Decision::parse("maybe"), None);
    }

    #[tokio::test]
    async fn test_malformed_output_changes_nothing() {
        let (sup, store, _) = supervisor(&["bilmiyorum", r#"{"decision": "Belki"}"#]);
        store.mark_entry("U1", ENTRY_TASK).await.unwrap();
        store
            .record("U1", Role::Human, "fatura", InteractionKind::Message, None)
            .await
            .unwrap();
        let before = store.full_state("U1").await;

        for _ in 0..2 {
            let v = sup.supervise("U1", "merhaba").await.unwrap();
            assert_eq!(v.decision, Decision::NoChange);
            assert!(!v.should_apply_system_prompt);
            assert_eq!(v.notes.as_deref(), Some("parse_error"));
        }
        assert_eq!(store.full_state("U1").await, before);
    }

    #[tokio::test]
    async fn test_context_switch_suspends_live_task() {
        let (sup, store, llm) = supervisor(&[
            r#"{"decision": "ContextSwitch", "detected_new_intent": "fatura_sorgulama"}"#,
            r#"```json
{"decision": "context_switch", "should_apply_system_prompt": true, "detected_new_intent": "kampanya"}
```"#,
        ]);
        store.mark_entry("U1", ENTRY_TASK).await.unwrap();

        sup.supervise("U1", "faturamı öğrenmek istiyorum").await.unwrap();
        assert_eq!(store.current_task("U1").await.as_deref(), Some("fatura_sorgulama"));
        assert_eq!(store.suspended_depth("U1").await, 0);

        store
            .set_tool_chain("U1", &["get_bill_info".to_string()])
            .await
            .unwrap();
        let v = sup.supervise("U1", "kampanyalar neler").await.unwrap();
        assert!(v.should_apply_system_prompt);
        assert_eq!(store.current_task("U1").await.as_deref(), Some("kampanya"));
        assert_eq!(store.suspended_task("U1").await.as_deref(), Some("fatura_sorgulama"));
        assert_eq!(store.suspended_depth("U1").await, 1);
        assert!(!store.has_pending_tools("U1").await);

        let prompt = llm.user_prompt(1).unwrap();
        assert!(prompt.contains(SUPERVISOR_MARKER));
        assert!(prompt.contains("fatura_sorgulama"));
    }

    #[tokio::test]
    async fn test_input_for_running_tool_keeps_task() {
        let (sup, store, _) = supervisor(&[
            r#"{"decision": "InputForRunningTool"}"#,
            r#"{"decision": "InputForRunningTool"}"#,
        ]);
        sup.supervise("U1", "2024-05").await.unwrap();
        assert_eq!(store.current_task("U1").await.as_deref(), Some(RUNNING_TOOL_TASK));

        store
            .update_context("U1", |ctx| ctx.set_current_task(Some("fatura")))
            .await
            .unwrap();
        sup.supervise("U1", "havale").await.unwrap();
        assert_eq!(store.current_task("U1").await.as_deref(), Some("fatura"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_error() {
        let (sup, _, _) = supervisor(&[]);
        assert!(matches!(
            sup.supervise("U1", "x").await,
            Err(AgentError::LlmError(_))
        ));
    }
}
