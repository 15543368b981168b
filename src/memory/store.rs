//! 会话存储：按身份划分的对话历史 + 上下文
//!
//! 所有读改写在同一把锁内完成并立即落盘（write-through），同一身份上的 pop/dequeue 等复合操作因此是原子的。
//! 落盘型存储先在副本上修改，落盘成功后才替换内存状态；落盘失败时内存保持修改前的样子。
//! 未见过的身份按空默认值处理；读取不创建条目，第一次写入时才创建。

use std::collections::HashMap;
use std::path::Path;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::core::{AgentError, AgentStateSnapshot, FullState};
use crate::memory::context::keys;
use crate::memory::{
    Interaction, InteractionKind, InteractionLog, InteractionMetadata, PendingIntent, ResumedTask,
    Role, SessionContext, StoreDocument, StorePersistence, SuspendedIntent, ToolOutputRecord,
};

/// 恢复挂起任务时没有可用消息的默认提示
const DEFAULT_RESUME_MESSAGE: &str = "Önceki görev devam ediyor.";

#[derive(Clone, Default)]
struct StoreState {
    interactions: HashMap<String, InteractionLog>,
    context: HashMap<String, SessionContext>,
}

/// 会话存储
pub struct SessionStore {
    state: Mutex<StoreState>,
    persistence: Option<StorePersistence>,
    max_turns: usize,
}

impl SessionStore {
    /// 打开（或新建）持久化存储；文件损坏时按空存储处理
    pub async fn open(path: impl AsRef<Path>, max_turns: usize) -> Self {
        let persistence = StorePersistence::new(path);
        let doc = persistence.load().await;
        let state = StoreState {
            interactions: doc
                .interactions
                .into_iter()
                .map(|(id, entries)| (id, InteractionLog::from_entries(entries, max_turns)))
                .collect(),
            context: doc.context.into_iter().collect(),
        };
        tracing::info!(
            "Session store loaded from {:?} ({} identities)",
            persistence.path(),
            state.context.len().max(state.interactions.len())
        );
        Self {
            state: Mutex::new(state),
            persistence: Some(persistence),
            max_turns,
        }
    }

    /// 不落盘的存储（测试、一次性会话）
    pub fn in_memory(max_turns: usize) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            persistence: None,
            max_turns,
        }
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    async fn persist(&self, state: &StoreState) -> Result<(), AgentError> {
        let Some(persistence) = &self.persistence else {
            return Ok(());
        };
        let doc = StoreDocument {
            interactions: state
                .interactions
                .iter()
                .map(|(id, log)| (id.clone(), log.to_vec()))
                .collect(),
            context: state
                .context
                .iter()
                .map(|(id, ctx)| (id.clone(), ctx.clone()))
                .collect(),
        };
        persistence
            .save(&doc)
            .await
            .map_err(|e| AgentError::Persistence(format!("{:?}: {}", persistence.path(), e)))
    }

    /// 在锁内修改状态；闭包返回 (结果, 是否有改动)，有改动才落盘。
    /// 落盘失败时丢弃这次修改。
    async fn transact<R>(&self, f: impl FnOnce(&mut StoreState) -> (R, bool)) -> Result<R, AgentError> {
        let mut state = self.state.lock().await;
        if self.persistence.is_none() {
            return Ok(f(&mut *state).0);
        }
        let mut draft = state.clone();
        let (out, changed) = f(&mut draft);
        if changed {
            self.persist(&draft).await?;
            *state = draft;
        }
        Ok(out)
    }

    async fn mutate<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> Result<R, AgentError> {
        self.transact(|state| (f(state), true)).await
    }

    /// 在锁内读改写某身份的上下文并落盘；闭包返回值原样返回
    pub async fn update_context<R>(
        &self,
        identity: &str,
        f: impl FnOnce(&mut SessionContext) -> R,
    ) -> Result<R, AgentError> {
        self.mutate(|state| f(state.context.entry(identity.to_string()).or_default()))
            .await
    }

    /// 只读访问某身份的上下文
    pub async fn read_context<R>(&self, identity: &str, f: impl FnOnce(&SessionContext) -> R) -> R {
        let state = self.state.lock().await;
        match state.context.get(identity) {
            Some(ctx) => f(ctx),
            None => f(&SessionContext::default()),
        }
    }

    // ---------------------------------------------------------------------
    // 交互历史
    // ---------------------------------------------------------------------

    /// 追加一条交互并落盘
    pub async fn record(
        &self,
        identity: &str,
        role: Role,
        message: impl Into<String>,
        kind: InteractionKind,
        metadata: Option<InteractionMetadata>,
    ) -> Result<(), AgentError> {
        let entry = Interaction {
            role,
            message: message.into(),
            kind,
            metadata,
        };
        self.append(identity, entry).await
    }

    pub async fn append(&self, identity: &str, entry: Interaction) -> Result<(), AgentError> {
        let max_turns = self.max_turns;
        self.mutate(|state| {
            state
                .interactions
                .entry(identity.to_string())
                .or_insert_with(|| InteractionLog::new(max_turns))
                .push(entry)
        })
        .await
    }

    /// 最近 n 条交互的文本记录（`Human: ...` / `Agent: ...`）
    pub async fn recent(&self, identity: &str, n: usize) -> String {
        let state = self.state.lock().await;
        state
            .interactions
            .get(identity)
            .map(|log| log.transcript(n))
            .unwrap_or_default()
    }

    pub async fn raw_interactions(&self, identity: &str, n: usize) -> Vec<Interaction> {
        let state = self.state.lock().await;
        state
            .interactions
            .get(identity)
            .map(|log| log.last(n))
            .unwrap_or_default()
    }

    pub async fn interactions_by_tool(&self, identity: &str, tool: &str) -> Vec<Interaction> {
        let state = self.state.lock().await;
        state
            .interactions
            .get(identity)
            .map(|log| {
                log.iter()
                    .filter(|i| i.tool_name() == Some(tool))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn has_used_tool(&self, identity: &str, tool: &str) -> bool {
        !self.interactions_by_tool(identity, tool).await.is_empty()
    }

    /// 最近 n 条工具错误（新 -> 旧）
    pub async fn recent_errors(&self, identity: &str, n: usize) -> Vec<String> {
        let state = self.state.lock().await;
        state
            .interactions
            .get(identity)
            .map(|log| {
                log.iter()
                    .rev()
                    .filter(|i| i.kind == InteractionKind::ToolError)
                    .take(n)
                    .map(|i| i.message.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn last_tool_error(&self, identity: &str) -> String {
        self.recent_errors(identity, 1)
            .await
            .into_iter()
            .next()
            .unwrap_or_default()
    }

    /// 历史中出现过的关键词（不区分大小写，按出现次数重复）
    pub async fn find_keywords_in_history(&self, identity: &str, keywords: &[&str]) -> Vec<String> {
        let state = self.state.lock().await;
        let Some(log) = state.interactions.get(identity) else {
            return Vec::new();
        };
        let mut matched = Vec::new();
        for interaction in log.iter() {
            let message = interaction.message.to_lowercase();
            for keyword in keywords {
                if message.contains(&keyword.to_lowercase()) {
                    matched.push(keyword.to_string());
                }
            }
        }
        matched
    }

    // ---------------------------------------------------------------------
    // 通用上下文
    // ---------------------------------------------------------------------

    pub async fn set_context(&self, identity: &str, key: &str, value: Value) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| ctx.set(key, value)).await
    }

    pub async fn get_context(&self, identity: &str, key: &str) -> Option<Value> {
        self.read_context(identity, |ctx| ctx.get(key).cloned()).await
    }

    pub async fn get_context_or(&self, identity: &str, key: &str, default: Value) -> Value {
        self.get_context(identity, key).await.unwrap_or(default)
    }

    pub async fn remove_context(&self, identity: &str, key: &str) -> Result<Option<Value>, AgentError> {
        self.update_context(identity, |ctx| ctx.remove(key)).await
    }

    /// 清空所有身份的历史与上下文
    pub async fn clear(&self) -> Result<(), AgentError> {
        self.mutate(|state| {
            state.interactions.clear();
            state.context.clear();
        })
        .await
    }

    pub async fn clear_context(&self, identity: &str) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| ctx.clear()).await
    }

    /// 丢弃当前任务与全部挂起记录
    pub async fn clear_intent(&self, identity: &str) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| {
            ctx.set_current_task(None);
            ctx.set_suspended_task(None);
            ctx.set(keys::SUSPENDED_INTENTS, Value::Array(Vec::new()));
        })
        .await
    }

    // ---------------------------------------------------------------------
    // 任务状态
    // ---------------------------------------------------------------------

    pub async fn current_task(&self, identity: &str) -> Option<String> {
        self.read_context(identity, |ctx| ctx.current_task()).await
    }

    pub async fn suspended_task(&self, identity: &str) -> Option<String> {
        self.read_context(identity, |ctx| ctx.suspended_task()).await
    }

    /// 首次接触时把 current_task 标记为 entry；已有任务则不动
    pub async fn mark_entry(&self, identity: &str, marker: &str) -> Result<(), AgentError> {
        let has_task = self.read_context(identity, |ctx| ctx.current_task().is_some()).await;
        if has_task {
            return Ok(());
        }
        self.update_context(identity, |ctx| {
            if ctx.current_task().is_none() {
                ctx.set_current_task(Some(marker));
            }
        })
        .await
    }

    pub async fn set_current_focus(&self, identity: &str, focus: Option<&str>) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| ctx.set_current_focus(focus)).await
    }

    pub async fn current_focus(&self, identity: &str) -> Option<String> {
        self.read_context(identity, |ctx| ctx.current_focus()).await
    }

    pub async fn set_tool_chain(&self, identity: &str, chain: &[String]) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| ctx.set_pending_tool_chain(chain)).await
    }

    pub async fn has_pending_tools(&self, identity: &str) -> bool {
        self.read_context(identity, |ctx| !ctx.pending_tool_chain().is_empty()).await
    }

    pub async fn clear_tool_chain(&self, identity: &str) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| {
            ctx.remove(keys::PENDING_TOOL_CHAIN);
        })
        .await
    }

    /// 取出并移除工具队列的队首；队列为空返回 None 且不落盘
    pub async fn dequeue_tool(&self, identity: &str) -> Result<Option<String>, AgentError> {
        self.transact(|state| {
            let Some(ctx) = state.context.get_mut(identity) else {
                return (None, false);
            };
            let mut chain = ctx.pending_tool_chain();
            if chain.is_empty() {
                return (None, false);
            }
            let head = chain.remove(0);
            ctx.set_pending_tool_chain(&chain);
            (Some(head), true)
        })
        .await
    }

    pub async fn set_last_action(&self, identity: &str, action: &str) -> Result<(), AgentError> {
        self.set_context(identity, keys::LAST_ACTION, Value::String(action.to_string()))
            .await
    }

    pub async fn last_action(&self, identity: &str) -> String {
        self.read_context(identity, |ctx| ctx.last_action())
            .await
            .unwrap_or_default()
    }

    /// 读取并删除 last_action；不存在时返回空串
    pub async fn consume_last_action(&self, identity: &str) -> Result<String, AgentError> {
        self.transact(|state| {
            match state
                .context
                .get_mut(identity)
                .and_then(|ctx| ctx.remove(keys::LAST_ACTION))
            {
                Some(value) => (value.as_str().map(str::to_string).unwrap_or_default(), true),
                None => (String::new(), false),
            }
        })
        .await
    }

    pub async fn add_tool_output(&self, identity: &str, tool: &str, output: Value) -> Result<(), AgentError> {
        let record = ToolOutputRecord {
            tool: tool.to_string(),
            output,
        };
        self.update_context(identity, |ctx| ctx.push_tool_output(record)).await
    }

    pub async fn tool_outputs(&self, identity: &str) -> Vec<ToolOutputRecord> {
        self.read_context(identity, |ctx| ctx.tool_outputs()).await
    }

    // ---------------------------------------------------------------------
    // 挂起 / 恢复
    // ---------------------------------------------------------------------

    /// 把当前工具链、焦点与最近一条交互压入挂起栈，然后清空工具链与焦点
    pub async fn push_suspended(&self, identity: &str) -> Result<(), AgentError> {
        self.mutate(|state| {
            Self::suspend_locked(state, identity);
        })
        .await
    }

    /// 挂起记录里的消息取用户最后一句话，恢复时据此复述原请求
    fn suspend_locked(state: &mut StoreState, identity: &str) -> SuspendedIntent {
        let message = state
            .interactions
            .get(identity)
            .and_then(|log| log.iter().rev().find(|i| i.role == Role::Human))
            .map(|i| i.message.clone())
            .unwrap_or_default();
        let ctx = state.context.entry(identity.to_string()).or_default();
        let suspended = SuspendedIntent {
            task: ctx.current_task(),
            tool_chain: ctx.pending_tool_chain(),
            focus: ctx.current_focus(),
            message,
            pending_intent: ctx.pending_intent(),
        };
        if suspended.tool_chain.is_empty() {
            tracing::warn!(identity, ?suspended, "Suspending a task with an empty tool chain");
        }
        let mut stack = ctx.suspension_stack();
        stack.push(suspended.clone());
        ctx.set_suspension_stack(&stack);
        ctx.set_pending_tool_chain(&[]);
        ctx.set_current_focus(None);
        ctx.set_pending_intent(None);
        suspended
    }

    /// 弹出最近一次挂起记录并恢复工具链与焦点；栈为空返回 None
    pub async fn pop_suspended(&self, identity: &str) -> Result<Option<ResumedTask>, AgentError> {
        self.transact(|state| {
            let resumed = state.context.get_mut(identity).and_then(Self::restore_locked);
            let changed = resumed.is_some();
            (resumed, changed)
        })
        .await
    }

    fn restore_locked(ctx: &mut SessionContext) -> Option<ResumedTask> {
        let mut stack = ctx.suspension_stack();
        let last = stack.pop()?;
        ctx.set_suspension_stack(&stack);
        ctx.set_pending_tool_chain(&last.tool_chain);
        ctx.set_current_focus(last.focus.as_deref());
        ctx.set_pending_intent(last.pending_intent.as_ref());
        let message = if last.message.is_empty() {
            DEFAULT_RESUME_MESSAGE.to_string()
        } else {
            last.message
        };
        Some(ResumedTask {
            task: last.task,
            tool_chain: last.tool_chain,
            message,
            missing_parameters: last
                .pending_intent
                .map(|p| p.missing_parameters)
                .unwrap_or_default(),
        })
    }

    /// 话题切换：当前有真实任务时先整体挂起（挂起栈 + suspended_task），再把 current_task 设为新意图。
    /// `idle_markers` 中的任务名（如 entry）不视为需要挂起的任务。
    pub async fn switch_task(
        &self,
        identity: &str,
        new_task: &str,
        idle_markers: &[&str],
    ) -> Result<Option<String>, AgentError> {
        self.mutate(|state| {
            let current = state
                .context
                .get(identity)
                .and_then(|ctx| ctx.current_task())
                .filter(|task| !idle_markers.contains(&task.as_str()));
            if current.is_some() {
                Self::suspend_locked(state, identity);
            }
            let ctx = state.context.entry(identity.to_string()).or_default();
            if let Some(task) = &current {
                ctx.set_suspended_task(Some(task));
            }
            ctx.set_current_task(Some(new_task));
            current
        })
        .await
    }

    /// 恢复最近挂起的任务：弹栈、恢复工具链，current_task 回到被挂起的任务，suspended_task 指向新的栈顶
    pub async fn resume_suspended(&self, identity: &str) -> Result<Option<ResumedTask>, AgentError> {
        self.transact(|state| {
            let Some(ctx) = state.context.get_mut(identity) else {
                return (None, false);
            };
            let Some(resumed) = Self::restore_locked(ctx) else {
                return (None, false);
            };
            if let Some(task) = &resumed.task {
                ctx.set_current_task(Some(task));
            }
            let next = ctx.suspension_stack().peek().and_then(|s| s.task.clone());
            ctx.set_suspended_task(next.as_deref());
            (Some(resumed), true)
        })
        .await
    }

    pub async fn suspended_depth(&self, identity: &str) -> usize {
        self.read_context(identity, |ctx| ctx.suspension_stack().len()).await
    }

    // ---------------------------------------------------------------------
    // 待补参数的意图
    // ---------------------------------------------------------------------

    pub async fn set_pending_intent(&self, identity: &str, intent: &PendingIntent) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| ctx.set_pending_intent(Some(intent))).await
    }

    pub async fn pending_intent(&self, identity: &str) -> Option<PendingIntent> {
        self.read_context(identity, |ctx| ctx.pending_intent()).await
    }

    /// 取出并删除待补参数的意图
    pub async fn take_pending_intent(&self, identity: &str) -> Result<Option<PendingIntent>, AgentError> {
        self.transact(|state| {
            let Some(ctx) = state.context.get_mut(identity) else {
                return (None, false);
            };
            let Some(intent) = ctx.pending_intent() else {
                return (None, false);
            };
            ctx.set_pending_intent(None);
            (Some(intent), true)
        })
        .await
    }

    pub async fn clear_pending_intent(&self, identity: &str) -> Result<(), AgentError> {
        self.update_context(identity, |ctx| ctx.set_pending_intent(None)).await
    }

    // ---------------------------------------------------------------------
    // 认证映射
    // ---------------------------------------------------------------------

    /// 记录凭据（如 TC 号）对应的规范身份
    pub async fn set_authenticated_user(&self, session_key: &str, identity: &str) -> Result<(), AgentError> {
        self.set_context(
            session_key,
            keys::AUTHENTICATED_USER_ID,
            Value::String(identity.to_string()),
        )
        .await
    }

    pub async fn authenticated_user(&self, session_key: &str) -> Option<String> {
        self.read_context(session_key, |ctx| ctx.authenticated_user()).await
    }

    pub async fn clear_authenticated_user(&self, session_key: &str) -> Result<(), AgentError> {
        let has = self.authenticated_user(session_key).await.is_some();
        if !has {
            return Ok(());
        }
        self.remove_context(session_key, keys::AUTHENTICATED_USER_ID)
            .await
            .map(|_| ())
    }

    // ---------------------------------------------------------------------
    // 诊断
    // ---------------------------------------------------------------------

    pub async fn snapshot(&self, identity: &str) -> AgentStateSnapshot {
        self.read_context(identity, AgentStateSnapshot::from_context).await
    }

    pub async fn format_agent_state(&self, identity: &str) -> String {
        self.snapshot(identity).await.to_prompt_json()
    }

    pub async fn full_state(&self, identity: &str) -> FullState {
        let state = self.state.lock().await;
        FullState {
            recent_interactions: state
                .interactions
                .get(identity)
                .map(|log| log.to_vec())
                .unwrap_or_default(),
            context: state.context.get(identity).cloned().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chain(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_suspend_resume_stack_law() {
        let store = SessionStore::in_memory(20);
        let id = "U1";
        for i in 0..3 {
            let tool = format!("tool{i}");
            let focus = format!("focus{i}");
            store
                .set_tool_chain(id, &chain(&[tool.as_str(), "next"]))
                .await
                .unwrap();
            store.set_current_focus(id, Some(focus.as_str())).await.unwrap();
            store.push_suspended(id).await.unwrap();
            assert!(!store.has_pending_tools(id).await);
            assert_eq!(store.current_focus(id).await, None);
        }
        for i in (0..3).rev() {
            let tool = format!("tool{i}");
            let resumed = store.pop_suspended(id).await.unwrap().unwrap();
            assert_eq!(resumed.tool_chain, chain(&[tool.as_str(), "next"]));
            assert!(resumed.missing_parameters.is_empty());
            assert_eq!(store.current_focus(id).await, Some(format!("focus{i}")));
        }
        assert!(store.pop_suspended(id).await.unwrap().is_none());
        assert_eq!(store.suspended_depth(id).await, 0);
    }

    #[tokio::test]
    async fn test_suspend_captures_last_interaction() {
        let store = SessionStore::in_memory(20);
        store
            .record("U1", Role::Human, "paketimi değiştirmek istiyorum", InteractionKind::Message, None)
            .await
            .unwrap();
        store
            .record("U1", Role::Agent, "- get_line_status: hattınız aktif", InteractionKind::Message, None)
            .await
            .unwrap();
        store.push_suspended("U1").await.unwrap();
        let resumed = store.pop_suspended("U1").await.unwrap().unwrap();
        assert_eq!(resumed.message, "paketimi değiştirmek istiyorum");
    }

    #[tokio::test]
    async fn test_failed_flush_leaves_state_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();
        let store = SessionStore::open(blocker.join("memory.json"), 20).await;

        assert!(store.set_context("U1", "current_task", json!("pay_bill")).await.is_err());
        assert_eq!(store.get_context("U1", "current_task").await, None);
        assert!(store
            .record("U1", Role::Human, "merhaba", InteractionKind::Message, None)
            .await
            .is_err());
        assert!(store.raw_interactions("U1", 10).await.is_empty());
        assert!(store.switch_task("U1", "hat_durumu", &["entry"]).await.is_err());
        assert_eq!(store.current_task("U1").await, None);
        assert_eq!(store.dequeue_tool("U1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_clear_operations() {
        let store = SessionStore::in_memory(20);
        for id in ["U1", "U2"] {
            store.mark_entry(id, "entry").await.unwrap();
            store.set_tool_chain(id, &chain(&["pay_bill"])).await.unwrap();
            store.switch_task(id, "pay_bill", &["entry"]).await.unwrap();
            store.switch_task(id, "hat_durumu", &["entry"]).await.unwrap();
            store
                .record(id, Role::Human, "selam", InteractionKind::Message, None)
                .await
                .unwrap();
        }

        store.clear_intent("U1").await.unwrap();
        let snap = store.snapshot("U1").await;
        assert_eq!(snap.current_task, None);
        assert_eq!(snap.suspended_task, None);
        assert_eq!(store.suspended_depth("U1").await, 0);
        assert_eq!(store.raw_interactions("U1", 10).await.len(), 1);

        store.clear_context("U2").await.unwrap();
        assert_eq!(store.current_task("U2").await, None);
        assert_eq!(store.suspended_depth("U2").await, 0);
        assert_eq!(store.raw_interactions("U2", 10).await.len(), 1);

        store.clear().await.unwrap();
        assert!(store.raw_interactions("U1", 10).await.is_empty());
        assert!(store.raw_interactions("U2", 10).await.is_empty());
        assert_eq!(store.full_state("U2").await, FullState::default());
    }

    #[tokio::test]
    async fn test_pop_empty_stack_uses_default_message() {
        let store = SessionStore::in_memory(20);
        store.push_suspended("U9").await.unwrap();
        let resumed = store.pop_suspended("U9").await.unwrap().unwrap();
        assert_eq!(resumed.message, DEFAULT_RESUME_MESSAGE);
    }

    #[tokio::test]
    async fn test_dequeue_law() {
        let store = SessionStore::in_memory(20);
        store.set_tool_chain("U1", &chain(&["a", "b", "c"])).await.unwrap();
        assert_eq!(store.dequeue_tool("U1").await.unwrap().as_deref(), Some("a"));
        assert_eq!(store.snapshot("U1").await.pending_tool_chain, chain(&["b", "c"]));
        assert_eq!(store.dequeue_tool("U1").await.unwrap().as_deref(), Some("b"));
        assert_eq!(store.dequeue_tool("U1").await.unwrap().as_deref(), Some("c"));
        assert_eq!(store.dequeue_tool("U1").await.unwrap(), None);
        assert_eq!(store.dequeue_tool("never-seen").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_consume_once() {
        let store = SessionStore::in_memory(20);
        store.set_context("U1", "last_action", json!("X")).await.unwrap();
        assert_eq!(store.consume_last_action("U1").await.unwrap(), "X");
        assert_eq!(store.consume_last_action("U1").await.unwrap(), "");
        assert_eq!(store.consume_last_action("nobody").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_bounded_history() {
        let store = SessionStore::in_memory(4);
        for i in 0..9 {
            store
                .record("U1", Role::Human, format!("m{i}"), InteractionKind::Message, None)
                .await
                .unwrap();
        }
        let kept: Vec<_> = store
            .raw_interactions("U1", 100)
            .await
            .into_iter()
            .map(|i| i.message)
            .collect();
        assert_eq!(kept, vec!["m5", "m6", "m7", "m8"]);
        assert_eq!(store.recent("U1", 2).await, "Human: m7\nHuman: m8");
    }

    #[tokio::test]
    async fn test_unseen_identity_defaults() {
        let store = SessionStore::in_memory(20);
        assert_eq!(store.recent("ghost", 5).await, "");
        assert_eq!(store.get_context("ghost", "current_task").await, None);
        assert_eq!(
            store.get_context_or("ghost", "current_task", json!("none")).await,
            json!("none")
        );
        assert_eq!(store.snapshot("ghost").await, AgentStateSnapshot::default());
        assert!(store.take_pending_intent("ghost").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reload_reproduces_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");
        {
            let store = SessionStore::open(&path, 20).await;
            store
                .record("U1", Role::Human, "fatura", InteractionKind::Message, None)
                .await
                .unwrap();
            store
                .record(
                    "U1",
                    Role::Agent,
                    "ok",
                    InteractionKind::Tool,
                    Some(InteractionMetadata::tool("get_bill_info")),
                )
                .await
                .unwrap();
            store.set_tool_chain("U1", &chain(&["pay_bill"])).await.unwrap();
            store.push_suspended("U1").await.unwrap();
            store.set_context("U1", "plan_id", json!({"v": 2})).await.unwrap();
            store.set_current_focus("U2", Some("amount")).await.unwrap();
        }
        let before_u1;
        let before_u2;
        {
            let store = SessionStore::open(&path, 20).await;
            before_u1 = store.full_state("U1").await;
            before_u2 = store.full_state("U2").await;
            assert_eq!(before_u1.recent_interactions.len(), 2);
            assert!(store.has_used_tool("U1", "get_bill_info").await);
            assert_eq!(store.suspended_depth("U1").await, 1);
        }
        let store = SessionStore::open(&path, 20).await;
        assert_eq!(store.full_state("U1").await, before_u1);
        assert_eq!(store.full_state("U2").await, before_u2);
    }

    #[tokio::test]
    async fn test_corrupt_store_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent_memory.json");
        std::fs::write(&path, "[[[").unwrap();
        let store = SessionStore::open(&path, 20).await;
        assert_eq!(store.full_state("U1").await, FullState::default());
        store.set_context("U1", "k", json!(1)).await.unwrap();
        let reopened = SessionStore::open(&path, 20).await;
        assert_eq!(reopened.get_context("U1", "k").await, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_switch_task_stacks_previous_tasks() {
        let store = SessionStore::in_memory(20);
        let id = "U1";
        store.mark_entry(id, "entry").await.unwrap();
        assert_eq!(store.switch_task(id, "paket_degistir", &["entry"]).await.unwrap(), None);
        assert_eq!(store.suspended_depth(id).await, 0);

        store.set_tool_chain(id, &chain(&["initiate_package_change"])).await.unwrap();
        let prev = store.switch_task(id, "fatura_bilgisi", &["entry"]).await.unwrap();
        assert_eq!(prev.as_deref(), Some("paket_degistir"));
        store.switch_task(id, "hat_durumu", &["entry"]).await.unwrap();

        let snap = store.snapshot(id).await;
        assert_eq!(snap.current_task.as_deref(), Some("hat_durumu"));
        assert_eq!(snap.suspended_task.as_deref(), Some("fatura_bilgisi"));
        assert_eq!(snap.suspended_intents.len(), 2);

        let resumed = store.resume_suspended(id).await.unwrap().unwrap();
        assert_eq!(resumed.task.as_deref(), Some("fatura_bilgisi"));
        let snap = store.snapshot(id).await;
        assert_eq!(snap.current_task.as_deref(), Some("fatura_bilgisi"));
        assert_eq!(snap.suspended_task.as_deref(), Some("paket_degistir"));

        let resumed = store.resume_suspended(id).await.unwrap().unwrap();
        assert_eq!(resumed.tool_chain, chain(&["initiate_package_change"]));
        let snap = store.snapshot(id).await;
        assert_eq!(snap.current_task.as_deref(), Some("paket_degistir"));
        assert_eq!(snap.suspended_task, None);
        assert_eq!(snap.pending_tool_chain, chain(&["initiate_package_change"]));
    }

    #[tokio::test]
    async fn test_pending_intent_travels_with_suspension() {
        let store = SessionStore::in_memory(20);
        let pending = PendingIntent {
            tool_chain: chain(&["pay_bill"]),
            parameters: serde_json::Map::new(),
            missing_parameters: chain(&["amount"]),
        };
        store.set_pending_intent("U1", &pending).await.unwrap();
        store.push_suspended("U1").await.unwrap();
        assert!(store.pending_intent("U1").await.is_none());
        assert!(store.snapshot("U1").await.pending_params.is_empty());

        let resumed = store.pop_suspended("U1").await.unwrap().unwrap();
        assert_eq!(resumed.missing_parameters, chain(&["amount"]));
        assert_eq!(store.pending_intent("U1").await, Some(pending));
    }

    #[tokio::test]
    async fn test_error_and_keyword_queries() {
        let store = SessionStore::in_memory(20);
        store
            .record("U1", Role::Agent, "e1", InteractionKind::ToolError, None)
            .await
            .unwrap();
        store
            .record("U1", Role::Human, "Fatura itirazı", InteractionKind::Message, None)
            .await
            .unwrap();
        store
            .record("U1", Role::Agent, "e2", InteractionKind::ToolError, None)
            .await
            .unwrap();
        assert_eq!(store.recent_errors("U1", 5).await, vec!["e2", "e1"]);
        assert_eq!(store.last_tool_error("U1").await, "e2");
        assert_eq!(
            store.find_keywords_in_history("U1", &["fatura", "paket"]).await,
            vec!["fatura"]
        );
    }

    #[tokio::test]
    async fn test_authenticated_user_mapping() {
        let store = SessionStore::in_memory(20);
        store.set_authenticated_user("12345678950", "U1").await.unwrap();
        assert_eq!(store.authenticated_user("12345678950").await.as_deref(), Some("U1"));
        store.clear_authenticated_user("12345678950").await.unwrap();
        assert_eq!(store.authenticated_user("12345678950").await, None);
    }
}
