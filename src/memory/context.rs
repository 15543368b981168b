//! 会话上下文：每个身份一份开放的 key -> JSON 值映射
//!
//! 状态机使用的键（current_task、suspended_intents、pending_tool_chain 等）通过类型化访问器读写，
//! 其余键原样保留，持久化格式仍是普通 JSON 对象。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 状态机识别的上下文键
pub mod keys {
    pub const CURRENT_TASK: &str = "current_task";
    pub const SUSPENDED_TASK: &str = "suspended_task";
    pub const SUSPENDED_INTENTS: &str = "suspended_intents";
    pub const PENDING_TOOL_CHAIN: &str = "pending_tool_chain";
    pub const PENDING_PARAMS: &str = "pending_params";
    pub const CURRENT_FOCUS: &str = "current_focus";
    pub const LAST_ACTION: &str = "last_action";
    pub const TOOL_OUTPUTS: &str = "tool_outputs";
    pub const PENDING_INTENT: &str = "pending_intent";
    pub const AUTHENTICATED_USER_ID: &str = "authenticated_user_id";
}

/// 等待参数或确认的意图：剩余工具链、已收集参数、缺失参数
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PendingIntent {
    pub tool_chain: Vec<String>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default)]
    pub missing_parameters: Vec<String>,
}

/// 被打断任务的快照
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SuspendedIntent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(default)]
    pub tool_chain: Vec<String>,
    #[serde(default)]
    pub focus: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_intent: Option<PendingIntent>,
}

/// 挂起任务栈（LIFO）
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SuspensionStack(Vec<SuspendedIntent>);

impl SuspensionStack {
    pub fn push(&mut self, intent: SuspendedIntent) {
        self.0.push(intent);
    }

    pub fn pop(&mut self) -> Option<SuspendedIntent> {
        self.0.pop()
    }

    pub fn peek(&self) -> Option<&SuspendedIntent> {
        self.0.last()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[SuspendedIntent] {
        &self.0
    }
}

/// 恢复挂起任务后返回给调用方的内容
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ResumedTask {
    pub task: Option<String>,
    pub tool_chain: Vec<String>,
    pub message: String,
    pub missing_parameters: Vec<String>,
}

/// tool_outputs 日志中的一条
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolOutputRecord {
    pub tool: String,
    pub output: Value,
}

/// 单个身份的上下文
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionContext {
    values: Map<String, Value>,
}

impl SessionContext {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn string(&self, key: &str) -> Option<String> {
        match self.values.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            _ => None,
        }
    }

    fn set_optional_string(&mut self, key: &str, value: Option<&str>) {
        let v = value.map(|s| Value::String(s.to_string())).unwrap_or(Value::Null);
        self.values.insert(key.to_string(), v);
    }

    fn typed<T: serde::de::DeserializeOwned + Default>(&self, key: &str) -> T {
        self.values
            .get(key)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_default()
    }

    fn set_typed<T: Serialize>(&mut self, key: &str, value: &T) {
        let v = serde_json::to_value(value).unwrap_or(Value::Null);
        self.values.insert(key.to_string(), v);
    }

    pub fn current_task(&self) -> Option<String> {
        self.string(keys::CURRENT_TASK)
    }

    pub fn set_current_task(&mut self, task: Option<&str>) {
        self.set_optional_string(keys::CURRENT_TASK, task);
    }

    pub fn suspended_task(&self) -> Option<String> {
        self.string(keys::SUSPENDED_TASK)
    }

    pub fn set_suspended_task(&mut self, task: Option<&str>) {
        self.set_optional_string(keys::SUSPENDED_TASK, task);
    }

    pub fn current_focus(&self) -> Option<String> {
        self.string(keys::CURRENT_FOCUS)
    }

    pub fn set_current_focus(&mut self, focus: Option<&str>) {
        self.set_optional_string(keys::CURRENT_FOCUS, focus);
    }

    pub fn pending_tool_chain(&self) -> Vec<String> {
        self.typed(keys::PENDING_TOOL_CHAIN)
    }

    pub fn set_pending_tool_chain(&mut self, chain: &[String]) {
        self.set_typed(keys::PENDING_TOOL_CHAIN, &chain);
    }

    pub fn pending_params(&self) -> Vec<String> {
        self.typed(keys::PENDING_PARAMS)
    }

    pub fn set_pending_params(&mut self, params: &[String]) {
        self.set_typed(keys::PENDING_PARAMS, &params);
    }

    pub fn suspension_stack(&self) -> SuspensionStack {
        self.typed(keys::SUSPENDED_INTENTS)
    }

    pub fn set_suspension_stack(&mut self, stack: &SuspensionStack) {
        self.set_typed(keys::SUSPENDED_INTENTS, stack);
    }

    pub fn pending_intent(&self) -> Option<PendingIntent> {
        self.values
            .get(keys::PENDING_INTENT)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn set_pending_intent(&mut self, intent: Option<&PendingIntent>) {
        match intent {
            Some(intent) => {
                self.set_typed(keys::PENDING_INTENT, intent);
                self.set_pending_params(&intent.missing_parameters);
            }
            None => {
                self.values.remove(keys::PENDING_INTENT);
                self.values.remove(keys::PENDING_PARAMS);
            }
        }
    }

    pub fn last_action(&self) -> Option<String> {
        self.string(keys::LAST_ACTION)
    }

    pub fn tool_outputs(&self) -> Vec<ToolOutputRecord> {
        self.typed(keys::TOOL_OUTPUTS)
    }

    pub fn push_tool_output(&mut self, record: ToolOutputRecord) {
        let entry = serde_json::to_value(&record).unwrap_or(Value::Null);
        match self.values.get_mut(keys::TOOL_OUTPUTS) {
            Some(Value::Array(items)) => items.push(entry),
            _ => {
                self.values
                    .insert(keys::TOOL_OUTPUTS.to_string(), Value::Array(vec![entry]));
            }
        }
    }

    pub fn authenticated_user(&self) -> Option<String> {
        self.string(keys::AUTHENTICATED_USER_ID)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(chain: &[&str], focus: &str) -> SuspendedIntent {
        SuspendedIntent {
            task: None,
            tool_chain: chain.iter().map(|s| s.to_string()).collect(),
            focus: Some(focus.to_string()),
            message: String::new(),
            pending_intent: None,
        }
    }

    #[test]
    fn test_suspension_stack_is_lifo() {
        let mut stack = SuspensionStack::default();
        stack.push(intent(&["a"], "f1"));
        stack.push(intent(&["b"], "f2"));
        assert_eq!(stack.peek().unwrap().focus.as_deref(), Some("f2"));
        assert_eq!(stack.pop().unwrap().tool_chain, vec!["b"]);
        assert_eq!(stack.pop().unwrap().tool_chain, vec!["a"]);
        assert!(stack.pop().is_none());
    }

    #[test]
    fn test_null_and_empty_strings_read_as_none() {
        let mut ctx = SessionContext::default();
        ctx.set_current_task(None);
        assert_eq!(ctx.current_task(), None);
        ctx.set(keys::CURRENT_TASK, Value::String(String::new()));
        assert_eq!(ctx.current_task(), None);
        ctx.set_current_task(Some("fatura_ödeme"));
        assert_eq!(ctx.current_task().as_deref(), Some("fatura_ödeme"));
    }

    #[test]
    fn test_pending_intent_mirrors_pending_params() {
        let mut ctx = SessionContext::default();
        let pending = PendingIntent {
            tool_chain: vec!["pay_bill".into()],
            parameters: Map::new(),
            missing_parameters: vec!["amount".into()],
        };
        ctx.set_pending_intent(Some(&pending));
        assert_eq!(ctx.pending_params(), vec!["amount"]);
        assert_eq!(ctx.pending_intent(), Some(pending));
        ctx.set_pending_intent(None);
        assert!(ctx.pending_params().is_empty());
        assert!(ctx.pending_intent().is_none());
    }

    #[test]
    fn test_unknown_keys_survive_roundtrip() {
        let mut ctx = SessionContext::default();
        ctx.set("plan_id", Value::String("p-1".into()));
        ctx.push_tool_output(ToolOutputRecord {
            tool: "get_line_status".into(),
            output: serde_json::json!({"status": "ok"}),
        });
        let text = serde_json::to_string(&ctx).unwrap();
        let back: SessionContext = serde_json::from_str(&text).unwrap();
        assert_eq!(back, ctx);
        assert_eq!(back.tool_outputs().len(), 1);
    }
}
