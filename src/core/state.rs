//! 状态投影：从 SessionContext 提取状态机关心的字段
//!
//! 用于诊断接口、测试断言，以及拼入规划 prompt 的 agent_state JSON。

use serde::Serialize;

use crate::memory::{Interaction, PendingIntent, SessionContext, SuspendedIntent, ToolOutputRecord};

/// prompt 中只附带最近几条工具输出
const SNAPSHOT_TOOL_OUTPUTS: usize = 5;

/// 单个身份的只读状态快照
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AgentStateSnapshot {
    pub current_task: Option<String>,
    pub suspended_task: Option<String>,
    pub current_focus: Option<String>,
    pub pending_intent: Option<PendingIntent>,
    pub pending_tool_chain: Vec<String>,
    pub pending_params: Vec<String>,
    pub suspended_intents: Vec<SuspendedIntent>,
    pub last_action: Option<String>,
    pub tool_outputs: Vec<ToolOutputRecord>,
}

impl AgentStateSnapshot {
    pub fn from_context(ctx: &SessionContext) -> Self {
        let outputs = ctx.tool_outputs();
        let skip = outputs.len().saturating_sub(SNAPSHOT_TOOL_OUTPUTS);
        Self {
            current_task: ctx.current_task(),
            suspended_task: ctx.suspended_task(),
            current_focus: ctx.current_focus(),
            pending_intent: ctx.pending_intent(),
            pending_tool_chain: ctx.pending_tool_chain(),
            pending_params: ctx.pending_params(),
            suspended_intents: ctx.suspension_stack().as_slice().to_vec(),
            last_action: ctx.last_action(),
            tool_outputs: outputs.into_iter().skip(skip).collect(),
        }
    }

    /// 序列化为缩进 JSON，供 prompt 使用
    pub fn to_prompt_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| format!("{:?}", self))
    }
}

/// 某身份的完整状态（全部交互 + 全部上下文）
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct FullState {
    pub recent_interactions: Vec<Interaction>,
    pub context: SessionContext,
}
