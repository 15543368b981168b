//! 短期记忆：对话历史
//!
//! 每个身份保留最近 N 条交互（人/客服消息、工具结果、兜底回复），超出时丢弃最旧的，供 LLM 上下文与诊断使用。

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// 交互发起方
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Human,
    Agent,
}

impl Role {
    /// 首字母大写的显示名，用于拼接对话记录
    pub fn label(&self) -> &'static str {
        match self {
            Role::Human => "Human",
            Role::Agent => "Agent",
        }
    }
}

/// 交互类型
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    #[default]
    Message,
    Tool,
    ToolError,
    Fallback,
}

/// 附加信息：关联工具名或兜底原因
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl InteractionMetadata {
    pub fn tool(name: impl Into<String>) -> Self {
        Self {
            tool: Some(name.into()),
            reason: None,
        }
    }

    pub fn reason(reason: impl Into<String>) -> Self {
        Self {
            tool: None,
            reason: Some(reason.into()),
        }
    }
}

/// 单条交互记录；写入后不再修改
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interaction {
    pub role: Role,
    pub message: String,
    #[serde(rename = "type", default)]
    pub kind: InteractionKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InteractionMetadata>,
}

impl Interaction {
    pub fn human(message: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            message: message.into(),
            kind: InteractionKind::Message,
            metadata: None,
        }
    }

    pub fn agent(message: impl Into<String>) -> Self {
        Self {
            role: Role::Agent,
            message: message.into(),
            kind: InteractionKind::Message,
            metadata: None,
        }
    }

    pub fn with_kind(mut self, kind: InteractionKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_metadata(mut self, metadata: InteractionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn tool_name(&self) -> Option<&str> {
        self.metadata.as_ref().and_then(|m| m.tool.as_deref())
    }
}

/// 有界交互历史：容量满时 FIFO 淘汰最旧记录
#[derive(Clone, Debug)]
pub struct InteractionLog {
    entries: VecDeque<Interaction>,
    capacity: usize,
}

impl InteractionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// 从持久化数据恢复；超出容量的旧记录直接丢弃
    pub fn from_entries(entries: Vec<Interaction>, capacity: usize) -> Self {
        let mut log = Self::new(capacity);
        for entry in entries {
            log.push(entry);
        }
        log
    }

    pub fn push(&mut self, entry: Interaction) {
        if self.capacity == 0 {
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// 最近 n 条（旧 -> 新）
    pub fn last(&self, n: usize) -> Vec<Interaction> {
        let skip = self.entries.len().saturating_sub(n);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// 最近 n 条渲染为 `Role: message` 文本，换行连接
    pub fn transcript(&self, n: usize) -> String {
        let skip = self.entries.len().saturating_sub(n);
        self.entries
            .iter()
            .skip(skip)
            .map(|i| format!("{}: {}", i.role.label(), i.message))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Interaction> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<Interaction> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounded_history_keeps_newest() {
        let mut log = InteractionLog::new(3);
        for i in 0..8 {
            log.push(Interaction::human(format!("m{i}")));
        }
        let kept: Vec<String> = log.iter().map(|i| i.message.clone()).collect();
        assert_eq!(kept, vec!["m5", "m6", "m7"]);
    }

    #[test]
    fn test_transcript_format() {
        let mut log = InteractionLog::new(20);
        log.push(Interaction::human("merhaba"));
        log.push(Interaction::agent("nasıl yardımcı olabilirim?"));
        log.push(Interaction::human("faturam"));
        assert_eq!(
            log.transcript(2),
            "Agent: nasıl yardımcı olabilirim?\nHuman: faturam"
        );
        assert_eq!(log.transcript(0), "");
    }

    #[test]
    fn test_serialized_shape() {
        let entry = Interaction::agent("ok")
            .with_kind(InteractionKind::Tool)
            .with_metadata(InteractionMetadata::tool("pay_bill"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["role"], "agent");
        assert_eq!(json["type"], "tool");
        assert_eq!(json["metadata"]["tool"], "pay_bill");
    }
}
