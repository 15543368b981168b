//! 工具结果：所有数据操作与执行步骤统一返回 ToolOutcome

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 成功带载荷，失败带原因
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Ok {
        #[serde(default)]
        payload: Value,
    },
    Failed {
        error: String,
    },
}

impl ToolOutcome {
    pub fn ok(payload: Value) -> Self {
        ToolOutcome::Ok { payload }
    }

    /// 只有一句话的成功结果，载荷为 `{"message": ...}`
    pub fn message(text: impl Into<String>) -> Self {
        ToolOutcome::Ok {
            payload: serde_json::json!({ "message": text.into() }),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        ToolOutcome::Failed {
            error: error.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ToolOutcome::Ok { .. })
    }

    /// 面向用户的一句话：载荷里的 message，否则载荷 JSON；失败时是错误原因
    pub fn summary(&self) -> String {
        match self {
            ToolOutcome::Ok { payload } => match payload.get("message").and_then(Value::as_str) {
                Some(m) => m.to_string(),
                None => match payload {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                },
            },
            ToolOutcome::Failed { error } => error.clone(),
        }
    }

    /// 外部约定的响应形状 `{success, data | error}`
    pub fn to_response(&self) -> Value {
        match self {
            ToolOutcome::Ok { payload } => serde_json::json!({ "success": true, "data": payload }),
            ToolOutcome::Failed { error } => serde_json::json!({ "success": false, "error": error }),
        }
    }
}

impl fmt::Display for ToolOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_response())
    }
}
