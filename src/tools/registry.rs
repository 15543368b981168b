//! 工具目录
//!
//! 所有工具实现 Tool trait（name / description / parameters / execute），由 ToolCatalog 按名注册与查找；
//! 目录在启动时建好，运行期只读。ToolChainExecutor 在调用时补参、加超时并记录结果。

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::tools::{ParamSpec, ToolOutcome};

/// 工具 trait：名称、描述（供 LLM 理解）、参数列表、异步执行（参数为 JSON 对象）
#[async_trait]
pub trait Tool: Send + Sync {
    /// 工具名称（规划结果 tool_chain 中的名字）
    fn name(&self) -> &str;

    /// 工具描述（供 LLM 理解功能）
    fn description(&self) -> &str;

    /// 参数列表，按收集顺序
    fn parameters(&self) -> &[ParamSpec];

    /// 参数 JSON Schema；默认由 parameters() 拼出
    fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for p in self.parameters() {
            properties.insert(p.name.clone(), serde_json::json!({ "type": p.kind.json_type() }));
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required
        })
    }

    /// 执行；Err 表示调用本身出错（不是业务失败）
    async fn execute(&self, args: Map<String, Value>) -> Result<ToolOutcome, String>;
}

/// 工具目录：按名称存储 Arc<dyn Tool>，保留注册顺序用于生成 prompt
#[derive(Default)]
pub struct ToolCatalog {
    tools: HashMap<String, Arc<dyn Tool>>,
    order: Vec<String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名工具后注册的覆盖先注册的
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), Arc::new(tool)).is_none() {
            self.order.push(name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.order.clone()
    }

    /// 必填参数名
    pub fn required_params(&self, name: &str) -> Vec<String> {
        self.tools
            .get(name)
            .map(|t| {
                t.parameters()
                    .iter()
                    .filter(|p| p.required)
                    .map(|p| p.name.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 工具目录的 JSON（名称、描述、参数 Schema）
    pub fn to_schema_json(&self) -> String {
        let tools: Vec<Value> = self
            .order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "parameters": tool.parameters_schema()
                })
            })
            .collect();
        serde_json::to_string_pretty(&tools).unwrap_or_else(|_| "[]".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ParamKind;

    struct Fixed {
        name: &'static str,
        params: Vec<ParamSpec>,
    }

    #[async_trait]
    impl Tool for Fixed {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "sabit"
        }

        fn parameters(&self) -> &[ParamSpec] {
            &self.params
        }

        async fn execute(&self, _args: Map<String, Value>) -> Result<ToolOutcome, String> {
            Ok(ToolOutcome::message("ok"))
        }
    }

    fn spec(name: &str, required: bool) -> ParamSpec {
        ParamSpec {
            name: name.into(),
            kind: ParamKind::Text,
            required,
        }
    }

    #[test]
    fn test_lookup_and_order() {
        let mut catalog = ToolCatalog::new();
        catalog.register(Fixed {
            name: "b",
            params: vec![spec("user_id", true), spec("note", false)],
        });
        catalog.register(Fixed {
            name: "a",
            params: vec![],
        });
        assert!(catalog.contains("a"));
        assert!(catalog.get("c").is_none());
        assert_eq!(catalog.tool_names(), vec!["b", "a"]);
        assert_eq!(catalog.required_params("b"), vec!["user_id"]);
        assert!(catalog.required_params("c").is_empty());
        let schema: Value = serde_json::from_str(&catalog.to_schema_json()).unwrap();
        assert_eq!(schema[0]["parameters"]["required"], serde_json::json!(["user_id"]));
        assert_eq!(schema[0]["parameters"]["properties"]["note"]["type"], "string");
    }
}
