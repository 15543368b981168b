//! 参数 Schema：由 schemars 从操作的入参结构体生成
//!
//! 工具的参数名、类型与是否必填都来自入参类型的 JSON Schema，不再手写；
//! 规划结果的 JSON 格式也以 Schema 形式拼入 system prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::schema::{InstanceType, Schema, SingleOrVec};
use schemars::{schema_for, JsonSchema};
use serde::Serialize;

/// 参数值类型；数值类参数在收集时会反复询问直到可解析
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Text,
    Integer,
    Number,
}

impl ParamKind {
    pub fn is_numeric(&self) -> bool {
        !matches!(self, ParamKind::Text)
    }

    /// 对应的 JSON Schema 类型名
    pub fn json_type(&self) -> &'static str {
        match self {
            ParamKind::Text => "string",
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
        }
    }
}

/// 单个参数描述
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
}

fn kind_of(schema: &Schema) -> ParamKind {
    let Schema::Object(obj) = schema else {
        return ParamKind::Text;
    };
    let types: Vec<InstanceType> = match &obj.instance_type {
        Some(SingleOrVec::Single(t)) => vec![**t],
        Some(SingleOrVec::Vec(ts)) => ts.clone(),
        None => Vec::new(),
    };
    if types.contains(&InstanceType::Integer) {
        ParamKind::Integer
    } else if types.contains(&InstanceType::Number) {
        ParamKind::Number
    } else {
        ParamKind::Text
    }
}

/// 从入参类型推导参数列表（按字段声明顺序）
pub fn param_specs<T: JsonSchema>() -> Vec<ParamSpec> {
    let root = schema_for!(T);
    let Some(object) = root.schema.object.as_ref() else {
        return Vec::new();
    };
    object
        .properties
        .iter()
        .map(|(name, schema)| ParamSpec {
            name: name.clone(),
            kind: kind_of(schema),
            required: object.required.contains(name),
        })
        .collect()
}

/// 规划输出格式（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanFormat {
    /// 按顺序执行的工具名；无法匹配任何工具时给空数组
    pub tool_chain: Vec<String>,
    /// 已从用户消息中得到的参数值，所有工具共用
    pub parameters: HashMap<String, serde_json::Value>,
}

/// 返回规划格式的 JSON Schema 字符串，可拼入 system prompt
pub fn plan_schema_json() -> String {
    let schema = schema_for!(PlanFormat);
    serde_json::to_string_pretty(&schema).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct Sample {
        user_id: String,
        amount: f64,
        quantity: u32,
        note: Option<String>,
    }

    #[test]
    fn test_param_specs_follow_declaration() {
        let specs = param_specs::<Sample>();
        let names: Vec<_> = specs.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["user_id", "amount", "quantity", "note"]);
        assert_eq!(specs[0].kind, ParamKind::Text);
        assert_eq!(specs[1].kind, ParamKind::Number);
        assert_eq!(specs[2].kind, ParamKind::Integer);
        assert!(specs[0].required);
        assert!(!specs[3].required);
    }

    #[test]
    fn test_plan_schema_mentions_fields() {
        let schema = plan_schema_json();
        assert!(schema.contains("tool_chain"));
        assert!(schema.contains("parameters"));
    }
}
