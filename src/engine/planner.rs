//! 规划输出解析
//!
//! LLM 要么直接回答，要么给出工具链 JSON：`{"tool_chain": [...], "parameters": {...}}`，
//! 也接受单工具形式 `{"tool": "...", "args": {...}}`。先去掉推理标记，再从 ```json 块或首个 `{` 到末个 `}` 取 JSON。

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};


/// 规划结果
#[derive(Clone, Debug, PartialEq)]
pub enum PlanOutput {
    /// 直接回复用户
    Answer(String),
    /// 需要执行的工具链与共用参数
    Chain {
        tool_chain: Vec<String>,
        parameters: Map<String, Value>,
    },
}

#[derive(Deserialize)]
struct RawPlan {
    #[serde(default)]
    tool_chain: Option<Vec<String>>,
    #[serde(default)]
    parameters: Option<Map<String, Value>>,
    #[serde(default)]
    tool: Option<String>,
    #[serde(default)]
    args: Option<Map<String, Value>>,
}

static THINK_RE: OnceLock<Regex> = OnceLock::new();
static OPEN_THINK_RE: OnceLock<Regex> = OnceLock::new();

/// 去掉 `<think>...</think>`；未闭合的 `<think>` 连同其后内容一起去掉
pub fn strip_reasoning(text: &str) -> String {
    let closed = THINK_RE
        .get_or_init(|| Regex::new(r"(?is)<think>.*?</think>").unwrap())
        .replace_all(text, "");
    OPEN_THINK_RE
        .get_or_init(|| Regex::new(r"(?is)<think>.*$").unwrap())
        .replace_all(&closed, "")
        .trim()
        .to_string()
}

/// 从文本中取出 JSON 片段：优先 ```json 代码块，否则首个 `{` 到末个 `}`
pub fn extract_json_block(text: &str) -> Option<&str> {
    if let Some(start) = text.find("```json") {
        let rest = &text[start + 7..];
        return Some(rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim()));
    }
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// 解析规划输出；没有 JSON 或 JSON 不合法时都按直接回复处理（不合法时记 warn）
pub fn parse_plan(output: &str) -> PlanOutput {
    let cleaned = strip_reasoning(output);
    let Some(json_str) = extract_json_block(&cleaned) else {
        return PlanOutput::Answer(cleaned);
    };
    let raw: RawPlan = match serde_json::from_str(json_str) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(error = %e, "Plan output is not valid JSON, treating it as a direct answer");
            return PlanOutput::Answer(cleaned);
        }
    };

    if let Some(tool_chain) = raw.tool_chain {
        return PlanOutput::Chain {
            tool_chain,
            parameters: raw.parameters.unwrap_or_default(),
        };
    }
    match raw.tool.filter(|t| !t.trim().is_empty()) {
        Some(tool) => PlanOutput::Chain {
            tool_chain: vec![tool.trim().to_string()],
            parameters: raw.args.or(raw.parameters).unwrap_or_default(),
        },
        None => PlanOutput::Answer(cleaned),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_answer() {
        let out = parse_plan("<think>düşünüyorum</think> Merhaba, nasıl yardımcı olabilirim?");
        assert_eq!(out, PlanOutput::Answer("Merhaba, nasıl yardımcı olabilirim?".into()));
    }

    #[test]
    fn test_chain_in_fence() {
        let out = parse_plan(
            "Plan:\n```json\n{\"tool_chain\": [\"get_bill_info\", \"pay_bill\"], \"parameters\": {\"month\": \"2024-05\"}}\n```",
        );
        let PlanOutput::Chain { tool_chain, parameters } = out else {
            panic!("expected chain");
        };
        assert_eq!(tool_chain, vec!["get_bill_info", "pay_bill"]);
        assert_eq!(parameters["month"], json!("2024-05"));
    }

    #[test]
    fn test_explicit_empty_chain_is_kept() {
        let out = parse_plan(r#"{"tool_chain": [], "parameters": {}}"#);
        assert_eq!(
            out,
            PlanOutput::Chain {
                tool_chain: vec![],
                parameters: Map::new()
            }
        );
    }

    #[test]
    fn test_single_call_form() {
        let out = parse_plan(r#"{"tool": "get_line_status", "args": {"user_id": "U1"}}"#);
        let PlanOutput::Chain { tool_chain, parameters } = out else {
            panic!("expected chain");
        };
        assert_eq!(tool_chain, vec!["get_line_status"]);
        assert_eq!(parameters["user_id"], json!("U1"));
    }

    #[test]
    fn test_malformed_json_falls_back_to_answer() {
        assert!(matches!(parse_plan("{\"tool_chain\": [\"a\""), PlanOutput::Answer(_)));
        assert_eq!(
            parse_plan("{\"tool_chain\": [\"a\",]}"),
            PlanOutput::Answer("{\"tool_chain\": [\"a\",]}".into())
        );
        let text = "Kampanya kodunuz {YAZ20} olarak tanımlandı.";
        assert_eq!(parse_plan(text), PlanOutput::Answer(text.into()));
    }

    #[test]
    fn test_unclosed_think_removed() {
        assert_eq!(strip_reasoning("Tamam.<think>yarım kaldı"), "Tamam.");
    }
}
