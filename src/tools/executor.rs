//! 工具链执行器
//!
//! 按顺序执行规划出的工具链，共用一个参数池：补参（复用 / 询问 / 数值校验）、加超时调用、
//! 记录交互与工具输出、失败时回滚该工具相关参数。每次调用输出结构化审计日志（JSON）。
//! 延迟收集模式下缺参会中止链条，把剩余工具与已收集参数存为 pending_intent。

use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use regex::Regex;
use serde_json::{Map, Number, Value};
use tokio::time::timeout;

use crate::core::AgentError;
use crate::memory::{InteractionKind, InteractionMetadata, PendingIntent, Role, SessionStore};
use crate::tools::prompts::{parameter_prompt, INVALID_NUMBER_PROMPT};
use crate::tools::{ParamKind, ParamSpec, ParameterSource, Tool, ToolCatalog, ToolOutcome};

/// 空工具链时的澄清回复
pub const CLARIFY_REPLY: &str =
    "Sorunuzu toollarla eşleştiremedim. Ne yapmak istediğinizi biraz daha net yazabilir misiniz?";
pub const ALL_DONE_REPLY: &str = "İşlemler başarıyla tamamlandı.";
pub const PARTIAL_REPLY: &str =
    "Bazı işlemler tamamlanamadı. Eksik/hatalı bilgiler olabilir; tekrar deneyebilirsiniz.";

/// 工具失败后需要从参数池清掉的字段，避免下次重试沿用错误值
pub fn reset_fields(tool: &str) -> &'static [&'static str] {
    match tool {
        "pay_bill" => &["amount", "method"],
        "join_campaign" => &["campaign_id"],
        "get_package_id_by_name" => &["package_name"],
        "get_ticket_status" | "cancel_support_ticket" => &["ticket_id"],
        "request_additional_package" => &["package_type", "package_name", "quantity"],
        "submit_feedback" => &["feedback_text", "rating"],
        "get_bill_info" => &["month"],
        "initiate_package_change" => &["package_id"],
        "initiate_billing_dispute" => &["reason"],
        "create_support_ticket" => &["service_type", "description"],
        _ => &[],
    }
}

/// 单个工具的执行结果
#[derive(Clone, Debug, PartialEq)]
pub struct StepResult {
    pub tool: String,
    pub outcome: ToolOutcome,
}

/// 整条链的执行报告
#[derive(Clone, Debug, PartialEq)]
pub struct ChainReport {
    /// 所有工具都成功
    pub success: bool,
    /// 汇总回复（全部完成 / 部分未完成 / 澄清 / 缺参提问）
    pub reply: String,
    pub steps: Vec<StepResult>,
    /// 因缺参中止时，正在等待的参数名
    pub awaiting: Option<String>,
}

impl ChainReport {
    /// 逐个工具的一行摘要
    pub fn details(&self) -> String {
        self.steps
            .iter()
            .map(|s| format!("- {}: {}", s.tool, s.outcome.summary()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// 工具链执行器
pub struct ToolChainExecutor {
    catalog: Arc<ToolCatalog>,
    store: Arc<SessionStore>,
    input: Arc<dyn ParameterSource>,
    timeout: Duration,
}

enum Collected {
    Ready(Map<String, Value>),
    Missing(Vec<String>),
}

impl ToolChainExecutor {
    pub fn new(
        catalog: Arc<ToolCatalog>,
        store: Arc<SessionStore>,
        input: Arc<dyn ParameterSource>,
        timeout_secs: u64,
    ) -> Self {
        Self {
            catalog,
            store,
            input,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    /// 依次执行 chain；pool 为共享参数池，执行后反映收集到的值与失败回滚
    pub async fn run(
        &self,
        identity: &str,
        chain: &[String],
        pool: &mut Map<String, Value>,
    ) -> Result<ChainReport, AgentError> {
        if chain.is_empty() {
            self.store
                .record(
                    identity,
                    Role::Agent,
                    CLARIFY_REPLY,
                    InteractionKind::Fallback,
                    Some(InteractionMetadata::reason("empty_tool_chain")),
                )
                .await?;
            return Ok(ChainReport {
                success: false,
                reply: CLARIFY_REPLY.to_string(),
                steps: Vec::new(),
                awaiting: None,
            });
        }

        self.store.set_tool_chain(identity, chain).await?;
        let mut steps = Vec::with_capacity(chain.len());
        let mut all_ok = true;

        for (idx, name) in chain.iter().enumerate() {
            self.store.set_current_focus(identity, Some(name.as_str())).await?;

            let Some(tool) = self.catalog.get(name) else {
                let err = AgentError::UnknownTool(name.clone());
                let outcome = ToolOutcome::failed(format!("[Tool Error - {}] tool not registered", name));
                tracing::warn!(identity, error = %err, "Skipping step");
                self.finish_step(identity, name, &outcome, InteractionKind::ToolError).await?;
                steps.push(StepResult {
                    tool: name.clone(),
                    outcome,
                });
                all_ok = false;
                continue;
            };

            let args = match self.collect(tool.parameters(), pool).await {
                Collected::Ready(args) => args,
                Collected::Missing(missing) => {
                    return self.defer(identity, &chain[idx..], pool, missing, steps).await;
                }
            };

            let (outcome, kind) = self.invoke(tool.as_ref(), args).await;
            self.finish_step(identity, name, &outcome, kind).await?;

            if let ToolOutcome::Ok { payload } = &outcome {
                carry_identifiers(name, payload, pool);
                self.store.set_last_action(identity, name).await?;
            } else {
                all_ok = false;
                for field in reset_fields(name) {
                    pool.remove(*field);
                }
            }
            steps.push(StepResult {
                tool: name.clone(),
                outcome,
            });
        }

        self.store.set_current_focus(identity, None).await?;
        Ok(ChainReport {
            success: all_ok,
            reply: if all_ok { ALL_DONE_REPLY } else { PARTIAL_REPLY }.to_string(),
            steps,
            awaiting: None,
        })
    }

    /// 记录交互、追加工具输出、出队
    async fn finish_step(
        &self,
        identity: &str,
        name: &str,
        outcome: &ToolOutcome,
        kind: InteractionKind,
    ) -> Result<(), AgentError> {
        self.store
            .record(
                identity,
                Role::Agent,
                outcome.to_string(),
                kind,
                Some(InteractionMetadata::tool(name)),
            )
            .await?;
        self.store
            .add_tool_output(identity, name, outcome.to_response())
            .await?;
        self.store.dequeue_tool(identity).await?;
        Ok(())
    }

    /// 补齐参数：池中非空值按类型复用，否则询问；数值参数反复询问直到可解析
    async fn collect(&self, params: &[ParamSpec], pool: &mut Map<String, Value>) -> Collected {
        let mut args = Map::new();
        let mut missing = Vec::new();
        for spec in params {
            if let Some(value) = pool.get(&spec.name).and_then(|v| coerce(spec.kind, v)) {
                pool.insert(spec.name.clone(), value.clone());
                args.insert(spec.name.clone(), value);
                continue;
            }
            if !spec.required {
                continue;
            }
            match self.ask(spec).await {
                Some(value) => {
                    pool.insert(spec.name.clone(), value.clone());
                    args.insert(spec.name.clone(), value);
                }
                None => missing.push(spec.name.clone()),
            }
        }
        if missing.is_empty() {
            Collected::Ready(args)
        } else {
            Collected::Missing(missing)
        }
    }

    async fn ask(&self, spec: &ParamSpec) -> Option<Value> {
        let prompt = parameter_prompt(&spec.name);
        loop {
            let answer = self.input.request(&spec.name, &prompt).await?;
            match coerce(spec.kind, &Value::String(answer)) {
                Some(value) => return Some(value),
                None if spec.kind.is_numeric() => {
                    self.input.report_invalid(INVALID_NUMBER_PROMPT).await;
                }
                None => {}
            }
        }
    }

    /// 缺参中止：剩余工具留在 pending_tool_chain，意图存为 pending_intent
    async fn defer(
        &self,
        identity: &str,
        remaining: &[String],
        pool: &Map<String, Value>,
        missing: Vec<String>,
        steps: Vec<StepResult>,
    ) -> Result<ChainReport, AgentError> {
        let awaiting = missing.first().cloned().unwrap_or_default();
        let err = AgentError::MissingParameter(awaiting.clone());
        tracing::info!(
            identity,
            tool = %remaining.first().map(String::as_str).unwrap_or_default(),
            retryable = err.is_retryable(),
            "{}",
            err
        );
        let pending = PendingIntent {
            tool_chain: remaining.to_vec(),
            parameters: pool.clone(),
            missing_parameters: missing,
        };
        self.store.set_pending_intent(identity, &pending).await?;
        self.store.set_current_focus(identity, Some(awaiting.as_str())).await?;
        Ok(ChainReport {
            success: false,
            reply: parameter_prompt(&awaiting).trim_end().to_string(),
            steps,
            awaiting: Some(awaiting),
        })
    }

    /// 带超时调用；超时和调用错误归一化为 `[Tool Error - name] detail`，并输出审计日志
    async fn invoke(&self, tool: &dyn Tool, args: Map<String, Value>) -> (ToolOutcome, InteractionKind) {
        let name = tool.name();
        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let outcome_label = match &result {
            Ok(Ok(o)) if o.is_ok() => "ok",
            Ok(Ok(_)) => "failed",
            Ok(Err(_)) => "error",
            Err(_) => "timeout",
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": name,
            "ok": outcome_label == "ok",
            "outcome": outcome_label,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(outcome)) => (outcome, InteractionKind::Tool),
            Ok(Err(e)) => {
                let err = AgentError::ToolExecutionFailed(e);
                (
                    ToolOutcome::failed(format!("[Tool Error - {}] {}", name, err)),
                    InteractionKind::ToolError,
                )
            }
            Err(_) => {
                let err = AgentError::ToolTimeout(name.to_string());
                (
                    ToolOutcome::failed(format!("[Tool Error - {}] {}", name, err)),
                    InteractionKind::ToolError,
                )
            }
        }
    }
}

/// 查询类工具成功后，把结果中的标识字段放进参数池供后续工具使用
fn carried_keys(tool: &str) -> &'static [&'static str] {
    match tool {
        "get_package_id_by_name" => &["package_id"],
        "create_support_ticket" => &["ticket_id"],
        _ => &[],
    }
}

fn carry_identifiers(tool: &str, payload: &Value, pool: &mut Map<String, Value>) {
    for key in carried_keys(tool) {
        if let Some(value) = payload.get(key).filter(|v| !v.is_null()) {
            pool.entry(key.to_string()).or_insert_with(|| value.clone());
        }
    }
}

fn args_preview(args: &Map<String, Value>) -> String {
    let s = Value::Object(args.clone()).to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

static GROUPED_RE: OnceLock<Regex> = OnceLock::new();
static PLAIN_RE: OnceLock<Regex> = OnceLock::new();

/// 整段解析数值：`1.250,50`（千分位 `.`、小数 `,`）或 `150,50` / `150.50`；可带 TL / ₺ 后缀。
/// 其余写法一律返回 None，由调用方重新询问。
fn parse_decimal(text: &str) -> Option<f64> {
    let text = text.trim();
    let text = text
        .strip_suffix("TL")
        .or_else(|| text.strip_suffix('₺'))
        .unwrap_or(text)
        .trim();
    let grouped = GROUPED_RE.get_or_init(|| Regex::new(r"^-?\d{1,3}(?:\.\d{3})+(?:,\d+)?$").unwrap());
    let normalized = if grouped.is_match(text) {
        text.replace('.', "").replace(',', ".")
    } else if PLAIN_RE
        .get_or_init(|| Regex::new(r"^-?\d+(?:[.,]\d+)?$").unwrap())
        .is_match(text)
    {
        text.replace(',', ".")
    } else {
        return None;
    };
    normalized.parse::<f64>().ok().filter(|f| f.is_finite())
}

fn whole_number(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
}

/// 按参数类型规整值；空值或无法解析返回 None
pub fn coerce(kind: ParamKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (_, Value::Null) => None,
        (ParamKind::Text, Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| Value::String(s.to_string()))
        }
        (ParamKind::Text, Value::Number(n)) => Some(Value::String(n.to_string())),
        (ParamKind::Text, Value::Bool(b)) => Some(Value::String(b.to_string())),
        (ParamKind::Integer, Value::Number(n)) => match n.as_i64() {
            Some(i) => Some(Value::from(i)),
            None => n.as_f64().and_then(whole_number).map(Value::from),
        },
        (ParamKind::Integer, Value::String(s)) => {
            parse_decimal(s).and_then(whole_number).map(Value::from)
        }
        (ParamKind::Number, Value::Number(n)) => Some(Value::Number(n.clone())),
        (ParamKind::Number, Value::String(s)) => parse_decimal(s)
            .and_then(Number::from_f64)
            .map(Value::Number),
        _ => None,
    }
}
