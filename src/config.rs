//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `SWITCHBOARD__*` 覆盖（双下划线表示嵌套，如 `SWITCHBOARD__LLM__PROVIDER=openai`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub app: AppSection,
    #[serde(default)]
    pub memory: MemorySection,
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub tools: ToolsSection,
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default)]
    pub backend: BackendSection,
}

/// [app] 段：应用名、拼入 prompt 的对话条数
#[derive(Debug, Clone, Deserialize)]
pub struct AppSection {
    pub name: Option<String>,
    /// 规划时附带的最近对话条数
    #[serde(default = "default_transcript_turns")]
    pub transcript_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            transcript_turns: default_transcript_turns(),
        }
    }
}

fn default_transcript_turns() -> usize {
    10
}

/// [memory] 段：会话存储文件与每个身份保留的交互条数
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default = "default_memory_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            path: default_memory_path(),
            max_turns: default_max_turns(),
        }
    }
}

fn default_memory_path() -> PathBuf {
    PathBuf::from("data/agent_memory.json")
}

fn default_max_turns() -> usize {
    20
}

/// [llm] 段：后端选择（mock / openai / deepseek）
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
        }
    }
}

fn default_provider() -> String {
    "mock".to_string()
}

fn default_model() -> String {
    "qwen3:32b".to_string()
}

/// [tools] 段：工具超时、参数收集方式
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    /// true：缺参时在终端阻塞询问；false：返回「缺少参数」信号，下一轮补齐
    #[serde(default = "default_interactive")]
    pub interactive: bool,
    /// 终端询问的超时（秒），超时视为缺参
    pub input_timeout_secs: Option<u64>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            interactive: default_interactive(),
            input_timeout_secs: None,
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

fn default_interactive() -> bool {
    true
}

/// [identity] 段：是否要求 TC 身份证号通过校验位
#[derive(Debug, Clone, Deserialize, Default)]
pub struct IdentitySection {
    #[serde(default)]
    pub enforce_checksum: bool,
}

/// [backend] 段：演示业务库
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    /// SQLite 文件；未设置时使用内存库
    pub db_path: Option<PathBuf>,
}

impl Default for BackendSection {
    fn default() -> Self {
        Self {
            db_path: Some(PathBuf::from("data/switchboard.db")),
        }
    }
}

/// 从 config 目录加载配置，环境变量 SWITCHBOARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 SWITCHBOARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("SWITCHBOARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.memory.max_turns, 20);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert!(cfg.tools.interactive);
        assert!(!cfg.identity.enforce_checksum);
        assert_eq!(cfg.llm.provider, "mock");
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let cfg: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(
                "[memory]\nmax_turns = 5\n",
                config::FileFormat::Toml,
            ))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();
        assert_eq!(cfg.memory.max_turns, 5);
        assert_eq!(cfg.memory.path, PathBuf::from("data/agent_memory.json"));
        assert_eq!(cfg.app.transcript_turns, 10);
    }
}
