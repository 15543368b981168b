//! 构建器：按配置组装会话存储、业务后端、工具目录、监管器、推理引擎与编排器
//!
//! 终端与测试共用同一套组装逻辑；每个组件都可以用 with_* 替换（测试中换成脚本 LLM、内存库等）。

use std::path::PathBuf;
use std::sync::Arc;

use crate::backend::{DataOperations, SqliteBackend};
use crate::config::AppConfig;
use crate::core::identity::IdentityVerifier;
use crate::core::orchestrator::TurnOrchestrator;
use crate::core::supervisor::DialogueSupervisor;
use crate::core::AgentError;
use crate::engine::ToolChainEngine;
use crate::llm::{create_llm_from_config, LlmClient};
use crate::memory::SessionStore;
use crate::tools::{telecom_catalog, ConsoleInput, DeferredInput, ParameterSource, ToolChainExecutor};

/// 编排器构建器
pub struct SwitchboardBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    store: Option<Arc<SessionStore>>,
    backend: Option<Arc<SqliteBackend>>,
    verifier: Option<Arc<dyn IdentityVerifier>>,
    input: Option<Arc<dyn ParameterSource>>,
}

impl SwitchboardBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            store: None,
            backend: None,
            verifier: None,
            input: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_store(mut self, store: Arc<SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_backend(mut self, backend: Arc<SqliteBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// 替换身份验证方（默认由业务后端验证）
    pub fn with_verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// 替换参数来源（默认按 [tools].interactive 选择终端或延迟收集）
    pub fn with_input(mut self, input: Arc<dyn ParameterSource>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    async fn build_store(&self) -> Arc<SessionStore> {
        match &self.store {
            Some(store) => store.clone(),
            None => Arc::new(
                SessionStore::open(&self.config.memory.path, self.config.memory.max_turns).await,
            ),
        }
    }

    fn build_backend(&self) -> Result<Arc<SqliteBackend>, AgentError> {
        if let Some(backend) = &self.backend {
            return Ok(backend.clone());
        }
        let backend = match &self.config.backend.db_path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                tracing::info!("Opening backend database at {}", path.display());
                SqliteBackend::open(path)?
            }
            None => SqliteBackend::in_memory()?,
        };
        Ok(Arc::new(backend))
    }

    fn build_input(&self) -> Arc<dyn ParameterSource> {
        match &self.input {
            Some(input) => input.clone(),
            None if self.config.tools.interactive => {
                Arc::new(ConsoleInput::new(self.config.tools.input_timeout_secs))
            }
            None => Arc::new(DeferredInput),
        }
    }

    /// 组装编排器
    pub async fn build(self) -> Result<TurnOrchestrator, AgentError> {
        let llm = self
            .llm
            .clone()
            .unwrap_or_else(|| create_llm_from_config(&self.config.llm));
        let store = self.build_store().await;
        let backend = self.build_backend()?;
        let verifier: Arc<dyn IdentityVerifier> = match &self.verifier {
            Some(v) => v.clone(),
            None => backend.clone(),
        };
        let ops: Arc<dyn DataOperations> = backend;
        let catalog = Arc::new(telecom_catalog(ops));
        tracing::info!(tools = catalog.len(), "Tool catalog ready");

        let executor = ToolChainExecutor::new(
            catalog,
            store.clone(),
            self.build_input(),
            self.config.tools.tool_timeout_secs,
        );
        let engine = ToolChainEngine::new(
            llm.clone(),
            executor,
            store.clone(),
            self.config.app.transcript_turns,
        );
        let supervisor = DialogueSupervisor::new(llm, store.clone());

        Ok(
            TurnOrchestrator::new(store, supervisor, Arc::new(engine), verifier)
                .with_checksum(self.config.identity.enforce_checksum),
        )
    }
}

/// 便捷函数：加载配置（失败时用默认值）并创建构建器
pub fn create_builder(config_path: Option<PathBuf>) -> SwitchboardBuilder {
    let config = crate::config::load_config(config_path)
        .map_err(|e| AgentError::ConfigError(e.to_string()))
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Using default configuration");
            AppConfig::default()
        });
    SwitchboardBuilder::new(config)
}
