//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `WAYFARER__*` 覆盖（双下划线表示嵌套，如 `WAYFARER__AGENT__MAX_RETRIES=3`）。
//! 核心层不读取环境变量，只接收由此转换出的 OrchestratorConfig。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::{AgentError, OrchestratorConfig};
use crate::tools::ToolKind;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub tools: ToolsSection,
}

/// [app] 段：应用名、SQLite 数据库路径
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: Option<String>,
    pub db_path: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: None,
            db_path: PathBuf::from("data/wayfarer.db"),
        }
    }
}

/// [llm] 段：后端选择
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：groq / openai / mock
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    /// 未设置时按 provider 读取 GROQ_API_KEY / OPENAI_API_KEY
    pub api_key: Option<String>,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "groq".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            base_url: None,
            api_key: None,
        }
    }
}

impl LlmSection {
    pub fn api_key(&self) -> Option<String> {
        self.api_key.clone().or_else(|| {
            let var = match self.provider.to_lowercase().as_str() {
                "groq" => "GROQ_API_KEY",
                _ => "OPENAI_API_KEY",
            };
            std::env::var(var).ok()
        })
    }

    /// 显式 base_url 优先；groq 走其 OpenAI 兼容端点
    pub fn endpoint(&self) -> Option<String> {
        self.base_url.clone().or_else(|| {
            (self.provider.eq_ignore_ascii_case("groq"))
                .then(|| "https://api.groq.com/openai/v1".to_string())
        })
    }
}

/// [agent] 段：重试、超时与步数上限
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_retries: u32,
    /// 单轮对话总时限（模型 + 工具 + 重试 + 保存）
    pub turn_timeout_secs: u64,
    /// 等待线程锁的上限
    pub lock_wait_secs: u64,
    pub max_steps: usize,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_retries: 2,
            turn_timeout_secs: 120,
            lock_wait_secs: 30,
            max_steps: 12,
        }
    }
}

/// [tools] 段：单次工具超时、启用的工具（为空表示全部）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub tool_timeout_secs: u64,
    pub enabled: Vec<String>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: 30,
            enabled: Vec::new(),
        }
    }
}

impl AppConfig {
    /// 转换为核心层配置；未知工具名为配置错误
    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, AgentError> {
        let enabled_tools = if self.tools.enabled.is_empty() {
            None
        } else {
            let kinds = self
                .tools
                .enabled
                .iter()
                .map(|name| {
                    ToolKind::from_name(name)
                        .ok_or_else(|| AgentError::ConfigError(format!("unknown tool: {name}")))
                })
                .collect::<Result<Vec<_>, _>>()?;
            Some(kinds)
        };

        Ok(OrchestratorConfig {
            max_retries: self.agent.max_retries,
            turn_timeout: Duration::from_secs(self.agent.turn_timeout_secs),
            lock_wait: Duration::from_secs(self.agent.lock_wait_secs),
            max_steps: self.agent.max_steps,
            tool_timeout: Duration::from_secs(self.tools.tool_timeout_secs),
            model: self.llm.model.clone(),
            enabled_tools,
        })
    }
}

/// 从 config 目录加载配置，环境变量 WAYFARER__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 WAYFARER__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("WAYFARER")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}
