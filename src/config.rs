//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `CAMPUS__*` 覆盖（双下划线表示嵌套，如 `CAMPUS__LLM__PROVIDER=openai`）。
//! API Key 不进配置文件，只从环境变量 GEMINI_API_KEY / OPENAI_API_KEY 读取。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub agent: AgentSection,
    pub knowledge: KnowledgeSection,
    pub search: SearchSection,
    pub store: StoreSection,
    pub notify: NotifySection,
    pub session: SessionSection,
    pub web: WebSection,
}

/// [app] 段：应用名、提示词中使用的历史条数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 管理路径带入 LLM 的历史轮数（user + assistant 为一轮）
    pub max_history_turns: usize,
    /// 通用回答拼接提示词时使用的最近历史条数
    pub history_window: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "NUST Campus Assistant".to_string(),
            max_history_turns: 10,
            history_window: 6,
        }
    }
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：gemini / openai / mock
    pub provider: String,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub temperature: f32,
    /// 关闭后始终走 chunk replay
    pub streaming: bool,
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "gemini".to_string(),
            model: None,
            base_url: None,
            temperature: 0.7,
            streaming: true,
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmTimeoutsSection {
    pub request: u64,
    pub stream: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: 60,
            stream: 120,
        }
    }
}

/// [agent] 段：工具循环上限、并发、超时、流式节奏
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_tool_rounds: usize,
    pub max_concurrent_tools: usize,
    pub tool_timeout_secs: u64,
    /// 增量流中连续多少个片段无词边界时强制推送一次
    pub stream_fallback_every: usize,
    /// chunk replay 每个词之间的间隔（毫秒）
    pub replay_delay_ms: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_tool_rounds: crate::react::DEFAULT_MAX_TOOL_ROUNDS,
            max_concurrent_tools: 3,
            tool_timeout_secs: 30,
            stream_fallback_every: 8,
            replay_delay_ms: 0,
        }
    }
}

/// [knowledge] 段：语料文件（JSON 数组，元素为 {content, metadata}）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeSection {
    pub corpus_paths: Vec<PathBuf>,
    pub top_k: usize,
}

impl Default for KnowledgeSection {
    fn default() -> Self {
        Self {
            corpus_paths: vec![PathBuf::from("data/nust_knowledge.json")],
            top_k: 3,
        }
    }
}

/// [search] 段：网页搜索
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub enabled: bool,
    pub max_results: usize,
    pub timeout_secs: u64,
    /// 查询未提及时自动加上的机构名
    pub institution: String,
    /// 查询中出现即视为已提及机构的关键字
    pub institution_aliases: Vec<String>,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            enabled: true,
            max_results: 3,
            timeout_secs: 15,
            institution: "NUST University Pakistan".to_string(),
            institution_aliases: vec![
                "nust".to_string(),
                "national university of sciences".to_string(),
            ],
        }
    }
}

/// [store] 段：SQLite 路径；未设置时使用内存存储
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub db_path: Option<PathBuf>,
    pub seed_sample_data: bool,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            db_path: Some(PathBuf::from("campus.db")),
            seed_sample_data: true,
        }
    }
}

/// [notify] 段：发件人与投递方式（log 为模拟发送）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotifySection {
    pub sender: String,
    pub mode: String,
    pub webhook_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for NotifySection {
    fn default() -> Self {
        Self {
            sender: "admin@nust.edu.pk".to_string(),
            mode: "log".to_string(),
            webhook_url: None,
            timeout_secs: 10,
        }
    }
}

/// [session] 段：会话淘汰策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// 空闲多久后可被淘汰；0 表示不按 TTL 淘汰
    pub ttl_secs: u64,
    /// 内存中最多保留的会话数；0 表示不限
    pub max_sessions: usize,
    pub sweep_interval_secs: u64,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_sessions: 1000,
            sweep_interval_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSection {
    pub port: u16,
    /// Web 端 chunk replay 的词间隔（毫秒）
    pub replay_delay_ms: u64,
}

impl Default for WebSection {
    fn default() -> Self {
        Self {
            port: 8000,
            replay_delay_ms: 30,
        }
    }
}

/// 从 config 目录加载配置，环境变量 CAMPUS__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CAMPUS__*（双下划线表示嵌套键）
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
        config::Environment::with_prefix("CAMPUS")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 加载失败时退回默认配置（记录 warn，不中断启动）
pub fn load_config_or_default(config_path: Option<PathBuf>) -> AppConfig {
    match load_config(config_path) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::warn!("config load failed, using defaults: {}", e);
            AppConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.agent.max_tool_rounds, 10);
        assert_eq!(cfg.knowledge.top_k, 3);
        assert_eq!(cfg.search.max_results, 3);
        assert_eq!(cfg.llm.provider, "gemini");
        assert_eq!(cfg.app.history_window, 6);
    }

    #[test]
    fn test_load_explicit_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campus.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "[llm]\nprovider = \"mock\"\n\n[agent]\nmax_tool_rounds = 4").unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.llm.provider, "mock");
        assert_eq!(cfg.agent.max_tool_rounds, 4);
        assert_eq!(cfg.agent.max_concurrent_tools, 3);
    }
}
