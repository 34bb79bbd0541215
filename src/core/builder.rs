//! Agent 构建器：按配置组装编排器所需的全部协作方
//!
//! 每个协作方都可以显式注入（测试用 ScriptedLlm / MemoryStore / CountingNotifier），
//! 未注入的按 AppConfig 创建。LLM 一律包上超时。

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{AppConfig, LlmSection, NotifySection, SearchSection, StoreSection};
use crate::core::{AgentError, TaskScheduler};
use crate::knowledge::{DuckDuckGoSearch, KnowledgeRetriever, NoopSearch, WebSearch};
use crate::llm::{create_gemini_client, LlmClient, OpenAiClient, ScriptedLlm, TimeoutLlmClient, ToolSpec};
use crate::notify::{EmailNotifier, Notifier, WebhookTransport};
use crate::store::{ConversationLog, MemoryStore, SqliteStore, StudentStore};
use crate::tools::{tool_specs, StudentTools, ToolExecutor};

/// OpenAI 后端未指定模型时使用
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// 编排器的运行参数（从 AppConfig 摘出）
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub max_tool_rounds: usize,
    /// 工具循环带入的历史条数
    pub max_history_entries: usize,
    /// 通用回答带入的历史条数
    pub history_window: usize,
    pub search_max_results: usize,
    pub stream_fallback_every: usize,
    pub replay_delay: Duration,
}

impl AgentSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            max_tool_rounds: cfg.agent.max_tool_rounds,
            max_history_entries: cfg.app.max_history_turns * 2,
            history_window: cfg.app.history_window,
            search_max_results: cfg.search.max_results,
            stream_fallback_every: cfg.agent.stream_fallback_every,
            replay_delay: Duration::from_millis(cfg.agent.replay_delay_ms),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// 预构建的 Agent 组件，可多会话共享
pub struct AgentComponents {
    pub llm: Arc<dyn LlmClient>,
    pub executor: ToolExecutor,
    pub tools: Vec<ToolSpec>,
    pub retriever: Arc<KnowledgeRetriever>,
    pub search: Arc<dyn WebSearch>,
    pub students: Arc<dyn StudentStore>,
    /// 对话镜像；None 表示不落盘
    pub log: Option<Arc<dyn ConversationLog>>,
    pub settings: AgentSettings,
}

/// 按 [llm] 段创建后端（未包超时）
pub fn create_llm_from_config(llm: &LlmSection) -> Result<Arc<dyn LlmClient>, AgentError> {
    match llm.provider.to_lowercase().as_str() {
        "gemini" => {
            let client = create_gemini_client(llm.model.as_deref(), llm.temperature)
                .with_streaming(llm.streaming);
            info!(model = %client.model(), "using Gemini backend");
            Ok(Arc::new(client))
        }
        "openai" => {
            let model = llm.model.as_deref().unwrap_or(DEFAULT_OPENAI_MODEL);
            let client = OpenAiClient::new(llm.base_url.as_deref(), model, None)
                .with_temperature(llm.temperature)
                .with_streaming(llm.streaming);
            info!(model = %model, "using OpenAI-compatible backend");
            Ok(Arc::new(client))
        }
        "mock" => {
            info!("using mock LLM backend");
            Ok(Arc::new(ScriptedLlm::new()))
        }
        other => Err(AgentError::ConfigError(format!(
            "unknown llm provider: {}",
            other
        ))),
    }
}

/// 按 [store] 段打开存储：有 db_path 用 SQLite，否则用内存
pub async fn open_stores(
    store: &StoreSection,
) -> Result<(Arc<dyn StudentStore>, Arc<dyn ConversationLog>), AgentError> {
    match &store.db_path {
        Some(path) => {
            let sqlite = Arc::new(SqliteStore::open(path)?);
            if store.seed_sample_data {
                sqlite.seed_sample_data().await?;
            }
            info!(path = %path.display(), "using SQLite store");
            let students: Arc<dyn StudentStore> = sqlite.clone();
            let log: Arc<dyn ConversationLog> = sqlite;
            Ok((students, log))
        }
        None => {
            let memory = Arc::new(if store.seed_sample_data {
                MemoryStore::with_sample_data()
            } else {
                MemoryStore::new()
            });
            info!("using in-memory store");
            let students: Arc<dyn StudentStore> = memory.clone();
            let log: Arc<dyn ConversationLog> = memory;
            Ok((students, log))
        }
    }
}

/// 按 [notify] 段创建通知；webhook 模式缺少 URL 时退回日志投递
pub fn create_notifier(notify: &NotifySection) -> Arc<dyn Notifier> {
    match (notify.mode.as_str(), &notify.webhook_url) {
        ("webhook", Some(url)) => Arc::new(EmailNotifier::new(
            notify.sender.clone(),
            Arc::new(WebhookTransport::new(url.clone(), notify.timeout_secs)),
        )),
        ("webhook", None) => {
            warn!("notify.mode=webhook without webhook_url, emails will only be logged");
            Arc::new(EmailNotifier::mock(notify.sender.clone()))
        }
        _ => Arc::new(EmailNotifier::mock(notify.sender.clone())),
    }
}

/// 按 [search] 段创建搜索
pub fn create_search(search: &SearchSection) -> Arc<dyn WebSearch> {
    if search.enabled {
        Arc::new(DuckDuckGoSearch::new(
            search.timeout_secs,
            search.institution.clone(),
            search.institution_aliases.clone(),
        ))
    } else {
        Arc::new(NoopSearch)
    }
}

/// Agent 构建器
pub struct AgentBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    stores: Option<(Arc<dyn StudentStore>, Option<Arc<dyn ConversationLog>>)>,
    notifier: Option<Arc<dyn Notifier>>,
    search: Option<Arc<dyn WebSearch>>,
    retriever: Option<KnowledgeRetriever>,
}

impl AgentBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            stores: None,
            notifier: None,
            search: None,
            retriever: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// 同一个实现同时作为学生存储与对话日志
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: StudentStore + ConversationLog + 'static,
    {
        let students: Arc<dyn StudentStore> = store.clone();
        let log: Arc<dyn ConversationLog> = store;
        self.stores = Some((students, Some(log)));
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_search(mut self, search: Arc<dyn WebSearch>) -> Self {
        self.search = Some(search);
        self
    }

    pub fn with_retriever(mut self, retriever: KnowledgeRetriever) -> Self {
        self.retriever = Some(retriever);
        self
    }

    pub async fn build(self) -> Result<AgentComponents, AgentError> {
        let cfg = self.config;

        let inner = match self.llm {
            Some(llm) => llm,
            None => create_llm_from_config(&cfg.llm)?,
        };
        let llm: Arc<dyn LlmClient> = Arc::new(TimeoutLlmClient::new(
            inner,
            cfg.llm.timeouts.request,
            cfg.llm.timeouts.stream,
        ));

        let (students, log) = match self.stores {
            Some(stores) => stores,
            None => {
                let (students, log) = open_stores(&cfg.store).await?;
                (students, Some(log))
            }
        };
        let notifier = self
            .notifier
            .unwrap_or_else(|| create_notifier(&cfg.notify));
        let search = self.search.unwrap_or_else(|| create_search(&cfg.search));
        let retriever = self.retriever.unwrap_or_else(|| {
            KnowledgeRetriever::load(&cfg.knowledge.corpus_paths, cfg.knowledge.top_k)
        });

        let executor = ToolExecutor::new(
            StudentTools::new(Arc::clone(&students), notifier),
            cfg.agent.tool_timeout_secs,
            TaskScheduler::new(cfg.agent.max_concurrent_tools),
        );

        Ok(AgentComponents {
            llm,
            executor,
            tools: tool_specs(),
            retriever: Arc::new(retriever),
            search,
            students,
            log,
            settings: AgentSettings::from_config(&cfg),
        })
    }
}
