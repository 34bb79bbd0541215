//! 编排器
//!
//! 每轮：解析会话 → 意图识别 → 分支（工具循环 / 检索回答 / 通用回答）→ 写入会话历史并镜像到对话日志。
//! 同一会话的轮次在会话锁内串行执行；任何错误都在这里变成致歉文本或带 error 标记的流事件，不向调用方抛出。
//!
//! 流式：管理路径与不支持增量完成的后端走分块回放；其余走真增量。每次请求时探测后端能力。

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::core::{AgentBuilder, AgentComponents, AgentError};
use crate::intent::{classify, mentions_institution, Intent};
use crate::knowledge::web_search::format_web_context;
use crate::memory::{Message, Role};
use crate::react::{
    prompts, render_incremental, replay_chunks, LoopEvent, StreamEvent, StreamOutcome, StreamSink,
    ToolLoop, EMPTY_ANSWER,
};
use crate::session::{eviction, HistoryEntry, SessionHandle, SessionInfo, SessionStore};
use crate::store::{MessageKind, StudentStore};

/// 未指定用户时的默认用户
pub const DEFAULT_USER: &str = "default_user";

/// 一轮对话的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub response: String,
    pub session_id: String,
    pub timestamp: String,
}

/// 流式回复的句柄：events 在收到 complete 事件后结束
pub struct StreamHandle {
    pub session_id: String,
    pub events: UnboundedReceiver<StreamEvent>,
    /// 取消后生产方停止输出
    pub cancel: CancellationToken,
}

fn non_empty(text: String) -> String {
    if text.trim().is_empty() {
        EMPTY_ANSWER.to_string()
    } else {
        text
    }
}

/// 编排器：持有共享组件与会话存储
pub struct Orchestrator {
    components: AgentComponents,
    sessions: SessionStore,
}

impl Orchestrator {
    pub fn new(components: AgentComponents, sessions: SessionStore) -> Self {
        Self {
            components,
            sessions,
        }
    }

    /// 按配置构建全部组件，会话淘汰策略取自 [session]
    pub async fn from_config(cfg: &AppConfig) -> Result<Self, AgentError> {
        let components = AgentBuilder::new(cfg.clone()).build().await?;
        let policy = eviction::from_config(cfg.session.ttl_secs, cfg.session.max_sessions);
        Ok(Self::new(components, SessionStore::new(policy)))
    }

    pub fn components(&self) -> &AgentComponents {
        &self.components
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn students(&self) -> &Arc<dyn StudentStore> {
        &self.components.students
    }

    /// 处理一条用户输入，返回完整回复
    pub async fn process_message(
        &self,
        utterance: &str,
        session_id: Option<&str>,
        user_id: &str,
    ) -> TurnResult {
        self.process_message_observed(utterance, session_id, user_id, None)
            .await
    }

    /// 同 process_message，工具循环的步骤事件发往 events
    pub async fn process_message_observed(
        &self,
        utterance: &str,
        session_id: Option<&str>,
        user_id: &str,
        events: Option<&UnboundedSender<LoopEvent>>,
    ) -> TurnResult {
        let (session_id, handle) = self.resolve_session(session_id, user_id).await;
        let turn = handle.lock_turn().await;
        let history = handle.history();

        let intent = classify(utterance);
        info!(session_id = %session_id, intent = intent.as_str(), "turn started");
        let response = match self
            .answer(intent, utterance, &history, CancellationToken::new(), events)
            .await
        {
            Ok(text) => text,
            Err(e) => {
                warn!(session_id = %session_id, "turn failed: {}", e);
                e.apology()
            }
        };

        handle.append_turn(utterance, &response);
        drop(turn);
        self.log_token_usage(&session_id);
        self.mirror_turn(&session_id, user_id, utterance, &response)
            .await;

        TurnResult {
            response,
            session_id,
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// 流式处理：后台任务产出事件，调用方从 StreamHandle.events 读取
    pub async fn process_message_stream(
        self: &Arc<Self>,
        utterance: &str,
        session_id: Option<&str>,
        user_id: &str,
    ) -> StreamHandle {
        let (session_id, handle) = self.resolve_session(session_id, user_id).await;
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let this = Arc::clone(self);
        let utterance = utterance.to_string();
        let user_id = user_id.to_string();
        let sid = session_id.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            this.run_stream_turn(&utterance, &sid, &user_id, handle, tx, token)
                .await;
        });

        StreamHandle {
            session_id,
            events: rx,
            cancel,
        }
    }

    async fn run_stream_turn(
        &self,
        utterance: &str,
        session_id: &str,
        user_id: &str,
        handle: SessionHandle,
        tx: UnboundedSender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let mut sink = StreamSink::new(tx, cancel.clone(), session_id);
        let watcher = sink.cancel_on_disconnect();
        let turn = handle.lock_turn().await;
        let history = handle.history();

        let intent = classify(utterance);
        let settings = &self.components.settings;
        info!(session_id = %session_id, intent = intent.as_str(), "stream turn started");

        // 回放路径的文本在输出前已完整生成
        let mut finished_before_render = true;
        let outcome = match intent {
            Intent::AdministrativeTask => {
                match self
                    .run_tool_loop(utterance, &history, cancel.clone(), None)
                    .await
                {
                    Ok(text) => replay_chunks(&mut sink, &text, settings.replay_delay).await,
                    Err(AgentError::Cancelled) => StreamOutcome {
                        text: String::new(),
                        completed: false,
                        error: false,
                    },
                    Err(e) => sink.fail_with(&e),
                }
            }
            Intent::InformationQuery | Intent::General => {
                let messages = match intent {
                    Intent::InformationQuery => self.information_messages(utterance).await,
                    _ => self.general_messages(utterance, &history),
                };
                let llm = &self.components.llm;
                if llm.supports_streaming() {
                    finished_before_render = false;
                    match llm.complete_stream(&messages).await {
                        Ok(fragments) => {
                            render_incremental(
                                &mut sink,
                                fragments,
                                settings.stream_fallback_every,
                            )
                            .await
                        }
                        Err(e) => sink.fail_with(&AgentError::from(e)),
                    }
                } else {
                    match llm.complete(&messages).await {
                        Ok(text) => {
                            replay_chunks(&mut sink, &non_empty(text), settings.replay_delay)
                                .await
                        }
                        Err(e) => sink.fail_with(&AgentError::from(e)),
                    }
                }
            }
        };
        watcher.abort();

        if outcome.error {
            warn!(session_id = %session_id, "stream turn ended with error");
        }
        let record = outcome.completed || (finished_before_render && !outcome.text.is_empty());
        if !record {
            debug!(session_id = %session_id, "consumer disconnected, turn not recorded");
            return;
        }
        handle.append_turn(utterance, &outcome.text);
        drop(turn);
        self.log_token_usage(session_id);
        self.mirror_turn(session_id, user_id, utterance, &outcome.text)
            .await;
    }

    async fn answer(
        &self,
        intent: Intent,
        utterance: &str,
        history: &[HistoryEntry],
        cancel: CancellationToken,
        events: Option<&UnboundedSender<LoopEvent>>,
    ) -> Result<String, AgentError> {
        let llm = &self.components.llm;
        match intent {
            Intent::AdministrativeTask => {
                self.run_tool_loop(utterance, history, cancel, events)
                    .await
            }
            Intent::InformationQuery => {
                let messages = self.information_messages(utterance).await;
                Ok(non_empty(llm.complete(&messages).await?))
            }
            Intent::General => {
                let messages = self.general_messages(utterance, history);
                Ok(non_empty(llm.complete(&messages).await?))
            }
        }
    }

    async fn run_tool_loop(
        &self,
        utterance: &str,
        history: &[HistoryEntry],
        cancel: CancellationToken,
        events: Option<&UnboundedSender<LoopEvent>>,
    ) -> Result<String, AgentError> {
        let c = &self.components;
        let messages =
            prompts::admin_messages(utterance, history, c.settings.max_history_entries);
        let tool_loop = ToolLoop {
            llm: c.llm.as_ref(),
            executor: &c.executor,
            tools: &c.tools,
            max_rounds: c.settings.max_tool_rounds,
            cancel_token: cancel,
            events,
        };
        let outcome = tool_loop.run(messages).await?;
        Ok(outcome.answer)
    }

    /// 知识库 + 网页搜索 → 单次完成的消息
    async fn information_messages(&self, utterance: &str) -> Vec<Message> {
        let c = &self.components;
        let knowledge = c.retriever.context_text(utterance);
        let results = c.search.search(utterance, c.settings.search_max_results).await;
        prompts::information_messages(utterance, &knowledge, &format_web_context(&results))
    }

    fn general_messages(&self, utterance: &str, history: &[HistoryEntry]) -> Vec<Message> {
        let c = &self.components;
        let context = if mentions_institution(utterance) {
            c.retriever.context_text(utterance)
        } else {
            String::new()
        };
        prompts::general_messages(utterance, &context, history, c.settings.history_window)
    }

    async fn resolve_session(
        &self,
        requested: Option<&str>,
        user_id: &str,
    ) -> (String, SessionHandle) {
        let (id, handle, created) = self.sessions.resolve(requested, user_id).await;
        if created {
            self.mirror_session(&id, user_id).await;
        }
        (id, handle)
    }

    async fn mirror_session(&self, session_id: &str, user_id: &str) {
        if let Some(log) = &self.components.log {
            if let Err(e) = log.create_session(session_id, user_id).await {
                warn!(session_id = %session_id, "could not persist session: {}", e);
            }
        }
    }

    /// 进程累计的 token 用量（prompt, completion, total）
    pub fn token_usage(&self) -> (u64, u64, u64) {
        self.components.llm.token_usage()
    }

    fn log_token_usage(&self, session_id: &str) {
        let (prompt, completion, total) = self.token_usage();
        debug!(session_id = %session_id, prompt, completion, total, "token usage");
    }

    /// 对话日志是尽力而为的镜像，失败只记录
    async fn mirror_turn(&self, session_id: &str, user_id: &str, user_text: &str, ai_text: &str) {
        let Some(log) = &self.components.log else {
            return;
        };
        for (kind, text) in [(MessageKind::User, user_text), (MessageKind::Ai, ai_text)] {
            if let Err(e) = log.append_message(session_id, user_id, kind, text).await {
                warn!(session_id = %session_id, "could not persist message: {}", e);
                return;
            }
        }
        if let Err(e) = log.touch_session(session_id).await {
            debug!(session_id = %session_id, "touch failed: {}", e);
        }
    }

    /// 显式创建会话（在第一条消息之前）
    pub async fn create_session(&self, user_id: &str) -> SessionInfo {
        let (id, handle) = self.sessions.create(user_id, None).await;
        self.mirror_session(&id, user_id).await;
        handle.info()
    }

    pub async fn session_info(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.info(session_id).await
    }

    /// 会话历史；内存中已淘汰时从对话日志读取
    pub async fn session_history(&self, session_id: &str, user_id: &str) -> Option<Vec<HistoryEntry>> {
        if let Some(history) = self.sessions.history(session_id).await {
            return Some(history);
        }
        let log = self.components.log.as_ref()?;
        match log.list_messages(session_id, user_id).await {
            Ok(messages) if !messages.is_empty() => Some(
                messages
                    .into_iter()
                    .map(|m| HistoryEntry {
                        role: match m.kind {
                            MessageKind::User => Role::User,
                            MessageKind::Ai => Role::Assistant,
                        },
                        text: m.content,
                        timestamp: m.timestamp,
                    })
                    .collect(),
            ),
            Ok(_) => None,
            Err(e) => {
                warn!(session_id = %session_id, "could not load messages: {}", e);
                None
            }
        }
    }

    /// 软删除；会话不存在或不属于该用户时返回 false
    pub async fn delete_session(&self, session_id: &str, user_id: &str) -> bool {
        match self.sessions.info(session_id).await {
            Some(info) if info.user_id == user_id => {}
            _ => return false,
        }
        let deleted = self.sessions.delete(session_id).await;
        if let Some(log) = &self.components.log {
            if let Err(e) = log.delete_session(session_id, user_id).await {
                warn!(session_id = %session_id, "could not mark session deleted: {}", e);
            }
        }
        deleted
    }

    pub async fn list_sessions(&self, user_id: &str) -> Vec<SessionInfo> {
        self.sessions.list_for_user(user_id).await
    }

    /// 后台定期按策略淘汰会话
    pub fn spawn_session_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every.max(Duration::from_secs(1)));
            interval.tick().await;
            loop {
                interval.tick().await;
                let evicted = this.sessions.sweep().await;
                if evicted > 0 {
                    debug!("session sweep evicted {}", evicted);
                }
            }
        })
    }
}
