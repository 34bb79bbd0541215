//! 进程内会话存储
//!
//! session_id -> Session。每个会话有一把 tokio Mutex 作为轮次锁：同一会话的轮次串行执行，
//! 不同会话互不影响。元数据与历史放在独立的同步锁里，只做短暂读写，
//! 查询、列举、删除都不必等待进行中的轮次。历史只追加；删除为软删除（标记 inactive）。
//! 淘汰策略由外部注入（TTL / LRU / 组合），sweep 时跳过仍被持有的会话。

pub mod eviction;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex, MutexGuard as SyncGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info};

pub use eviction::{
    EvictionCandidate, EvictionPolicy, LruPolicy, NoEviction, TtlLruPolicy, TtlPolicy,
};

use crate::memory::Role;

/// 历史条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug)]
struct SessionState {
    user_id: String,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
    history: Vec<HistoryEntry>,
    active: bool,
    last_touch: Instant,
}

/// 单个会话
#[derive(Debug)]
pub struct Session {
    pub id: String,
    state: SyncMutex<SessionState>,
    turn: Mutex<()>,
}

impl Session {
    fn new(id: String, user_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SyncMutex::new(SessionState {
                user_id,
                created_at: now,
                last_activity: now,
                history: Vec::new(),
                active: true,
                last_touch: Instant::now(),
            }),
            turn: Mutex::new(()),
        }
    }

    fn state(&self) -> SyncGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// 轮次锁：持有期间同一会话的其他轮次等待
    pub async fn lock_turn(&self) -> MutexGuard<'_, ()> {
        self.turn.lock().await
    }

    fn turn_in_progress(&self) -> bool {
        self.turn.try_lock().is_err()
    }

    /// 历史快照
    pub fn history(&self) -> Vec<HistoryEntry> {
        self.state().history.clone()
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn touch(&self) {
        let mut s = self.state();
        s.last_activity = Utc::now();
        s.last_touch = Instant::now();
    }

    /// 一轮完成：依次追加 user 与 assistant 两条
    pub fn append_turn(&self, user_text: &str, assistant_text: &str) {
        let mut s = self.state();
        let user_ts = Utc::now();
        s.history.push(HistoryEntry {
            role: Role::User,
            text: user_text.to_string(),
            timestamp: user_ts,
        });
        // 保证时间单调
        let assistant_ts = Utc::now().max(user_ts);
        s.history.push(HistoryEntry {
            role: Role::Assistant,
            text: assistant_text.to_string(),
            timestamp: assistant_ts,
        });
        s.last_activity = assistant_ts;
        s.last_touch = Instant::now();
    }

    pub fn info(&self) -> SessionInfo {
        let s = self.state();
        SessionInfo {
            session_id: self.id.clone(),
            user_id: s.user_id.clone(),
            created_at: s.created_at,
            last_activity: s.last_activity,
            message_count: s.history.len(),
            active: s.active,
        }
    }
}

/// 会话句柄；持有句柄期间会话不会被淘汰
pub type SessionHandle = Arc<Session>;

/// 会话信息（对外展示）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: usize,
    pub active: bool,
}

/// 会话存储
pub struct SessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    policy: Box<dyn EvictionPolicy>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(Box::new(NoEviction))
    }
}

impl SessionStore {
    pub fn new(policy: Box<dyn EvictionPolicy>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// 显式创建；id 为 None 时生成 UUID。并发创建同一 id 时只有一个生效
    pub async fn create(&self, user_id: &str, id: Option<&str>) -> (String, SessionHandle) {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let handle = self
            .sessions
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| {
                info!(session_id = %id, user_id = %user_id, "session created");
                Arc::new(Session::new(id.clone(), user_id.to_string()))
            })
            .clone();
        (id, handle)
    }

    /// 获取活跃会话句柄（已软删除的返回 None）
    pub async fn get(&self, id: &str) -> Option<SessionHandle> {
        let handle = self.sessions.read().await.get(id).cloned()?;
        handle.is_active().then_some(handle)
    }

    /// 按请求解析会话：
    /// - 未给出 id：新建
    /// - id 未知：以该 id 新建
    /// - id 已被删除：新建并分配新 id
    ///
    /// 返回 (id, 句柄, 是否新建)
    pub async fn resolve(
        &self,
        requested: Option<&str>,
        user_id: &str,
    ) -> (String, SessionHandle, bool) {
        match requested.filter(|s| !s.trim().is_empty()) {
            None => {
                let (id, h) = self.create(user_id, None).await;
                (id, h, true)
            }
            Some(id) => {
                let existing = self.sessions.read().await.get(id).cloned();
                match existing {
                    Some(handle) if handle.is_active() => (id.to_string(), handle, false),
                    Some(_) => {
                        let (id, h) = self.create(user_id, None).await;
                        (id, h, true)
                    }
                    None => {
                        let (id, h) = self.create(user_id, Some(id)).await;
                        (id, h, true)
                    }
                }
            }
        }
    }

    pub async fn info(&self, id: &str) -> Option<SessionInfo> {
        Some(self.get(id).await?.info())
    }

    pub async fn history(&self, id: &str) -> Option<Vec<HistoryEntry>> {
        Some(self.get(id).await?.history())
    }

    pub async fn touch(&self, id: &str) -> bool {
        match self.get(id).await {
            Some(h) => {
                h.touch();
                true
            }
            None => false,
        }
    }

    /// 软删除；不存在或已删除返回 false
    pub async fn delete(&self, id: &str) -> bool {
        let Some(handle) = self.get(id).await else {
            return false;
        };
        handle.state().active = false;
        debug!(session_id = %id, "session deleted");
        true
    }

    /// 用户的活跃会话
    pub async fn list_for_user(&self, user_id: &str) -> Vec<SessionInfo> {
        let mut out: Vec<SessionInfo> = self
            .sessions
            .read()
            .await
            .values()
            .map(|h| h.info())
            .filter(|info| info.active && info.user_id == user_id)
            .collect();
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        out
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// 按策略淘汰；正被持有（句柄被克隆或轮次进行中）的会话不参与
    pub async fn sweep(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();
        let mut candidates = Vec::new();
        for (id, handle) in sessions.iter() {
            if Arc::strong_count(handle) > 1 || handle.turn_in_progress() {
                continue;
            }
            let s = handle.state();
            candidates.push(EvictionCandidate {
                id: id.clone(),
                idle: now.saturating_duration_since(s.last_touch),
                active: s.active,
            });
        }
        let total = sessions.len();
        let evict = self.policy.select(&candidates, total);
        for id in &evict {
            sessions.remove(id);
        }
        if !evict.is_empty() {
            info!("evicted {} sessions", evict.len());
        }
        evict.len()
    }
}
