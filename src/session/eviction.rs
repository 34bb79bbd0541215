//! 会话淘汰策略

use std::time::Duration;

/// sweep 时可被淘汰的会话（已排除正被持有的）
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub id: String,
    pub idle: Duration,
    pub active: bool,
}

/// 淘汰策略：从候选中选出要移除的会话 id
pub trait EvictionPolicy: Send + Sync {
    /// total 为当前会话总数（含不可淘汰的）
    fn select(&self, candidates: &[EvictionCandidate], total: usize) -> Vec<String>;
}

/// 从不淘汰
pub struct NoEviction;

impl EvictionPolicy for NoEviction {
    fn select(&self, _candidates: &[EvictionCandidate], _total: usize) -> Vec<String> {
        Vec::new()
    }
}

/// 空闲超过 ttl 或已软删除的会话被淘汰
pub struct TtlPolicy {
    ttl: Duration,
}

impl TtlPolicy {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl }
    }
}

impl EvictionPolicy for TtlPolicy {
    fn select(&self, candidates: &[EvictionCandidate], _total: usize) -> Vec<String> {
        candidates
            .iter()
            .filter(|c| !c.active || c.idle >= self.ttl)
            .map(|c| c.id.clone())
            .collect()
    }
}

/// 会话数超过 max 时，淘汰最久未访问的
pub struct LruPolicy {
    max: usize,
}

impl LruPolicy {
    pub fn new(max: usize) -> Self {
        Self { max }
    }
}

impl EvictionPolicy for LruPolicy {
    fn select(&self, candidates: &[EvictionCandidate], total: usize) -> Vec<String> {
        if total <= self.max {
            return Vec::new();
        }
        let mut sorted: Vec<&EvictionCandidate> = candidates.iter().collect();
        sorted.sort_by(|a, b| b.idle.cmp(&a.idle));
        sorted
            .into_iter()
            .take(total - self.max)
            .map(|c| c.id.clone())
            .collect()
    }
}

/// TTL 与 LRU 组合：先按 TTL，剩余数量仍超限时再按 LRU
pub struct TtlLruPolicy {
    ttl: TtlPolicy,
    lru: LruPolicy,
}

impl TtlLruPolicy {
    pub fn new(ttl: Duration, max: usize) -> Self {
        Self {
            ttl: TtlPolicy::new(ttl),
            lru: LruPolicy::new(max),
        }
    }
}

impl EvictionPolicy for TtlLruPolicy {
    fn select(&self, candidates: &[EvictionCandidate], total: usize) -> Vec<String> {
        let mut evicted = self.ttl.select(candidates, total);
        let remaining: Vec<EvictionCandidate> = candidates
            .iter()
            .filter(|c| !evicted.contains(&c.id))
            .cloned()
            .collect();
        evicted.extend(self.lru.select(&remaining, total - evicted.len()));
        evicted
    }
}

/// 按配置构造：ttl_secs / max_sessions 为 0 表示不启用对应策略
pub fn from_config(ttl_secs: u64, max_sessions: usize) -> Box<dyn EvictionPolicy> {
    match (ttl_secs, max_sessions) {
        (0, 0) => Box::new(NoEviction),
        (ttl, 0) => Box::new(TtlPolicy::new(Duration::from_secs(ttl))),
        (0, max) => Box::new(LruPolicy::new(max)),
        (ttl, max) => Box::new(TtlLruPolicy::new(Duration::from_secs(ttl), max)),
    }
}
