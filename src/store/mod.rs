//! 存储层：学生登记、活动日志、会话与消息
//!
//! StudentStore 供工具调用；ConversationLog 供编排器镜像每轮对话。
//! 两者都有 SQLite（持久化）与内存（测试 / mock 运行）两种实现。

pub mod memory;
pub mod sqlite;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// 存储错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("student ID or email already exists: {0}")]
    Duplicate(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid field '{0}', allowed fields: name, department, email")]
    InvalidField(String),

    #[error("storage task failed: {0}")]
    Join(String),
}

/// 学生记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: String,
    pub name: String,
    pub department: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub is_active: bool,
}

/// 新增学生的输入
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewStudent {
    pub id: String,
    pub name: String,
    pub department: String,
    pub email: String,
}

impl NewStudent {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        department: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            department: department.into(),
            email: email.into(),
        }
    }
}

/// 可更新字段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudentField {
    Name,
    Department,
    Email,
}

impl StudentField {
    pub fn parse(field: &str) -> Result<Self, StoreError> {
        match field.trim().to_lowercase().as_str() {
            "name" => Ok(StudentField::Name),
            "department" => Ok(StudentField::Department),
            "email" => Ok(StudentField::Email),
            other => Err(StoreError::InvalidField(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StudentField::Name => "name",
            StudentField::Department => "department",
            StudentField::Email => "email",
        }
    }

    /// 读取该字段当前值
    pub fn value_of<'a>(&self, student: &'a Student) -> &'a str {
        match self {
            StudentField::Name => &student.name,
            StudentField::Department => &student.department,
            StudentField::Email => &student.email,
        }
    }
}

/// 校园统计
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub total_students: u64,
    pub department_breakdown: BTreeMap<String, u64>,
    /// 最近 7 天入学
    pub recent_enrollments: u64,
    /// 最近 7 天有活动记录的不同学生数
    pub active_last_7_days: u64,
    /// active / total × 100，保留两位小数；total 为 0 时为 0
    pub activity_rate: f64,
}

impl Analytics {
    pub fn activity_rate(active: u64, total: u64) -> f64 {
        if total == 0 {
            return 0.0;
        }
        let pct = active as f64 / total as f64 * 100.0;
        (pct * 100.0).round() / 100.0
    }
}

/// 统计窗口（天）
pub const ANALYTICS_WINDOW_DAYS: i64 = 7;

/// 持久化的会话元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// 会话列表项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub message_count: u64,
    pub last_message_time: DateTime<Utc>,
}

/// 消息类型（user / ai）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    User,
    Ai,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::User => "user",
            MessageKind::Ai => "ai",
        }
    }

    pub fn parse(s: &str) -> Self {
        if s == "user" {
            MessageKind::User
        } else {
            MessageKind::Ai
        }
    }
}

/// 持久化的单条消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// 学生登记存储
#[async_trait]
pub trait StudentStore: Send + Sync {
    /// ID 或 email 重复时返回 Duplicate
    async fn create_student(&self, student: NewStudent) -> Result<Student, StoreError>;

    async fn get_student(&self, id: &str) -> Result<Option<Student>, StoreError>;

    /// 更新单个字段，返回更新前的值
    async fn update_student(
        &self,
        id: &str,
        field: StudentField,
        value: &str,
    ) -> Result<String, StoreError>;

    /// 删除学生及其活动记录
    async fn delete_student(&self, id: &str) -> Result<(), StoreError>;

    /// 按入学时间倒序
    async fn list_students(&self) -> Result<Vec<Student>, StoreError>;

    async fn analytics(&self) -> Result<Analytics, StoreError>;
}

/// 会话与消息日志（追加写）
#[async_trait]
pub trait ConversationLog: Send + Sync {
    async fn create_session(&self, session_id: &str, user_id: &str) -> Result<(), StoreError>;

    /// 仅返回未删除的会话
    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError>;

    async fn touch_session(&self, session_id: &str) -> Result<(), StoreError>;

    /// 软删除；会话不属于该用户时返回 false
    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<bool, StoreError>;

    async fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), StoreError>;

    async fn list_messages(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// 用户的活跃会话，按最近消息时间倒序
    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, StoreError>;
}

/// 示例数据（表为空时写入）
pub fn sample_students() -> Vec<NewStudent> {
    [
        ("STU001", "Ali Ahmed", "Computer Science", "ali.ahmed@nust.edu.pk"),
        ("STU002", "Sara Khan", "Mathematics", "sara.khan@nust.edu.pk"),
        ("STU003", "Hassan Ali", "Engineering", "hassan.ali@nust.edu.pk"),
        ("STU004", "Fatima Sheikh", "Physics", "fatima.sheikh@nust.edu.pk"),
        ("STU005", "Omar Malik", "Computer Science", "omar.malik@nust.edu.pk"),
        ("STU006", "Ayesha Raza", "Biology", "ayesha.raza@nust.edu.pk"),
        ("STU007", "Usman Tariq", "Chemistry", "usman.tariq@nust.edu.pk"),
        ("STU008", "Zara Iqbal", "Engineering", "zara.iqbal@nust.edu.pk"),
        ("STU009", "Bilal Shah", "Mathematics", "bilal.shah@nust.edu.pk"),
        ("STU010", "Hiba Nasir", "Physics", "hiba.nasir@nust.edu.pk"),
    ]
    .into_iter()
    .map(|(id, name, dept, email)| NewStudent::new(id, name, dept, email))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_rate() {
        assert_eq!(Analytics::activity_rate(0, 0), 0.0);
        assert_eq!(Analytics::activity_rate(1, 3), 33.33);
        assert_eq!(Analytics::activity_rate(2, 3), 66.67);
        assert_eq!(Analytics::activity_rate(4, 4), 100.0);
    }

    #[test]
    fn test_field_parse() {
        assert_eq!(StudentField::parse("Department").unwrap(), StudentField::Department);
        assert!(matches!(
            StudentField::parse("gpa"),
            Err(StoreError::InvalidField(f)) if f == "gpa"
        ));
    }
}
