//! SQLite 存储（rusqlite，bundled）
//!
//! 连接放在 `Arc<Mutex<Connection>>` 中，每次操作在 spawn_blocking 里执行，不阻塞运行时线程。
//! 时间统一存为 RFC3339（UTC、毫秒精度），字符串比较即时间比较。

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use tracing::info;

use super::{
    Analytics, ConversationLog, MessageKind, NewStudent, SessionRecord, SessionSummary,
    StoreError, StoredMessage, Student, StudentField, StudentStore, ANALYTICS_WINDOW_DAYS,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    department TEXT NOT NULL,
    email TEXT UNIQUE NOT NULL,
    created_at TEXT NOT NULL,
    last_active TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS activity_logs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL,
    activity TEXT NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    last_activity TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    message_type TEXT NOT NULL CHECK (message_type IN ('user', 'ai')),
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);
"#;

fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_default()
}

/// 唯一约束冲突映射为 Duplicate
fn map_insert_err(e: rusqlite::Error, key: &str) -> StoreError {
    match &e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
            StoreError::Duplicate(key.to_string())
        }
        _ => StoreError::Sqlite(e),
    }
}

fn student_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Student> {
    let created: String = row.get(4)?;
    let last: String = row.get(5)?;
    Ok(Student {
        id: row.get(0)?,
        name: row.get(1)?,
        department: row.get(2)?,
        email: row.get(3)?,
        created_at: parse_ts(&created),
        last_active: parse_ts(&last),
        is_active: row.get::<_, i64>(6)? != 0,
    })
}

const STUDENT_COLUMNS: &str = "id, name, department, email, created_at, last_active, is_active";

/// SQLite 存储
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// 打开或创建数据库文件
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// 内存数据库（测试）
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 学生表为空时写入示例学生，返回写入条数
    pub async fn seed_sample_data(&self) -> Result<usize, StoreError> {
        let n = self
            .run(|conn| {
                let count: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;
                if count > 0 {
                    return Ok(0);
                }
                let now = ts(Utc::now());
                let tx = conn.unchecked_transaction()?;
                let samples = super::sample_students();
                for s in &samples {
                    tx.execute(
                        "INSERT INTO students (id, name, department, email, created_at, last_active) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                        params![s.id, s.name, s.department, s.email, now],
                    )?;
                }
                tx.commit()?;
                Ok(samples.len())
            })
            .await?;
        if n > 0 {
            info!("Seeded {} sample students", n);
        }
        Ok(n)
    }

    async fn run<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|e| e.into_inner());
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
    }
}

#[async_trait]
impl StudentStore for SqliteStore {
    async fn create_student(&self, student: NewStudent) -> Result<Student, StoreError> {
        self.run(move |conn| {
            let now = Utc::now();
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO students (id, name, department, email, created_at, last_active) VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                params![student.id, student.name, student.department, student.email, ts(now)],
            )
            .map_err(|e| map_insert_err(e, &student.id))?;
            tx.execute(
                "INSERT INTO activity_logs (student_id, activity, timestamp) VALUES (?1, 'Student registered', ?2)",
                params![student.id, ts(now)],
            )?;
            tx.commit()?;
            Ok(Student {
                id: student.id,
                name: student.name,
                department: student.department,
                email: student.email,
                created_at: now,
                last_active: now,
                is_active: true,
            })
        })
        .await
    }

    async fn get_student(&self, id: &str) -> Result<Option<Student>, StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let sql = format!("SELECT {} FROM students WHERE id = ?1", STUDENT_COLUMNS);
            Ok(conn.query_row(&sql, [&id], student_from_row).optional()?)
        })
        .await
    }

    async fn update_student(
        &self,
        id: &str,
        field: StudentField,
        value: &str,
    ) -> Result<String, StoreError> {
        let id = id.to_string();
        let value = value.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let sql = format!("SELECT {} FROM students WHERE id = ?1", STUDENT_COLUMNS);
            let current = tx
                .query_row(&sql, [&id], student_from_row)
                .optional()?
                .ok_or_else(|| StoreError::NotFound(id.clone()))?;
            let old = field.value_of(&current).to_string();
            let now = ts(Utc::now());
            // 列名来自封闭枚举，不存在注入
            let update = format!(
                "UPDATE students SET {} = ?1, last_active = ?2 WHERE id = ?3",
                field.as_str()
            );
            tx.execute(&update, params![value, now, id])
                .map_err(|e| map_insert_err(e, &value))?;
            tx.execute(
                "INSERT INTO activity_logs (student_id, activity, timestamp) VALUES (?1, ?2, ?3)",
                params![id, format!("Updated {}", field.as_str()), now],
            )?;
            tx.commit()?;
            Ok(old)
        })
        .await
    }

    async fn delete_student(&self, id: &str) -> Result<(), StoreError> {
        let id = id.to_string();
        self.run(move |conn| {
            let tx = conn.transaction()?;
            let n = tx.execute("DELETE FROM students WHERE id = ?1", [&id])?;
            if n == 0 {
                return Err(StoreError::NotFound(id));
            }
            tx.execute("DELETE FROM activity_logs WHERE student_id = ?1", [&id])?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        self.run(|conn| {
            let sql = format!(
                "SELECT {} FROM students ORDER BY created_at DESC, rowid DESC",
                STUDENT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], student_from_row)?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn analytics(&self) -> Result<Analytics, StoreError> {
        self.run(|conn| {
            let cutoff = ts(Utc::now() - Duration::days(ANALYTICS_WINDOW_DAYS));
            let total: i64 = conn.query_row("SELECT COUNT(*) FROM students", [], |r| r.get(0))?;

            let mut stmt =
                conn.prepare("SELECT department, COUNT(*) FROM students GROUP BY department")?;
            let breakdown = stmt
                .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))?
                .collect::<Result<BTreeMap<_, _>, _>>()?;

            let recent: i64 = conn.query_row(
                "SELECT COUNT(*) FROM students WHERE created_at > ?1",
                [&cutoff],
                |r| r.get(0),
            )?;
            let active: i64 = conn.query_row(
                "SELECT COUNT(DISTINCT student_id) FROM activity_logs WHERE timestamp > ?1",
                [&cutoff],
                |r| r.get(0),
            )?;

            let total = total as u64;
            let active = active as u64;
            Ok(Analytics {
                total_students: total,
                department_breakdown: breakdown,
                recent_enrollments: recent as u64,
                active_last_7_days: active,
                activity_rate: Analytics::activity_rate(active, total),
            })
        })
        .await
    }
}

#[async_trait]
impl ConversationLog for SqliteStore {
    async fn create_session(&self, session_id: &str, user_id: &str) -> Result<(), StoreError> {
        let (sid, uid) = (session_id.to_string(), user_id.to_string());
        self.run(move |conn| {
            let now = ts(Utc::now());
            conn.execute(
                "INSERT INTO sessions (id, user_id, created_at, last_activity) VALUES (?1, ?2, ?3, ?3)",
                params![sid, uid, now],
            )
            .map_err(|e| map_insert_err(e, &sid))?;
            Ok(())
        })
        .await
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let sid = session_id.to_string();
        self.run(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT id, user_id, created_at, last_activity FROM sessions WHERE id = ?1 AND is_active = 1",
                    [&sid],
                    |r| {
                        Ok(SessionRecord {
                            id: r.get(0)?,
                            user_id: r.get(1)?,
                            created_at: parse_ts(&r.get::<_, String>(2)?),
                            last_activity: parse_ts(&r.get::<_, String>(3)?),
                        })
                    },
                )
                .optional()?)
        })
        .await
    }

    async fn touch_session(&self, session_id: &str) -> Result<(), StoreError> {
        let sid = session_id.to_string();
        self.run(move |conn| {
            conn.execute(
                "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
                params![ts(Utc::now()), sid],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<bool, StoreError> {
        let (sid, uid) = (session_id.to_string(), user_id.to_string());
        self.run(move |conn| {
            let n = conn.execute(
                "UPDATE sessions SET is_active = 0 WHERE id = ?1 AND user_id = ?2",
                params![sid, uid],
            )?;
            Ok(n > 0)
        })
        .await
    }

    async fn append_message(
        &self,
        session_id: &str,
        user_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), StoreError> {
        let (sid, uid, content) = (
            session_id.to_string(),
            user_id.to_string(),
            content.to_string(),
        );
        self.run(move |conn| {
            let now = ts(Utc::now());
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (session_id, user_id, message_type, content, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![sid, uid, kind.as_str(), content, now],
            )?;
            tx.execute(
                "UPDATE sessions SET last_activity = ?1 WHERE id = ?2",
                params![now, sid],
            )?;
            tx.commit()?;
            Ok(())
        })
        .await
    }

    async fn list_messages(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let (sid, uid) = (session_id.to_string(), user_id.to_string());
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT m.id, m.message_type, m.content, m.created_at
                 FROM messages m JOIN sessions s ON m.session_id = s.id
                 WHERE m.session_id = ?1 AND s.user_id = ?2 AND s.is_active = 1
                 ORDER BY m.created_at ASC, m.id ASC",
            )?;
            let rows = stmt.query_map(params![sid, uid], |r| {
                Ok(StoredMessage {
                    id: r.get(0)?,
                    kind: MessageKind::parse(&r.get::<_, String>(1)?),
                    content: r.get(2)?,
                    timestamp: parse_ts(&r.get::<_, String>(3)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, StoreError> {
        let uid = user_id.to_string();
        self.run(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.created_at, s.last_activity, COUNT(m.id),
                        COALESCE(MAX(m.created_at), s.created_at) AS last_message_time
                 FROM sessions s LEFT JOIN messages m ON s.id = m.session_id
                 WHERE s.user_id = ?1 AND s.is_active = 1
                 GROUP BY s.id, s.created_at, s.last_activity
                 ORDER BY last_message_time DESC",
            )?;
            let rows = stmt.query_map([&uid], |r| {
                Ok(SessionSummary {
                    session_id: r.get(0)?,
                    created_at: parse_ts(&r.get::<_, String>(1)?),
                    last_activity: parse_ts(&r.get::<_, String>(2)?),
                    message_count: r.get::<_, i64>(3)? as u64,
                    last_message_time: parse_ts(&r.get::<_, String>(4)?),
                })
            })?;
            Ok(rows.collect::<Result<Vec<_>, _>>()?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_seed_once_and_analytics() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path().join("campus.db")).unwrap();
        assert_eq!(store.seed_sample_data().await.unwrap(), 10);
        assert_eq!(store.seed_sample_data().await.unwrap(), 0);

        let a = store.analytics().await.unwrap();
        assert_eq!(a.total_students, 10);
        assert_eq!(a.recent_enrollments, 10);
        assert_eq!(a.department_breakdown["Physics"], 2);
        assert_eq!(a.active_last_7_days, 0);
    }

    #[tokio::test]
    async fn test_ten_students_four_in_cs() {
        let store = SqliteStore::in_memory().unwrap();
        let depts = ["Computer Science", "Computer Science", "Computer Science", "Computer Science",
            "Physics", "Physics", "Biology", "Mathematics", "Mathematics", "Chemistry"];
        for (i, d) in depts.iter().enumerate() {
            store
                .create_student(NewStudent::new(
                    format!("S{:02}", i),
                    format!("Student {}", i),
                    *d,
                    format!("s{}@x.edu", i),
                ))
                .await
                .unwrap();
        }
        let a = store.analytics().await.unwrap();
        assert_eq!(a.total_students, 10);
        assert_eq!(a.department_breakdown["Computer Science"], 4);
        // 每次注册都写活动记录
        assert_eq!(a.active_last_7_days, 10);
        assert_eq!(a.activity_rate, 100.0);

        store.delete_student("S00").await.unwrap();
        let a = store.analytics().await.unwrap();
        assert_eq!(a.active_last_7_days, 9);
    }

    #[tokio::test]
    async fn test_duplicate_and_update() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .create_student(NewStudent::new("S1", "Ali", "CS", "ali@x.edu"))
            .await
            .unwrap();
        let dup = store
            .create_student(NewStudent::new("S1", "Ali", "CS", "other@x.edu"))
            .await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));

        let old = store
            .update_student("S1", StudentField::Name, "Ali Ahmed")
            .await
            .unwrap();
        assert_eq!(old, "Ali");
        let missing = store.update_student("nope", StudentField::Name, "x").await;
        assert!(matches!(missing, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_conversation_log() {
        let store = SqliteStore::in_memory().unwrap();
        store.create_session("sess-1", "default_user").await.unwrap();
        store
            .append_message("sess-1", "default_user", MessageKind::User, "hello")
            .await
            .unwrap();
        store
            .append_message("sess-1", "default_user", MessageKind::Ai, "hi there")
            .await
            .unwrap();

        let msgs = store.list_messages("sess-1", "default_user").await.unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[1].kind, MessageKind::Ai);

        let sessions = store.list_sessions("default_user").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].message_count, 2);

        assert!(store.delete_session("sess-1", "default_user").await.unwrap());
        assert!(store.get_session("sess-1").await.unwrap().is_none());
    }
}
