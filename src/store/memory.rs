//! 内存存储：与 SqliteStore 语义一致，用于测试与 mock 运行

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};

use super::{
    Analytics, ConversationLog, MessageKind, NewStudent, SessionRecord, SessionSummary,
    StoreError, StoredMessage, Student, StudentField, StudentStore, ANALYTICS_WINDOW_DAYS,
};

struct ActivityRow {
    student_id: String,
    timestamp: chrono::DateTime<Utc>,
}

struct SessionRow {
    record: SessionRecord,
    is_active: bool,
}

#[derive(Default)]
struct Inner {
    students: Vec<Student>,
    activity: Vec<ActivityRow>,
    sessions: HashMap<String, SessionRow>,
    messages: Vec<(String, StoredMessage)>,
    next_message_id: i64,
}

/// 内存存储
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 预置 STU001..STU010
    pub fn with_sample_data() -> Self {
        let store = Self::new();
        {
            let mut inner = store.lock();
            let now = Utc::now();
            for s in super::sample_students() {
                inner.students.push(Student {
                    id: s.id,
                    name: s.name,
                    department: s.department,
                    email: s.email,
                    created_at: now,
                    last_active: now,
                    is_active: true,
                });
            }
        }
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl StudentStore for MemoryStore {
    async fn create_student(&self, student: NewStudent) -> Result<Student, StoreError> {
        let mut inner = self.lock();
        if inner
            .students
            .iter()
            .any(|s| s.id == student.id || s.email == student.email)
        {
            return Err(StoreError::Duplicate(student.id));
        }
        let now = Utc::now();
        let record = Student {
            id: student.id,
            name: student.name,
            department: student.department,
            email: student.email,
            created_at: now,
            last_active: now,
            is_active: true,
        };
        inner.activity.push(ActivityRow {
            student_id: record.id.clone(),
            timestamp: now,
        });
        inner.students.push(record.clone());
        Ok(record)
    }

    async fn get_student(&self, id: &str) -> Result<Option<Student>, StoreError> {
        Ok(self.lock().students.iter().find(|s| s.id == id).cloned())
    }

    async fn update_student(
        &self,
        id: &str,
        field: StudentField,
        value: &str,
    ) -> Result<String, StoreError> {
        let mut inner = self.lock();
        if field == StudentField::Email
            && inner.students.iter().any(|s| s.id != id && s.email == value)
        {
            return Err(StoreError::Duplicate(value.to_string()));
        }
        let now = Utc::now();
        let student = inner
            .students
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        let old = field.value_of(student).to_string();
        match field {
            StudentField::Name => student.name = value.to_string(),
            StudentField::Department => student.department = value.to_string(),
            StudentField::Email => student.email = value.to_string(),
        }
        student.last_active = now;
        inner.activity.push(ActivityRow {
            student_id: id.to_string(),
            timestamp: now,
        });
        Ok(old)
    }

    async fn delete_student(&self, id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let before = inner.students.len();
        inner.students.retain(|s| s.id != id);
        if inner.students.len() == before {
            return Err(StoreError::NotFound(id.to_string()));
        }
        inner.activity.retain(|a| a.student_id != id);
        Ok(())
    }

    async fn list_students(&self) -> Result<Vec<Student>, StoreError> {
        let mut students = self.lock().students.clone();
        students.reverse();
        // 稳定排序：同一时刻插入的保持后插入在前
        students.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(students)
    }

    async fn analytics(&self) -> Result<Analytics, StoreError> {
        let inner = self.lock();
        let cutoff = Utc::now() - Duration::days(ANALYTICS_WINDOW_DAYS);
        let total = inner.students.len() as u64;
        let mut breakdown = BTreeMap::new();
        for s in &inner.students {
            *breakdown.entry(s.department.clone()).or_insert(0u64) += 1;
        }
        let recent = inner
            .students
            .iter()
            .filter(|s| s.created_at > cutoff)
            .count() as u64;
        let active = inner
            .activity
            .iter()
            .filter(|a| a.timestamp > cutoff)
            .map(|a| a.student_id.as_str())
            .collect::<HashSet<_>>()
            .len() as u64;
        Ok(Analytics {
            total_students: total,
            department_breakdown: breakdown,
            recent_enrollments: recent,
            active_last_7_days: active,
            activity_rate: Analytics::activity_rate(active, total),
        })
    }
}

#[async_trait]
impl ConversationLog for MemoryStore {
    async fn create_session(&self, session_id: &str, user_id: &str) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.sessions.contains_key(session_id) {
            return Err(StoreError::Duplicate(session_id.to_string()));
        }
        let now = Utc::now();
        inner.sessions.insert(
            session_id.to_string(),
            SessionRow {
                record: SessionRecord {
                    id: session_id.to_string(),
                    user_id: user_id.to_string(),
                    created_at: now,
                    last_activity: now,
                },
                is_active: true,
            },
        );
        Ok(())
    }

    async fn get_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        Ok(self
            .lock()
            .sessions
            .get(session_id)
            .filter(|row| row.is_active)
            .map(|row| row.record.clone()))
    }

    async fn touch_session(&self, session_id: &str) -> Result<(), StoreError> {
        if let Some(row) = self.lock().sessions.get_mut(session_id) {
            row.record.last_activity = Utc::now();
        }
        Ok(())
    }

    async fn delete_session(&self, session_id: &str, user_id: &str) -> Result<bool, StoreError> {
        match self.lock().sessions.get_mut(session_id) {
            Some(row) if row.record.user_id == user_id => {
                row.is_active = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn append_message(
        &self,
        session_id: &str,
        _user_id: &str,
        kind: MessageKind,
        content: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let now = Utc::now();
        inner.next_message_id += 1;
        let id = inner.next_message_id;
        inner.messages.push((
            session_id.to_string(),
            StoredMessage {
                id,
                kind,
                content: content.to_string(),
                timestamp: now,
            },
        ));
        if let Some(row) = inner.sessions.get_mut(session_id) {
            row.record.last_activity = now;
        }
        Ok(())
    }

    async fn list_messages(
        &self,
        session_id: &str,
        user_id: &str,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.lock();
        let owned = inner
            .sessions
            .get(session_id)
            .map(|row| row.is_active && row.record.user_id == user_id)
            .unwrap_or(false);
        if !owned {
            return Ok(Vec::new());
        }
        Ok(inner
            .messages
            .iter()
            .filter(|(sid, _)| sid == session_id)
            .map(|(_, m)| m.clone())
            .collect())
    }

    async fn list_sessions(&self, user_id: &str) -> Result<Vec<SessionSummary>, StoreError> {
        let inner = self.lock();
        let mut out: Vec<SessionSummary> = inner
            .sessions
            .values()
            .filter(|row| row.is_active && row.record.user_id == user_id)
            .map(|row| {
                let msgs: Vec<&StoredMessage> = inner
                    .messages
                    .iter()
                    .filter(|(sid, _)| sid == &row.record.id)
                    .map(|(_, m)| m)
                    .collect();
                SessionSummary {
                    session_id: row.record.id.clone(),
                    created_at: row.record.created_at,
                    last_activity: row.record.last_activity,
                    message_count: msgs.len() as u64,
                    last_message_time: msgs
                        .iter()
                        .map(|m| m.timestamp)
                        .max()
                        .unwrap_or(row.record.created_at),
                }
            })
            .collect();
        out.sort_by(|a, b| b.last_message_time.cmp(&a.last_message_time));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_crud_and_duplicates() {
        let store = MemoryStore::new();
        store
            .create_student(NewStudent::new("S1", "Ali", "CS", "ali@x.edu"))
            .await
            .unwrap();
        let dup = store
            .create_student(NewStudent::new("S2", "Other", "CS", "ali@x.edu"))
            .await;
        assert!(matches!(dup, Err(StoreError::Duplicate(_))));

        let old = store
            .update_student("S1", StudentField::Department, "Math")
            .await
            .unwrap();
        assert_eq!(old, "CS");
        assert_eq!(
            store.get_student("S1").await.unwrap().unwrap().department,
            "Math"
        );

        store.delete_student("S1").await.unwrap();
        assert!(matches!(
            store.delete_student("S1").await,
            Err(StoreError::NotFound(_))
        ));
        assert!(store.list_students().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sample_analytics() {
        let store = MemoryStore::with_sample_data();
        let a = store.analytics().await.unwrap();
        assert_eq!(a.total_students, 10);
        assert_eq!(a.department_breakdown["Computer Science"], 2);
        assert_eq!(a.active_last_7_days, 0);
        assert_eq!(a.activity_rate, 0.0);
    }

    #[tokio::test]
    async fn test_session_soft_delete_hides_messages() {
        let store = MemoryStore::new();
        store.create_session("sess", "u1").await.unwrap();
        store
            .append_message("sess", "u1", MessageKind::User, "hi")
            .await
            .unwrap();
        assert_eq!(store.list_messages("sess", "u1").await.unwrap().len(), 1);
        assert!(store.list_messages("sess", "u2").await.unwrap().is_empty());

        assert!(!store.delete_session("sess", "u2").await.unwrap());
        assert!(store.delete_session("sess", "u1").await.unwrap());
        assert!(store.get_session("sess").await.unwrap().is_none());
        assert!(store.list_sessions("u1").await.unwrap().is_empty());
    }
}
