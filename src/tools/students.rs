//! 学生管理工具的处理函数
//!
//! 每个处理函数都返回 JSON 结果（success + message + 工具特有字段），存储失败也转成 success=false 的结果。
//! 新增与更新成功后各尝试一次通知，通知失败不影响 success；删除从不发送通知。

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::notify::Notifier;
use crate::store::{NewStudent, StoreError, StudentField, StudentStore};
use crate::tools::registry::CampusTool;
use crate::tools::schema::{parse_args, AddStudentArgs, NoArgs, StudentIdArgs, UpdateStudentArgs};

fn failure(message: impl Into<String>) -> Value {
    json!({ "success": false, "message": message.into() })
}

/// 工具处理器：持有存储与通知协作方
#[derive(Clone)]
pub struct StudentTools {
    store: Arc<dyn StudentStore>,
    notifier: Arc<dyn Notifier>,
}

impl StudentTools {
    pub fn new(store: Arc<dyn StudentStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self { store, notifier }
    }

    /// 分派到对应处理函数；参数无法解析时返回 Err（由执行器转为失败结果）
    pub async fn dispatch(&self, tool: CampusTool, args: Value) -> Result<Value, String> {
        let result = match tool {
            CampusTool::AddStudent => self.add_student(parse_args(args)?).await,
            CampusTool::GetStudent => self.get_student(parse_args(args)?).await,
            CampusTool::UpdateStudent => self.update_student(parse_args(args)?).await,
            CampusTool::DeleteStudent => self.delete_student(parse_args(args)?).await,
            CampusTool::ListStudents => {
                let _: NoArgs = parse_args(args).unwrap_or_default();
                self.list_students().await
            }
            CampusTool::GetCampusAnalytics => self.get_campus_analytics().await,
        };
        Ok(result)
    }

    async fn add_student(&self, args: AddStudentArgs) -> Value {
        let new = NewStudent::new(&args.student_id, &args.name, &args.department, &args.email);
        let student = match self.store.create_student(new).await {
            Ok(s) => s,
            Err(StoreError::Duplicate(_)) => {
                return failure("Failed to add student. ID or email might already exist.")
            }
            Err(e) => return failure(format!("Failed to add student: {}", e)),
        };

        let outcome = self
            .notifier
            .send_welcome(&student.id, &student.email, &student.name, &student.department)
            .await;
        if !outcome.success {
            warn!(student = %student.id, "welcome email failed: {}", outcome.message);
        }
        json!({
            "success": true,
            "message": format!("Student {} (ID: {}) added successfully", student.name, student.id),
            "student": student,
            "email_sent": outcome.success,
            "email_status": outcome.message,
        })
    }

    async fn get_student(&self, args: StudentIdArgs) -> Value {
        match self.store.get_student(&args.student_id).await {
            Ok(Some(student)) => json!({ "success": true, "student": student }),
            Ok(None) => failure(format!("Student with ID {} not found", args.student_id)),
            Err(e) => failure(format!("Failed to get student: {}", e)),
        }
    }

    async fn update_student(&self, args: UpdateStudentArgs) -> Value {
        let field = match StudentField::parse(&args.field) {
            Ok(f) => f,
            Err(_) => {
                return failure(format!(
                    "Failed to update {}. Invalid field name. Allowed fields: name, department, email",
                    args.field
                ))
            }
        };
        let student = match self.store.get_student(&args.student_id).await {
            Ok(Some(s)) => s,
            Ok(None) => return failure(format!("Student with ID {} not found", args.student_id)),
            Err(e) => return failure(format!("Failed to update student: {}", e)),
        };

        let old_value = match self
            .store
            .update_student(&args.student_id, field, &args.new_value)
            .await
        {
            Ok(old) => old,
            Err(StoreError::NotFound(_)) => {
                return failure(format!("Student with ID {} not found", args.student_id))
            }
            Err(StoreError::Duplicate(_)) => {
                return failure(format!("Email {} is already in use", args.new_value))
            }
            Err(e) => return failure(format!("Failed to update student: {}", e)),
        };

        // 邮箱变更时通知发往新地址
        let address = if field == StudentField::Email {
            args.new_value.as_str()
        } else {
            student.email.as_str()
        };
        let name = if field == StudentField::Name {
            args.new_value.as_str()
        } else {
            student.name.as_str()
        };
        let outcome = self
            .notifier
            .send_update_notice(
                &student.id,
                address,
                name,
                field.as_str(),
                &old_value,
                &args.new_value,
            )
            .await;
        json!({
            "success": true,
            "message": format!("Student {} {} updated to '{}'", student.id, field.as_str(), args.new_value),
            "old_value": old_value,
            "email_sent": outcome.success,
            "email_status": outcome.message,
        })
    }

    async fn delete_student(&self, args: StudentIdArgs) -> Value {
        debug!(student = %args.student_id, "delete_student: no notification by policy");
        let message = match self.store.delete_student(&args.student_id).await {
            Ok(()) => {
                return json!({
                    "success": true,
                    "message": format!(
                        "Student {} deleted successfully (No email notification sent)",
                        args.student_id
                    ),
                    "email_sent": false,
                })
            }
            Err(StoreError::NotFound(_)) => {
                format!("Student with ID {} not found", args.student_id)
            }
            Err(e) => format!("Failed to delete student: {}", e),
        };
        json!({ "success": false, "message": message, "email_sent": false })
    }

    async fn list_students(&self) -> Value {
        match self.store.list_students().await {
            Ok(students) => json!({
                "success": true,
                "total_count": students.len(),
                "students": students,
            }),
            Err(e) => failure(format!("Failed to list students: {}", e)),
        }
    }

    async fn get_campus_analytics(&self) -> Value {
        match self.store.analytics().await {
            Ok(analytics) => json!({
                "success": true,
                "analytics": analytics,
                "timestamp": chrono::Local::now().to_rfc3339(),
            }),
            Err(e) => failure(format!("Failed to get analytics: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::CountingNotifier;
    use crate::store::MemoryStore;

    fn tools(notifier: Arc<CountingNotifier>) -> StudentTools {
        StudentTools::new(Arc::new(MemoryStore::with_sample_data()), notifier)
    }

    #[tokio::test]
    async fn test_add_notifies_once() {
        let notifier = Arc::new(CountingNotifier::new());
        let t = tools(notifier.clone());
        let out = t
            .dispatch(
                CampusTool::AddStudent,
                json!({"name": "Ali Ahmed", "student_id": "STU011", "department": "Computer Science", "email": "ali@x.edu"}),
            )
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["email_sent"], true);
        assert_eq!(notifier.welcome_count(), 1);

        // 重复 ID：失败且不通知
        let dup = t
            .dispatch(
                CampusTool::AddStudent,
                json!({"name": "X", "student_id": "STU011", "department": "CS", "email": "x@x.edu"}),
            )
            .await
            .unwrap();
        assert_eq!(dup["success"], false);
        assert_eq!(notifier.welcome_count(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_success() {
        let notifier = Arc::new(CountingNotifier::failing());
        let t = tools(notifier.clone());
        let out = t
            .dispatch(
                CampusTool::UpdateStudent,
                json!({"student_id": "STU002", "field": "department", "new_value": "Physics"}),
            )
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["email_sent"], false);
        assert_eq!(out["old_value"], "Mathematics");
        assert_eq!(notifier.update_count(), 1);
    }

    #[tokio::test]
    async fn test_update_invalid_field_and_missing_id() {
        let notifier = Arc::new(CountingNotifier::new());
        let t = tools(notifier.clone());
        let bad_field = t
            .dispatch(
                CampusTool::UpdateStudent,
                json!({"student_id": "STU002", "field": "gpa", "new_value": "4.0"}),
            )
            .await
            .unwrap();
        assert_eq!(bad_field["success"], false);
        let missing = t
            .dispatch(
                CampusTool::UpdateStudent,
                json!({"student_id": "STU999", "field": "name", "new_value": "Z"}),
            )
            .await
            .unwrap();
        assert_eq!(missing["success"], false);
        assert_eq!(notifier.total(), 0);
    }

    #[tokio::test]
    async fn test_delete_never_notifies() {
        let notifier = Arc::new(CountingNotifier::new());
        let t = tools(notifier.clone());
        for id in ["STU003", "STU003", "NOPE"] {
            let out = t
                .dispatch(CampusTool::DeleteStudent, json!({ "student_id": id }))
                .await
                .unwrap();
            assert_eq!(out["email_sent"], false);
        }
        assert_eq!(notifier.total(), 0);
    }

    #[tokio::test]
    async fn test_list_and_analytics() {
        let t = tools(Arc::new(CountingNotifier::new()));
        let list = t
            .dispatch(CampusTool::ListStudents, Value::Null)
            .await
            .unwrap();
        assert_eq!(list["total_count"], 10);
        let stats = t
            .dispatch(CampusTool::GetCampusAnalytics, json!({}))
            .await
            .unwrap();
        assert_eq!(stats["analytics"]["total_students"], 10);
        assert!(stats["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_malformed_args_is_err() {
        let t = tools(Arc::new(CountingNotifier::new()));
        assert!(t
            .dispatch(CampusTool::GetStudent, json!({"wrong": 1}))
            .await
            .is_err());
    }
}
