//! 邮件模板：welcome / profile_update / general_notification
//!
//! 占位符写作 `{name}`；未知模板或缺少变量时退回 general_notification。

use std::collections::HashMap;

use chrono::Local;
use regex::Regex;

/// 模板 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    Welcome,
    ProfileUpdate,
    GeneralNotification,
}

impl Template {
    /// 未知 ID 退回 GeneralNotification
    pub fn from_id(id: &str) -> Self {
        match id {
            "welcome" => Template::Welcome,
            "profile_update" => Template::ProfileUpdate,
            _ => Template::GeneralNotification,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Template::Welcome => "welcome",
            Template::ProfileUpdate => "profile_update",
            Template::GeneralNotification => "general_notification",
        }
    }

    fn subject(&self) -> &'static str {
        match self {
            Template::Welcome => "Welcome to NUST Campus - Account Created",
            Template::ProfileUpdate => "Profile Update Notification - NUST Campus",
            Template::GeneralNotification => "NUST Campus Notification",
        }
    }

    fn body(&self) -> &'static str {
        match self {
            Template::Welcome => WELCOME_BODY,
            Template::ProfileUpdate => PROFILE_UPDATE_BODY,
            Template::GeneralNotification => GENERAL_BODY,
        }
    }
}

const WELCOME_BODY: &str = "Dear {student_name},

Welcome to NUST University! We're excited to have you join our academic community.

Your student account has been successfully created with the following details:
• Student ID: {student_id}
• Department: {department}
• Registered Email: {email}
• Account Created: {created_date}

Getting Started:
• You can now access all campus facilities and services
• Keep your student ID safe - you'll need it for various campus activities
• Visit the student portal to complete your profile setup
• Check out upcoming orientation events

If you have any questions or need assistance, don't hesitate to contact our campus admin team.

Welcome to NUST!

Best regards,
NUST Campus Administration Team";

const PROFILE_UPDATE_BODY: &str = "Dear {student_name},

This email confirms that your student profile has been updated.

Update Details:
• Field Modified: {field_updated}
• Previous Value: {old_value}
• New Value: {new_value}
• Updated On: {update_date}
• Updated By: Campus Admin

If you did not request this change or believe this update was made in error, please contact the campus administration team immediately.

Best regards,
NUST Campus Administration Team";

const GENERAL_BODY: &str = "Dear {student_name},

{message_content}

This message was sent on: {send_date}

If you have any questions regarding this notification, please contact the campus administration team.

Best regards,
NUST Campus Administration Team";

/// 渲染结果
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub subject: String,
    pub body: String,
}

/// 替换模板中的占位符；任一占位符缺少变量时返回 None
fn substitute(text: &str, vars: &HashMap<String, String>) -> Option<String> {
    let re = Regex::new(r"\{([a-z_]+)\}").ok()?;
    if re.captures_iter(text).any(|c| !vars.contains_key(&c[1])) {
        return None;
    }
    Some(
        re.replace_all(text, |c: &regex::Captures<'_>| vars[&c[1]].clone())
            .into_owned(),
    )
}

/// 渲染模板；自动补充日期变量
pub fn render(template: Template, vars: &HashMap<String, String>) -> Rendered {
    let mut vars = vars.clone();
    let now = Local::now();
    vars.entry("send_date".to_string())
        .or_insert_with(|| now.format("%Y-%m-%d %H:%M:%S").to_string());
    vars.entry("created_date".to_string())
        .or_insert_with(|| now.format("%Y-%m-%d").to_string());
    vars.entry("update_date".to_string())
        .or_insert_with(|| now.format("%Y-%m-%d %H:%M:%S").to_string());

    match (
        substitute(template.subject(), &vars),
        substitute(template.body(), &vars),
    ) {
        (Some(subject), Some(body)) => Rendered { subject, body },
        _ if template != Template::GeneralNotification => {
            let mut fallback = HashMap::new();
            fallback.insert(
                "student_name".to_string(),
                vars.get("student_name").cloned().unwrap_or_else(|| "Student".to_string()),
            );
            fallback.insert(
                "message_content".to_string(),
                vars.get("message").cloned().unwrap_or_else(|| "Campus notification".to_string()),
            );
            render(Template::GeneralNotification, &fallback)
        }
        (subject, body) => Rendered {
            subject: subject.unwrap_or_else(|| template.subject().to_string()),
            body: body.unwrap_or_else(|| template.body().to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_welcome_renders_all_fields() {
        let r = render(
            Template::Welcome,
            &vars(&[
                ("student_name", "Ali Ahmed"),
                ("student_id", "STU011"),
                ("department", "Computer Science"),
                ("email", "ali@x.edu"),
            ]),
        );
        assert_eq!(r.subject, "Welcome to NUST Campus - Account Created");
        assert!(r.body.contains("Student ID: STU011"));
        assert!(!r.body.contains("{"));
    }

    #[test]
    fn test_missing_variable_falls_back_to_general() {
        let r = render(Template::ProfileUpdate, &vars(&[("student_name", "Sara")]));
        assert_eq!(r.subject, "NUST Campus Notification");
        assert!(r.body.contains("Campus notification"));
    }

    #[test]
    fn test_unknown_id() {
        assert_eq!(Template::from_id("reminder"), Template::GeneralNotification);
    }
}
