//! 邮件通知：模板渲染 + 可替换的投递方式
//!
//! LogTransport 只写日志（未配置中继时的模拟投递）；WebhookTransport 把邮件 JSON POST 到中继服务。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{info, warn};

use super::templates::{render, Template};
use super::{NotificationOutcome, Notifier};

/// 渲染后的邮件
#[derive(Debug, Clone, Serialize)]
pub struct Email {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub student_id: String,
    pub template: String,
}

/// 投递方式
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn deliver(&self, email: &Email) -> NotificationOutcome;
}

/// 模拟投递：记录日志并视为成功
pub struct LogTransport;

#[async_trait]
impl MailTransport for LogTransport {
    async fn deliver(&self, email: &Email) -> NotificationOutcome {
        info!(
            to = %email.to,
            subject = %email.subject,
            student = %email.student_id,
            "[MOCK EMAIL] Status: DELIVERED (MOCK)"
        );
        NotificationOutcome {
            success: true,
            message: "Email sent successfully (mock mode - no actual email sent)".to_string(),
            mock: true,
        }
    }
}

/// 通过 HTTP 中继投递
pub struct WebhookTransport {
    client: Client,
    url: String,
}

impl WebhookTransport {
    pub fn new(url: impl Into<String>, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl MailTransport for WebhookTransport {
    async fn deliver(&self, email: &Email) -> NotificationOutcome {
        let result = self.client.post(&self.url).json(email).send().await;
        match result {
            Ok(resp) if resp.status().is_success() => NotificationOutcome {
                success: true,
                message: "Email sent successfully".to_string(),
                mock: false,
            },
            Ok(resp) => {
                warn!(to = %email.to, status = %resp.status(), "[EMAIL ERROR] relay rejected email");
                NotificationOutcome::failed(format!("Failed to send email: HTTP {}", resp.status()))
            }
            Err(e) => {
                warn!(to = %email.to, "[EMAIL ERROR] {}", e);
                NotificationOutcome::failed(format!("Failed to send email: {}", e))
            }
        }
    }
}

/// 模板邮件通知器
pub struct EmailNotifier {
    sender: String,
    transport: Arc<dyn MailTransport>,
}

impl EmailNotifier {
    pub fn new(sender: impl Into<String>, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            sender: sender.into(),
            transport,
        }
    }

    /// 模拟投递
    pub fn mock(sender: impl Into<String>) -> Self {
        Self::new(sender, Arc::new(LogTransport))
    }

    /// 按模板 ID 发送（未知 ID 使用 general_notification）
    pub async fn send_template(
        &self,
        template_id: &str,
        student_id: &str,
        address: &str,
        vars: &HashMap<String, String>,
    ) -> NotificationOutcome {
        let template = Template::from_id(template_id);
        let rendered = render(template, vars);
        let email = Email {
            from: self.sender.clone(),
            to: address.to_string(),
            subject: rendered.subject,
            body: rendered.body,
            student_id: student_id.to_string(),
            template: template.id().to_string(),
        };
        self.transport.deliver(&email).await
    }
}

fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[async_trait]
impl Notifier for EmailNotifier {
    async fn send_welcome(
        &self,
        student_id: &str,
        address: &str,
        name: &str,
        department: &str,
    ) -> NotificationOutcome {
        let v = vars(&[
            ("student_id", student_id),
            ("student_name", name),
            ("department", department),
            ("email", address),
        ]);
        self.send_template("welcome", student_id, address, &v).await
    }

    async fn send_update_notice(
        &self,
        student_id: &str,
        address: &str,
        name: &str,
        field: &str,
        old_value: &str,
        new_value: &str,
    ) -> NotificationOutcome {
        let v = vars(&[
            ("student_name", name),
            ("field_updated", field),
            ("old_value", old_value),
            ("new_value", new_value),
        ]);
        self.send_template("profile_update", student_id, address, &v)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Capture(Mutex<Vec<Email>>);

    #[async_trait]
    impl MailTransport for Capture {
        async fn deliver(&self, email: &Email) -> NotificationOutcome {
            self.0.lock().unwrap().push(email.clone());
            NotificationOutcome {
                success: true,
                message: "captured".to_string(),
                mock: true,
            }
        }
    }

    #[tokio::test]
    async fn test_welcome_uses_template() {
        let capture = Arc::new(Capture(Mutex::new(Vec::new())));
        let notifier = EmailNotifier::new("admin@nust.edu.pk", capture.clone());
        let outcome = notifier
            .send_welcome("STU011", "ali@x.edu", "Ali Ahmed", "Computer Science")
            .await;
        assert!(outcome.success);

        let sent = capture.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ali@x.edu");
        assert_eq!(sent[0].template, "welcome");
        assert!(sent[0].body.contains("Dear Ali Ahmed"));
    }

    #[tokio::test]
    async fn test_log_transport_is_mock() {
        let notifier = EmailNotifier::mock("admin@nust.edu.pk");
        let outcome = notifier
            .send_update_notice("STU001", "a@x.edu", "Ali", "department", "CS", "Math")
            .await;
        assert!(outcome.success && outcome.mock);
    }

    #[tokio::test]
    async fn test_webhook_failure_is_reported() {
        let notifier = EmailNotifier::new(
            "admin@nust.edu.pk",
            Arc::new(WebhookTransport::new("http://127.0.0.1:9/mail", 2)),
        );
        let outcome = notifier.send_welcome("S", "a@x.edu", "A", "CS").await;
        assert!(!outcome.success);
        assert!(outcome.message.starts_with("Failed to send email"));
    }
}
