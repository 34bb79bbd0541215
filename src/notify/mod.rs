//! 通知层：学生邮件通知（尽力而为，失败只体现在结果里）

pub mod email;
pub mod templates;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use email::{Email, EmailNotifier, LogTransport, MailTransport, WebhookTransport};
pub use templates::Template;

/// 一次通知的投递结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOutcome {
    pub success: bool,
    pub message: String,
    /// 模拟投递（未真正发出）
    pub mock: bool,
}

impl NotificationOutcome {
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            mock: false,
        }
    }
}

/// 通知协作方
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_welcome(
        &self,
        student_id: &str,
        address: &str,
        name: &str,
        department: &str,
    ) -> NotificationOutcome;

    async fn send_update_notice(
        &self,
        student_id: &str,
        address: &str,
        name: &str,
        field: &str,
        old_value: &str,
        new_value: &str,
    ) -> NotificationOutcome;
}

/// 只计数的通知器（测试与离线运行）；可设为总是失败
#[derive(Default)]
pub struct CountingNotifier {
    welcome: AtomicUsize,
    update: AtomicUsize,
    fail: AtomicBool,
}

impl CountingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let n = Self::default();
        n.fail.store(true, Ordering::SeqCst);
        n
    }

    pub fn welcome_count(&self) -> usize {
        self.welcome.load(Ordering::SeqCst)
    }

    pub fn update_count(&self) -> usize {
        self.update.load(Ordering::SeqCst)
    }

    pub fn total(&self) -> usize {
        self.welcome_count() + self.update_count()
    }

    fn outcome(&self) -> NotificationOutcome {
        if self.fail.load(Ordering::SeqCst) {
            NotificationOutcome::failed("Failed to send email: relay unavailable")
        } else {
            NotificationOutcome {
                success: true,
                message: "Email sent successfully (mock mode - no actual email sent)".to_string(),
                mock: true,
            }
        }
    }
}

#[async_trait]
impl Notifier for CountingNotifier {
    async fn send_welcome(
        &self,
        _student_id: &str,
        _address: &str,
        _name: &str,
        _department: &str,
    ) -> NotificationOutcome {
        self.welcome.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }

    async fn send_update_notice(
        &self,
        _student_id: &str,
        _address: &str,
        _name: &str,
        _field: &str,
        _old_value: &str,
        _new_value: &str,
    ) -> NotificationOutcome {
        self.update.fetch_add(1, Ordering::SeqCst);
        self.outcome()
    }
}
