//! 提示词与消息拼装

use crate::memory::{Message, Role};
use crate::session::HistoryEntry;

/// 管理路径的 system prompt（工具循环）
pub const ADMIN_SYSTEM_PROMPT: &str = "You are an intelligent Campus Administration Agent with access to student management tools and NUST University information. You can help with:

CAMPUS ADMINISTRATION:
- Add new students with automatic welcome emails
- View and search student information
- Update student details with notification emails
- Delete student accounts (no email notifications for deletions)
- Get comprehensive campus analytics and statistics

IMPORTANT POLICIES:
- Student deletions do NOT send email notifications
- Only student additions and updates trigger automatic emails
- Always be helpful, professional, and friendly
- Use the appropriate tools for campus admin tasks and confirm the outcome, including the email status

When a request is missing required details (for example a student ID or email), ask for them instead of guessing.";

/// 信息查询路径的 system prompt
pub const INFORMATION_SYSTEM_PROMPT: &str = "You are a helpful assistant specializing in NUST University (National University of Sciences and Technology) information.
Use the provided context to answer questions about NUST University accurately and comprehensively.
If you don't have specific information, be honest about it.
Focus only on NUST University-related information.";

/// 通用路径的 system prompt
pub const GENERAL_SYSTEM_PROMPT: &str = "You are an intelligent Campus Administration Agent with access to student management tools and NUST University information. You can help with campus administration (students, analytics) and questions about NUST University admissions, programs, facilities, schools and departments.

Always be helpful, professional, and friendly. Provide detailed and informative responses.";

/// 信息查询：单条 user 消息，内嵌知识库与搜索结果
pub fn information_messages(query: &str, knowledge: &str, web_context: &str) -> Vec<Message> {
    let knowledge = if knowledge.is_empty() {
        "(no matching entries)"
    } else {
        knowledge
    };
    let mut body = format!(
        "Question: {}\n\nNUST Knowledge Base Context:\n{}\n",
        query, knowledge
    );
    if !web_context.is_empty() {
        body.push('\n');
        body.push_str(web_context);
        body.push('\n');
    }
    body.push_str(
        "\nPlease provide a comprehensive answer about NUST University based on the available information.",
    );
    vec![Message::system(INFORMATION_SYSTEM_PROMPT), Message::user(body)]
}

/// 通用路径：最近 window 条历史 + 可选知识上下文，拼成单个 prompt
pub fn general_prompt(
    message: &str,
    context: &str,
    history: &[HistoryEntry],
    window: usize,
) -> String {
    let mut prompt = String::from(GENERAL_SYSTEM_PROMPT);
    prompt.push_str("\n\n");
    if !context.is_empty() {
        prompt.push_str("Relevant Context:\n");
        prompt.push_str(context);
        prompt.push_str("\n\n");
    }
    prompt.push_str("Conversation History:\n");
    let start = history.len().saturating_sub(window);
    for entry in &history[start..] {
        let speaker = match entry.role {
            Role::User => "User",
            _ => "Assistant",
        };
        prompt.push_str(&format!("{}: {}\n", speaker, entry.text));
    }
    prompt.push_str(&format!("\nUser: {}\nAssistant:", message));
    prompt
}

pub fn general_messages(
    message: &str,
    context: &str,
    history: &[HistoryEntry],
    window: usize,
) -> Vec<Message> {
    vec![Message::user(general_prompt(message, context, history, window))]
}

/// 工具循环的初始消息：system + 最近 max_entries 条历史 + 本轮输入
pub fn admin_messages(message: &str, history: &[HistoryEntry], max_entries: usize) -> Vec<Message> {
    let start = history.len().saturating_sub(max_entries);
    let mut messages = Vec::with_capacity(history.len() - start + 2);
    messages.push(Message::system(ADMIN_SYSTEM_PROMPT));
    for entry in &history[start..] {
        messages.push(match entry.role {
            Role::User => Message::user(entry.text.clone()),
            _ => Message::assistant(entry.text.clone()),
        });
    }
    messages.push(Message::user(message));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(role: Role, text: &str) -> HistoryEntry {
        HistoryEntry {
            role,
            text: text.to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_general_prompt_keeps_last_window() {
        let history: Vec<HistoryEntry> = (0..8)
            .map(|i| {
                let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
                entry(role, &format!("turn-{}", i))
            })
            .collect();
        let prompt = general_prompt("next", "", &history, 6);
        assert!(!prompt.contains("turn-1\n"));
        assert!(prompt.contains("User: turn-2"));
        assert!(prompt.contains("Assistant: turn-7"));
        assert!(!prompt.contains("Relevant Context"));
        assert!(prompt.trim_end().ends_with("Assistant:"));
    }

    #[test]
    fn test_general_prompt_includes_context() {
        let prompt = general_prompt("hi", "NUST is in Islamabad", &[], 6);
        assert!(prompt.contains("Relevant Context:\nNUST is in Islamabad"));
    }

    #[test]
    fn test_admin_messages_order() {
        let history = vec![entry(Role::User, "a"), entry(Role::Assistant, "b")];
        let msgs = admin_messages("c", &history, 20);
        assert_eq!(msgs.len(), 4);
        assert_eq!(msgs[0].role, Role::System);
        assert!(msgs[0].content.contains("do NOT send email"));
        assert_eq!(msgs[2].role, Role::Assistant);
        assert_eq!(msgs[3].content, "c");
    }

    #[test]
    fn test_information_messages_embed_sources() {
        let msgs = information_messages("What is NUST?", "NUST facts", "Recent information:\n- x: y");
        assert_eq!(msgs.len(), 2);
        assert!(msgs[1].content.contains("NUST facts"));
        assert!(msgs[1].content.contains("Recent information"));
    }
}
