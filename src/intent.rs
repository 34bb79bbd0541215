//! 意图识别
//!
//! 纯函数、确定性：对小写化后的输入做子串匹配。
//! 信息查询关键字优先于管理操作关键字；都未命中即为 General。

use serde::{Deserialize, Serialize};

/// 识别出的意图类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// 关于学校本身的信息查询（检索 + 搜索 + 单次完成）
    InformationQuery,
    /// 学生管理操作（工具循环）
    AdministrativeTask,
    /// 普通对话
    General,
}

/// 学校名称的各种写法
pub const INFORMATION_KEYWORDS: &[&str] = &[
    "nust",
    "national university",
    "sciences technology",
    "islamabad university",
];

/// 管理操作短语
pub const ADMIN_KEYWORDS: &[&str] = &[
    "add student",
    "delete student",
    "update student",
    "list students",
    "student info",
    "campus analytics",
    "statistics",
];

fn contains_any(lower: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|k| lower.contains(k))
}

/// 分类用户输入
pub fn classify(utterance: &str) -> Intent {
    let lower = utterance.to_lowercase();
    if contains_any(&lower, INFORMATION_KEYWORDS) {
        Intent::InformationQuery
    } else if contains_any(&lower, ADMIN_KEYWORDS) {
        Intent::AdministrativeTask
    } else {
        Intent::General
    }
}

/// 校园话题词：未点名学校、但与学校生活相关
pub const CAMPUS_TOPIC_KEYWORDS: &[&str] = &[
    "university",
    "campus",
    "admission",
    "program",
    "faculty",
    "hostel",
    "library",
    "scholarship",
    "semester",
];

/// 输入是否涉及学校（General 路径据此决定是否附带知识库上下文）
///
/// 校园话题词同样触发：问宿舍、奖学金之类时即使没点名学校也附带知识库内容。
pub fn mentions_institution(utterance: &str) -> bool {
    let lower = utterance.to_lowercase();
    contains_any(&lower, INFORMATION_KEYWORDS) || contains_any(&lower, CAMPUS_TOPIC_KEYWORDS)
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::InformationQuery => "information_query",
            Intent::AdministrativeTask => "administrative_task",
            Intent::General => "general",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_information_keywords_any_case_and_position() {
        assert_eq!(classify("What is NUST University?"), Intent::InformationQuery);
        assert_eq!(classify("tell me about nust"), Intent::InformationQuery);
        assert_eq!(
            classify("Is the National University of Sciences and Technology good?"),
            Intent::InformationQuery
        );
        assert_eq!(classify("ISLAMABAD UNIVERSITY rankings"), Intent::InformationQuery);
    }

    #[test]
    fn test_admin_keywords() {
        assert_eq!(
            classify("Add student Ali Ahmed to Computer Science"),
            Intent::AdministrativeTask
        );
        assert_eq!(classify("please LIST STUDENTS"), Intent::AdministrativeTask);
        assert_eq!(classify("show campus analytics"), Intent::AdministrativeTask);
        assert_eq!(classify("Delete student STU003"), Intent::AdministrativeTask);
    }

    #[test]
    fn test_information_takes_precedence() {
        assert_eq!(classify("list students at NUST"), Intent::InformationQuery);
    }

    #[test]
    fn test_general_fallback() {
        assert_eq!(classify("hello there"), Intent::General);
        assert_eq!(classify(""), Intent::General);
        assert!(!mentions_institution("hello"));
    }

    #[test]
    fn test_campus_topics_without_name() {
        assert_eq!(classify("how do admissions work?"), Intent::General);
        assert!(mentions_institution("how do admissions work?"));
        assert!(mentions_institution("Tell me about NUST"));
    }
}
