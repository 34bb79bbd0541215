//! 关键字检索
//!
//! 语料在启动时从 JSON 文件（`[{content, metadata}]`）加载一次；文件缺失或解析失败时
//! 静默换成内置的 4 条基础信息（记录 warn，不报错）。
//!
//! 打分：查询按空白切分并小写化，每个关键字在正文中的出现次数 + 2 × 在标题中的出现次数；
//! 丢弃 0 分条目，按分数降序（同分保持原顺序），取前 top_k。

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

/// 语料条目
#[derive(Debug, Clone, Deserialize)]
pub struct KnowledgeEntry {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl KnowledgeEntry {
    pub fn new(content: impl Into<String>, title: impl Into<String>) -> Self {
        let mut metadata = Map::new();
        metadata.insert("title".to_string(), Value::String(title.into()));
        metadata.insert("source".to_string(), Value::String("basic".to_string()));
        Self {
            content: content.into(),
            metadata,
        }
    }

    /// metadata.title；非字符串时按 JSON 文本处理，缺失为空串
    pub fn title(&self) -> String {
        match self.metadata.get("title") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }
}

/// 单条目得分
pub fn score_entry(entry: &KnowledgeEntry, keywords: &[String]) -> usize {
    let content = entry.content.to_lowercase();
    let title = entry.title().to_lowercase();
    keywords
        .iter()
        .map(|kw| content.matches(kw.as_str()).count() + 2 * title.matches(kw.as_str()).count())
        .sum()
}

fn fallback_corpus() -> Vec<KnowledgeEntry> {
    vec![
        KnowledgeEntry::new(
            "NUST (National University of Sciences and Technology) is a premier technological university in Pakistan located in Islamabad. It was established in 1991 and offers undergraduate, graduate, and doctoral programs in engineering, sciences, and technology.",
            "NUST Overview",
        ),
        KnowledgeEntry::new(
            "NUST has multiple schools including School of Electrical Engineering and Computer Science (SEECS), School of Mechanical and Manufacturing Engineering (SMME), School of Civil and Environmental Engineering (SCEE), School of Chemical and Materials Engineering (SCME), and School of Natural Sciences (SNS).",
            "NUST Schools",
        ),
        KnowledgeEntry::new(
            "NUST admission is through NET (NUST Entry Test) conducted annually. The university offers scholarships and financial aid to deserving students. Campus facilities include hostels, cafeteria, library, sports complex, and medical center.",
            "NUST Admissions and Facilities",
        ),
        KnowledgeEntry::new(
            "NUST is known for its research excellence and industry partnerships. It has collaborations with international universities and offers exchange programs. The university emphasizes innovation and entrepreneurship.",
            "NUST Research and Partnerships",
        ),
    ]
}

/// 内存语料检索器
#[derive(Debug, Clone)]
pub struct KnowledgeRetriever {
    entries: Vec<KnowledgeEntry>,
    top_k: usize,
}

impl KnowledgeRetriever {
    pub fn new(entries: Vec<KnowledgeEntry>, top_k: usize) -> Self {
        Self {
            entries,
            top_k: top_k.max(1),
        }
    }

    /// 仅内置语料
    pub fn with_fallback(top_k: usize) -> Self {
        Self::new(fallback_corpus(), top_k)
    }

    /// 依次尝试 paths，第一个存在且可解析的文件生效；全部失败时使用内置语料
    pub fn load(paths: &[PathBuf], top_k: usize) -> Self {
        for path in paths {
            if !path.exists() {
                continue;
            }
            match read_corpus(path) {
                Ok(entries) => {
                    info!("Loaded {} knowledge entries from {}", entries.len(), path.display());
                    return Self::new(entries, top_k);
                }
                Err(e) => {
                    warn!("Could not load knowledge corpus {}: {}", path.display(), e);
                }
            }
        }
        warn!("Knowledge corpus not found, using built-in entries");
        Self::with_fallback(top_k)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 检索与 query 相关的条目（最多 top_k 条，降序）
    pub fn retrieve_context(&self, query: &str) -> Vec<&KnowledgeEntry> {
        let keywords: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();
        if keywords.is_empty() {
            return Vec::new();
        }
        let mut scored: Vec<(&KnowledgeEntry, usize)> = self
            .entries
            .iter()
            .map(|e| (e, score_entry(e, &keywords)))
            .filter(|(_, s)| *s > 0)
            .collect();
        // sort_by 为稳定排序，同分保持语料原顺序
        scored.sort_by(|a, b| b.1.cmp(&a.1));
        scored.into_iter().take(self.top_k).map(|(e, _)| e).collect()
    }

    /// 检索结果拼成提示词上下文（正文按行拼接）
    pub fn context_text(&self, query: &str) -> String {
        self.retrieve_context(query)
            .iter()
            .map(|e| e.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn read_corpus(path: &Path) -> Result<Vec<KnowledgeEntry>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&raw).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(content: &str, title: &str) -> KnowledgeEntry {
        KnowledgeEntry::new(content, title)
    }

    #[test]
    fn test_title_only_match_scores_double() {
        let e = entry("nothing relevant here", "Hostel hostel");
        let kws = vec!["hostel".to_string()];
        assert_eq!(score_entry(&e, &kws), 4);
    }

    #[test]
    fn test_zero_score_excluded_and_sorted() {
        let r = KnowledgeRetriever::new(
            vec![
                entry("library hours", "Library"),
                entry("unrelated", "Sports"),
                entry("library library library library", "Books"),
                entry("library", "Cafe"),
                entry("library", "Dorm"),
            ],
            3,
        );
        let got = r.retrieve_context("Library");
        assert_eq!(got.len(), 3);
        assert_eq!(got[0].title(), "Books");
        assert_eq!(got[1].title(), "Library");
        // 同分：Cafe 在 Dorm 之前
        assert_eq!(got[2].title(), "Cafe");
        assert!(got.iter().all(|e| e.title() != "Sports"));
    }

    #[test]
    fn test_missing_corpus_uses_fallback() {
        let r = KnowledgeRetriever::load(&[PathBuf::from("/nonexistent/corpus.json")], 3);
        assert_eq!(r.len(), 4);
        let got = r.retrieve_context("What is NUST University?");
        assert!(!got.is_empty() && got.len() <= 3);
    }

    #[test]
    fn test_load_from_file_and_bad_file_falls_through() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.json");
        std::fs::write(&bad, "not json").unwrap();
        let good = dir.path().join("good.json");
        std::fs::write(
            &good,
            r#"[{"content": "SEECS offers CS", "metadata": {"title": "SEECS"}}, {"content": "x"}]"#,
        )
        .unwrap();

        let r = KnowledgeRetriever::load(&[bad, good], 3);
        assert_eq!(r.len(), 2);
        assert_eq!(r.context_text("seecs"), "SEECS offers CS");
    }

    #[test]
    fn test_empty_query() {
        let r = KnowledgeRetriever::with_fallback(3);
        assert!(r.retrieve_context("   ").is_empty());
    }
}
