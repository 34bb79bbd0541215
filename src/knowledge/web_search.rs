//! 网页搜索适配器（DuckDuckGo HTML 接口，无需 API Key）
//!
//! 查询未提及机构名时自动加前缀；请求失败或客户端不可用时返回单条带错误标记的结果，
//! 调用方无需区分「搜索失败」与「无结果」。

use std::time::Duration;

use async_trait::async_trait;
use html2text::from_read;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const DUCKDUCKGO_HTML: &str = "https://html.duckduckgo.com/html/";

/// 单条搜索结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub snippet: String,
    pub url: String,
    /// 结果来源；失败结果为 "Error"
    pub source: String,
}

impl SearchResult {
    pub fn error(title: &str, snippet: impl Into<String>) -> Self {
        Self {
            title: title.to_string(),
            snippet: snippet.into(),
            url: String::new(),
            source: "Error".to_string(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.source == "Error"
    }
}

/// 搜索提供方抽象
#[async_trait]
pub trait WebSearch: Send + Sync {
    /// 返回至多 max_results 条结果；从不返回错误
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult>;
}

/// 关闭搜索时使用：总是空结果
pub struct NoopSearch;

#[async_trait]
impl WebSearch for NoopSearch {
    async fn search(&self, _query: &str, _max_results: usize) -> Vec<SearchResult> {
        Vec::new()
    }
}

/// DuckDuckGo HTML 搜索
pub struct DuckDuckGoSearch {
    client: Option<Client>,
    endpoint: String,
    institution: String,
    aliases: Vec<String>,
}

impl DuckDuckGoSearch {
    pub fn new(timeout_secs: u64, institution: impl Into<String>, aliases: Vec<String>) -> Self {
        const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";
        let client = match Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .build()
        {
            Ok(c) => Some(c),
            Err(e) => {
                warn!("Could not initialize web search: {}", e);
                None
            }
        };
        Self {
            client,
            endpoint: DUCKDUCKGO_HTML.to_string(),
            institution: institution.into(),
            aliases: aliases.into_iter().map(|a| a.to_lowercase()).collect(),
        }
    }

    /// 替换搜索地址（测试或自建代理）
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// 未提及机构（机构名本身或任一别名）时在查询前加机构名
    pub fn build_query(&self, query: &str) -> String {
        let lower = query.to_lowercase();
        let mentioned = lower.contains(&self.institution.to_lowercase())
            || self.aliases.iter().any(|a| lower.contains(a.as_str()));
        if mentioned || self.institution.is_empty() {
            query.to_string()
        } else {
            format!("{} {}", self.institution, query)
        }
    }

    async fn fetch(&self, client: &Client, query: &str) -> Result<String, String> {
        let url = format!("{}?q={}", self.endpoint, urlencoding::encode(query));
        debug!("web search request: {}", url);
        let resp = client
            .get(&url)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        resp.text().await.map_err(|e| format!("Read body: {}", e))
    }
}

#[async_trait]
impl WebSearch for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Vec<SearchResult> {
        let Some(client) = self.client.as_ref() else {
            return vec![SearchResult::error(
                "Search Unavailable",
                "Web search is currently unavailable",
            )];
        };
        let full_query = self.build_query(query);
        match self.fetch(client, &full_query).await {
            Ok(html) => parse_results(&html, max_results),
            Err(e) => {
                warn!("web search failed: {}", e);
                vec![SearchResult::error(
                    "Search Error",
                    format!("Could not perform web search: {}", e),
                )]
            }
        }
    }
}

/// HTML 片段转纯文本（html2text 失败时用正则去标签）
fn html_fragment_to_text(fragment: &str) -> String {
    let text = match from_read(fragment.as_bytes(), 10_000) {
        Ok(t) if !t.trim().is_empty() => t,
        _ => match Regex::new(r"<[^>]*>") {
            Ok(re) => re.replace_all(fragment, "").into_owned(),
            Err(_) => fragment.to_string(),
        },
    };
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// DuckDuckGo 跳转链接（//duckduckgo.com/l/?uddg=...）还原为真实地址
fn resolve_href(href: &str) -> String {
    if let Some(pos) = href.find("uddg=") {
        let encoded = href[pos + 5..].split('&').next().unwrap_or("");
        if let Ok(decoded) = urlencoding::decode(encoded) {
            return decoded.into_owned();
        }
    }
    if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    }
}

/// 解析 DuckDuckGo HTML 结果页
pub fn parse_results(html: &str, max_results: usize) -> Vec<SearchResult> {
    let (Ok(title_re), Ok(snippet_re)) = (
        Regex::new(r#"(?s)class="result__a"[^>]*href="([^"]*)"[^>]*>(.*?)</a>"#),
        Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#),
    ) else {
        return Vec::new();
    };

    let mut results = Vec::new();
    for block in html.split("class=\"result ").skip(1) {
        if results.len() >= max_results {
            break;
        }
        let Some(caps) = title_re.captures(block) else {
            continue;
        };
        let title = html_fragment_to_text(&caps[2]);
        if title.is_empty() {
            continue;
        }
        let snippet = snippet_re
            .captures(block)
            .map(|c| html_fragment_to_text(&c[1]))
            .unwrap_or_default();
        results.push(SearchResult {
            title,
            snippet,
            url: resolve_href(&caps[1]),
            source: "DuckDuckGo".to_string(),
        });
    }
    results
}

/// 搜索结果拼成提示词段落（跳过错误结果）
pub fn format_web_context(results: &[SearchResult]) -> String {
    let lines: Vec<String> = results
        .iter()
        .filter(|r| !r.is_error())
        .map(|r| format!("- {}: {}", r.title, r.snippet))
        .collect();
    if lines.is_empty() {
        String::new()
    } else {
        format!("Recent information:\n{}", lines.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search() -> DuckDuckGoSearch {
        DuckDuckGoSearch::new(
            2,
            "NUST University Pakistan",
            vec!["nust".to_string(), "national university of sciences".to_string()],
        )
    }

    #[test]
    fn test_prefix_only_when_institution_absent() {
        let s = search();
        assert_eq!(
            s.build_query("admission deadlines"),
            "NUST University Pakistan admission deadlines"
        );
        assert_eq!(s.build_query("NUST admission"), "NUST admission");
    }

    #[test]
    fn test_parse_results() {
        let html = r##"
<div class="result results_links">
  <a rel="nofollow" class="result__a" href="//duckduckgo.com/l/?uddg=https%3A%2F%2Fnust.edu.pk%2F&amp;rut=x">NUST &amp; <b>Home</b></a>
  <a class="result__snippet" href="#">National <b>University</b> of Sciences</a>
</div>
<div class="result results_links">
  <a class="result__a" href="https://example.com/2">Second</a>
</div>
<div class="result results_links">
  <a class="result__a" href="https://example.com/3">Third</a>
</div>"##;
        let results = parse_results(html, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].url, "https://nust.edu.pk/");
        assert!(results[0].title.contains("Home"));
        assert!(results[0].snippet.contains("University"));
        assert_eq!(results[1].snippet, "");
        assert_eq!(results[1].source, "DuckDuckGo");
    }

    #[tokio::test]
    async fn test_provider_failure_is_single_error_result() {
        let s = search().with_endpoint("http://127.0.0.1:9/html/");
        let results = s.search("NUST", 3).await;
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].title, "Search Error");
        assert!(results[0].is_error());
        assert_eq!(format_web_context(&results), "");
    }

    #[tokio::test]
    async fn test_noop_search() {
        assert!(NoopSearch.search("anything", 3).await.is_empty());
    }
}
