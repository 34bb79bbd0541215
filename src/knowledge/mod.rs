//! 知识层：静态语料检索 + 网页搜索

pub mod retriever;
pub mod web_search;

pub use retriever::{KnowledgeEntry, KnowledgeRetriever};
pub use web_search::{DuckDuckGoSearch, NoopSearch, SearchResult, WebSearch};
