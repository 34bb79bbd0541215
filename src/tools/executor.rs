//! 工具执行器
//!
//! 对每次调用施加超时，输出结构化审计日志（JSON）。未知工具、参数错误、超时都转成
//! success=false 的 ToolResult 交回 LLM，不向上抛错。
//! 同一轮的多个调用并发执行（受 TaskScheduler 许可数约束），结果按调用顺序返回。

use std::time::{Duration, Instant};

use futures_util::future::join_all;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::core::{AgentError, TaskScheduler};
use crate::memory::ToolCall;
use crate::tools::registry::CampusTool;
use crate::tools::students::StudentTools;

/// 一次工具调用的结果，call_id 与 ToolCall.id 对应
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub call_id: String,
    pub name: String,
    pub payload: Value,
}

impl ToolResult {
    pub fn success(&self) -> bool {
        self.payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// 作为 tool 消息内容的文本
    pub fn content(&self) -> String {
        self.payload.to_string()
    }
}

/// 工具执行器
#[derive(Clone)]
pub struct ToolExecutor {
    tools: StudentTools,
    timeout: Duration,
    scheduler: TaskScheduler,
}

impl ToolExecutor {
    pub fn new(tools: StudentTools, timeout_secs: u64, scheduler: TaskScheduler) -> Self {
        Self {
            tools,
            timeout: Duration::from_secs(timeout_secs.max(1)),
            scheduler,
        }
    }

    /// 执行指定工具；未知工具或参数错误为 ToolExecutionFailed，超时为 ToolTimeout；输出 JSON 审计日志
    pub async fn execute(&self, tool_name: &str, args: Value) -> Result<Value, AgentError> {
        let start = Instant::now();
        let args_preview = args_preview(&args);

        let result = match CampusTool::from_name(tool_name) {
            Some(tool) => match timeout(self.timeout, self.tools.dispatch(tool, args)).await {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(AgentError::ToolExecutionFailed(format!(
                    "Invalid arguments for {}: {}",
                    tool_name, e
                ))),
                Err(_) => Err(AgentError::ToolTimeout(tool_name.to_string())),
            },
            None => Err(AgentError::ToolExecutionFailed(format!(
                "Unknown tool: {}",
                tool_name
            ))),
        };

        let (ok, outcome): (bool, &str) = match &result {
            Ok(v) => (v.get("success").and_then(Value::as_bool).unwrap_or(false), "ok"),
            Err(AgentError::ToolTimeout(_)) => (false, "timeout"),
            Err(_) => (false, "error"),
        };
        let audit = json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        result
    }

    /// 执行单个调用，错误转为失败结果
    pub async fn run_call(&self, call: &ToolCall) -> ToolResult {
        let payload = match self.scheduler.acquire_tool().await {
            Ok(_permit) => match self.execute(&call.name, call.args.clone()).await {
                Ok(v) => v,
                Err(e) => json!({ "success": false, "message": format!("Error executing {}: {}", call.name, e) }),
            },
            Err(e) => json!({ "success": false, "message": format!("Error executing {}: {}", call.name, e) }),
        };
        ToolResult {
            call_id: call.id.clone(),
            name: call.name.clone(),
            payload,
        }
    }

    /// 并发执行一轮调用；返回顺序与 calls 一致
    pub async fn run_all(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        join_all(calls.iter().map(|c| self.run_call(c))).await
    }
}

fn args_preview(args: &Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::notify::CountingNotifier;
    use crate::store::MemoryStore;

    fn executor() -> ToolExecutor {
        let tools = StudentTools::new(
            Arc::new(MemoryStore::with_sample_data()),
            Arc::new(CountingNotifier::new()),
        );
        ToolExecutor::new(tools, 5, TaskScheduler::new(2))
    }

    #[tokio::test]
    async fn test_unknown_tool_is_failure_result() {
        let r = executor()
            .run_call(&ToolCall::new("c9", "drop_database", json!({})))
            .await;
        assert_eq!(r.call_id, "c9");
        assert!(!r.success());
        assert!(r.payload["message"].as_str().unwrap().contains("drop_database"));
    }

    #[tokio::test]
    async fn test_results_in_call_order() {
        let calls = vec![
            ToolCall::new("a", "list_students", json!({})),
            ToolCall::new("b", "get_student", json!({"student_id": "STU004"})),
            ToolCall::new("c", "get_student", json!({"bad": true})),
            ToolCall::new("d", "get_campus_analytics", json!({})),
        ];
        let results = executor().run_all(&calls).await;
        let ids: Vec<&str> = results.iter().map(|r| r.call_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        assert_eq!(results[1].payload["student"]["name"], "Fatima Sheikh");
        assert!(!results[2].success());
        assert!(results[3].success());
    }

    #[test]
    fn test_args_preview_truncates() {
        let long = json!({ "x": "y".repeat(500) });
        assert!(args_preview(&long).ends_with("..."));
    }
}
