//! 管理路径的工具循环
//!
//! LLM ⇄ 工具：每轮把全部工具 schema 交给 LLM；若返回 tool_calls，则并发执行、按调用顺序回填
//! tool 消息后再次调用 LLM；直到某轮不再调用工具，该轮文本即最终回复。
//! 执行的工具轮数不超过 max_rounds，超过后以固定的兜底回复结束。

use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::AgentError;
use crate::llm::{LlmClient, ToolSpec};
use crate::memory::Message;
use crate::react::events::LoopEvent;
use crate::tools::{ToolExecutor, ToolResult};

/// 默认工具轮数上限
pub const DEFAULT_MAX_TOOL_ROUNDS: usize = 10;
/// 达到上限时的回复
pub const GIVE_UP_ANSWER: &str = "I could not complete this request within the allowed number of steps. Please try again with a more specific instruction.";
/// LLM 最终回复为空时的回复
pub const EMPTY_ANSWER: &str = "I'm sorry, I couldn't process your request properly.";
/// Observation 预览最大字符数
const OBSERVATION_PREVIEW_CHARS: usize = 200;

/// 工具循环结果
#[derive(Debug)]
pub struct ToolLoopOutcome {
    pub answer: String,
    /// 实际执行过工具的轮数
    pub rounds: usize,
    /// 是否因达到上限而结束
    pub exhausted: bool,
    /// 最终的消息序列（含 assistant tool_calls 与 tool 结果）
    pub messages: Vec<Message>,
}

/// 工具循环的协作方
pub struct ToolLoop<'a> {
    pub llm: &'a dyn LlmClient,
    pub executor: &'a ToolExecutor,
    pub tools: &'a [ToolSpec],
    pub max_rounds: usize,
    pub cancel_token: CancellationToken,
    /// 可选：步骤事件
    pub events: Option<&'a UnboundedSender<LoopEvent>>,
}

fn send_event(tx: &Option<&UnboundedSender<LoopEvent>>, ev: LoopEvent) {
    if let Some(t) = tx {
        let _ = t.send(ev);
    }
}

fn preview(result: &ToolResult) -> String {
    let content = result.content();
    if content.chars().count() > OBSERVATION_PREVIEW_CHARS {
        format!(
            "{}...",
            content.chars().take(OBSERVATION_PREVIEW_CHARS).collect::<String>()
        )
    } else {
        content
    }
}

impl<'a> ToolLoop<'a> {
    /// 从初始消息（system + 历史 + 本轮输入）开始运行
    pub async fn run(&self, mut messages: Vec<Message>) -> Result<ToolLoopOutcome, AgentError> {
        let mut rounds = 0;

        loop {
            if self.cancel_token.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            send_event(
                &self.events,
                LoopEvent::RoundStarted {
                    round: rounds + 1,
                    max_rounds: self.max_rounds,
                },
            );

            let response = self.llm.complete_with_tools(&messages, self.tools).await?;

            if response.tool_calls.is_empty() {
                let answer = if response.text.trim().is_empty() {
                    EMPTY_ANSWER.to_string()
                } else {
                    response.text
                };
                messages.push(Message::assistant(answer.clone()));
                info!(rounds, "tool loop finished");
                return Ok(ToolLoopOutcome {
                    answer,
                    rounds,
                    exhausted: false,
                    messages,
                });
            }

            // 本轮的调用不执行，也不写入消息序列
            if rounds >= self.max_rounds {
                warn!(error = %AgentError::MaxRoundsExceeded(rounds), "tool loop exhausted");
                send_event(&self.events, LoopEvent::Exhausted { rounds });
                return Ok(ToolLoopOutcome {
                    answer: GIVE_UP_ANSWER.to_string(),
                    rounds,
                    exhausted: true,
                    messages,
                });
            }

            let calls = response.tool_calls;
            for call in &calls {
                debug!(tool = %call.name, id = %call.id, "tool call");
                send_event(
                    &self.events,
                    LoopEvent::ToolCall {
                        tool: call.name.clone(),
                        args: call.args.clone(),
                    },
                );
            }
            messages.push(Message::assistant_tool_calls(response.text, calls.clone()));

            let results = self.executor.run_all(&calls).await;
            for result in results {
                send_event(
                    &self.events,
                    LoopEvent::Observation {
                        tool: result.name.clone(),
                        success: result.success(),
                        preview: preview(&result),
                    },
                );
                messages.push(Message::tool(result.call_id.clone(), result.content()));
            }
            rounds += 1;
        }
    }
}
