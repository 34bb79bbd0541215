//! 流式回复的两种渲染策略
//!
//! - 分块回放：回复已完整给出时，按词输出累积前缀
//! - 真增量：LLM 支持增量完成时，边收片段边输出
//!
//! 两种策略共用 StreamSink：progress 单调不减，最后一个事件固定为 complete（progress=100）。
//! 消费方断开（接收端关闭或 CancellationToken 取消）后立即停止输出。

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::AgentError;
use crate::llm::{LlmError, TokenStream};
use crate::react::events::{Snapshot, StreamEvent};
use crate::react::loop_::EMPTY_ANSWER;

/// 非终止事件的 progress 上限
const MAX_PARTIAL_PROGRESS: f64 = 99.9;
/// 真增量策略中 progress 的估计上限
const INCREMENTAL_PROGRESS_CAP: f64 = 95.0;
/// 真增量策略中每次输出增加的 progress
const INCREMENTAL_PROGRESS_STEP: f64 = 2.0;
/// 词边界字符（空格之外）
const BOUNDARY_CHARS: &[char] = &['.', '!', '?', ';', ',', '\n'];

/// 一次渲染的结果
#[derive(Debug, Clone, PartialEq)]
pub struct StreamOutcome {
    /// 写入会话历史的最终文本
    pub text: String,
    /// 是否已发送 complete 事件（消费方提前断开时为 false）
    pub completed: bool,
    pub error: bool,
}

/// 事件出口
pub struct StreamSink {
    tx: UnboundedSender<StreamEvent>,
    cancel: CancellationToken,
    session_id: String,
    progress: f64,
}

impl StreamSink {
    pub fn new(tx: UnboundedSender<StreamEvent>, cancel: CancellationToken, session_id: &str) -> Self {
        Self {
            tx,
            cancel,
            session_id: session_id.to_string(),
            progress: 0.0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.tx.is_closed()
    }

    /// 等待消费方断开或取消
    pub async fn stopped(&self) {
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = self.tx.closed() => {}
        }
    }

    /// 接收端关闭时触发取消，让工具循环等上游步骤尽早停下；结束时需 abort 返回的任务
    pub fn cancel_on_disconnect(&self) -> JoinHandle<()> {
        let tx = self.tx.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tx.closed() => cancel.cancel(),
                _ = cancel.cancelled() => {}
            }
        })
    }

    fn send(&mut self, event: StreamEvent) -> bool {
        if self.is_stopped() {
            return false;
        }
        self.progress = event.data.progress;
        if self.tx.send(event).is_err() {
            self.cancel.cancel();
            return false;
        }
        true
    }

    fn snapshot(&self, text: &str, progress: f64) -> Snapshot {
        Snapshot::new(text, &self.session_id, progress)
    }

    /// 中间快照；progress 被夹在 [上次, 99.9] 内
    pub fn partial(&mut self, snapshot: Snapshot) -> bool {
        let mut snapshot = snapshot;
        snapshot.progress = snapshot
            .progress
            .max(self.progress)
            .min(MAX_PARTIAL_PROGRESS);
        self.send(StreamEvent::message(snapshot))
    }

    /// 终止事件
    pub fn finish(&mut self, snapshot: Snapshot) -> bool {
        self.send(StreamEvent::complete(snapshot))
    }

    /// 错误：先发 error 快照（progress 不回退），再发带 error 标记的 complete
    pub fn fail(&mut self, message: &str) -> bool {
        let snap = self.snapshot(message, self.progress.min(MAX_PARTIAL_PROGRESS));
        if !self.send(StreamEvent::error(snap.clone())) {
            return false;
        }
        let mut last = snap;
        last.error = true;
        self.finish(last)
    }

    /// 以错误结束，返回写入历史的文本
    pub fn fail_with(&mut self, err: &AgentError) -> StreamOutcome {
        let text = err.apology();
        let completed = self.fail(&text);
        StreamOutcome {
            text,
            completed,
            error: true,
        }
    }
}

/// 每个词结束处的字节偏移
fn word_ends(text: &str) -> Vec<usize> {
    let mut ends = Vec::new();
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            if in_word {
                ends.push(i);
                in_word = false;
            }
        } else {
            in_word = true;
        }
    }
    if in_word {
        ends.push(text.len());
    }
    ends
}

/// 分块回放：第 i 个词输出前缀 text[..end_i]，progress = 100·i/n；最后一个词即 complete 事件
pub async fn replay_chunks(sink: &mut StreamSink, text: &str, delay: Duration) -> StreamOutcome {
    let ends = word_ends(text);
    let total = ends.len();
    if total == 0 {
        let completed = sink.finish(sink.snapshot("", 100.0));
        return StreamOutcome {
            text: String::new(),
            completed,
            error: false,
        };
    }

    for (i, end) in ends.iter().enumerate() {
        let mut snap = sink.snapshot(&text[..*end], 100.0 * (i + 1) as f64 / total as f64);
        snap.word_count = Some(i + 1);
        snap.total_words = Some(total);
        if i + 1 == total {
            let completed = sink.finish(snap);
            return StreamOutcome {
                text: text[..*end].to_string(),
                completed,
                error: false,
            };
        }
        if !sink.partial(snap) {
            debug!(session_id = %sink.session_id(), "consumer gone during replay");
            break;
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
    StreamOutcome {
        text: text.trim_end().to_string(),
        completed: false,
        error: false,
    }
}

enum Next {
    Stopped,
    Item(Option<Result<String, LlmError>>),
}

/// 真增量：新片段含词边界时输出，或累计 fallback_every 个片段未输出时强制输出
pub async fn render_incremental(
    sink: &mut StreamSink,
    mut fragments: TokenStream,
    fallback_every: usize,
) -> StreamOutcome {
    let fallback_every = fallback_every.max(1);
    let mut text = String::new();
    let mut pending = 0usize;
    let mut emitted = 0usize;

    loop {
        let next = tokio::select! {
            biased;
            _ = sink.stopped() => Next::Stopped,
            item = fragments.next() => Next::Item(item),
        };
        match next {
            Next::Stopped => {
                debug!(session_id = %sink.session_id(), "consumer gone during incremental stream");
                return StreamOutcome {
                    text,
                    completed: false,
                    error: false,
                };
            }
            Next::Item(Some(Ok(fragment))) => {
                if fragment.is_empty() {
                    continue;
                }
                text.push_str(&fragment);
                pending += 1;
                let boundary = fragment
                    .chars()
                    .any(|c| c == ' ' || BOUNDARY_CHARS.contains(&c));
                if boundary || pending >= fallback_every {
                    emitted += 1;
                    pending = 0;
                    let progress =
                        (emitted as f64 * INCREMENTAL_PROGRESS_STEP).min(INCREMENTAL_PROGRESS_CAP);
                    let mut snap = sink.snapshot(&text, progress);
                    snap.streaming = true;
                    if !sink.partial(snap) {
                        return StreamOutcome {
                            text,
                            completed: false,
                            error: false,
                        };
                    }
                }
            }
            Next::Item(Some(Err(e))) => {
                return sink.fail_with(&AgentError::from(e));
            }
            Next::Item(None) => break,
        }
    }

    if text.trim().is_empty() {
        text = EMPTY_ANSWER.to_string();
    }
    let mut snap = sink.snapshot(&text, 100.0);
    snap.streaming = true;
    let completed = sink.finish(snap);
    StreamOutcome {
        text,
        completed,
        error: false,
    }
}
