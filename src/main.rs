//! Campus Agent 终端对话
//!
//! 每行输入作为同一会话中的一轮；`/stream` 切换流式输出，`/quit` 退出。
//! 配置路径可作为第一个参数传入。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use campus_agent::config::load_config_or_default;
use campus_agent::react::{EventKind, LoopEvent};
use campus_agent::{observability, Orchestrator, DEFAULT_USER};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;

fn print_flush(text: &str) {
    print!("{}", text);
    let _ = std::io::stdout().flush();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config_or_default(std::env::args().nth(1).map(PathBuf::from));
    let orchestrator = Arc::new(
        Orchestrator::from_config(&cfg)
            .await
            .context("Failed to create agent")?,
    );
    let _sweeper =
        orchestrator.spawn_session_sweeper(Duration::from_secs(cfg.session.sweep_interval_secs));

    let session = orchestrator.create_session(DEFAULT_USER).await;
    let session_id = session.session_id;
    println!("{} (session {})", cfg.app.name, session_id);
    println!("Type a message. /stream toggles streaming, /quit exits.");

    let mut streaming = false;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_flush("> ");
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();
        match input {
            "" => continue,
            "/quit" | "/exit" => break,
            "/stream" => {
                streaming = !streaming;
                println!("streaming {}", if streaming { "on" } else { "off" });
                continue;
            }
            _ => {}
        }

        if streaming {
            let mut handle = orchestrator
                .process_message_stream(input, Some(&session_id), DEFAULT_USER)
                .await;
            // 每个快照是累积文本，只打印新增部分
            let mut shown = 0;
            while let Some(ev) = handle.events.recv().await {
                if ev.kind == EventKind::Error {
                    continue;
                }
                let text = &ev.data.response;
                if text.len() >= shown && text.is_char_boundary(shown) {
                    print_flush(&text[shown..]);
                    shown = text.len();
                } else {
                    print_flush(&format!("\n{}", text));
                    shown = text.len();
                }
                if ev.is_terminal() {
                    break;
                }
            }
            println!();
        } else {
            let (tx, mut rx) = mpsc::unbounded_channel::<LoopEvent>();
            let printer = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    match ev {
                        LoopEvent::ToolCall { tool, args } => println!("  [tool] {} {}", tool, args),
                        LoopEvent::Observation { tool, success, .. } => {
                            println!("  [{}] {}", if success { "ok" } else { "failed" }, tool)
                        }
                        LoopEvent::Exhausted { rounds } => {
                            println!("  [stopped after {} rounds]", rounds)
                        }
                        LoopEvent::RoundStarted { .. } => {}
                    }
                }
            });
            let turn = orchestrator
                .process_message_observed(input, Some(&session_id), DEFAULT_USER, Some(&tx))
                .await;
            drop(tx);
            let _ = printer.await;
            println!("{}", turn.response);
        }
    }

    Ok(())
}
