//! 编排器端到端测试：Scripted LLM + 内存存储 + 计数通知，无网络

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use campus_agent::config::AppConfig;
use campus_agent::core::AgentBuilder;
use campus_agent::knowledge::{KnowledgeRetriever, SearchResult, WebSearch};
use campus_agent::llm::ScriptedLlm;
use campus_agent::memory::{Role, ToolCall};
use campus_agent::notify::CountingNotifier;
use campus_agent::react::{EventKind, StreamEvent, GIVE_UP_ANSWER};
use campus_agent::session::SessionStore;
use campus_agent::store::{MemoryStore, StudentStore};
use campus_agent::{Orchestrator, DEFAULT_USER};

/// 记录查询次数的搜索
#[derive(Default)]
struct CountingSearch {
    calls: AtomicUsize,
}

#[async_trait]
impl WebSearch for CountingSearch {
    async fn search(&self, query: &str, _max_results: usize) -> Vec<SearchResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        vec![SearchResult {
            title: "NUST Admissions".to_string(),
            snippet: format!("Results for {}", query),
            url: "https://nust.edu.pk/admissions".to_string(),
            source: "DuckDuckGo".to_string(),
        }]
    }
}

struct Harness {
    orchestrator: Arc<Orchestrator>,
    llm: Arc<ScriptedLlm>,
    notifier: Arc<CountingNotifier>,
    search: Arc<CountingSearch>,
    store: Arc<MemoryStore>,
}

async fn harness_with(llm: ScriptedLlm, cfg: AppConfig) -> Harness {
    let llm = Arc::new(llm);
    let notifier = Arc::new(CountingNotifier::new());
    let search = Arc::new(CountingSearch::default());
    let store = Arc::new(MemoryStore::with_sample_data());
    let components = AgentBuilder::new(cfg)
        .with_llm(llm.clone())
        .with_store(store.clone())
        .with_notifier(notifier.clone())
        .with_search(search.clone())
        .with_retriever(KnowledgeRetriever::with_fallback(3))
        .build()
        .await
        .unwrap();
    Harness {
        orchestrator: Arc::new(Orchestrator::new(components, SessionStore::default())),
        llm,
        notifier,
        search,
        store,
    }
}

async fn harness(llm: ScriptedLlm) -> Harness {
    harness_with(llm, AppConfig::default()).await
}

fn call(id: &str, name: &str, args: Value) -> ToolCall {
    ToolCall::new(id, name, args)
}

/// 第 n 次请求里所有 tool 消息的内容（按出现顺序）
fn tool_payloads(h: &Harness, request: usize) -> Vec<Value> {
    h.llm.requests()[request]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .map(|m| serde_json::from_str(&m.content).unwrap())
        .collect()
}

async fn collect(mut rx: tokio::sync::mpsc::UnboundedReceiver<StreamEvent>) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(ev) = rx.recv().await {
        let done = ev.is_terminal();
        events.push(ev);
        if done {
            break;
        }
    }
    events
}

fn assert_progress_monotonic(events: &[StreamEvent]) {
    for pair in events.windows(2) {
        assert!(
            pair[1].data.progress >= pair[0].data.progress,
            "progress went backwards: {} -> {}",
            pair[0].data.progress,
            pair[1].data.progress
        );
    }
}

#[tokio::test]
async fn test_add_student_sends_one_welcome_email() {
    let h = harness(
        ScriptedLlm::new()
            .with_tool_calls(vec![call(
                "c1",
                "add_student",
                json!({"name": "Ali Ahmed", "student_id": "STU011", "department": "Computer Science", "email": "ali@x.edu"}),
            )])
            .with_reply("Ali Ahmed has been added and a welcome email was sent."),
    )
    .await;

    let turn = h
        .orchestrator
        .process_message(
            "Add student Ali Ahmed to Computer Science with email ali@x.edu",
            None,
            DEFAULT_USER,
        )
        .await;

    assert_eq!(
        turn.response,
        "Ali Ahmed has been added and a welcome email was sent."
    );
    assert_eq!(h.notifier.welcome_count(), 1);
    assert_eq!(h.notifier.total(), 1);
    let student = h.store.get_student("STU011").await.unwrap().unwrap();
    assert_eq!(student.department, "Computer Science");

    assert_eq!(h.llm.tool_request_count(), 2);
    let payloads = tool_payloads(&h, 1);
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["success"], true);
    assert_eq!(payloads[0]["email_sent"], true);
}

#[tokio::test]
async fn test_delete_student_never_notifies() {
    let h = harness(
        ScriptedLlm::new()
            .with_tool_calls(vec![call("c1", "delete_student", json!({"student_id": "STU003"}))])
            .with_reply("Student STU003 was deleted."),
    )
    .await;

    let turn = h
        .orchestrator
        .process_message("Delete student STU003", None, DEFAULT_USER)
        .await;

    assert_eq!(turn.response, "Student STU003 was deleted.");
    assert_eq!(h.notifier.total(), 0);
    assert!(h.store.get_student("STU003").await.unwrap().is_none());
    let payloads = tool_payloads(&h, 1);
    assert_eq!(payloads[0]["success"], true);
    assert_eq!(payloads[0]["email_sent"], false);
}

#[tokio::test]
async fn test_information_query_is_single_completion_without_tools() {
    let h = harness(ScriptedLlm::new().with_reply("NUST offers engineering programs.")).await;

    let turn = h
        .orchestrator
        .process_message("What is NUST University?", None, DEFAULT_USER)
        .await;

    assert_eq!(turn.response, "NUST offers engineering programs.");
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 1);
    let requests = h.llm.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].tools.is_none());
    let prompt = &requests[0].messages.last().unwrap().content;
    assert!(prompt.contains("What is NUST University?"));
    assert!(prompt.contains("NUST Admissions"));
}

#[tokio::test]
async fn test_information_keywords_win_over_admin_keywords() {
    let h = harness(ScriptedLlm::new().with_reply("ok")).await;
    h.orchestrator
        .process_message("list students at NUST", None, DEFAULT_USER)
        .await;
    assert_eq!(h.llm.tool_request_count(), 0);
    assert_eq!(h.search.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_three_tool_rounds_then_answer() {
    let h = harness(
        ScriptedLlm::new()
            .with_tool_calls(vec![call("c1", "list_students", json!({}))])
            .with_tool_calls(vec![call("c2", "get_student", json!({"student_id": "STU001"}))])
            .with_tool_calls(vec![call("c3", "get_campus_analytics", json!({}))])
            .with_reply("Here is the summary."),
    )
    .await;

    let turn = h
        .orchestrator
        .process_message("show campus analytics and student info", None, DEFAULT_USER)
        .await;

    assert_eq!(turn.response, "Here is the summary.");
    assert_eq!(h.llm.tool_request_count(), 4);
    // 最后一次请求带着三轮的工具结果
    assert_eq!(tool_payloads(&h, 3).len(), 3);
}

#[tokio::test]
async fn test_tool_results_follow_call_order() {
    let h = harness(
        ScriptedLlm::new()
            .with_tool_calls(vec![
                call("a", "get_campus_analytics", json!({})),
                call("b", "get_student", json!({"student_id": "STU002"})),
                call("c", "list_students", json!({})),
            ])
            .with_reply("done"),
    )
    .await;

    h.orchestrator
        .process_message("campus analytics please", None, DEFAULT_USER)
        .await;

    let ids: Vec<String> = h.llm.requests()[1]
        .messages
        .iter()
        .filter(|m| m.role == Role::Tool)
        .filter_map(|m| m.tool_call_id.clone())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_max_rounds_gives_fallback_answer() {
    let mut cfg = AppConfig::default();
    cfg.agent.max_tool_rounds = 2;
    let mut llm = ScriptedLlm::new();
    for i in 0..5 {
        llm = llm.with_tool_calls(vec![call(&format!("c{}", i), "list_students", json!({}))]);
    }
    let h = harness_with(llm, cfg).await;

    let turn = h
        .orchestrator
        .process_message("list students", None, DEFAULT_USER)
        .await;

    assert_eq!(turn.response, GIVE_UP_ANSWER);
    assert!(turn.response.contains("could not complete"));
    assert_eq!(h.llm.tool_request_count(), 3);
}

#[tokio::test]
async fn test_unknown_tool_is_reported_and_loop_continues() {
    let h = harness(
        ScriptedLlm::new()
            .with_tool_calls(vec![call("c1", "enroll_course", json!({"course": "CS101"}))])
            .with_reply("That operation is not available."),
    )
    .await;

    let turn = h
        .orchestrator
        .process_message("update student STU001 course", None, DEFAULT_USER)
        .await;

    assert_eq!(turn.response, "That operation is not available.");
    let payloads = tool_payloads(&h, 1);
    assert_eq!(payloads[0]["success"], false);
    assert!(payloads[0]["message"]
        .as_str()
        .unwrap()
        .contains("enroll_course"));
}

#[tokio::test]
async fn test_admin_stream_replays_word_prefixes() {
    let h = harness(
        ScriptedLlm::new()
            .with_tool_calls(vec![call("c1", "list_students", json!({}))])
            .with_reply("There are ten students"),
    )
    .await;

    let handle = h
        .orchestrator
        .process_message_stream("list students", None, DEFAULT_USER)
        .await;
    let session_id = handle.session_id.clone();
    let events = collect(handle.events).await;

    assert_eq!(events.len(), 4);
    assert_eq!(events[0].data.response, "There");
    assert_eq!(events[1].data.response, "There are");
    assert_eq!(events[2].data.response, "There are ten");
    assert_eq!(events[0].data.word_count, Some(1));
    assert_eq!(events[0].data.total_words, Some(4));
    assert!(events[..3].iter().all(|e| e.kind == EventKind::Message));

    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.data.response, "There are ten students");
    assert_eq!(last.data.progress, 100.0);
    assert!(last.data.complete);
    assert!(events.iter().all(|e| e.data.session_id == session_id));
    assert_progress_monotonic(&events);

    // 回合完成后写入会话历史
    let history = h
        .orchestrator
        .session_history(&session_id, DEFAULT_USER)
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, "There are ten students");
}

#[tokio::test]
async fn test_incremental_stream_for_information_query() {
    let h = harness(ScriptedLlm::new().with_stream(vec![
        "NUST ",
        "has ",
        "many ",
        "schools.",
    ]))
    .await;

    let handle = h
        .orchestrator
        .process_message_stream("Tell me about NUST", None, DEFAULT_USER)
        .await;
    let events = collect(handle.events).await;

    assert!(events.len() >= 2);
    let messages: Vec<_> = events
        .iter()
        .filter(|e| e.kind == EventKind::Message)
        .collect();
    assert!(!messages.is_empty());
    assert!(messages.iter().all(|e| e.data.streaming));
    assert!(messages.iter().all(|e| e.data.progress <= 95.0));
    for pair in messages.windows(2) {
        assert!(pair[1].data.response.starts_with(&pair[0].data.response));
    }

    let last = events.last().unwrap();
    assert_eq!(last.kind, EventKind::Complete);
    assert_eq!(last.data.response, "NUST has many schools.");
    assert_eq!(last.data.progress, 100.0);
    assert!(!last.data.error);
    assert_progress_monotonic(&events);
    assert!(h.llm.requests()[0].streamed);
}

#[tokio::test]
async fn test_stream_error_is_framed_then_completed() {
    let h = harness(
        ScriptedLlm::new()
            .with_stream(vec!["Hello ", "there ", "friend"])
            .with_stream_error_after(1),
    )
    .await;

    let handle = h
        .orchestrator
        .process_message_stream("hello", None, DEFAULT_USER)
        .await;
    let events = collect(handle.events).await;

    let error_at = events
        .iter()
        .position(|e| e.kind == EventKind::Error)
        .unwrap();
    let last = events.last().unwrap();
    assert_eq!(error_at, events.len() - 2);
    assert_eq!(last.kind, EventKind::Complete);
    assert!(last.data.error);
    assert!(last.data.complete);
    assert_progress_monotonic(&events);
}

#[tokio::test]
async fn test_concurrent_sessions_are_isolated() {
    let h = harness(ScriptedLlm::new()).await;
    let orch = &h.orchestrator;
    let a = orch.create_session("alice").await;
    let b = orch.create_session("bob").await;

    let (ra, rb) = tokio::join!(
        orch.process_message("my favourite colour is green", Some(&a.session_id), "alice"),
        orch.process_message("my favourite colour is blue", Some(&b.session_id), "bob"),
    );
    assert_eq!(ra.session_id, a.session_id);
    assert_eq!(rb.session_id, b.session_id);

    let ha = orch.session_history(&a.session_id, "alice").await.unwrap();
    let hb = orch.session_history(&b.session_id, "bob").await.unwrap();
    assert_eq!(ha.len(), 2);
    assert_eq!(hb.len(), 2);
    assert_eq!(ha[0].text, "my favourite colour is green");
    assert_eq!(hb[0].text, "my favourite colour is blue");
    assert_eq!(orch.list_sessions("alice").await.len(), 1);
}

#[tokio::test]
async fn test_same_session_turns_are_serialized() {
    let h = harness(ScriptedLlm::new().with_latency(Duration::from_millis(50))).await;
    let orch = &h.orchestrator;
    let s = orch.create_session("alice").await;

    tokio::join!(
        orch.process_message("tell me a joke", Some(&s.session_id), "alice"),
        orch.process_message("tell me a story", Some(&s.session_id), "alice"),
    );

    let history = orch.session_history(&s.session_id, "alice").await.unwrap();
    assert_eq!(history.len(), 4);
    for pair in history.chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
        assert!(pair[1].text.starts_with("Echo from Mock:"));
        assert!(pair[1]
            .text
            .ends_with(&format!("User: {}\nAssistant:", pair[0].text)));
    }
    assert_ne!(history[0].text, history[2].text);

    // 第二轮的 prompt 里带着第一轮完整的一问一答
    let second = &h.llm.requests()[1].messages[0].content;
    assert!(second.contains(&format!("User: {}\n", history[0].text)));
    assert!(second.contains(&format!("Assistant: {}\n", history[1].text)));
}

#[tokio::test]
async fn test_session_reads_do_not_wait_for_slow_turn() {
    let h = harness(ScriptedLlm::new().with_latency(Duration::from_millis(400))).await;
    let orch = Arc::clone(&h.orchestrator);
    let busy = orch.create_session("bob").await;
    let idle = orch.create_session("alice").await;

    let sid = busy.session_id.clone();
    let turn = tokio::spawn({
        let orch = Arc::clone(&orch);
        async move { orch.process_message("hello there", Some(&sid), "bob").await }
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    let wait = Duration::from_millis(200);
    let listed = tokio::time::timeout(wait, orch.list_sessions("alice"))
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].session_id, idle.session_id);
    let info = tokio::time::timeout(wait, orch.session_info(&busy.session_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info.message_count, 0);

    turn.await.unwrap();
    let info = orch.session_info(&busy.session_id).await.unwrap();
    assert_eq!(info.message_count, 2);
}

#[tokio::test]
async fn test_token_usage_accumulates_across_turns() {
    let h = harness(ScriptedLlm::new().with_usage_per_call(12, 4)).await;
    assert_eq!(h.orchestrator.token_usage(), (0, 0, 0));
    h.orchestrator
        .process_message("hello", None, DEFAULT_USER)
        .await;
    h.orchestrator
        .process_message("how are you", None, DEFAULT_USER)
        .await;
    assert_eq!(h.llm.call_count(), 2);
    assert_eq!(h.orchestrator.token_usage(), (24, 8, 32));
}

#[tokio::test]
async fn test_unknown_session_id_is_adopted() {
    let h = harness(ScriptedLlm::new().with_reply("hi")).await;
    let turn = h
        .orchestrator
        .process_message("hello", Some("client-chosen-id"), DEFAULT_USER)
        .await;
    assert_eq!(turn.session_id, "client-chosen-id");
    assert!(h
        .orchestrator
        .session_info("client-chosen-id")
        .await
        .is_some());
}
