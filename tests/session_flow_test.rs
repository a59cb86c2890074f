//! 会话流程集成测试：进程内工具提供者 + 脚本模型，驱动完整的会话循环

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use switchboard::config::AppConfig;
use switchboard::core::{register_all, AgentError, ShutdownManager, ShutdownReason};
use switchboard::llm::{BackendKind, ScriptedLlmClient};
use switchboard::memory::{Message, ToolCallRequest, ToolPayload};
use switchboard::provider::{MethodSpec, ToolProvider};
use switchboard::session::Session;
use switchboard::turn::{TurnOutput, TurnSegment};
use switchboard::ui::{RecordingRenderer, RenderEvent};
use switchboard::SessionBuilder;

/// 方法 a / b / slow：按参数 ms 休眠后返回 "<method> done"
struct DataProvider {
    stops: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolProvider for DataProvider {
    fn name(&self) -> &str {
        "open_data"
    }

    fn methods(&self) -> Vec<MethodSpec> {
        ["a", "b", "slow"]
            .iter()
            .map(|m| {
                MethodSpec::new(
                    *m,
                    "test method",
                    json!({"type": "object", "properties": {"ms": {"type": "integer"}}}),
                )
            })
            .collect()
    }

    async fn call(
        &self,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<ToolPayload, AgentError> {
        let ms = args.get("ms").and_then(Value::as_u64).unwrap_or(0);
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(ToolPayload::Text(format!("{method} done")))
    }

    async fn shutdown(&self) -> Result<(), AgentError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    session: Session,
    renderer: Arc<RecordingRenderer>,
    llm: Arc<ScriptedLlmClient>,
    stops: Arc<AtomicUsize>,
    shutdown: Arc<ShutdownManager>,
}

async fn harness(script: Vec<Result<Message, AgentError>>, call_timeout: Duration) -> Harness {
    let renderer = Arc::new(RecordingRenderer::new());
    let llm = Arc::new(ScriptedLlmClient::new(BackendKind::Anthropic, script));
    let stops = Arc::new(AtomicUsize::new(0));
    let shutdown = Arc::new(ShutdownManager::new());

    let provider: Arc<dyn ToolProvider> = Arc::new(DataProvider {
        stops: stops.clone(),
    });
    let registry = register_all(vec![(provider, call_timeout)]);

    let mut config = AppConfig::default();
    config.tools.shutdown_grace_secs = 1;
    let session = SessionBuilder::new(config)
        .with_renderer(renderer.clone())
        .with_shutdown(shutdown.clone())
        .assemble(llm.clone(), registry)
        .await;

    Harness {
        session,
        renderer,
        llm,
        stops,
        shutdown,
    }
}

fn call(id: &str, method: &str, ms: u64) -> ToolCallRequest {
    let mut args = Map::new();
    args.insert("ms".into(), json!(ms));
    ToolCallRequest::new(id, method, args)
}

fn last_turn(renderer: &RecordingRenderer) -> (TurnOutput, u64) {
    renderer
        .events()
        .into_iter()
        .rev()
        .find_map(|e| match e {
            RenderEvent::Turn {
                output,
                session_total,
            } => Some((output, session_total)),
            _ => None,
        })
        .expect("no turn rendered")
}

#[tokio::test]
async fn test_parallel_batch_then_text() {
    let script = vec![
        Ok(Message::tool_calls(vec![call("t1", "a", 60), call("t2", "b", 5)]).with_usage(json!({
            "input_tokens": 100,
            "output_tokens": 20,
            "cache_read_input_tokens": 30
        }))),
        Ok(Message::assistant_with_usage(
            "Both lookups finished.",
            json!({"input_tokens": 150, "output_tokens": 10}),
        )),
    ];
    let mut h = harness(script, Duration::from_secs(5)).await;

    h.session.handle_line("look both up").await;
    let (output, session_total) = last_turn(&h.renderer);

    assert_eq!(output.segments.len(), 2);
    match &output.segments[0] {
        TurnSegment::Batch(batch) => {
            assert_eq!(batch.sequence, 1);
            assert!(batch.parallel);
            let methods: Vec<_> = batch.calls.iter().map(|c| c.method.as_str()).collect();
            assert_eq!(methods, vec!["a", "b"]);
            assert_eq!(batch.calls[0].output, "a done");
            assert!(batch.calls.iter().all(|c| !c.is_error));
        }
        other => panic!("expected batch, got {other:?}"),
    }
    assert_eq!(
        output.segments[1],
        TurnSegment::Text {
            text: "Both lookups finished.".into()
        }
    );
    // Anthropic 的缓存读取单独上报，计入输入
    assert_eq!(output.usage.input, 280);
    assert_eq!(output.usage.output, 30);
    assert_eq!(output.usage.cached, 30);
    assert_eq!(session_total, 310);

    // 历史只多出 user + 最终回复
    let messages = h.session.conversation().messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[1], Message::assistant("Both lookups finished."));
    assert_eq!(h.session.ledger().summary().turns, 1);
}

#[tokio::test]
async fn test_timed_out_call_still_closes_batch() {
    let script = vec![
        Ok(Message::tool_calls(vec![call("s1", "slow", 2_000)])),
        Ok(Message::assistant("The lookup timed out.")),
    ];
    let mut h = harness(script, Duration::from_millis(50)).await;

    h.session.handle_line("try the slow one").await;
    let (output, _) = last_turn(&h.renderer);

    let batches: Vec<_> = output.batches().collect();
    assert_eq!(batches.len(), 1);
    assert!(!batches[0].parallel);
    assert!(batches[0].calls[0].is_error);
    assert!(batches[0].calls[0].output.contains("timed out"));
    assert_eq!(output.unclosed_batches, 0);
    assert_eq!(output.reply, "The lookup timed out.");
}

#[tokio::test]
async fn test_unknown_method_reported_to_model() {
    let script = vec![
        Ok(Message::tool_calls(vec![call("u1", "missing", 0)])),
        Ok(Message::assistant("No such tool.")),
    ];
    let mut h = harness(script, Duration::from_secs(1)).await;

    h.session.handle_line("call something odd").await;
    let (output, _) = last_turn(&h.renderer);
    let batch = output.batches().next().expect("batch");
    assert!(batch.calls[0].is_error);
    assert!(batch.calls[0].output.contains("Unknown method: missing"));
}

#[tokio::test]
async fn test_text_only_turn() {
    let script = vec![Ok(Message::assistant_with_usage(
        "Hello there.",
        json!({"input_tokens": 12, "output_tokens": 3}),
    ))];
    let mut h = harness(script, Duration::from_secs(1)).await;

    h.session.handle_line("hi").await;
    let (output, session_total) = last_turn(&h.renderer);
    assert_eq!(output.batches().count(), 0);
    assert_eq!(
        output.segments,
        vec![TurnSegment::Text {
            text: "Hello there.".into()
        }]
    );
    assert_eq!(session_total, 15);
}

#[tokio::test]
async fn test_model_failure_rolls_back_turn() {
    let script = vec![Err(AgentError::ModelCallFailure("upstream 529".into()))];
    let mut h = harness(script, Duration::from_secs(1)).await;

    h.session.handle_line("hi").await;
    assert!(h.session.conversation().is_empty());
    assert_eq!(h.session.ledger().summary().turns, 0);
    assert_eq!(
        h.renderer.events().last(),
        Some(&RenderEvent::Error("Model call failed: upstream 529".into()))
    );
}

#[tokio::test]
async fn test_clear_then_tokens_reports_empty_ledger() {
    let script = vec![Ok(Message::assistant_with_usage(
        "ok",
        json!({"input_tokens": 40, "output_tokens": 2}),
    ))];
    let mut h = harness(script, Duration::from_secs(1)).await;
    let system_tokens = h.session.ledger().system_tokens();
    assert!(system_tokens > 0);

    h.session.handle_line("hi").await;
    h.session.handle_line("  CLEAR ").await;
    h.session.handle_line("tokens").await;

    assert!(h.session.conversation().is_empty());
    match h.renderer.events().last() {
        Some(RenderEvent::Usage(summary)) => {
            assert_eq!(summary.turns, 0);
            assert_eq!(summary.total, 0);
            assert_eq!(summary.average_per_turn, None);
            assert_eq!(summary.system_tokens, system_tokens);
        }
        other => panic!("expected usage table, got {other:?}"),
    }
    assert!(h
        .renderer
        .events()
        .contains(&RenderEvent::Notice("Cleared".into())));
}

#[tokio::test]
async fn test_blank_lines_are_ignored() {
    let mut h = harness(vec![], Duration::from_secs(1)).await;

    let reason = h.session.run(&b"\n   \n\t\n"[..]).await;
    assert_eq!(reason, ShutdownReason::EndOfInput);
    assert!(h.llm.history_lengths().is_empty());
    assert!(!h
        .renderer
        .events()
        .iter()
        .any(|e| matches!(e, RenderEvent::Turn { .. } | RenderEvent::Error(_))));
}

#[tokio::test]
async fn test_end_of_input_tears_down_once() {
    let script = vec![Ok(Message::assistant("hi back"))];
    let mut h = harness(script, Duration::from_secs(1)).await;

    let reason = h.session.run(&b"hello\n"[..]).await;
    assert_eq!(reason, ShutdownReason::EndOfInput);
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    assert_eq!(h.session.teardown().await, None);
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
    assert_eq!(
        h.renderer.events().last(),
        Some(&RenderEvent::Notice("Goodbye!".into()))
    );
}

#[tokio::test]
async fn test_quit_stops_before_remaining_input() {
    let script = vec![Ok(Message::assistant("unused"))];
    let mut h = harness(script, Duration::from_secs(1)).await;

    let reason = h.session.run(&b"Quit\nhello\n"[..]).await;
    assert_eq!(reason, ShutdownReason::UserInitiated);
    assert_eq!(h.llm.remaining(), 1);
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_signal_before_read_ends_session() {
    let mut h = harness(vec![], Duration::from_secs(1)).await;
    h.shutdown.shutdown(ShutdownReason::Signal);

    let reason = h.session.run(&b"hello\n"[..]).await;
    assert_eq!(reason, ShutdownReason::Signal);
    assert!(h.llm.history_lengths().is_empty());
    assert_eq!(h.stops.load(Ordering::SeqCst), 1);
}
