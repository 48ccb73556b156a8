mod common;

use common::{builder, ScriptedProvider};
use futures::StreamExt;
use maestro::agents::{AgentKind, AgentOverrides, ChatError, Orchestrator, StreamEvent};
use std::collections::BTreeMap;
use std::time::Duration;

fn status(content: &str, agent: Option<&str>) -> StreamEvent {
    StreamEvent::status(content, agent)
}

/// Poll until the workflow task has released the streaming slot
async fn wait_for_idle(orchestrator: &Orchestrator) {
    for _ in 0..100 {
        if !orchestrator.conversation_history().await.stats.streaming {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("streaming slot was never released");
}

#[tokio::test]
async fn test_stream_event_order_for_chat() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let events = orchestrator
        .chat_streaming("Hello there", "s1")
        .await
        .unwrap()
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            status("Classifying request...", None),
            status("Routing to chat", None),
            status("chat agent is working...", Some("chat")),
            StreamEvent::chunk("chat ", Some("chat")),
            StreamEvent::chunk("response", Some("chat")),
            StreamEvent::complete("chat response", Some("chat")),
            StreamEvent::complete("chat response", None),
        ]
    );
}

#[tokio::test]
async fn test_streamed_reply_lands_in_memory() {
    let llm = ScriptedProvider::new("analysis");
    llm.reply("analysis", "The mean is 6");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let reply = orchestrator
        .chat_streaming("Mean of 4, 6 and 8?", "s1")
        .await
        .unwrap()
        .final_response()
        .await;
    assert_eq!(reply.as_deref(), Some("The mean is 6"));

    wait_for_idle(&orchestrator).await;
    let history = orchestrator.conversation_history().await;
    assert_eq!(history.total_messages, 2);
    assert_eq!(history.stats.agent_usage.get("analysis"), Some(&1));
    assert!(history
        .recent_context
        .contains("Assistant (analysis): The mean is 6"));
}

#[tokio::test]
async fn test_grading_steps_stream_in_sequence() {
    let llm = ScriptedProvider::new("grading");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let events = orchestrator
        .chat_streaming("Grade this essay: cats are mammals.", "s1")
        .await
        .unwrap()
        .collect()
        .await;

    let agents: Vec<Option<&str>> = events.iter().map(StreamEvent::agent).collect();
    let first_formatting = agents.iter().position(|a| *a == Some("formatting")).unwrap();
    let last_grading = agents.iter().rposition(|a| *a == Some("grading")).unwrap();
    assert!(last_grading < first_formatting);

    assert!(events.contains(&StreamEvent::complete("grading response", Some("grading"))));
    assert_eq!(
        events.last(),
        Some(&StreamEvent::complete("formatting response", None))
    );

    let terminals = events.iter().filter(|e| e.is_terminal()).count();
    assert_eq!(terminals, 3);
}

#[tokio::test]
async fn test_failing_agent_stream_reports_errors() {
    let llm = ScriptedProvider::new("chat");
    llm.fail("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let events = orchestrator
        .chat_streaming("Hello", "s1")
        .await
        .unwrap()
        .collect()
        .await;

    let expected = "I apologize, but I encountered an error: LLM error: Streaming error: stream reset";
    let tail = &events[events.len() - 3..];
    assert_eq!(
        tail,
        &[
            StreamEvent::chunk("partial ", Some("chat")),
            StreamEvent::error(expected, Some("chat")),
            StreamEvent::error(expected, None),
        ]
    );

    wait_for_idle(&orchestrator).await;
    let history = orchestrator.conversation_history().await;
    assert_eq!(history.total_messages, 2);
    assert_eq!(history.stats.agent_usage.get("error"), Some(&1));
    assert_eq!(history.stats.agent_usage.get("chat"), None);
}

#[tokio::test]
async fn test_dropping_stream_cancels_and_releases_slot() {
    let llm = ScriptedProvider::new("chat");
    let long_reply = "word ".repeat(500);
    llm.reply("chat", &long_reply);
    let orchestrator = builder(llm.clone()).build().unwrap();

    let mut events = orchestrator.chat_streaming("Tell me a long story", "s1").await.unwrap();
    while let Some(event) = events.next().await {
        if matches!(event, StreamEvent::Chunk { .. }) {
            break;
        }
    }
    drop(events);

    wait_for_idle(&orchestrator).await;
    let history = orchestrator.conversation_history().await;
    assert_eq!(history.total_messages, 1);

    llm.reply("chat", "short");
    let reply = orchestrator
        .chat_streaming("And a short one", "s1")
        .await
        .unwrap()
        .final_response()
        .await;
    assert_eq!(reply.as_deref(), Some("short"));
}

#[tokio::test]
async fn test_non_streaming_agent_sends_single_chunk() {
    let llm = ScriptedProvider::new("code_review");
    let mut overrides = BTreeMap::new();
    overrides.insert(
        AgentKind::CodeReview,
        AgentOverrides {
            kind: Some(AgentKind::CodeReview),
            streaming: Some(false),
            ..Default::default()
        },
    );
    let orchestrator = builder(llm.clone()).agent_overrides(overrides).build().unwrap();

    let events = orchestrator
        .chat_streaming("fn add(a: i32, b: i32) -> i32 { a - b }", "s1")
        .await
        .unwrap()
        .collect()
        .await;

    let chunks: Vec<&StreamEvent> = events
        .iter()
        .filter(|e| matches!(e, StreamEvent::Chunk { .. }))
        .collect();
    assert_eq!(chunks, vec![&StreamEvent::chunk("code_review response", Some("code_review"))]);
    assert_eq!(llm.calls_for("code_review"), 1);
}

#[tokio::test]
async fn test_rejections_are_returned_before_streaming() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let result = orchestrator.chat_streaming("", "s1").await;
    assert!(matches!(result, Err(ChatError::InputValidation { .. })));

    let result = orchestrator
        .chat_streaming("<a onclick=alert(1)>hi</a>", "s1")
        .await;
    assert!(matches!(result, Err(ChatError::InputValidation { .. })));
    assert_eq!(llm.calls(), 0);
}

#[tokio::test]
async fn test_dropping_stream_during_grading_skips_later_steps() {
    let llm = ScriptedProvider::new("grading");
    llm.reply("grading", &"point ".repeat(500));
    let orchestrator = builder(llm.clone()).build().unwrap();

    let mut events = orchestrator
        .chat_streaming("Grade this essay and explain: the moon is cheese", "s1")
        .await
        .unwrap();
    while let Some(event) = events.next().await {
        if matches!(&event, StreamEvent::Chunk { agent: Some(a), .. } if a == "grading") {
            break;
        }
    }
    drop(events);

    wait_for_idle(&orchestrator).await;
    assert_eq!(llm.calls_for("formatting"), 0);
    assert_eq!(llm.calls_for("chat"), 0);
    assert_eq!(orchestrator.conversation_history().await.total_messages, 1);
}

#[tokio::test]
async fn test_streamed_formatting_failure_falls_back_to_grading_text() {
    let llm = ScriptedProvider::new("grading");
    llm.reply("grading", "Raw grade: B+");
    llm.fail("formatting");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let events = orchestrator
        .chat_streaming("Grade this essay: water is wet", "s1")
        .await
        .unwrap()
        .collect()
        .await;

    let formatting_error = events
        .iter()
        .position(|e| matches!(e, StreamEvent::Error { agent: Some(a), .. } if a == "formatting"))
        .expect("formatting step should report its failure");
    assert_eq!(
        &events[formatting_error + 1..],
        &[StreamEvent::complete("Raw grade: B+", None)]
    );

    wait_for_idle(&orchestrator).await;
    let history = orchestrator.conversation_history().await;
    assert_eq!(history.stats.agent_usage.get("grading"), Some(&1));
    assert_eq!(history.stats.agent_usage.get("formatting"), None);
    assert_eq!(history.stats.agent_usage.get("error"), None);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_agent_stream_times_out() {
    let llm = ScriptedProvider::new("chat");
    llm.delay("chat", Duration::from_secs(5));
    let orchestrator = builder(llm.clone())
        .request_timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let events = orchestrator
        .chat_streaming("Hello", "s1")
        .await
        .unwrap()
        .collect()
        .await;

    let expected = "I apologize, but I encountered an error: LLM error: Request timed out";
    assert_eq!(
        &events[events.len() - 2..],
        &[
            StreamEvent::error(expected, Some("chat")),
            StreamEvent::error(expected, None),
        ]
    );
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Chunk { .. })));

    wait_for_idle(&orchestrator).await;
    assert_eq!(
        orchestrator.conversation_history().await.stats.agent_usage.get("error"),
        Some(&1)
    );
}
