mod common;

use common::{builder, ScriptedProvider};
use maestro::adapters::input_validator::{InputValidator, ValidationErrorKind};
use maestro::adapters::rate_limit::RateLimiter;
use maestro::agents::core::AgentRegistry;
use maestro::agents::{AgentKind, ChatError, Orchestrator};
use maestro::config::{RateLimitConfig, Settings};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

#[tokio::test]
async fn test_greeting_takes_standard_route() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator.chat_with_trace("Hello", "s1").await.unwrap();

    assert_eq!(trace.response, "chat response");
    assert_eq!(trace.classification, Some(AgentKind::Chat));
    assert_eq!(trace.workflow_path, vec!["classify_task", "route_to_agent"]);
    assert!(!trace.failed);
    assert_eq!(llm.calls_for("classifier"), 1);
    assert_eq!(llm.calls_for("chat"), 1);
}

#[tokio::test]
async fn test_grading_request_runs_pipeline() {
    let llm = ScriptedProvider::new("grading");
    llm.reply("grading", "Score: 8/10");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator
        .chat_with_trace("Grade this essay: The sky is blue because of Rayleigh scattering.", "s1")
        .await
        .unwrap();

    assert_eq!(
        trace.workflow_path,
        vec![
            "classify_task",
            "grading_workflow_entry",
            "route_to_grading",
            "route_to_formatting"
        ]
    );
    assert_eq!(trace.response, "formatting response");

    let formatting = llm.requests_for("formatting");
    assert_eq!(formatting.len(), 1);
    let prompt = formatting[0].last_user_message().unwrap();
    assert!(prompt.starts_with("Format as professional grading report:"));
    assert!(prompt.contains("Score: 8/10"));
    assert_eq!(llm.calls_for("chat"), 0);
}

#[tokio::test]
async fn test_grading_with_note_keyword_adds_notes() {
    let llm = ScriptedProvider::new("grading");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator
        .chat_with_trace("Grade my answer and EXPLAIN the deductions: 2+2=5", "s1")
        .await
        .unwrap();

    assert_eq!(trace.workflow_path.last(), Some(&"route_to_chat_notes"));
    assert_eq!(
        trace.response,
        "formatting response\n\nAdditional notes:\nchat response"
    );
}

#[tokio::test]
async fn test_formatting_failure_degrades_to_grading_text() {
    let llm = ScriptedProvider::new("grading");
    llm.reply("grading", "Raw grade: B+");
    llm.fail("formatting");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator.chat_with_trace("Grade this essay: ...", "s1").await.unwrap();

    assert!(!trace.failed);
    assert_eq!(trace.response, "Raw grade: B+");
    assert!(trace.workflow_path.contains(&"route_to_formatting"));
}

#[tokio::test]
async fn test_repeated_request_is_served_from_cache() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let first = orchestrator.chat_with_trace("What is Rust?", "s1").await.unwrap();
    let calls = llm.calls();

    // the cache context is the history length, so start from the same state
    orchestrator.clear_conversation_history().await;
    let second = orchestrator.chat_with_trace("  what is   RUST? ", "s1").await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.response, first.response);
    assert_eq!(llm.calls(), calls);

    let stats = orchestrator.cache_stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.size, 1);

    orchestrator.clear_cache().await;
    let stats = orchestrator.cache_stats().await;
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits, 0);
}

#[tokio::test]
async fn test_growing_history_changes_cache_context() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    orchestrator.chat("What is Rust?", "s1").await.unwrap();
    let second = orchestrator.chat_with_trace("What is Rust?", "s1").await.unwrap();

    assert!(!second.cached);
    assert_eq!(llm.calls_for("classifier"), 2);
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_any_call() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone())
        .validator(InputValidator::new(20))
        .build()
        .unwrap();

    let cases = [
        ("   ".to_string(), ValidationErrorKind::EmptyInput),
        ("x".repeat(21), ValidationErrorKind::TooLong { max: 20 }),
        ("<script>x</script>".to_string(), ValidationErrorKind::SuspiciousContent),
    ];
    for (input, kind) in cases {
        assert_eq!(
            orchestrator.chat(&input, "s1").await,
            Err(ChatError::InputValidation { kind })
        );
    }

    assert!(orchestrator.chat(&"x".repeat(20), "s1").await.is_ok());
    assert_eq!(llm.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_per_session() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone())
        .rate_limiter(Arc::new(RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_calls: 3,
            period_seconds: 60,
        })))
        .build()
        .unwrap();

    for i in 0..3 {
        orchestrator.chat(&format!("question {}", i), "s1").await.unwrap();
    }
    let calls = llm.calls();

    match orchestrator.chat("question 3", "s1").await {
        Err(ChatError::RateLimited { retry_after_secs }) => assert!(retry_after_secs > 0),
        other => panic!("expected rate limit, got {:?}", other),
    }
    assert_eq!(llm.calls(), calls);

    assert!(orchestrator.chat("question 3", "s2").await.is_ok());

    tokio::time::advance(Duration::from_secs(61)).await;
    assert!(orchestrator.chat("question 4", "s1").await.is_ok());
}

#[tokio::test]
async fn test_unregistered_agent_falls_back_to_direct_call() {
    let llm = ScriptedProvider::new("analysis");
    let mut agents = AgentRegistry::with_defaults(llm.clone(), 1.0, &BTreeMap::new());
    agents.remove(AgentKind::Analysis);
    let orchestrator = builder(llm.clone()).agents(agents).build().unwrap();

    let trace = orchestrator
        .chat_with_trace("Compute the mean of 3, 5 and 10", "s1")
        .await
        .unwrap();

    assert_eq!(trace.response, "fallback response");
    assert_eq!(trace.classification, Some(AgentKind::Analysis));

    let fallback = llm.requests_for("fallback");
    assert_eq!(fallback[0].system_prompt(), Some("You are handling a analysis task."));
    assert_eq!(
        fallback[0].last_user_message(),
        Some("Compute the mean of 3, 5 and 10")
    );
}

#[tokio::test]
async fn test_garbled_classification_defaults_to_chat() {
    let llm = ScriptedProvider::new("I'd say this is probably... poetry?");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator.chat_with_trace("Write me a haiku", "s1").await.unwrap();

    assert_eq!(trace.classification, Some(AgentKind::Chat));
    assert_eq!(trace.response, "chat response");
}

#[tokio::test]
async fn test_loose_label_spelling_is_accepted() {
    let llm = ScriptedProvider::new(" \"Code Review.\" ");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator.chat_with_trace("fn main() { loop {} }", "s1").await.unwrap();

    assert_eq!(trace.classification, Some(AgentKind::CodeReview));
    assert_eq!(trace.response, "code_review response");
}

#[tokio::test]
async fn test_agent_failure_becomes_apology_recorded_as_error() {
    let llm = ScriptedProvider::new("chat");
    llm.fail("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator.chat_with_trace("Hello", "s1").await.unwrap();

    assert!(trace.failed);
    assert!(trace
        .response
        .starts_with("I apologize, but I encountered an error: "));
    assert!(trace.response.contains("connection refused"));

    let history = orchestrator.conversation_history().await;
    assert_eq!(history.total_messages, 2);
    assert_eq!(history.stats.agent_usage.get("error"), Some(&1));
    assert_eq!(orchestrator.cache_stats().await.size, 0);
}

#[tokio::test]
async fn test_classifier_failure_goes_to_error() {
    let llm = ScriptedProvider::new("chat");
    llm.fail("classifier");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let trace = orchestrator.chat_with_trace("Hello", "s1").await.unwrap();

    assert!(trace.failed);
    assert_eq!(trace.workflow_path, vec!["classify_task"]);
    assert_eq!(llm.calls_for("chat"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_agent_times_out() {
    let llm = ScriptedProvider::new("chat");
    llm.delay("chat", Duration::from_secs(5));
    let orchestrator = builder(llm.clone())
        .request_timeout(Duration::from_secs(1))
        .build()
        .unwrap();

    let reply = orchestrator.chat("Hello", "s1").await.unwrap();

    assert_eq!(
        reply,
        "I apologize, but I encountered an error: LLM error: Request timed out"
    );
}

#[tokio::test]
async fn test_related_prior_interactions_are_mentioned() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    let first = orchestrator.chat_with_trace("rust lifetimes", "s1").await.unwrap();
    let second = orchestrator.chat_with_trace("rust traits", "s1").await.unwrap();

    assert_eq!(first.context_count, 0);
    assert_eq!(second.context_count, 1);
    assert_eq!(
        second.response,
        "chat response\n\n[Context: Based on 1 previous interactions]"
    );
}

#[tokio::test]
async fn test_history_limit_and_status() {
    let llm = ScriptedProvider::new("chat");
    let orchestrator = builder(llm.clone()).build().unwrap();

    for i in 0..3 {
        orchestrator.chat(&format!("message {}", i), "s1").await.unwrap();
    }
    orchestrator.set_history_limit(2).await;

    let history = orchestrator.conversation_history().await;
    assert_eq!(history.total_messages, 2);
    assert_eq!(history.stats.max_messages, 2);

    let status = orchestrator.agent_status();
    assert_eq!(status.len(), 5);
    assert!(status.values().all(|h| h.is_active()));

    let info = orchestrator.info().await;
    assert_eq!(info.model, "scripted-model");
    assert_eq!(info.agents.len(), 5);
    assert_eq!(info.max_messages, 2);
}

#[tokio::test]
async fn test_metrics_track_each_agent() {
    let llm = ScriptedProvider::new("grading");
    let orchestrator = builder(llm.clone()).build().unwrap();

    orchestrator.chat("Grade this: 1+1=2", "s1").await.unwrap();

    let metrics = orchestrator.metrics();
    assert_eq!(metrics.agents["classifier"].request_count, 1);
    assert_eq!(metrics.agents["grading"].request_count, 1);
    assert_eq!(metrics.agents["formatting"].request_count, 1);
    assert_eq!(metrics.total_errors, 0);
    assert!(orchestrator
        .encode_metrics()
        .unwrap()
        .contains("maestro_agent_requests_total"));
}

#[tokio::test]
async fn test_settings_round_trip_history_and_metrics() -> anyhow::Result<()> {
    let dir = TempDir::new()?;
    let mut settings = Settings::default();
    settings.memory.history_file = dir.path().join("history.json");
    settings.data.interactions_file = dir.path().join("interactions.jsonl");
    settings.metrics.export_path = Some(dir.path().join("metrics.json"));

    let llm = ScriptedProvider::new("chat");
    let orchestrator = Orchestrator::from_settings_with_provider(&settings, llm.clone()).await?;
    orchestrator.chat("Remember me", "s1").await?;
    orchestrator.shutdown().await?;

    assert!(settings.memory.history_file.exists());
    assert!(dir.path().join("metrics.json").exists());
    assert_eq!(std::fs::read_to_string(&settings.data.interactions_file)?.lines().count(), 1);

    let restored = Orchestrator::from_settings_with_provider(&settings, llm).await?;
    let history = restored.conversation_history().await;
    assert_eq!(history.total_messages, 2);
    assert!(history.recent_context.contains("User: Remember me"));

    assert!(restored.delete_saved_history().await);
    assert!(!settings.memory.history_file.exists());
    Ok(())
}
