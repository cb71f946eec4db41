//! 对话编排器集成测试：并发语义、重试与兜底、超时、持久化

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use wayfarer::core::{AgentError, ConversationOrchestrator, OrchestratorConfig, SIMPLIFIED_PREFIX};
use wayfarer::llm::{LlmError, MockLlmClient, MockReply};
use wayfarer::memory::{
    ConversationStore, InMemoryConversationStore, PlanId, Role, SqliteConversationStore,
};
use wayfarer::tools::ToolRegistry;

const PLAN: &str = "Day 1: Sagrada Familia.\nDay 2: Park Güell and the Gothic Quarter.";

fn build(
    config: OrchestratorConfig,
    llm: Arc<MockLlmClient>,
    store: Arc<dyn ConversationStore>,
) -> ConversationOrchestrator {
    ConversationOrchestrator::new(config, llm, ToolRegistry::new(), store)
}

async fn started(orch: &ConversationOrchestrator, destination: &str) -> (PlanId, String) {
    let plan_id = orch.create_plan(7, destination, PLAN).await.unwrap();
    let thread_id = orch.start_thread(plan_id, PLAN).await.unwrap();
    (plan_id, thread_id)
}

fn bad_tool_call() -> MockReply {
    MockReply::Text("{\"tool\": \"get_current_weather\", \"args\": ".into())
}

#[tokio::test]
async fn test_serial_turns_grow_log_by_two() {
    let llm = Arc::new(MockLlmClient::new());
    let orch = build(
        OrchestratorConfig::default(),
        llm,
        Arc::new(InMemoryConversationStore::new()),
    );
    let (plan_id, thread_id) = started(&orch, "Barcelona").await;

    for i in 0..3 {
        let reply = orch
            .continue_thread(&thread_id, plan_id, &format!("question {i}"))
            .await
            .unwrap();
        assert_eq!(reply, format!("Mock answer: question {i}"));
    }

    let history = orch.get_history(&thread_id).await.unwrap();
    assert_eq!(history.len(), 1 + 2 * 3);
    assert_eq!(history[0].role, Role::Assistant);
    assert_eq!(history[0].content, PLAN);
    for pair in history[1..].chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].role, Role::Assistant);
    }
}

#[tokio::test]
async fn test_concurrent_turns_on_one_thread_are_serialized() {
    let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(50)));
    let orch = Arc::new(build(
        OrchestratorConfig::default(),
        llm.clone(),
        Arc::new(InMemoryConversationStore::new()),
    ));
    let (plan_id, thread_id) = started(&orch, "Barcelona").await;

    let turns = (0..5).map(|i| {
        let orch = orch.clone();
        let thread_id = thread_id.clone();
        tokio::spawn(async move {
            orch.continue_thread(&thread_id, plan_id, &format!("q{i}"))
                .await
        })
    });
    for result in join_all(turns).await {
        assert!(result.unwrap().is_ok());
    }

    let history = orch.get_history(&thread_id).await.unwrap();
    assert_eq!(history.len(), 11);
    // 每条回答紧跟在它所回答的问题之后，没有交错
    for pair in history[1..].chunks(2) {
        assert_eq!(pair[0].role, Role::User);
        assert_eq!(pair[1].content, format!("Mock answer: {}", pair[0].content));
    }

    // 第 i 个轮次看到种子、前 i 轮的问答和自己的问题
    let seen = llm.seen();
    assert_eq!(seen.len(), 5);
    for (i, context) in seen.iter().enumerate() {
        let conversational = context.iter().filter(|m| m.role.is_conversational()).count();
        assert_eq!(conversational, 2 * i + 2);
    }
}

#[tokio::test]
async fn test_distinct_threads_run_in_parallel() {
    let delay = Duration::from_millis(200);
    let llm = Arc::new(MockLlmClient::new().with_delay(delay));
    let orch = Arc::new(build(
        OrchestratorConfig::default(),
        llm,
        Arc::new(InMemoryConversationStore::new()),
    ));

    let mut threads = Vec::new();
    for city in ["Oslo", "Lima", "Hanoi", "Quito"] {
        threads.push(started(&orch, city).await);
    }

    let begin = Instant::now();
    let turns = threads.iter().map(|(plan_id, thread_id)| {
        let orch = orch.clone();
        let (plan_id, thread_id) = (*plan_id, thread_id.clone());
        tokio::spawn(async move { orch.continue_thread(&thread_id, plan_id, "what to eat?").await })
    });
    for result in join_all(turns).await {
        assert!(result.unwrap().is_ok());
    }
    assert!(begin.elapsed() < delay * 3, "turns on distinct threads must not queue");
}

#[tokio::test]
async fn test_fallback_after_retries_exhausted() {
    let llm = Arc::new(MockLlmClient::with_script([
        bad_tool_call(),
        bad_tool_call(),
        bad_tool_call(),
    ]));
    let orch = build(
        OrchestratorConfig::default(),
        llm.clone(),
        Arc::new(InMemoryConversationStore::new()),
    );
    let (plan_id, thread_id) = started(&orch, "Reykjavik").await;

    let reply = orch
        .continue_thread(&thread_id, plan_id, "Will it be cold?")
        .await
        .unwrap();
    assert!(reply.contains("Reykjavik"));
    assert!(reply.starts_with("I apologize"));
    assert_eq!(llm.calls(), 3);

    let history = orch.get_history(&thread_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[2].content, reply);
}

#[tokio::test]
async fn test_recovers_on_third_attempt_with_simplified_question() {
    let llm = Arc::new(MockLlmClient::with_script([
        bad_tool_call(),
        bad_tool_call(),
        MockReply::Text("Try the tapas on Carrer de Blai.".into()),
    ]));
    let orch = build(
        OrchestratorConfig::default(),
        llm.clone(),
        Arc::new(InMemoryConversationStore::new()),
    );
    let (plan_id, thread_id) = started(&orch, "Barcelona").await;

    let reply = orch
        .continue_thread(&thread_id, plan_id, "Where should we eat?")
        .await
        .unwrap();
    assert_eq!(reply, "Try the tapas on Carrer de Blai.");

    let seen = llm.seen();
    let last_user = seen[2].iter().rev().find(|m| m.role == Role::User).unwrap();
    assert_eq!(
        last_user.content,
        format!("{SIMPLIFIED_PREFIX}Where should we eat?")
    );

    // 持久化的是原始提问，不是改写后的
    let history = orch.get_history(&thread_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[1].content, "Where should we eat?");
}

#[tokio::test]
async fn test_zero_retries_falls_back_after_one_attempt() {
    let llm = Arc::new(MockLlmClient::with_script([bad_tool_call()]));
    let config = OrchestratorConfig {
        max_retries: 0,
        ..OrchestratorConfig::default()
    };
    let orch = build(config, llm.clone(), Arc::new(InMemoryConversationStore::new()));
    let (plan_id, thread_id) = started(&orch, "Nairobi").await;

    let reply = orch
        .continue_thread(&thread_id, plan_id, "safari?")
        .await
        .unwrap();
    assert!(reply.contains("Nairobi"));
    assert_eq!(llm.calls(), 1);
}

#[tokio::test]
async fn test_tool_results_feed_next_step() {
    let llm = Arc::new(MockLlmClient::with_script([
        MockReply::Text(
            r#"{"tool_calls": [{"tool": "estimate_total_hotel_cost", "args": {"price_per_night": 120.0, "total_days": 3}}]}"#
                .into(),
        ),
        MockReply::Text("Your hotel will cost about 360.".into()),
    ]));
    let orch = build(
        OrchestratorConfig::default(),
        llm.clone(),
        Arc::new(InMemoryConversationStore::new()),
    );
    let (plan_id, thread_id) = started(&orch, "Vienna").await;

    let reply = orch
        .continue_thread(&thread_id, plan_id, "How much for the hotel?")
        .await
        .unwrap();
    assert_eq!(reply, "Your hotel will cost about 360.");

    let second = &llm.seen()[1];
    assert!(second
        .iter()
        .any(|m| m.role == Role::Tool && m.content.starts_with("[estimate_total_hotel_cost]")));

    // 工具中间消息不进入持久化日志
    let history = orch.get_history(&thread_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|m| m.role != Role::Tool));
}

#[tokio::test]
async fn test_model_failure_is_not_retried() {
    let llm = Arc::new(MockLlmClient::with_script([MockReply::Fail(
        LlmError::RateLimited { retry_after_ms: 1000 },
    )]));
    let orch = build(
        OrchestratorConfig::default(),
        llm.clone(),
        Arc::new(InMemoryConversationStore::new()),
    );
    let (plan_id, thread_id) = started(&orch, "Lima").await;

    let err = orch
        .continue_thread(&thread_id, plan_id, "ceviche?")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::ModelUnavailable(_)));
    // 限流由调用方稍后重试，编排器内部不重试
    assert!(err.is_retryable());
    assert_eq!(err.thread_id, thread_id);
    assert_eq!(llm.calls(), 1);
    assert_eq!(orch.get_history(&thread_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_turn_timeout_releases_thread() {
    let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(500)));
    let config = OrchestratorConfig {
        turn_timeout: Duration::from_millis(100),
        lock_wait: Duration::from_millis(200),
        ..OrchestratorConfig::default()
    };
    let orch = build(config, llm, Arc::new(InMemoryConversationStore::new()));
    let (plan_id, thread_id) = started(&orch, "Tokyo").await;

    let err = orch
        .continue_thread(&thread_id, plan_id, "sushi?")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::TurnTimeout { .. }));
    assert!(err.is_retryable());

    // 半轮对话被丢弃，锁已释放
    assert_eq!(orch.get_history(&thread_id).await.unwrap().len(), 1);
    let handle = orch.threads().acquire(&thread_id, plan_id).await.unwrap();
    orch.threads().release(handle, false).await.unwrap();
}

#[tokio::test]
async fn test_busy_thread_reports_lock_timeout() {
    let config = OrchestratorConfig {
        lock_wait: Duration::from_millis(50),
        ..OrchestratorConfig::default()
    };
    let orch = build(
        config,
        Arc::new(MockLlmClient::new()),
        Arc::new(InMemoryConversationStore::new()),
    );
    let (plan_id, thread_id) = started(&orch, "Rome").await;

    let held = orch.threads().acquire(&thread_id, plan_id).await.unwrap();
    let err = orch
        .continue_thread(&thread_id, plan_id, "gelato?")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::LockTimeout { .. }));
    assert_eq!(err.destination, None);
    orch.threads().release(held, false).await.unwrap();

    assert!(orch.continue_thread(&thread_id, plan_id, "gelato?").await.is_ok());
}

#[tokio::test]
async fn test_save_failure_keeps_log_in_memory() {
    let store = Arc::new(InMemoryConversationStore::new());
    let orch = build(
        OrchestratorConfig::default(),
        Arc::new(MockLlmClient::new()),
        store.clone(),
    );
    let (plan_id, thread_id) = started(&orch, "Athens").await;

    store.fail_next_saves(1);
    let err = orch
        .continue_thread(&thread_id, plan_id, "Acropolis hours?")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::Persistence(_)));
    assert_eq!(orch.get_history(&thread_id).await.unwrap().len(), 3);

    orch.continue_thread(&thread_id, plan_id, "ferry to Hydra?")
        .await
        .unwrap();
    let stored = store.load(plan_id).await.unwrap().unwrap();
    assert_eq!(stored.messages.len(), 5);
}

#[tokio::test]
async fn test_history_survives_restart_with_sqlite() {
    let store: Arc<dyn ConversationStore> = Arc::new(SqliteConversationStore::in_memory().unwrap());
    let llm = Arc::new(MockLlmClient::with_script([MockReply::Text(
        "Take the 28 tram.".into(),
    )]));
    let orch = build(OrchestratorConfig::default(), llm, store.clone());
    let plan_id = orch.create_plan(3, "Lisbon", PLAN).await.unwrap();
    let thread_id = orch.start_thread(plan_id, PLAN).await.unwrap();
    orch.continue_thread(&thread_id, plan_id, "How to get around?")
        .await
        .unwrap();

    let restarted = build(
        OrchestratorConfig::default(),
        Arc::new(MockLlmClient::new()),
        store,
    );
    let history = restarted.get_history(&thread_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(
        history
            .iter()
            .filter(|m| m.content == "Take the 28 tram.")
            .count(),
        1
    );

    // 重启后继续对话，上下文来自持久化日志
    restarted
        .continue_thread(&thread_id, plan_id, "And at night?")
        .await
        .unwrap();
    assert_eq!(restarted.get_history(&thread_id).await.unwrap().len(), 5);
}

#[tokio::test]
async fn test_first_follow_up_without_start_thread_seeds_plan() {
    let orch = build(
        OrchestratorConfig::default(),
        Arc::new(MockLlmClient::new()),
        Arc::new(InMemoryConversationStore::new()),
    );
    let plan_id = orch.create_plan(9, "Kyoto", PLAN).await.unwrap();
    let thread_id = orch.thread_id_for(plan_id).await.unwrap();
    assert_eq!(thread_id, format!("user_9_plan_{plan_id}"));

    orch.continue_thread(&thread_id, plan_id, "temples?")
        .await
        .unwrap();
    let history = orch.get_history(&thread_id).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].content, PLAN);
    assert_eq!(orch.thread_id_for(plan_id).await.unwrap(), thread_id);
}

#[tokio::test]
async fn test_start_thread_during_lazy_turn_keeps_both_turns() {
    let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_millis(100)));
    let store = Arc::new(InMemoryConversationStore::new());
    let orch = Arc::new(build(OrchestratorConfig::default(), llm, store.clone()));
    let plan_id = orch.create_plan(9, "Kyoto", PLAN).await.unwrap();
    let lazy_id = orch.thread_id_for(plan_id).await.unwrap();

    let lazy_turn = {
        let orch = orch.clone();
        let lazy_id = lazy_id.clone();
        tokio::spawn(async move { orch.continue_thread(&lazy_id, plan_id, "qa").await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let started_id = orch.start_thread(plan_id, PLAN).await.unwrap();
    assert_eq!(started_id, lazy_id);
    assert_eq!(lazy_turn.await.unwrap().unwrap(), "Mock answer: qa");

    orch.continue_thread(&started_id, plan_id, "qb").await.unwrap();
    let stored = store.load(plan_id).await.unwrap().unwrap();
    assert_eq!(stored.thread_id.as_deref(), Some(lazy_id.as_str()));
    let contents: Vec<_> = stored.messages.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![PLAN, "qa", "Mock answer: qa", "qb", "Mock answer: qb"]
    );
}

#[tokio::test]
async fn test_lazy_turn_after_start_thread_is_rejected() {
    let store = Arc::new(InMemoryConversationStore::new());
    let orch = build(
        OrchestratorConfig::default(),
        Arc::new(MockLlmClient::new()),
        store.clone(),
    );
    let plan_id = orch.create_plan(9, "Kyoto", PLAN).await.unwrap();
    let lazy_id = format!("user_9_plan_{plan_id}");
    let started_id = orch.start_thread(plan_id, PLAN).await.unwrap();
    assert_ne!(started_id, lazy_id);

    let err = orch
        .continue_thread(&lazy_id, plan_id, "qa")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::ThreadMismatch { ref expected, .. } if *expected == started_id));

    let stored = store.load(plan_id).await.unwrap().unwrap();
    assert_eq!(stored.thread_id.as_deref(), Some(started_id.as_str()));
    assert_eq!(stored.messages.len(), 1);
}

#[tokio::test]
async fn test_finished_and_failed_turns_unload_plans() {
    let orch = build(
        OrchestratorConfig::default(),
        Arc::new(MockLlmClient::new()),
        Arc::new(InMemoryConversationStore::new()),
    );
    let (plan_id, thread_id) = started(&orch, "Hanoi").await;

    for i in 0..50 {
        let err = orch
            .continue_thread(&format!("user_1_plan_{}", 1000 + i), 1000 + i, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err.source, AgentError::PlanNotFound(_)));
        let err = orch
            .continue_thread(&format!("bogus_{i}"), plan_id, "hello")
            .await
            .unwrap_err();
        assert!(matches!(err.source, AgentError::ThreadMismatch { .. }));
    }
    assert_eq!(orch.threads().loaded_count().await, 0);

    orch.continue_thread(&thread_id, plan_id, "street food?")
        .await
        .unwrap();
    assert_eq!(orch.threads().loaded_count().await, 0);
    assert_eq!(orch.get_history(&thread_id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_thread_of_another_plan_is_rejected() {
    let orch = build(
        OrchestratorConfig::default(),
        Arc::new(MockLlmClient::new()),
        Arc::new(InMemoryConversationStore::new()),
    );
    let (_, thread_a) = started(&orch, "Porto").await;
    let (plan_b, _) = started(&orch, "Seville").await;

    let err = orch
        .continue_thread(&thread_a, plan_b, "hello")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::ThreadMismatch { .. }));
}

#[tokio::test]
async fn test_delete_plan_removes_conversation() {
    let store = Arc::new(InMemoryConversationStore::new());
    let orch = build(
        OrchestratorConfig::default(),
        Arc::new(MockLlmClient::new()),
        store.clone(),
    );
    let (plan_id, thread_id) = started(&orch, "Prague").await;
    orch.continue_thread(&thread_id, plan_id, "beer halls?")
        .await
        .unwrap();

    assert!(orch.delete_plan(plan_id).await.unwrap());
    assert!(store.load(plan_id).await.unwrap().is_none());
    assert!(matches!(
        orch.get_history(&thread_id).await,
        Err(AgentError::UnknownThread(_))
    ));
    assert_eq!(orch.threads().loaded_count().await, 0);
    assert!(!orch.delete_plan(plan_id).await.unwrap());

    let err = orch
        .continue_thread(&thread_id, plan_id, "still there?")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::PlanNotFound(_)));
}

#[tokio::test]
async fn test_shutdown_cancels_in_flight_turn() {
    let llm = Arc::new(MockLlmClient::new().with_delay(Duration::from_secs(5)));
    let orch = Arc::new(build(
        OrchestratorConfig::default(),
        llm,
        Arc::new(InMemoryConversationStore::new()),
    ));
    let (plan_id, thread_id) = started(&orch, "Cusco").await;

    let in_flight = {
        let orch = orch.clone();
        let thread_id = thread_id.clone();
        tokio::spawn(async move { orch.continue_thread(&thread_id, plan_id, "altitude?").await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    orch.shutdown();

    let err = in_flight.await.unwrap().unwrap_err();
    assert!(matches!(err.source, AgentError::Cancelled));
    assert_eq!(orch.get_history(&thread_id).await.unwrap().len(), 1);

    let err = orch
        .continue_thread(&thread_id, plan_id, "again?")
        .await
        .unwrap_err();
    assert!(matches!(err.source, AgentError::Cancelled));
}
