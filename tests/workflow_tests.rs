use async_trait::async_trait;
use roundtable::{
    Agent, AgentRegistry, ChatMessage, ConversationConfig, ConversationWorkflow, CostMeter,
    LanguageModel, MemoryBalanceStore, ModelError, Outcome, PricingRow, PricingTable, Provider,
    SharedAgentRegistry, Supervisor, WorkflowError, WorkflowEvent,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

/// Supervisor model stub. Selection calls replay `repeat_selection` (or fail);
/// termination calls pop from `terminations`, defaulting to "keep going".
struct SupervisorStub {
    repeat_selection: Option<serde_json::Value>,
    fail_selections: bool,
    terminations: Mutex<VecDeque<serde_json::Value>>,
}

impl SupervisorStub {
    fn selecting(selection: serde_json::Value) -> Arc<Self> {
        Arc::new(Self {
            repeat_selection: Some(selection),
            fail_selections: false,
            terminations: Mutex::new(VecDeque::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            repeat_selection: None,
            fail_selections: true,
            terminations: Mutex::new(VecDeque::new()),
        })
    }

    fn with_terminations(self: Arc<Self>, verdicts: Vec<serde_json::Value>) -> Arc<Self> {
        *self.terminations.lock().unwrap() = verdicts.into();
        self
    }
}

#[async_trait]
impl LanguageModel for SupervisorStub {
    async fn generate_text(
        &self,
        _system_prompt: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<String, ModelError> {
        unreachable!("the supervisor only makes structured calls");
    }

    async fn generate_structured(
        &self,
        _system_prompt: &str,
        prompt: &str,
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<serde_json::Value, ModelError> {
        if prompt.contains("stopping point") {
            return Ok(self
                .terminations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| serde_json::json!({"should_terminate": false, "reason": ""})));
        }
        if self.fail_selections {
            return Err("supervisor unavailable".into());
        }
        Ok(self
            .repeat_selection
            .clone()
            .expect("selection requested but none configured"))
    }

    fn model_name(&self) -> &str {
        "supervisor-stub"
    }

    fn provider(&self) -> Provider {
        Provider::OpenAi
    }
}

/// Agent model stub: always replies with the same text, optionally slowly or
/// with a transport failure.
struct TextStub {
    reply: String,
    delay: Option<Duration>,
    fail: bool,
}

impl TextStub {
    fn replying(reply: &str) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay: None,
            fail: false,
        })
    }

    fn blank() -> Arc<Self> {
        Self::replying("")
    }

    fn slow(reply: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            reply: reply.to_string(),
            delay: Some(delay),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            reply: String::new(),
            delay: None,
            fail: true,
        })
    }
}

#[async_trait]
impl LanguageModel for TextStub {
    async fn generate_text(
        &self,
        _system_prompt: &str,
        _messages: &[ChatMessage],
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<String, ModelError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err("model offline".into());
        }
        Ok(self.reply.clone())
    }

    async fn generate_structured(
        &self,
        _system_prompt: &str,
        _prompt: &str,
        _temperature: f32,
        _max_tokens: Option<u32>,
    ) -> Result<serde_json::Value, ModelError> {
        unreachable!("agents only make text calls");
    }

    fn model_name(&self) -> &str {
        "gpt-4o-mini"
    }

    fn provider(&self) -> Provider {
        Provider::OpenAi
    }
}

async fn registry_with(agents: Vec<Agent>) -> SharedAgentRegistry {
    let registry = AgentRegistry::shared();
    {
        let mut guard = registry.write().await;
        for agent in agents {
            guard.register(agent);
        }
    }
    registry
}

fn agent_responses(events: &[WorkflowEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|e| match e {
            WorkflowEvent::AgentResponse { agent_id, .. } => Some(agent_id.as_str()),
            _ => None,
        })
        .collect()
}

/// Terminal events close the stream: exactly one, and nothing after it.
fn assert_single_terminal(events: &[WorkflowEvent]) {
    let terminals = events
        .iter()
        .enumerate()
        .filter(|(_, e)| {
            matches!(
                e,
                WorkflowEvent::Completed { .. } | WorkflowEvent::Error { .. }
            )
        })
        .collect::<Vec<_>>();
    assert_eq!(terminals.len(), 1, "expected exactly one terminal event");
    assert_eq!(terminals[0].0, events.len() - 1, "terminal event must be last");
}

#[tokio::test]
async fn single_agent_single_turn_run() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("Pleased to meet you."))
    ])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada", "reasoning": "only speaker", "turns": 1}),
    ));

    let workflow = ConversationWorkflow::new(Arc::clone(&registry), supervisor);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello").with_max_turns(1))
        .await
        .unwrap();
    let events = events.collect_all().await;

    assert_eq!(agent_responses(&events), vec!["ada"]);
    assert_single_terminal(&events);
    // The status announcement precedes the response it announces.
    assert!(matches!(&events[0], WorkflowEvent::Status { message } if message.contains("Ada")));
    assert!(matches!(&events[1], WorkflowEvent::AgentResponse { content, .. }
        if content == "Pleased to meet you."));
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Completed { outcome: Outcome::TurnLimit, .. }
    ));
}

#[tokio::test]
async fn turn_ceiling_bounds_multi_turn_selection() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("More thoughts.")),
        Agent::new("bob", "Bob", TextStub::replying("Indeed.")),
    ])
    .await;
    // The supervisor asks for five consecutive turns; the ceiling allows two.
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada", "turns": 5}),
    ));

    let workflow = ConversationWorkflow::new(registry, supervisor);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Go on").with_max_turns(2))
        .await
        .unwrap();
    let events = events.collect_all().await;

    assert_eq!(agent_responses(&events).len(), 2);
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Completed { outcome: Outcome::TurnLimit, .. }
    ));
}

#[tokio::test]
async fn repeated_selection_is_overridden_for_variety() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("My view.")),
        Agent::new("bob", "Bob", TextStub::replying("And mine.")),
    ])
    .await;
    // The supervisor stubbornly picks Ada every time.
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada", "turns": 1}),
    ));

    let workflow = ConversationWorkflow::new(registry, supervisor);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Opinions?").with_max_turns(2))
        .await
        .unwrap();
    let events = events.collect_all().await;

    // Second turn must be forced to Bob even though the stub still said Ada.
    assert_eq!(agent_responses(&events), vec!["ada", "bob"]);
}

#[tokio::test]
async fn selector_failure_falls_back_instead_of_aborting() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("Still here."))
    ])
    .await;
    let workflow = ConversationWorkflow::new(registry, Supervisor::new(SupervisorStub::failing()));
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello").with_max_turns(1))
        .await
        .unwrap();
    let events = events.collect_all().await;

    assert_eq!(agent_responses(&events), vec!["ada"]);
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Completed { .. }
    ));
}

#[tokio::test]
async fn termination_verdict_ends_run_before_ceiling() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("A thought."))
    ])
    .await;
    let supervisor_model = SupervisorStub::selecting(serde_json::json!({"agent_id": "ada"}))
        .with_terminations(vec![
            serde_json::json!({"should_terminate": true, "reason": "question answered"}),
        ]);
    let workflow = ConversationWorkflow::new(registry, Supervisor::new(supervisor_model));

    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello").with_max_turns(5))
        .await
        .unwrap();
    let events = events.collect_all().await;

    // Turn one leaves the transcript below the evaluation threshold; turn two
    // triggers the verdict, well under the five-turn ceiling.
    assert_eq!(agent_responses(&events).len(), 2);
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Completed { outcome: Outcome::Natural, .. }
    ));
}

#[tokio::test]
async fn turns_zero_pauses_for_the_user() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("unused"))
    ])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada", "turns": 0}),
    ));

    let workflow = ConversationWorkflow::new(registry, supervisor);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello"))
        .await
        .unwrap();
    let events = events.collect_all().await;

    assert!(agent_responses(&events).is_empty());
    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        WorkflowEvent::Completed { outcome: Outcome::Paused, .. }
    ));
}

#[tokio::test]
async fn empty_registry_is_rejected_up_front() {
    let registry = AgentRegistry::shared();
    let supervisor = Supervisor::new(SupervisorStub::failing());
    let result = ConversationWorkflow::new(registry, supervisor)
        .run(ConversationConfig::new("Hello"))
        .await;
    assert!(matches!(result, Err(WorkflowError::NoAgents)));
}

#[tokio::test]
async fn blank_initial_message_is_rejected() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("unused"))
    ])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::failing());
    let result = ConversationWorkflow::new(registry, supervisor)
        .run(ConversationConfig::new("   "))
        .await;
    assert!(matches!(result, Err(WorkflowError::ExecutionFailed(_))));
}

#[tokio::test]
async fn roster_is_unregistered_after_normal_completion() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("Hi.")),
        Agent::new("bob", "Bob", TextStub::replying("Hello.")),
    ])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada"}),
    ));

    let workflow = ConversationWorkflow::new(Arc::clone(&registry), supervisor);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello").with_max_turns(1))
        .await
        .unwrap();
    events.collect_all().await;

    assert!(registry.read().await.is_empty());
}

#[tokio::test]
async fn generation_failure_emits_error_and_still_cleans_up() {
    let registry = registry_with(vec![Agent::new("ada", "Ada", TextStub::failing())]).await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada"}),
    ));

    let workflow = ConversationWorkflow::new(Arc::clone(&registry), supervisor);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello"))
        .await
        .unwrap();
    let events = events.collect_all().await;

    assert!(agent_responses(&events).is_empty());
    assert_single_terminal(&events);
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Error { message } if message.contains("Generation failed")
    ));
    assert!(registry.read().await.is_empty());
}

#[tokio::test]
async fn double_blank_reply_falls_back_to_greeting() {
    let registry = registry_with(vec![Agent::new("ada", "Ada", TextStub::blank())]).await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada"}),
    ));

    let workflow = ConversationWorkflow::new(registry, supervisor);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello").with_max_turns(1))
        .await
        .unwrap();
    let events = events.collect_all().await;

    match &events[1] {
        WorkflowEvent::AgentResponse { content, .. } => assert_eq!(content, "Hey there!"),
        other => panic!("expected agent response, got {:?}", other),
    }
}

#[tokio::test]
async fn stop_flag_silences_the_stream_at_the_next_boundary() {
    let registry = registry_with(vec![Agent::new(
        "ada",
        "Ada",
        TextStub::slow("Musing...", Duration::from_millis(300)),
    )])
    .await;
    // Three turns requested; the stop lands during the first generation.
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada", "turns": 3}),
    ));

    let workflow = ConversationWorkflow::new(Arc::clone(&registry), supervisor);
    let (handle, mut events) = workflow
        .run(ConversationConfig::new("Hello").with_max_turns(5))
        .await
        .unwrap();

    // First event is the thinking status, emitted before the slow generation.
    assert!(matches!(
        events.recv().await,
        Some(WorkflowEvent::Status { .. })
    ));
    handle.stop();
    assert!(!handle.is_active());

    // The in-flight turn may still complete, but nothing follows it and no
    // terminal event is emitted.
    let remaining = events.collect_all().await;
    assert!(agent_responses(&remaining).len() <= 1);
    assert!(!remaining
        .iter()
        .any(|e| matches!(e, WorkflowEvent::Completed { .. } | WorkflowEvent::Error { .. })));
    assert!(registry.read().await.is_empty());
}

#[tokio::test]
async fn dropped_stream_stops_the_run_and_cleans_up() {
    let registry = registry_with(vec![Agent::new(
        "ada",
        "Ada",
        TextStub::slow("Musing...", Duration::from_millis(100)),
    )])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada", "turns": 3}),
    ));

    let workflow = ConversationWorkflow::new(Arc::clone(&registry), supervisor);
    let (_handle, mut events) = workflow
        .run(ConversationConfig::new("Hello").with_max_turns(50))
        .await
        .unwrap();

    assert!(events.recv().await.is_some());
    drop(events);

    // The loop notices the closed channel at its next send and tears down.
    for _ in 0..50 {
        if registry.read().await.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("registry was not cleaned up after the consumer disconnected");
}

#[tokio::test]
async fn metered_run_debits_and_reports_credit_updates() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("Hello!"))
    ])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada"}),
    ));

    let table = PricingTable::new(vec![
        PricingRow::new(Provider::OpenAi, "gpt-4o-mini", 1.0, 2.0).default_model()
    ]);
    let store = Arc::new(MemoryBalanceStore::new());
    store.deposit("u1", 100).await;

    let workflow = ConversationWorkflow::new(registry, supervisor)
        .with_accounting(CostMeter::new(table), Arc::clone(&store) as Arc<dyn roundtable::BalanceStore>);
    let (_handle, events) = workflow
        .run(
            ConversationConfig::new("Hello")
                .with_max_turns(1)
                .with_user("u1"),
        )
        .await
        .unwrap();
    let events = events.collect_all().await;

    // "Hello!" plus the approximate input context lands in the first token
    // bucket: 1 credit per message + 2 per bucket = 3.
    assert!(events.iter().any(|e| matches!(
        e,
        WorkflowEvent::CreditUpdate { credits_used: 3, remaining_credits: 97 }
    )));
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Completed { total_credits_used: 3, .. }
    ));
    assert_eq!(store.balance("u1").await, 97);

    let transactions = store.transactions().await;
    assert_eq!(transactions.len(), 1);
    assert_eq!(transactions[0].amount, -3);
    assert_eq!(transactions[0].metadata.agent_id.as_deref(), Some("ada"));
}

#[tokio::test]
async fn insufficient_credits_surface_as_error_and_stop_the_run() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("Hello!"))
    ])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada", "turns": 3}),
    ));

    let table = PricingTable::new(vec![
        PricingRow::new(Provider::OpenAi, "gpt-4o-mini", 1.0, 2.0).default_model()
    ]);
    let store = Arc::new(MemoryBalanceStore::new());
    store.deposit("u1", 1).await;

    let workflow = ConversationWorkflow::new(Arc::clone(&registry), supervisor)
        .with_accounting(CostMeter::new(table), Arc::clone(&store) as Arc<dyn roundtable::BalanceStore>);
    let (_handle, events) = workflow
        .run(ConversationConfig::new("Hello").with_user("u1"))
        .await
        .unwrap();
    let events = events.collect_all().await;

    assert_eq!(agent_responses(&events).len(), 1);
    assert_single_terminal(&events);
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Error { message } if message.contains("Insufficient credits")
    ));
    assert_eq!(store.balance("u1").await, 1);
    assert!(registry.read().await.is_empty());
}

#[tokio::test]
async fn unpriced_model_is_not_debited_but_run_continues() {
    let registry = registry_with(vec![
        Agent::new("ada", "Ada", TextStub::replying("Hello!"))
    ])
    .await;
    let supervisor = Supervisor::new(SupervisorStub::selecting(
        serde_json::json!({"agent_id": "ada"}),
    ));

    // Table has no OpenAI rows at all, so no default fallback either.
    let table = PricingTable::new(vec![PricingRow::new(
        Provider::Anthropic,
        "claude-haiku",
        1.0,
        1.0,
    )]);
    let store = Arc::new(MemoryBalanceStore::new());
    store.deposit("u1", 100).await;

    let workflow = ConversationWorkflow::new(registry, supervisor)
        .with_accounting(CostMeter::new(table), Arc::clone(&store) as Arc<dyn roundtable::BalanceStore>);
    let (_handle, events) = workflow
        .run(
            ConversationConfig::new("Hello")
                .with_max_turns(1)
                .with_user("u1"),
        )
        .await
        .unwrap();
    let events = events.collect_all().await;

    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkflowEvent::CreditUpdate { .. })));
    assert!(matches!(
        events.last().unwrap(),
        WorkflowEvent::Completed { total_credits_used: 0, .. }
    ));
    assert_eq!(store.balance("u1").await, 100);
}
