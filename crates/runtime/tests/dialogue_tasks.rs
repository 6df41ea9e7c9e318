//! Runtime-hosted dialogue tests: event delivery, cancellation through the
//! task handle, and history persistence.

use std::sync::Arc;
use std::time::Duration;

use pl_domain::dialogue::{
    AgentRole, AgentSeat, DialogueEvent, DialogueMode, DialogueSpec, FinishReason,
};
use pl_domain::error::Result;
use pl_domain::provider::ProviderTag;
use pl_domain::stream::{DeltaStream, StreamEvent};
use pl_history::{HistoryKind, HistoryStore};
use pl_providers::{ChatClient, ChatRequest};
use pl_runtime::TaskRuntime;

struct EchoClient {
    reply: &'static str,
    fragment_delay: Duration,
}

#[async_trait::async_trait]
impl ChatClient for EchoClient {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Ollama
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["llama3".into(), "qwen3".into()])
    }

    async fn refresh_models(&self) -> Result<Vec<String>> {
        self.list_models().await
    }

    fn clear_cache(&self) {}

    async fn chat(&self, _req: &ChatRequest) -> Result<String> {
        Ok(self.reply.to_owned())
    }

    async fn chat_stream(&self, _req: &ChatRequest) -> Result<DeltaStream> {
        let reply = self.reply;
        let delay = self.fragment_delay;
        let stream = async_stream::stream! {
            for word in reply.split_inclusive(' ') {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                yield Ok(StreamEvent::Delta { text: word.to_owned() });
            }
            yield Ok(StreamEvent::Done);
        };
        Ok(Box::pin(stream))
    }
}

fn discussion_spec() -> DialogueSpec {
    DialogueSpec {
        mode: DialogueMode::Discussion,
        topic: Some("test topic".into()),
        extra_topics: vec![],
        agents: vec![
            AgentSeat::new(AgentRole::ScholarA, ProviderTag::Ollama, "llama3"),
            AgentSeat::new(AgentRole::ScholarB, ProviderTag::Ollama, "qwen3"),
            AgentSeat::new(AgentRole::ExpertSummariser, ProviderTag::Ollama, "llama3"),
        ],
        rounds: 1,
        time_limit: None,
        temperature: 0.5,
    }
}

fn clients(reply: &'static str, delay: Duration) -> Vec<Arc<dyn ChatClient>> {
    (0..3)
        .map(|_| {
            Arc::new(EchoClient {
                reply,
                fragment_delay: delay,
            }) as Arc<dyn ChatClient>
        })
        .collect()
}

#[tokio::test]
async fn dialogue_task_streams_events_and_persists_history() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(HistoryStore::load(dir.path().join("chat_histories.json")));
    let runtime = TaskRuntime::new(4);

    let mut task = runtime
        .spawn_dialogue(
            discussion_spec(),
            clients("a thoughtful reply", Duration::ZERO),
            None,
            Some(history.clone()),
            None,
        )
        .unwrap();

    let mut turn_completes = 0;
    while let Some(event) = task.events.recv().await {
        if matches!(event, DialogueEvent::TurnComplete { .. }) {
            turn_completes += 1;
        }
    }
    let outcome = task.handle.await_result().await.unwrap();

    assert_eq!(turn_completes, 3); // A, B, summariser
    assert_eq!(outcome.reason, FinishReason::Completed);

    // Persisted once the run ended.
    assert_eq!(history.len(), 1);
    let record = &history.page(0, 1)[0];
    assert_eq!(record.kind, HistoryKind::Discussion);
    assert_eq!(record.model1, "llama3");
    assert_eq!(record.model2.as_deref(), Some("qwen3"));
    assert!(record.chat_content.contains("a thoughtful reply"));
    assert!(record.topic.contains("test topic"));
}

#[tokio::test]
async fn dialogue_task_cancel_persists_partial_transcript() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(HistoryStore::load(dir.path().join("chat_histories.json")));
    let runtime = TaskRuntime::new(4);

    let mut spec = discussion_spec();
    spec.rounds = 10;
    let mut task = runtime
        .spawn_dialogue(
            spec,
            clients("slow words trickle out here", Duration::from_millis(40)),
            None,
            Some(history.clone()),
            None,
        )
        .unwrap();

    // Cancel after the first complete turn.
    let mut events = Vec::new();
    while let Some(event) = task.events.recv().await {
        if matches!(event, DialogueEvent::TurnComplete { .. }) && events.is_empty() {
            task.handle.cancel();
        }
        if matches!(event, DialogueEvent::TurnComplete { .. }) {
            events.push(event);
        }
    }
    let outcome = task.handle.await_result().await.unwrap();

    assert_eq!(outcome.reason, FinishReason::Cancelled);
    assert!(outcome.utterances() >= 1);
    // The partial run still landed in history.
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn model_fetch_runs_as_task() {
    let runtime = TaskRuntime::new(2);
    let client: Arc<dyn ChatClient> = Arc::new(EchoClient {
        reply: "",
        fragment_delay: Duration::ZERO,
    });
    let handle = runtime.spawn_model_fetch(client);
    let models = handle.await_result().await.unwrap().unwrap();
    assert_eq!(models, vec!["llama3", "qwen3"]);
}

#[tokio::test]
async fn debate_batch_records_batch_kind() {
    let dir = tempfile::tempdir().unwrap();
    let history = Arc::new(HistoryStore::load(dir.path().join("chat_histories.json")));
    let runtime = TaskRuntime::new(4);

    let spec = DialogueSpec {
        mode: DialogueMode::Debate,
        topic: Some("first motion".into()),
        extra_topics: vec!["second motion".into()],
        agents: vec![
            AgentSeat::new(AgentRole::ProDebater, ProviderTag::Ollama, "llama3"),
            AgentSeat::new(AgentRole::ConDebater, ProviderTag::Ollama, "qwen3"),
            AgentSeat::new(AgentRole::Judge, ProviderTag::Ollama, "llama3"),
        ],
        rounds: 1,
        time_limit: None,
        temperature: 0.7,
    };

    let mut task = runtime
        .spawn_dialogue(
            spec,
            clients("debate point", Duration::ZERO),
            None,
            Some(history.clone()),
            None,
        )
        .unwrap();
    while task.events.recv().await.is_some() {}
    task.handle.await_result().await.unwrap();

    assert_eq!(history.page(0, 1)[0].kind, HistoryKind::Batch);
}
