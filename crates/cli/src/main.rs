//! Parley CLI — thin host over the dialogue core.
//!
//! Configures providers from the YAML config (encrypted keys via
//! `PARLEY_PASSWORD`) with environment fallbacks, runs dialogues on the task
//! runtime, streams events to stdout, and records transcripts in history.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;

use pl_credentials::SecretStore;
use pl_domain::config::ConfigStore;
use pl_domain::dialogue::{
    AgentRole, AgentSeat, DialogueEvent, DialogueMode, DialogueSpec,
};
use pl_domain::provider::ProviderTag;
use pl_history::HistoryStore;
use pl_providers::{ChatClient, ClientFactory, ClientOptions};
use pl_runtime::TaskRuntime;

#[derive(Parser)]
#[command(name = "parley", about = "Multi-agent LLM dialogue orchestrator")]
struct Cli {
    /// Config file (default: PARLEY_CONFIG, the per-user data dir when
    /// installed, or ./config.yaml from a checkout).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the models a provider offers.
    Models {
        /// Provider tag: ollama, ollama_cloud, openai, deepseek.
        provider: String,
        /// Bypass the 30-minute cache.
        #[arg(long)]
        refresh: bool,
    },

    /// Interactive single-agent chat. Reads user turns from stdin.
    Chat {
        #[arg(long, default_value = "ollama")]
        api: String,
        #[arg(long, default_value = "llama3")]
        model: String,
        #[arg(long, default_value_t = 0.8)]
        temperature: f32,
        /// Maximum user turns.
        #[arg(long, default_value_t = 50)]
        rounds: u32,
    },

    /// Two scholars discuss a topic; an expert closes with a synthesis.
    Discussion {
        topic: String,
        #[command(flatten)]
        seats: SeatArgs,
        #[arg(long, default_value_t = 3)]
        rounds: u32,
        /// Wall-clock limit in seconds.
        #[arg(long)]
        time_limit: Option<u64>,
        #[arg(long, default_value_t = 0.8)]
        temperature: f32,
    },

    /// Pro/con debate with a judge verdict, over one or more motions.
    Debate {
        /// Motions, debated serially.
        #[arg(required = true)]
        topics: Vec<String>,
        #[command(flatten)]
        seats: SeatArgs,
        #[arg(long, default_value_t = 3)]
        rounds: u32,
        #[arg(long)]
        time_limit: Option<u64>,
        #[arg(long, default_value_t = 0.8)]
        temperature: f32,
    },

    /// Encrypt an API key into the config (needs PARLEY_PASSWORD).
    SetKey {
        /// Provider tag the key belongs to.
        provider: String,
        /// The key; prompted on stdin when omitted.
        #[arg(long)]
        key: Option<String>,
    },

    /// Show, page, or clear recorded conversations.
    History {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        clear: bool,
    },
}

#[derive(clap::Args)]
struct SeatArgs {
    #[arg(long, default_value = "ollama")]
    api1: String,
    #[arg(long, default_value = "llama3")]
    model1: String,
    #[arg(long, default_value = "ollama")]
    api2: String,
    #[arg(long, default_value = "llama3")]
    model2: String,
    /// Third seat (summariser/judge); defaults to seat 1's backend.
    #[arg(long)]
    api3: Option<String>,
    #[arg(long)]
    model3: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ConfigStore::open(path)?,
        None => ConfigStore::open_default()?,
    };

    match cli.command {
        Command::Models { provider, refresh } => cmd_models(&config, &provider, refresh).await,
        Command::Chat {
            api,
            model,
            temperature,
            rounds,
        } => cmd_chat(&config, &api, &model, temperature, rounds).await,
        Command::Discussion {
            topic,
            seats,
            rounds,
            time_limit,
            temperature,
        } => {
            let spec = DialogueSpec {
                mode: DialogueMode::Discussion,
                topic: Some(topic),
                extra_topics: vec![],
                agents: seats.resolve(DialogueMode::Discussion)?,
                rounds,
                time_limit: time_limit.map(Duration::from_secs),
                temperature,
            };
            cmd_dialogue(&config, spec).await
        }
        Command::Debate {
            mut topics,
            seats,
            rounds,
            time_limit,
            temperature,
        } => {
            let first = topics.remove(0);
            let spec = DialogueSpec {
                mode: DialogueMode::Debate,
                topic: Some(first),
                extra_topics: topics,
                agents: seats.resolve(DialogueMode::Debate)?,
                rounds,
                time_limit: time_limit.map(Duration::from_secs),
                temperature,
            };
            cmd_dialogue(&config, spec).await
        }
        Command::SetKey { provider, key } => cmd_set_key(&config, &provider, key).await,
        Command::History {
            offset,
            limit,
            clear,
        } => cmd_history(offset, limit, clear),
    }
}

impl SeatArgs {
    fn resolve(&self, mode: DialogueMode) -> anyhow::Result<Vec<AgentSeat>> {
        let (role1, role2, role3) = match mode {
            DialogueMode::Discussion => (
                AgentRole::ScholarA,
                AgentRole::ScholarB,
                AgentRole::ExpertSummariser,
            ),
            DialogueMode::Debate => {
                (AgentRole::ProDebater, AgentRole::ConDebater, AgentRole::Judge)
            }
            DialogueMode::Chat => anyhow::bail!("chat uses --api/--model"),
        };
        let api3 = self.api3.as_deref().unwrap_or(&self.api1);
        let model3 = self.model3.as_deref().unwrap_or(&self.model1);
        Ok(vec![
            AgentSeat::new(role1, self.api1.parse::<ProviderTag>()?, &self.model1),
            AgentSeat::new(role2, self.api2.parse::<ProviderTag>()?, &self.model2),
            AgentSeat::new(role3, api3.parse::<ProviderTag>()?, model3),
        ])
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Client wiring
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decrypt a stored key when a password is available; a wrong password
/// counts as "no key configured" and falls through to the environment.
fn stored_key(config: &ConfigStore, path: &str, env_var: &str) -> Option<String> {
    let sealed = config.get_str(path, "");
    if !sealed.is_empty() {
        if let Ok(password) = std::env::var("PARLEY_PASSWORD") {
            match SecretStore::init(&password).and_then(|s| s.decrypt(&sealed)) {
                Ok(key) if !key.is_empty() => return Some(key),
                Ok(_) => {}
                Err(e) => tracing::warn!(path, error = %e, "stored key unusable"),
            }
        }
    }
    std::env::var(env_var).ok().filter(|k| !k.is_empty())
}

fn client_options(config: &ConfigStore, tag: ProviderTag) -> ClientOptions {
    match tag {
        ProviderTag::Ollama => ClientOptions::Ollama {
            base_url: config
                .get_str_or_env("api.ollama_base_url", "OLLAMA_BASE_URL")
                .unwrap_or_else(|| "http://localhost:11434".to_owned()),
        },
        ProviderTag::OllamaCloud => ClientOptions::OllamaCloud {
            api_key: stored_key(config, "api.ollama_cloud_key", "OLLAMA_API_KEY"),
            base_url: config
                .get_str_or_env("api.ollama_cloud_base_url", "OLLAMA_CLOUD_BASE_URL"),
        },
        ProviderTag::OpenAi => ClientOptions::OpenAi {
            api_key: stored_key(config, "api.openai_key", "OPENAI_API_KEY"),
            base_url: None,
        },
        ProviderTag::DeepSeek => ClientOptions::DeepSeek {
            api_key: stored_key(config, "api.deepseek_key", "DEEPSEEK_API_KEY"),
            base_url: None,
        },
    }
}

fn build_clients(
    config: &ConfigStore,
    factory: &ClientFactory,
    seats: &[AgentSeat],
) -> anyhow::Result<Vec<Arc<dyn ChatClient>>> {
    seats
        .iter()
        .map(|seat| {
            factory
                .create(client_options(config, seat.provider))
                .with_context(|| format!("constructing {} client", seat.provider))
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Commands
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn cmd_models(config: &ConfigStore, provider: &str, refresh: bool) -> anyhow::Result<()> {
    let tag: ProviderTag = provider.parse()?;
    let factory = ClientFactory::new();
    let client = factory.create(client_options(config, tag))?;

    let models = if refresh {
        client.refresh_models().await?
    } else {
        client.list_models().await?
    };
    for model in models {
        println!("{model}");
    }
    Ok(())
}

async fn cmd_chat(
    config: &ConfigStore,
    api: &str,
    model: &str,
    temperature: f32,
    rounds: u32,
) -> anyhow::Result<()> {
    let spec = DialogueSpec {
        mode: DialogueMode::Chat,
        topic: None,
        extra_topics: vec![],
        agents: vec![AgentSeat::new(
            AgentRole::ChatAssistant,
            api.parse::<ProviderTag>()?,
            model,
        )],
        rounds,
        time_limit: None,
        temperature,
    };

    let factory = ClientFactory::new();
    let clients = build_clients(config, &factory, &spec.agents)?;
    let runtime = TaskRuntime::new(4);
    let history = Arc::new(HistoryStore::load_default());

    let (input_tx, input_rx) = mpsc::channel(4);
    let mut task =
        runtime.spawn_dialogue(spec, clients, Some(config), Some(history), Some(input_rx))?;

    // Feed stdin lines as user turns; EOF closes the channel and ends the
    // chat cleanly.
    let stdin_pump = tokio::spawn(async move {
        let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
        eprint!("you> ");
        while let Ok(Some(line)) = lines.next_line().await {
            if input_tx.send(line).await.is_err() {
                break;
            }
        }
    });

    drain_events(&mut task, true).await;
    let outcome = task.handle.await_result().await;
    stdin_pump.abort();

    if let Some(outcome) = outcome {
        eprintln!("\n[{:?}] {} turns recorded", outcome.reason, outcome.utterances());
    }
    Ok(())
}

async fn cmd_dialogue(config: &ConfigStore, spec: DialogueSpec) -> anyhow::Result<()> {
    let factory = ClientFactory::new();
    let clients = build_clients(config, &factory, &spec.agents)?;
    let runtime = TaskRuntime::new(4);
    let history = Arc::new(HistoryStore::load_default());

    let mut task = runtime.spawn_dialogue(spec, clients, Some(config), Some(history), None)?;

    // Ctrl-C cancels cooperatively; the partial transcript still lands in
    // history.
    let cancel = task.handle.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupted, cancelling...");
            cancel.cancel();
        }
    });

    drain_events(&mut task, false).await;
    if let Some(outcome) = task.handle.await_result().await {
        eprintln!("\n[{:?}] {} turns recorded", outcome.reason, outcome.utterances());
    }
    Ok(())
}

/// Print the event stream. In chat mode a `you>` prompt reappears after
/// each assistant turn.
async fn drain_events(task: &mut pl_runtime::DialogueTask, chat_prompt: bool) {
    while let Some(event) = task.events.recv().await {
        match event {
            DialogueEvent::Status { message } => eprintln!("\n--- {message} ---"),
            DialogueEvent::Delta { text, .. } => {
                print!("{text}");
                let _ = std::io::stdout().flush();
            }
            DialogueEvent::TurnComplete { .. } => {
                println!();
                if chat_prompt {
                    eprint!("you> ");
                }
            }
            DialogueEvent::Error { kind, message } => {
                eprintln!("\nerror ({kind}): {message}");
            }
            DialogueEvent::Finished { .. } => break,
        }
    }
}

async fn cmd_set_key(
    config: &ConfigStore,
    provider: &str,
    key: Option<String>,
) -> anyhow::Result<()> {
    let tag: ProviderTag = provider.parse()?;
    let path = match tag {
        ProviderTag::Ollama => anyhow::bail!("the local ollama backend takes no API key"),
        ProviderTag::OllamaCloud => "api.ollama_cloud_key",
        ProviderTag::OpenAi => "api.openai_key",
        ProviderTag::DeepSeek => "api.deepseek_key",
    };

    let password = std::env::var("PARLEY_PASSWORD")
        .context("PARLEY_PASSWORD must be set to encrypt keys")?;
    let key = match key {
        Some(k) => k,
        None => {
            eprint!("API key for {tag}: ");
            let mut line = String::new();
            std::io::stdin().read_line(&mut line)?;
            line.trim().to_owned()
        }
    };

    let store = SecretStore::init(&password)?;
    config.set(path, store.encrypt(&key)?);
    config.save()?;
    eprintln!("stored encrypted key at {path} in {}", config.path().display());
    Ok(())
}

fn cmd_history(offset: usize, limit: usize, clear: bool) -> anyhow::Result<()> {
    let history = HistoryStore::load_default();
    if clear {
        history.clear()?;
        eprintln!("history cleared");
        return Ok(());
    }
    for (i, record) in history.page(offset, limit).into_iter().enumerate() {
        println!(
            "{:>4}  {}  {} vs {}  rounds={}  {} .. {}",
            offset + i,
            record.topic,
            record.model1,
            record.model2.as_deref().unwrap_or("-"),
            record.rounds,
            record.start_time,
            record.end_time,
        );
    }
    eprintln!("{} record(s) total", history.len());
    Ok(())
}
