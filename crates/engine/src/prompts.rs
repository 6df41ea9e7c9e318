//! System prompt assembly.
//!
//! Every agent speaks under `common_prompt ∥ role_prompt`, newline-joined,
//! with empty parts skipped. Prompts resolve from the config document first,
//! then the legacy environment variables, then the built-in defaults. A
//! literal `{topic}` in any prompt is replaced with the dialogue topic.

use pl_domain::config::ConfigStore;
use pl_domain::dialogue::{AgentRole, DialogueMode};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Built-in defaults
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub const DEFAULT_CHAT_PROMPT: &str =
    "You are a helpful assistant. Answer clearly and concisely.";

pub const DEFAULT_DISCUSSION_COMMON: &str = "You are taking part in a structured discussion \
on the topic \"{topic}\". Build on what has been said, stay on topic, and keep each \
contribution focused.";

pub const DEFAULT_SCHOLAR_A: &str = "You open each exchange. Introduce fresh angles and \
concrete examples rather than repeating earlier points.";

pub const DEFAULT_SCHOLAR_B: &str = "You respond to your counterpart. Probe weaknesses in \
their reasoning and extend the strongest threads of the discussion.";

pub const DEFAULT_EXPERT_SUMMARISER: &str = "You are an expert rapporteur. After the \
discussion on \"{topic}\" concludes, deliver a closing synthesis: the main positions, the \
points of agreement and disagreement, and what remains open.";

pub const DEFAULT_DEBATE_COMMON: &str = "You are taking part in a formal debate on the \
motion \"{topic}\". Argue your assigned side only, rebut your opponent directly, and \
support claims with evidence.";

pub const DEFAULT_PRO_DEBATER: &str = "You argue FOR the motion.";

pub const DEFAULT_CON_DEBATER: &str = "You argue AGAINST the motion.";

/// The judge's instructions embed the verdict output template verbatim so
/// the final turn is machine-recognisable.
pub const DEFAULT_JUDGE: &str = "You are a neutral debate judge for the motion \"{topic}\". \
Evaluate only the quality of argumentation, never your own view of the motion. Score each \
side out of 100: argumentation 30, structure and clarity 20, persuasiveness 30, facts and \
ethics 20. Then declare a winner. Respond strictly in this format:\n\
【Summary】\n\
<bullets per side, then 2-3 key clash points>\n\
【Scores】\n\
Pro : argumentation/30, structure/20, persuasiveness/30, facts&ethics/20 = X/100\n\
Con : argumentation/30, structure/20, persuasiveness/30, facts&ethics/20 = X/100\n\
【Verdict】\n\
Winner: pro|con\n\
Rationale: <grounded in the scores above>";

/// Closing instruction sent as the final user message to the summariser.
pub const SUMMARISER_CUE: &str =
    "The discussion above has concluded. Deliver your closing synthesis.";

/// Closing instruction sent as the final user message to the judge.
pub const JUDGE_CUE: &str =
    "The debate above has concluded. Deliver your verdict in the required format.";

/// Primer user message opening a discussion or debate ledger.
pub fn topic_primer(mode: DialogueMode, topic: &str) -> String {
    match mode {
        DialogueMode::Debate => format!("The motion is: {topic}. Begin."),
        _ => format!("The topic is: {topic}. Begin."),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Resolution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Config path, env fallback and default for each (mode, role) slot.
fn sources(mode: DialogueMode, role: AgentRole) -> (&'static str, &'static str, &'static str) {
    match (mode, role) {
        (DialogueMode::Chat, _) => ("chat.system_prompt", "", DEFAULT_CHAT_PROMPT),
        (DialogueMode::Discussion, AgentRole::ScholarA) => {
            ("discussion.ai1_prompt", "AI1_SYSTEM_PROMPT", DEFAULT_SCHOLAR_A)
        }
        (DialogueMode::Discussion, AgentRole::ScholarB) => {
            ("discussion.ai2_prompt", "AI2_SYSTEM_PROMPT", DEFAULT_SCHOLAR_B)
        }
        (DialogueMode::Discussion, _) => (
            "discussion.expert_ai3_prompt",
            "",
            DEFAULT_EXPERT_SUMMARISER,
        ),
        (DialogueMode::Debate, AgentRole::ProDebater) => {
            ("debate.ai1_prompt", "DEBATE_AI1_PROMPT", DEFAULT_PRO_DEBATER)
        }
        (DialogueMode::Debate, AgentRole::ConDebater) => {
            ("debate.ai2_prompt", "DEBATE_AI2_PROMPT", DEFAULT_CON_DEBATER)
        }
        (DialogueMode::Debate, _) => ("debate.judge_ai3_prompt", "", DEFAULT_JUDGE),
    }
}

fn common_sources(mode: DialogueMode) -> (&'static str, &'static str, &'static str) {
    match mode {
        DialogueMode::Chat => ("chat.system_prompt", "", DEFAULT_CHAT_PROMPT),
        DialogueMode::Discussion => (
            "discussion.system_prompt",
            "COMMON_SYSTEM_PROMPT",
            DEFAULT_DISCUSSION_COMMON,
        ),
        DialogueMode::Debate => (
            "debate.system_prompt",
            "DEBATE_COMMON_PROMPT",
            DEFAULT_DEBATE_COMMON,
        ),
    }
}

fn resolve_one(
    config: Option<&ConfigStore>,
    path: &str,
    env_var: &str,
    default: &str,
) -> String {
    if let Some(config) = config {
        if !env_var.is_empty() {
            if let Some(v) = config.get_str_or_env(path, env_var) {
                return v;
            }
        } else {
            let v = config.get_str(path, "");
            if !v.is_empty() {
                return v;
            }
        }
    } else if !env_var.is_empty() {
        if let Ok(v) = std::env::var(env_var) {
            if !v.is_empty() {
                return v;
            }
        }
    }
    default.to_owned()
}

/// The effective system prompt for one seat:
/// `common ∥ "\n" ∥ role`, `{topic}` substituted, empty parts skipped.
pub fn system_prompt(
    config: Option<&ConfigStore>,
    mode: DialogueMode,
    role: AgentRole,
    topic: Option<&str>,
) -> String {
    let (common_path, common_env, common_default) = common_sources(mode);
    let common = resolve_one(config, common_path, common_env, common_default);

    // In chat mode the common prompt IS the whole prompt.
    let assembled = if mode == DialogueMode::Chat {
        common
    } else {
        let (role_path, role_env, role_default) = sources(mode, role);
        let role_prompt = resolve_one(config, role_path, role_env, role_default);
        match (common.is_empty(), role_prompt.is_empty()) {
            (false, false) => format!("{common}\n{role_prompt}"),
            (false, true) => common,
            (true, false) => role_prompt,
            (true, true) => String::new(),
        }
    };

    match topic {
        Some(t) => assembled.replace("{topic}", t),
        None => assembled,
    }
}
