//! Built-in answer modes.
//!
//! A mode picks the system prompt, the default number of results, an
//! optional retrieval prefix, and whether the quality gate applies. The
//! prefix only biases embedding search; the reranker and the generation
//! model always see the literal user question.

use serde::Serialize;

/// Mode used when a request names none.
pub const DEFAULT_MODE: &str = "chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModeConfig {
    pub id: &'static str,
    pub label: &'static str,
    #[serde(skip)]
    pub system_prompt: &'static str,
    pub default_top_k: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_prefix: Option<&'static str>,
    pub gated: bool,
}

const CITATION_RULES: &str = "Cite the excerpts you rely on as path:start-end. \
If the excerpts do not contain the answer, say so instead of guessing.";

const CHAT_PROMPT: &str = "You are an assistant for a legacy COBOL codebase. \
Answer the developer's question using the numbered source excerpts provided as context.";

const EXPLAIN_PROMPT: &str = "You explain legacy COBOL code to developers who did not write it. \
Walk through what the relevant programs and paragraphs do, in execution order, using the numbered source excerpts provided as context.";

const DEPENDENCIES_PROMPT: &str = "You map dependencies in a legacy COBOL codebase. \
From the numbered source excerpts, list the programs invoked with CALL, the copybooks pulled in with COPY, and the paragraphs reached with PERFORM, and describe the interfaces between them.";

const BUSINESS_RULES_PROMPT: &str = "You extract business rules from legacy COBOL code. \
From the numbered source excerpts, state each rule in plain language with the condition that triggers it, and point to the IF, EVALUATE, or COMPUTE logic that implements it.";

const DATA_FLOW_PROMPT: &str = "You trace data flow through legacy COBOL code. \
From the numbered source excerpts, follow how the fields in question are read, moved, computed, and written, naming the data items and records involved.";

/// Immutable table of modes keyed by id.
#[derive(Debug, Clone)]
pub struct ModeTable {
    modes: Vec<ModeConfig>,
}

impl ModeTable {
    pub fn builtin() -> Self {
        let modes = vec![
            ModeConfig {
                id: "chat",
                label: "General question",
                system_prompt: CHAT_PROMPT,
                default_top_k: 8,
                query_prefix: None,
                gated: false,
            },
            ModeConfig {
                id: "explain",
                label: "Explain code",
                system_prompt: EXPLAIN_PROMPT,
                default_top_k: 6,
                query_prefix: None,
                gated: true,
            },
            ModeConfig {
                id: "dependencies",
                label: "Dependencies",
                system_prompt: DEPENDENCIES_PROMPT,
                default_top_k: 10,
                query_prefix: Some("CALL COPY PERFORM program dependencies interfaces"),
                gated: true,
            },
            ModeConfig {
                id: "business-rules",
                label: "Business rules",
                system_prompt: BUSINESS_RULES_PROMPT,
                default_top_k: 8,
                query_prefix: Some("IF EVALUATE WHEN COMPUTE validation business rule"),
                gated: true,
            },
            ModeConfig {
                id: "data-flow",
                label: "Data flow",
                system_prompt: DATA_FLOW_PROMPT,
                default_top_k: 8,
                query_prefix: Some("MOVE COMPUTE READ WRITE REWRITE data item field"),
                gated: true,
            },
        ];
        Self { modes }
    }

    pub fn get(&self, id: &str) -> Option<&ModeConfig> {
        self.modes.iter().find(|m| m.id == id)
    }

    pub fn all(&self) -> &[ModeConfig] {
        &self.modes
    }

    pub fn ids(&self) -> Vec<&'static str> {
        self.modes.iter().map(|m| m.id).collect()
    }
}

impl Default for ModeTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModeConfig {
    /// Full system prompt sent to the generation model.
    pub fn full_system_prompt(&self) -> String {
        format!("{} {}", self.system_prompt, CITATION_RULES)
    }
}

/// Text used for embedding search: `"{prefix}: {query}"` when the mode has
/// a prefix, otherwise the query itself.
pub fn augment_query(mode: &ModeConfig, query: &str) -> String {
    match mode.query_prefix {
        Some(prefix) => format!("{}: {}", prefix, query),
        None => query.to_string(),
    }
}
