//! Intent Router (C7): pure classification of a chat message into a route,
//! keyed off static keyword/marker tables rather than inline literals (§4.7,
//! §9).

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    ExplicitCommand,
    HighComplexity,
    MediumComplexity,
    SimpleTask,
    Qa,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Route {
    ExecuteStream,
    FullOrchestration,
    SupervisorSingleSpecialist,
    ConversationalWithTools,
    ConversationalWithoutTools,
}

pub fn route_for(intent: Intent) -> Route {
    match intent {
        Intent::ExplicitCommand => Route::ExecuteStream,
        Intent::HighComplexity => Route::FullOrchestration,
        Intent::MediumComplexity => Route::SupervisorSingleSpecialist,
        Intent::SimpleTask => Route::ConversationalWithTools,
        Intent::Qa => Route::ConversationalWithoutTools,
    }
}

const EXPLICIT_COMMAND_PREFIX: &str = "/execute";

/// Multi-step markers: two or more anywhere in the message ⟹ `high_complexity`.
/// `"and then"` and bare `"then"` are not both listed: every `"and then"`
/// occurrence also contains `"then"`, so keeping both would count one
/// marker in the message as two.
static MULTI_STEP_MARKERS: &[&str] = &["and then", "after"];

static EXECUTION_KEYWORDS: &[&str] = &[
    "implement", "create", "build", "add", "write", "develop", "fix", "refactor", "modify",
    "change", "edit", "delete", "deploy", "setup", "configure", "migrate", "update", "remove",
    "improve", "optimize", "enhance",
];

static SEARCH_PATTERNS: &[&str] = &[
    "what files", "where is", "where are", "show me", "list ", "find ", "search for",
];

fn count_multi_step_markers(lowered: &str) -> usize {
    // "and…and" and ",…," both model a comma/and-separated list: at least
    // two occurrences of the separator, not merely one.
    let and_count = lowered.matches(" and ").count();
    let comma_count = lowered.matches(',').count();
    let mut count = 0;
    if and_count >= 2 {
        count += 1;
    }
    if comma_count >= 2 {
        count += 1;
    }
    for marker in MULTI_STEP_MARKERS {
        if lowered.contains(marker) {
            count += 1;
        }
    }
    count
}

fn starts_with_execution_keyword(lowered: &str) -> bool {
    EXECUTION_KEYWORDS
        .iter()
        .any(|kw| lowered.starts_with(kw) || lowered.starts_with(&format!("please {kw}")))
}

fn matches_search_pattern(lowered: &str) -> bool {
    SEARCH_PATTERNS.iter().any(|p| lowered.contains(p))
}

/// Classifies a message (context is accepted for forward-compatibility with
/// richer classifiers; the built-in rule set is a pure function of the
/// message text per §4.7). Ties break toward the lower-complexity intent.
pub fn classify(message: &str, _context: &serde_json::Value) -> Intent {
    let trimmed = message.trim();
    let lowered = trimmed.to_lowercase();

    if lowered.starts_with(EXPLICIT_COMMAND_PREFIX) {
        return Intent::ExplicitCommand;
    }

    let marker_count = count_multi_step_markers(&lowered);
    let has_execution_keyword = starts_with_execution_keyword(&lowered);

    if marker_count >= 2 || (has_execution_keyword && marker_count >= 1) {
        return Intent::HighComplexity;
    }
    if has_execution_keyword {
        return Intent::MediumComplexity;
    }
    if matches_search_pattern(&lowered) {
        return Intent::SimpleTask;
    }
    Intent::Qa
}
