//! Natural-language tables for the router: fast-path patterns with weights,
//! the explicit-mention map, and the slow-path synonym table.

use crate::TaskType;

/// Per-type weighted pattern lists for the fast path. A classification sums
/// the weights of every matching pattern per type.
pub const FAST_PATTERNS: &[(TaskType, &[(&str, f32)])] = &[
    (
        TaskType::CodeGeneration,
        &[
            (r"(?i)\bwrite (a |an |some )?(function|method|class|struct|script|program|code)\b", 1.0),
            (r"(?i)\b(implement|create|generate|build)\b.{0,40}\b(function|endpoint|api|parser|module|feature)\b", 0.9),
            (r"(?i)\badd (a |an )?(test|unit test|endpoint|handler)\b", 0.7),
            (r"(?i)\bcode (for|that|to)\b", 0.6),
        ],
    ),
    (
        TaskType::Debug,
        &[
            (r"(?i)\b(fix|debug|troubleshoot)\b", 1.0),
            (r"(?i)\b(error|exception|stack ?trace|panic|segfault|crash)\b", 0.9),
            (r"(?i)\b(doesn'?t|does not|won'?t|isn'?t) work(ing)?\b", 0.8),
            (r"(?i)\bwhy (is|does|am|are).{0,40}\b(fail|break|broken|wrong)", 0.7),
        ],
    ),
    (
        TaskType::Review,
        &[
            (r"(?i)\breview\b", 1.0),
            (r"(?i)\b(look over|check) (my|this|the) (code|pr|pull request|diff|patch)\b", 0.9),
            (r"(?i)\bfeedback on\b", 0.6),
        ],
    ),
    (
        TaskType::Planning,
        &[
            (r"(?i)\b(plan|roadmap|milestone)\b", 0.9),
            (r"(?i)\b(break down|prioritize|organi[sz]e)\b.{0,30}\b(task|work|project)s?\b", 0.8),
            (r"(?i)\bwhat should (i|we) do (first|next)\b", 0.7),
        ],
    ),
    (
        TaskType::Infrastructure,
        &[
            (r"(?i)\b(deploy|deployment|kubernetes|k8s|docker|terraform|ansible)\b", 1.0),
            (r"(?i)\b(provision|scale|cluster|load balancer|ci/cd|pipeline)\b", 0.8),
            (r"(?i)\b(server|instance|container)s?\b", 0.5),
        ],
    ),
    (
        TaskType::Explain,
        &[
            (r"(?i)\b(explain|what is|what are|what does|how does)\b", 0.9),
            (r"(?i)\b(difference between|compare)\b", 0.7),
            (r"(?i)\bwalk me through\b", 0.8),
        ],
    ),
    (
        TaskType::Refactor,
        &[
            (r"(?i)\brefactor\b", 1.0),
            (r"(?i)\b(clean ?up|simplify|restructure|extract)\b.{0,30}\b(code|function|module|class)\b", 0.8),
            (r"(?i)\b(rename|deduplicate|dedupe)\b", 0.6),
        ],
    ),
];

/// Explicit `@name` mentions, resolved before any classification.
pub const MENTIONS: &[(&str, TaskType)] = &[
    ("code", TaskType::CodeGeneration),
    ("coder", TaskType::CodeGeneration),
    ("debug", TaskType::Debug),
    ("debugger", TaskType::Debug),
    ("review", TaskType::Review),
    ("reviewer", TaskType::Review),
    ("plan", TaskType::Planning),
    ("planner", TaskType::Planning),
    ("infra", TaskType::Infrastructure),
    ("ops", TaskType::Infrastructure),
    ("explain", TaskType::Explain),
    ("refactor", TaskType::Refactor),
    ("general", TaskType::General),
];

/// Synonyms for mapping a slow-path LLM label onto the closed set.
pub const SLOW_SYNONYMS: &[(&str, TaskType)] = &[
    ("general", TaskType::General),
    ("chat", TaskType::General),
    ("conversation", TaskType::General),
    ("code_generation", TaskType::CodeGeneration),
    ("code generation", TaskType::CodeGeneration),
    ("coding", TaskType::CodeGeneration),
    ("code", TaskType::CodeGeneration),
    ("implementation", TaskType::CodeGeneration),
    ("debug", TaskType::Debug),
    ("debugging", TaskType::Debug),
    ("bugfix", TaskType::Debug),
    ("bug", TaskType::Debug),
    ("review", TaskType::Review),
    ("code review", TaskType::Review),
    ("planning", TaskType::Planning),
    ("plan", TaskType::Planning),
    ("infrastructure", TaskType::Infrastructure),
    ("infra", TaskType::Infrastructure),
    ("devops", TaskType::Infrastructure),
    ("deployment", TaskType::Infrastructure),
    ("explain", TaskType::Explain),
    ("explanation", TaskType::Explain),
    ("question", TaskType::Explain),
    ("refactor", TaskType::Refactor),
    ("refactoring", TaskType::Refactor),
    ("cleanup", TaskType::Refactor),
];

/// Map a free-form label to the closed set via the synonym table.
pub fn resolve_synonym(label: &str) -> Option<TaskType> {
    let needle = label.trim().to_lowercase();
    SLOW_SYNONYMS
        .iter()
        .find(|(name, _)| *name == needle)
        .map(|(_, t)| *t)
}

#[cfg(test)]
mod tests {
    use regex::Regex;

    use super::*;

    #[test]
    fn all_fast_patterns_compile() {
        for (_, table) in FAST_PATTERNS {
            for (pattern, weight) in *table {
                assert!(Regex::new(pattern).is_ok(), "bad pattern: {pattern}");
                assert!(*weight > 0.0 && *weight <= 1.0);
            }
        }
    }

    #[test]
    fn synonyms_resolve_case_insensitively() {
        assert_eq!(resolve_synonym("Debugging"), Some(TaskType::Debug));
        assert_eq!(resolve_synonym(" devops "), Some(TaskType::Infrastructure));
        assert_eq!(resolve_synonym("poetry"), None);
    }

    #[test]
    fn mention_names_are_unique() {
        let mut names: Vec<&str> = MENTIONS.iter().map(|(n, _)| *n).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), MENTIONS.len());
    }
}
