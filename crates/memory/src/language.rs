//! Every natural-language constant used by the memory subsystem lives here:
//! classifier patterns, boundary phrases, emotion lexicons, entity patterns,
//! and exemplar sentences. Tuning or localising these never touches logic.

use crate::schema::{MemoryCategory, MemoryType};

// ── Classifier patterns ──────────────────────────────────────────────────────

/// Priority-ordered pattern table for the regex classifier tier.
/// Categories are evaluated strategic → personal → semantic → contextual →
/// episodic; the first matching pattern wins.
pub const CLASSIFIER_PATTERNS: &[(MemoryCategory, &[(&str, MemoryType)])] = &[
    (
        MemoryCategory::Strategic,
        &[
            (
                r"(?i)\b(always|never)\b.{0,40}\b(do|use|avoid|prefer|check|remember|measure|test|verify)\b",
                MemoryType::Principle,
            ),
            (r"(?i)\b(principle|rule of thumb|as a rule)\b", MemoryType::Principle),
            (
                r"(?i)\b(i|we) (learned|realized|learnt|figured out)\b",
                MemoryType::Lesson,
            ),
            (r"(?i)\blesson( learned)?\b", MemoryType::Lesson),
            (r"(?i)\bnext time,? (i|we)('ll| will| should)\b", MemoryType::Lesson),
            (
                r"(?i)\b(my|our|the) (goal|objective|aim|target)\b",
                MemoryType::Goal,
            ),
            (r"(?i)\b(want|plan|aim|intend) to\b", MemoryType::Goal),
        ],
    ),
    (
        MemoryCategory::Personal,
        &[
            (
                r"(?i)\bi ('d rather|prefer|like|love|enjoy|hate|dislike|can't stand)\b",
                MemoryType::Preference,
            ),
            (r"(?i)\bmy favou?rite\b", MemoryType::Preference),
            (
                r"(?i)\bmy name is\b|\bi('m| am) \d+ years old\b|\bi (work|live) (at|in|as)\b",
                MemoryType::Profile,
            ),
            (
                r"(?i)\bmy (wife|husband|partner|son|daughter|mother|father|mom|dad|sister|brother|friend|boss|colleague|manager)\b",
                MemoryType::Relationship,
            ),
        ],
    ),
    (
        MemoryCategory::Semantic,
        &[
            (
                r"(?i)\b(step \d|first,|then,|finally,|how to)\b",
                MemoryType::Procedure,
            ),
            (r"(?i)\brun (the )?command\b|\binstall(ed)? (it )?(with|via|using)\b", MemoryType::Procedure),
            (
                r"(?i)\b(according to|research shows|the docs say|documentation)\b",
                MemoryType::Knowledge,
            ),
            (r"(?i)\b(is|are) (a|an|the)\b.{0,60}\b(that|which|for)\b", MemoryType::Fact),
            (r"(?i)\b(defined as|stands for|means that)\b", MemoryType::Fact),
        ],
    ),
    (
        MemoryCategory::Contextual,
        &[
            (
                r"(?i)\b(the|this|our|my) (project|repo|repository|codebase)\b",
                MemoryType::Project,
            ),
            (
                r"(?i)\b(frustrated|annoyed|angry|stressed|excited|thrilled|happy|sad|worried|anxious)\b",
                MemoryType::Mood,
            ),
            (
                r"(?i)\b(currently|right now|at the moment|for now|this week)\b",
                MemoryType::Context,
            ),
        ],
    ),
    (
        MemoryCategory::Episodic,
        &[
            (
                r"(?i)\b(yesterday|this morning|last (night|week|month)|earlier today)\b",
                MemoryType::Event,
            ),
            (r"(?i)\b(happened|occurred|went to|met with)\b", MemoryType::Event),
            (r"(?i)\b(session|meeting|standup|call)\b", MemoryType::Episode),
        ],
    ),
];

// ── Boundary phrases ─────────────────────────────────────────────────────────

/// Topic-shift openers. A boundary fires when a turn starts with one of
/// these, or one appears right after sentence punctuation.
pub const TRANSITION_PHRASES: &[&str] = &[
    "anyway",
    "by the way",
    "btw",
    "so",
    "moving on",
    "on another note",
    "changing topics",
    "next topic",
    "unrelated",
    "one more thing",
];

/// Phrases that close out a task when they end the previous turn.
pub const COMPLETION_SIGNALS: &[&str] = &[
    "thanks",
    "thank you",
    "that works",
    "that worked",
    "perfect",
    "got it",
    "sounds good",
    "great, thanks",
    "solved",
    "all set",
    "done",
];

// ── Emotion lexicons (used by the sleep consolidation phase) ─────────────────

pub const FRUSTRATION_KEYWORDS: &[&str] = &[
    "frustrated",
    "annoying",
    "annoyed",
    "ugh",
    "broken again",
    "still not working",
    "why won't",
    "this is ridiculous",
    "wasted",
];

pub const SATISFACTION_KEYWORDS: &[&str] = &[
    "perfect",
    "awesome",
    "great job",
    "exactly what i wanted",
    "works now",
    "that worked",
    "brilliant",
    "nice",
];

pub const CONFUSION_KEYWORDS: &[&str] = &[
    "confused",
    "i don't understand",
    "what do you mean",
    "makes no sense",
    "unclear",
    "lost me",
];

// ── Sentiment lexicon ────────────────────────────────────────────────────────

pub const POSITIVE_WORDS: &[&str] = &[
    "good", "great", "love", "like", "excellent", "perfect", "happy", "works",
    "thanks", "awesome", "nice", "helpful",
];

pub const NEGATIVE_WORDS: &[&str] = &[
    "bad", "hate", "broken", "terrible", "awful", "fail", "failed", "wrong",
    "frustrated", "annoying", "worse", "useless",
];

// ── Entity patterns ──────────────────────────────────────────────────────────

/// Pattern library for entity extraction: camel-case identifiers, snake-case
/// identifiers, path tokens, HTTP URLs, double-quoted short phrases.
pub const ENTITY_PATTERNS: &[&str] = &[
    r"\b[a-z]+(?:[A-Z][a-z0-9]+)+\b",        // camelCase
    r"\b[a-z][a-z0-9]*(?:_[a-z0-9]+)+\b",    // snake_case
    r"(?:~|\.{1,2})?/[\w.\-]+(?:/[\w.\-]+)+", // absolute / relative paths
    r#"https?://[^\s"')>]+"#,                  // HTTP URLs
    r#""[^"\n]{2,40}""#,                      // short double-quoted phrases
];

// ── Classifier exemplars ─────────────────────────────────────────────────────

/// One seed sentence per type; their embeddings are cached and compared
/// against content embeddings in the classifier's second tier.
pub const TYPE_EXEMPLARS: &[(MemoryType, &str)] = &[
    (MemoryType::Episode, "We spent the session debugging the deploy pipeline together."),
    (MemoryType::Event, "Yesterday the staging cluster went down for two hours."),
    (MemoryType::Interaction, "User asked a question and received an answer."),
    (MemoryType::Fact, "The service listens on port 8080 behind the load balancer."),
    (MemoryType::Knowledge, "According to the documentation, retries use exponential backoff."),
    (MemoryType::Procedure, "First run the migration, then restart the workers, finally verify health."),
    (MemoryType::Preference, "I prefer short answers with code examples over long explanations."),
    (MemoryType::Profile, "My name is Alex and I work as a platform engineer in Berlin."),
    (MemoryType::Relationship, "My colleague Dana owns the billing service."),
    (MemoryType::Principle, "Always measure before optimizing anything."),
    (MemoryType::Lesson, "I learned that silent fallbacks hide real failures."),
    (MemoryType::Goal, "My goal is to ship the migration by the end of the quarter."),
    (MemoryType::Context, "Right now we are mid-incident and changes are frozen."),
    (MemoryType::Project, "This repo is the payments gateway codebase."),
    (MemoryType::Mood, "I'm pretty frustrated with the flaky test suite today."),
];

/// Prompt for the LLM classifier tier. The model must answer with a JSON
/// object `{"type": "...", "confidence": 0.0}` using the closed taxonomy.
pub fn classify_prompt(content: &str) -> String {
    let names: Vec<&str> = MemoryType::ALL.iter().map(|t| t.as_str()).collect();
    format!(
        "Classify the following text into exactly one memory type.\n\
         Valid types: {}.\n\
         Reply with only a JSON object: {{\"type\": \"<type>\", \"confidence\": <0..1>}}\n\n\
         Text:\n{}",
        names.join(", "),
        content
    )
}

// ── Session-context patterns ─────────────────────────────────────────────────

/// `(category, regex with one capture group)` pairs for the fast
/// session-context harvester.
pub const SESSION_CONTEXT_PATTERNS: &[(&str, &str)] = &[
    ("location", r"(?i)\bi (?:live|am|'m) in ([A-Z][\w\- ]{1,30})"),
    ("location", r"(?i)\bi'?m (?:based|located) in ([A-Z][\w\- ]{1,30})"),
    ("date", r"(?i)\b(?:on|by|before) ((?:mon|tues|wednes|thurs|fri|satur|sun)day)\b"),
    ("date", r"(?i)\b(tomorrow|tonight|next week|next month)\b"),
    (
        "kin",
        r"(?i)\bmy (wife|husband|partner|son|daughter|mother|father|sister|brother)\b",
    ),
    ("project", r"(?i)\bworking on (?:the )?([\w\-]{2,40}) (?:project|repo|app|service)"),
    ("preference", r"(?i)\bi prefer ([\w\- ]{2,40})"),
];
