use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The closed 15-type taxonomy, grouped into five categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryType {
    // episodic
    Episode,
    Event,
    Interaction,
    // semantic
    Fact,
    Knowledge,
    Procedure,
    // personal
    Preference,
    Profile,
    Relationship,
    // strategic
    Principle,
    Lesson,
    Goal,
    // contextual
    Context,
    Project,
    Mood,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Episodic,
    Semantic,
    Personal,
    Strategic,
    Contextual,
}

impl MemoryType {
    pub const ALL: &[MemoryType] = &[
        MemoryType::Episode,
        MemoryType::Event,
        MemoryType::Interaction,
        MemoryType::Fact,
        MemoryType::Knowledge,
        MemoryType::Procedure,
        MemoryType::Preference,
        MemoryType::Profile,
        MemoryType::Relationship,
        MemoryType::Principle,
        MemoryType::Lesson,
        MemoryType::Goal,
        MemoryType::Context,
        MemoryType::Project,
        MemoryType::Mood,
    ];

    pub fn category(self) -> MemoryCategory {
        match self {
            MemoryType::Episode | MemoryType::Event | MemoryType::Interaction => {
                MemoryCategory::Episodic
            }
            MemoryType::Fact | MemoryType::Knowledge | MemoryType::Procedure => {
                MemoryCategory::Semantic
            }
            MemoryType::Preference | MemoryType::Profile | MemoryType::Relationship => {
                MemoryCategory::Personal
            }
            MemoryType::Principle | MemoryType::Lesson | MemoryType::Goal => {
                MemoryCategory::Strategic
            }
            MemoryType::Context | MemoryType::Project | MemoryType::Mood => {
                MemoryCategory::Contextual
            }
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MemoryType::Episode => "episode",
            MemoryType::Event => "event",
            MemoryType::Interaction => "interaction",
            MemoryType::Fact => "fact",
            MemoryType::Knowledge => "knowledge",
            MemoryType::Procedure => "procedure",
            MemoryType::Preference => "preference",
            MemoryType::Profile => "profile",
            MemoryType::Relationship => "relationship",
            MemoryType::Principle => "principle",
            MemoryType::Lesson => "lesson",
            MemoryType::Goal => "goal",
            MemoryType::Context => "context",
            MemoryType::Project => "project",
            MemoryType::Mood => "mood",
        }
    }

    /// Parse a taxonomy name. Only members of the closed set are accepted.
    pub fn parse(s: &str) -> Option<MemoryType> {
        MemoryType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s.trim().to_lowercase())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryScope {
    #[default]
    Personal,
    Team,
    Global,
}

impl MemoryScope {
    pub fn as_str(self) -> &'static str {
        match self {
            MemoryScope::Personal => "personal",
            MemoryScope::Team => "team",
            MemoryScope::Global => "global",
        }
    }

    pub fn parse(s: &str) -> Option<MemoryScope> {
        match s.trim().to_lowercase().as_str() {
            "personal" => Some(MemoryScope::Personal),
            "team" => Some(MemoryScope::Team),
            "global" => Some(MemoryScope::Global),
            _ => None,
        }
    }
}

/// Edge types in the relation graph. `Parent` points child → parent; the
/// child list of a cell is reconstructed from incoming parent edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationType {
    Parent,
    Related,
    Contradicts,
    Supports,
    Supersedes,
}

impl RelationType {
    pub fn as_str(self) -> &'static str {
        match self {
            RelationType::Parent => "parent",
            RelationType::Related => "related",
            RelationType::Contradicts => "contradicts",
            RelationType::Supports => "supports",
            RelationType::Supersedes => "supersedes",
        }
    }

    pub fn parse(s: &str) -> Option<RelationType> {
        match s.trim().to_lowercase().as_str() {
            "parent" => Some(RelationType::Parent),
            "related" => Some(RelationType::Related),
            "contradicts" => Some(RelationType::Contradicts),
            "supports" => Some(RelationType::Supports),
            "supersedes" => Some(RelationType::Supersedes),
            _ => None,
        }
    }
}

/// One edge in the relation graph. `(from, to, relation_type)` is a set key:
/// at most one edge of a given type between two cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub from: Uuid,
    pub to: Uuid,
    pub relation_type: RelationType,
    pub strength: f32,
    pub created_at: DateTime<Utc>,
}

/// The atomic memory unit.
///
/// Five layers: identity, content, classification, relational, context.
/// The id is stable across updates; `version` increments on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemCell {
    // ── identity ──
    pub id: Uuid,
    pub source_id: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_access_at: Option<DateTime<Utc>>,
    pub access_count: u64,

    // ── content ──
    pub content: String,
    pub summary: Option<String>,
    pub embedding: Option<Vec<f32>>,
    pub entities: Vec<String>,
    pub key_phrases: Vec<String>,
    /// Valence in [-1, 1].
    pub sentiment: f32,

    // ── classification ──
    pub memory_type: MemoryType,
    pub confidence: f32,
    pub importance: f32,
    pub topics: Vec<String>,
    pub scope: MemoryScope,

    // ── relational ──
    /// Every edge touching this cell, reconstructed on load.
    pub relations: Vec<Relation>,
    pub episode_id: Option<Uuid>,

    // ── context ──
    pub event_boundary: bool,
    pub preceding_context: String,
    pub following_context: String,
    pub conversation_id: String,
    pub turn_number: u32,
    pub user_state: Option<String>,
}

impl MemCell {
    pub fn new(content: impl Into<String>, memory_type: MemoryType) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            source_id: String::new(),
            version: 1,
            created_at: now,
            updated_at: now,
            last_access_at: None,
            access_count: 0,
            content: content.into(),
            summary: None,
            embedding: None,
            entities: Vec::new(),
            key_phrases: Vec::new(),
            sentiment: 0.0,
            memory_type,
            confidence: 0.5,
            importance: 0.5,
            topics: Vec::new(),
            scope: MemoryScope::Personal,
            relations: Vec::new(),
            episode_id: None,
            event_boundary: false,
            preceding_context: String::new(),
            following_context: String::new(),
            conversation_id: String::new(),
            turn_number: 0,
            user_state: None,
        }
    }

    // Per-direction views over the edge list.

    pub fn parent(&self) -> Option<Uuid> {
        self.relations
            .iter()
            .find(|r| r.relation_type == RelationType::Parent && r.from == self.id)
            .map(|r| r.to)
    }

    pub fn children(&self) -> Vec<Uuid> {
        self.relations
            .iter()
            .filter(|r| r.relation_type == RelationType::Parent && r.to == self.id)
            .map(|r| r.from)
            .collect()
    }

    pub fn linked(&self, relation_type: RelationType) -> Vec<Uuid> {
        self.relations
            .iter()
            .filter(|r| r.relation_type == relation_type && r.from == self.id)
            .map(|r| r.to)
            .collect()
    }
}
