//! SQLite-backed cell store: CRUD, full-text search, and the relation graph.
//!
//! Tables: `memcells` (one column per cell field), `memcell_relations`
//! (edge table keyed by `(from_id, to_id, relation_type)`), `memcells_fts`
//! (FTS5 index over content/summary/entities/key_phrases, kept in sync by
//! the write ops), and `strategic_overlay` (tier bookkeeping).
//!
//! Every operation is a short transaction; the relation rewrites inside
//! `create`/`update` share the cell's transaction so a cell and its edges
//! land atomically.

use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;
use uuid::Uuid;

use crate::cosine_similarity;
use crate::schema::{MemCell, MemoryScope, MemoryType, Relation, RelationType};
use crate::strategic::{StrategicMemory, StrategicTier};

// ── Search API ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Semantic,
    Keyword,
    Hybrid,
    Related,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub memory_types: Vec<MemoryType>,
    pub scope: Option<MemoryScope>,
    pub episode_id: Option<Uuid>,
    pub conversation_id: Option<String>,
    pub min_importance: Option<f32>,
    pub min_confidence: Option<f32>,
    pub since: Option<DateTime<Utc>>,
    /// Top-k cap; 0 means the default of 10.
    pub limit: usize,
    /// Relation-graph expansion depth; 0 disables expansion.
    pub expand_depth: usize,
    /// When present, keyword scores are blended with cosine similarity.
    pub query_embedding: Option<Vec<f32>>,
}

impl SearchOptions {
    fn effective_limit(&self) -> usize {
        if self.limit == 0 { 10 } else { self.limit }
    }
}

#[derive(Debug, Clone)]
pub struct SearchResult {
    pub cell: MemCell,
    pub score: f32,
    pub match_type: MatchType,
    /// Relation edges accompanying the cell when expansion was requested.
    pub relations: Vec<Relation>,
}

// ── Store ────────────────────────────────────────────────────────────────────

pub struct MemoryStore {
    conn: Mutex<Connection>,
}

impl MemoryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path.as_ref())
            .with_context(|| format!("opening memory db {}", path.as_ref().display()))?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS memcells (
                id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL DEFAULT '',
                version INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                last_access_at TEXT,
                access_count INTEGER NOT NULL DEFAULT 0,
                content TEXT NOT NULL,
                summary TEXT,
                embedding TEXT,
                entities TEXT NOT NULL DEFAULT '[]',
                key_phrases TEXT NOT NULL DEFAULT '[]',
                sentiment REAL NOT NULL DEFAULT 0,
                memory_type TEXT NOT NULL,
                confidence REAL NOT NULL DEFAULT 0.5,
                importance REAL NOT NULL DEFAULT 0.5,
                topics TEXT NOT NULL DEFAULT '[]',
                scope TEXT NOT NULL DEFAULT 'personal',
                episode_id TEXT,
                event_boundary INTEGER NOT NULL DEFAULT 0,
                preceding_context TEXT NOT NULL DEFAULT '',
                following_context TEXT NOT NULL DEFAULT '',
                conversation_id TEXT NOT NULL DEFAULT '',
                turn_number INTEGER NOT NULL DEFAULT 0,
                user_state TEXT
            );
            CREATE TABLE IF NOT EXISTS memcell_relations (
                from_id TEXT NOT NULL,
                to_id TEXT NOT NULL,
                relation_type TEXT NOT NULL,
                strength REAL NOT NULL DEFAULT 1.0,
                created_at TEXT NOT NULL,
                PRIMARY KEY (from_id, to_id, relation_type)
            );
            CREATE INDEX IF NOT EXISTS idx_relations_to ON memcell_relations(to_id);
            CREATE INDEX IF NOT EXISTS idx_memcells_episode ON memcells(episode_id);
            CREATE INDEX IF NOT EXISTS idx_memcells_type ON memcells(memory_type);
            CREATE VIRTUAL TABLE IF NOT EXISTS memcells_fts
                USING fts5(id UNINDEXED, content, summary, entities, key_phrases);
            CREATE TABLE IF NOT EXISTS strategic_overlay (
                id TEXT PRIMARY KEY,
                tier TEXT NOT NULL DEFAULT 'tentative',
                apply_count INTEGER NOT NULL DEFAULT 0,
                success_rate REAL NOT NULL DEFAULT 0,
                source_sessions TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    // ── Create / Get / Update / Delete ────────────────────────────────────

    /// Persist a new cell. An all-zero id is replaced with a fresh one;
    /// version is forced to 1 and timestamps are stamped. The cell's
    /// outgoing relation tuples are materialised in the same transaction.
    pub fn create(&self, cell: &mut MemCell) -> Result<()> {
        if cell.id.is_nil() {
            cell.id = Uuid::new_v4();
        }
        cell.version = 1;
        let now = Utc::now();
        cell.created_at = now;
        cell.updated_at = now;

        let mut conn = self.conn.lock().expect("memory store lock");
        let tx = conn.transaction()?;
        insert_cell_row(&tx, cell)?;
        insert_fts_row(&tx, cell)?;
        rewrite_relations(&tx, cell)?;
        tx.commit()?;
        debug!(id = %cell.id, memory_type = cell.memory_type.as_str(), "cell created");
        Ok(())
    }

    /// Fetch a cell with its relation list (both directions) reconstructed.
    pub fn get(&self, id: Uuid) -> Result<Option<MemCell>> {
        let conn = self.conn.lock().expect("memory store lock");
        let cell = conn
            .query_row(
                "SELECT * FROM memcells WHERE id = ?1",
                params![id.to_string()],
                row_to_cell,
            )
            .optional()?;
        let Some(mut cell) = cell else {
            return Ok(None);
        };
        cell.relations = load_relations(&conn, id)?;
        Ok(Some(cell))
    }

    /// Rewrite a cell. Pre: the id exists. Version increments by exactly one,
    /// `updated_at` refreshes, and relation tuples are rewritten atomically.
    pub fn update(&self, cell: &mut MemCell) -> Result<()> {
        let mut conn = self.conn.lock().expect("memory store lock");
        let tx = conn.transaction()?;

        let current: Option<u32> = tx
            .query_row(
                "SELECT version FROM memcells WHERE id = ?1",
                params![cell.id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        let Some(current) = current else {
            bail!("cannot update unknown cell {}", cell.id);
        };

        cell.version = current + 1;
        cell.updated_at = Utc::now();

        tx.execute(
            "DELETE FROM memcells WHERE id = ?1",
            params![cell.id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM memcells_fts WHERE id = ?1",
            params![cell.id.to_string()],
        )?;
        insert_cell_row(&tx, cell)?;
        insert_fts_row(&tx, cell)?;
        tx.execute(
            "DELETE FROM memcell_relations WHERE from_id = ?1",
            params![cell.id.to_string()],
        )?;
        rewrite_relations(&tx, cell)?;
        tx.commit()?;
        debug!(id = %cell.id, version = cell.version, "cell updated");
        Ok(())
    }

    /// Remove a cell and cascade every relation involving it.
    pub fn delete(&self, id: Uuid) -> Result<bool> {
        let mut conn = self.conn.lock().expect("memory store lock");
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM memcells WHERE id = ?1", params![id.to_string()])?;
        tx.execute(
            "DELETE FROM memcells_fts WHERE id = ?1",
            params![id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM memcell_relations WHERE from_id = ?1 OR to_id = ?1",
            params![id.to_string()],
        )?;
        tx.execute(
            "DELETE FROM strategic_overlay WHERE id = ?1",
            params![id.to_string()],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    // ── Relations ─────────────────────────────────────────────────────────

    /// Upsert one edge keyed by `(from, to, type)`.
    pub fn add_relation(
        &self,
        from: Uuid,
        to: Uuid,
        relation_type: RelationType,
        strength: f32,
    ) -> Result<()> {
        let conn = self.conn.lock().expect("memory store lock");
        conn.execute(
            "INSERT INTO memcell_relations (from_id, to_id, relation_type, strength, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(from_id, to_id, relation_type)
             DO UPDATE SET strength = excluded.strength",
            params![
                from.to_string(),
                to.to_string(),
                relation_type.as_str(),
                strength.clamp(0.0, 1.0),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Breadth-first closure up to `depth` in the symmetric edge graph.
    /// The origin cell itself is not included.
    pub fn get_related(&self, id: Uuid, depth: usize) -> Result<Vec<MemCell>> {
        let mut visited: HashSet<Uuid> = HashSet::from([id]);
        let mut frontier: VecDeque<(Uuid, usize)> = VecDeque::from([(id, 0)]);
        let mut found = Vec::new();

        while let Some((node, level)) = frontier.pop_front() {
            if level >= depth {
                continue;
            }
            for neighbour in self.neighbours(node)? {
                if visited.insert(neighbour) {
                    if let Some(cell) = self.get(neighbour)? {
                        found.push(cell);
                    }
                    frontier.push_back((neighbour, level + 1));
                }
            }
        }
        Ok(found)
    }

    fn neighbours(&self, id: Uuid) -> Result<Vec<Uuid>> {
        let conn = self.conn.lock().expect("memory store lock");
        let mut stmt = conn.prepare(
            "SELECT to_id FROM memcell_relations WHERE from_id = ?1
             UNION
             SELECT from_id FROM memcell_relations WHERE to_id = ?1",
        )?;
        let ids = stmt
            .query_map(params![id.to_string()], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| Uuid::parse_str(&s).ok())
            .collect();
        Ok(ids)
    }

    // ── Queries ───────────────────────────────────────────────────────────

    /// Cells of an episode, ordered by turn number then creation time.
    pub fn get_by_episode(&self, episode_id: Uuid) -> Result<Vec<MemCell>> {
        let conn = self.conn.lock().expect("memory store lock");
        let mut stmt = conn.prepare(
            "SELECT * FROM memcells WHERE episode_id = ?1
             ORDER BY turn_number ASC, created_at ASC",
        )?;
        let cells = stmt
            .query_map(params![episode_id.to_string()], row_to_cell)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    /// Cells of one type, most important first.
    pub fn get_by_type(&self, memory_type: MemoryType, limit: usize) -> Result<Vec<MemCell>> {
        let conn = self.conn.lock().expect("memory store lock");
        let mut stmt = conn.prepare(
            "SELECT * FROM memcells WHERE memory_type = ?1
             ORDER BY importance DESC LIMIT ?2",
        )?;
        let cells = stmt
            .query_map(params![memory_type.as_str(), limit as i64], row_to_cell)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cells)
    }

    /// Bump access bookkeeping: `last_access_at := now`, `access_count += 1`.
    pub fn record_access(&self, id: Uuid) -> Result<()> {
        let conn = self.conn.lock().expect("memory store lock");
        let changed = conn.execute(
            "UPDATE memcells SET last_access_at = ?1, access_count = access_count + 1
             WHERE id = ?2",
            params![Utc::now().to_rfc3339(), id.to_string()],
        )?;
        if changed == 0 {
            bail!("cannot record access on unknown cell {id}");
        }
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().expect("memory store lock");
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM memcells", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    // ── Search ────────────────────────────────────────────────────────────

    /// Ranked recall. Keyword matches come from the FTS index; when a query
    /// embedding is supplied the score blends in cosine similarity. With
    /// `expand_depth > 0` related cells join the results at 0.8× the source
    /// cell's importance, deduplicated by id.
    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let mut results = if query.trim().is_empty() {
            self.filter_only(options)?
        } else {
            self.keyword_search(query, options)?
        };

        if let Some(query_vec) = &options.query_embedding {
            for result in &mut results {
                if let Some(cell_vec) = &result.cell.embedding {
                    let sim = cosine_similarity(query_vec, cell_vec);
                    result.score = result.score * 0.5 + sim * 0.5;
                    result.match_type = if result.match_type == MatchType::Keyword {
                        MatchType::Hybrid
                    } else {
                        MatchType::Semantic
                    };
                }
            }
        }

        if options.expand_depth > 0 {
            let mut seen: HashSet<Uuid> = results.iter().map(|r| r.cell.id).collect();
            let mut related_results = Vec::new();
            for result in &results {
                for related in self.get_related(result.cell.id, options.expand_depth)? {
                    if seen.insert(related.id) {
                        let relations = {
                            let conn = self.conn.lock().expect("memory store lock");
                            load_relations(&conn, related.id)?
                        };
                        related_results.push(SearchResult {
                            score: 0.8 * result.cell.importance,
                            match_type: MatchType::Related,
                            cell: MemCell {
                                relations: relations.clone(),
                                ..related
                            },
                            relations,
                        });
                    }
                }
            }
            results.extend(related_results);
        }

        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        results.truncate(options.effective_limit());
        Ok(results)
    }

    fn keyword_search(&self, query: &str, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let fts_query = build_fts_query(query);
        if fts_query.is_empty() {
            return self.filter_only(options);
        }
        let conn = self.conn.lock().expect("memory store lock");
        let mut stmt = conn.prepare(
            "SELECT m.*, bm25(memcells_fts) AS rank
             FROM memcells_fts f JOIN memcells m ON m.id = f.id
             WHERE memcells_fts MATCH ?1
             ORDER BY rank",
        )?;
        let rows = stmt
            .query_map(params![fts_query], |row| {
                let cell = row_to_cell(row)?;
                let rank: f64 = row.get("rank")?;
                Ok((cell, rank))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        let results = rows
            .into_iter()
            .filter(|(cell, _)| passes_filters(cell, options))
            .map(|(cell, rank)| {
                // bm25 ranks are negative-better in SQLite; fold into (0, 1).
                let relevance = (-rank).max(0.0) as f32;
                SearchResult {
                    cell,
                    score: (relevance / (1.0 + relevance)).max(0.05),
                    match_type: MatchType::Keyword,
                    relations: Vec::new(),
                }
            })
            .collect();
        Ok(results)
    }

    fn filter_only(&self, options: &SearchOptions) -> Result<Vec<SearchResult>> {
        let conn = self.conn.lock().expect("memory store lock");
        let mut stmt = conn.prepare("SELECT * FROM memcells ORDER BY importance DESC")?;
        let cells = stmt
            .query_map([], row_to_cell)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(cells
            .into_iter()
            .filter(|cell| passes_filters(cell, options))
            .map(|cell| SearchResult {
                score: cell.importance,
                match_type: MatchType::Keyword,
                cell,
                relations: Vec::new(),
            })
            .collect())
    }

    // ── Strategic overlay ─────────────────────────────────────────────────

    pub fn strategic_upsert(&self, memory: &StrategicMemory) -> Result<()> {
        let conn = self.conn.lock().expect("memory store lock");
        conn.execute(
            "INSERT INTO strategic_overlay
                (id, tier, apply_count, success_rate, source_sessions, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                tier = excluded.tier,
                apply_count = excluded.apply_count,
                success_rate = excluded.success_rate,
                source_sessions = excluded.source_sessions",
            params![
                memory.id.to_string(),
                memory.tier.as_str(),
                memory.apply_count as i64,
                memory.success_rate as f64,
                serde_json::to_string(&memory.source_sessions)?,
                memory.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Project every strategic-typed cell joined with its overlay row.
    /// Cells without overlay rows appear as tentative with zero counters.
    pub fn strategic_all(&self) -> Result<Vec<StrategicMemory>> {
        let conn = self.conn.lock().expect("memory store lock");
        let mut stmt = conn.prepare(
            "SELECT m.id, m.content, m.created_at,
                    o.tier, o.apply_count, o.success_rate, o.source_sessions
             FROM memcells m LEFT JOIN strategic_overlay o ON o.id = m.id
             WHERE m.memory_type IN ('principle', 'lesson', 'goal')",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let principle: String = row.get(1)?;
                let created_at: String = row.get(2)?;
                let tier: Option<String> = row.get(3)?;
                let apply_count: Option<i64> = row.get(4)?;
                let success_rate: Option<f64> = row.get(5)?;
                let sessions: Option<String> = row.get(6)?;
                Ok((id, principle, created_at, tier, apply_count, success_rate, sessions))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, principle, created_at, tier, apply_count, success_rate, sessions)| {
                Ok(StrategicMemory {
                    id: Uuid::parse_str(&id)?,
                    principle,
                    tier: tier
                        .as_deref()
                        .and_then(StrategicTier::parse)
                        .unwrap_or(StrategicTier::Tentative),
                    apply_count: apply_count.unwrap_or(0) as u64,
                    success_rate: success_rate.unwrap_or(0.0) as f32,
                    source_sessions: sessions
                        .as_deref()
                        .and_then(|s| serde_json::from_str(s).ok())
                        .unwrap_or_default(),
                    created_at: parse_ts(&created_at)?,
                })
            })
            .collect()
    }
}

// ── Row conversion ───────────────────────────────────────────────────────────

fn insert_cell_row(conn: &Connection, cell: &MemCell) -> Result<()> {
    conn.execute(
        "INSERT INTO memcells (
            id, source_id, version, created_at, updated_at, last_access_at,
            access_count, content, summary, embedding, entities, key_phrases,
            sentiment, memory_type, confidence, importance, topics, scope,
            episode_id, event_boundary, preceding_context, following_context,
            conversation_id, turn_number, user_state
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13,
                  ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)",
        params![
            cell.id.to_string(),
            cell.source_id,
            cell.version,
            cell.created_at.to_rfc3339(),
            cell.updated_at.to_rfc3339(),
            cell.last_access_at.map(|t| t.to_rfc3339()),
            cell.access_count as i64,
            cell.content,
            cell.summary,
            cell.embedding
                .as_ref()
                .map(|e| serde_json::to_string(e))
                .transpose()?,
            serde_json::to_string(&cell.entities)?,
            serde_json::to_string(&cell.key_phrases)?,
            cell.sentiment as f64,
            cell.memory_type.as_str(),
            cell.confidence as f64,
            cell.importance as f64,
            serde_json::to_string(&cell.topics)?,
            cell.scope.as_str(),
            cell.episode_id.map(|e| e.to_string()),
            cell.event_boundary as i64,
            cell.preceding_context,
            cell.following_context,
            cell.conversation_id,
            cell.turn_number,
            cell.user_state,
        ],
    )?;
    Ok(())
}

fn insert_fts_row(conn: &Connection, cell: &MemCell) -> Result<()> {
    conn.execute(
        "INSERT INTO memcells_fts (id, content, summary, entities, key_phrases)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            cell.id.to_string(),
            cell.content,
            cell.summary.clone().unwrap_or_default(),
            cell.entities.join(" "),
            cell.key_phrases.join(" "),
        ],
    )?;
    Ok(())
}

/// Materialise the cell's outgoing edges. Incoming edges belong to their
/// owning cells and are left untouched.
fn rewrite_relations(conn: &Connection, cell: &MemCell) -> Result<()> {
    for relation in cell.relations.iter().filter(|r| r.from == cell.id) {
        conn.execute(
            "INSERT INTO memcell_relations (from_id, to_id, relation_type, strength, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(from_id, to_id, relation_type)
             DO UPDATE SET strength = excluded.strength",
            params![
                relation.from.to_string(),
                relation.to.to_string(),
                relation.relation_type.as_str(),
                relation.strength.clamp(0.0, 1.0) as f64,
                relation.created_at.to_rfc3339(),
            ],
        )?;
    }
    Ok(())
}

fn load_relations(conn: &Connection, id: Uuid) -> Result<Vec<Relation>> {
    let mut stmt = conn.prepare(
        "SELECT from_id, to_id, relation_type, strength, created_at
         FROM memcell_relations WHERE from_id = ?1 OR to_id = ?1",
    )?;
    let rows = stmt
        .query_map(params![id.to_string()], |row| {
            let from: String = row.get(0)?;
            let to: String = row.get(1)?;
            let relation_type: String = row.get(2)?;
            let strength: f64 = row.get(3)?;
            let created_at: String = row.get(4)?;
            Ok((from, to, relation_type, strength, created_at))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(from, to, relation_type, strength, created_at)| {
            Ok(Relation {
                from: Uuid::parse_str(&from)?,
                to: Uuid::parse_str(&to)?,
                relation_type: RelationType::parse(&relation_type)
                    .ok_or_else(|| anyhow!("unknown relation type '{relation_type}'"))?,
                strength: strength as f32,
                created_at: parse_ts(&created_at)?,
            })
        })
        .collect()
}

fn row_to_cell(row: &Row<'_>) -> rusqlite::Result<MemCell> {
    let id: String = row.get("id")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let last_access_at: Option<String> = row.get("last_access_at")?;
    let embedding: Option<String> = row.get("embedding")?;
    let entities: String = row.get("entities")?;
    let key_phrases: String = row.get("key_phrases")?;
    let topics: String = row.get("topics")?;
    let memory_type: String = row.get("memory_type")?;
    let scope: String = row.get("scope")?;
    let episode_id: Option<String> = row.get("episode_id")?;

    Ok(MemCell {
        id: Uuid::parse_str(&id).map_err(|e| bad_column("id", e))?,
        source_id: row.get("source_id")?,
        version: row.get("version")?,
        created_at: parse_ts(&created_at).map_err(|e| bad_column("created_at", e))?,
        updated_at: parse_ts(&updated_at).map_err(|e| bad_column("updated_at", e))?,
        last_access_at: last_access_at
            .map(|t| parse_ts(&t))
            .transpose()
            .map_err(|e| bad_column("last_access_at", e))?,
        access_count: row.get::<_, i64>("access_count")? as u64,
        content: row.get("content")?,
        summary: row.get("summary")?,
        embedding: embedding.and_then(|e| serde_json::from_str(&e).ok()),
        entities: serde_json::from_str(&entities).unwrap_or_default(),
        key_phrases: serde_json::from_str(&key_phrases).unwrap_or_default(),
        sentiment: row.get::<_, f64>("sentiment")? as f32,
        memory_type: MemoryType::parse(&memory_type)
            .ok_or_else(|| bad_column("memory_type", anyhow!("unknown type {memory_type}")))?,
        confidence: row.get::<_, f64>("confidence")? as f32,
        importance: row.get::<_, f64>("importance")? as f32,
        topics: serde_json::from_str(&topics).unwrap_or_default(),
        scope: MemoryScope::parse(&scope).unwrap_or_default(),
        relations: Vec::new(),
        episode_id: episode_id.and_then(|e| Uuid::parse_str(&e).ok()),
        event_boundary: row.get::<_, i64>("event_boundary")? != 0,
        preceding_context: row.get("preceding_context")?,
        following_context: row.get("following_context")?,
        conversation_id: row.get("conversation_id")?,
        turn_number: row.get("turn_number")?,
        user_state: row.get("user_state")?,
    })
}

fn bad_column(name: &str, err: impl std::fmt::Display) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        0,
        rusqlite::types::Type::Text,
        format!("column {name}: {err}").into(),
    )
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("bad timestamp '{s}'"))?
        .with_timezone(&Utc))
}

/// Escape user text into an FTS5 query: each term becomes a quoted token,
/// joined with OR so partial overlap still ranks.
fn build_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| term.replace('"', ""))
        .filter(|t| t.len() > 2)
        .map(|t| format!("\"{t}\""))
        .collect::<Vec<_>>()
        .join(" OR ")
}

fn passes_filters(cell: &MemCell, options: &SearchOptions) -> bool {
    if !options.memory_types.is_empty() && !options.memory_types.contains(&cell.memory_type) {
        return false;
    }
    if let Some(scope) = options.scope {
        if cell.scope != scope {
            return false;
        }
    }
    if let Some(episode) = options.episode_id {
        if cell.episode_id != Some(episode) {
            return false;
        }
    }
    if let Some(conversation) = &options.conversation_id {
        if &cell.conversation_id != conversation {
            return false;
        }
    }
    if let Some(min) = options.min_importance {
        if cell.importance < min {
            return false;
        }
    }
    if let Some(min) = options.min_confidence {
        if cell.confidence < min {
            return false;
        }
    }
    if let Some(since) = options.since {
        if cell.created_at < since {
            return false;
        }
    }
    true
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(content: &str, memory_type: MemoryType) -> MemCell {
        MemCell::new(content, memory_type)
    }

    #[test]
    fn create_get_round_trip_preserves_fields() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut c = cell("user prefers terse answers", MemoryType::Preference);
        c.entities = vec!["terse".to_string()];
        c.sentiment = 0.4;
        c.importance = 0.7;
        c.summary = Some("prefers terse".to_string());
        c.embedding = Some(vec![0.1, 0.2, 0.3]);
        store.create(&mut c)?;

        let loaded = store.get(c.id)?.expect("cell exists");
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.content, c.content);
        assert_eq!(loaded.entities, c.entities);
        assert_eq!(loaded.summary, c.summary);
        assert_eq!(loaded.embedding, c.embedding);
        assert_eq!(loaded.memory_type, MemoryType::Preference);
        assert!(loaded.created_at <= loaded.updated_at);
        Ok(())
    }

    #[test]
    fn nil_id_is_auto_assigned() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut c = cell("x", MemoryType::Fact);
        c.id = Uuid::nil();
        store.create(&mut c)?;
        assert!(!c.id.is_nil());
        Ok(())
    }

    #[test]
    fn update_increments_version_exactly_once() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut c = cell("original", MemoryType::Fact);
        store.create(&mut c)?;

        c.content = "revised".to_string();
        store.update(&mut c)?;
        assert_eq!(c.version, 2);

        let loaded = store.get(c.id)?.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.content, "revised");
        assert!(loaded.created_at <= loaded.updated_at);
        Ok(())
    }

    #[test]
    fn update_unknown_cell_fails() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut c = cell("ghost", MemoryType::Fact);
        assert!(store.update(&mut c).is_err());
        Ok(())
    }

    #[test]
    fn delete_cascades_relations() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut a = cell("a", MemoryType::Fact);
        let mut b = cell("b", MemoryType::Fact);
        store.create(&mut a)?;
        store.create(&mut b)?;
        store.add_relation(a.id, b.id, RelationType::Supports, 0.9)?;

        assert!(store.delete(a.id)?);
        assert!(store.get(a.id)?.is_none());
        let b_loaded = store.get(b.id)?.unwrap();
        assert!(b_loaded.relations.is_empty(), "cascade removed the edge");
        assert!(!store.delete(a.id)?, "second delete is a no-op");
        Ok(())
    }

    #[test]
    fn add_relation_upserts_by_key() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut a = cell("a", MemoryType::Fact);
        let mut b = cell("b", MemoryType::Fact);
        store.create(&mut a)?;
        store.create(&mut b)?;

        store.add_relation(a.id, b.id, RelationType::Related, 0.4)?;
        store.add_relation(a.id, b.id, RelationType::Related, 0.8)?;

        let loaded = store.get(a.id)?.unwrap();
        assert_eq!(loaded.relations.len(), 1, "(from, to, type) is a set");
        assert!((loaded.relations[0].strength - 0.8).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn get_related_walks_breadth_first_to_depth() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut a = cell("a", MemoryType::Fact);
        let mut b = cell("b", MemoryType::Fact);
        let mut c = cell("c", MemoryType::Fact);
        store.create(&mut a)?;
        store.create(&mut b)?;
        store.create(&mut c)?;
        store.add_relation(a.id, b.id, RelationType::Related, 1.0)?;
        // Edge direction is irrelevant for traversal: c → b.
        store.add_relation(c.id, b.id, RelationType::Supports, 1.0)?;

        let depth1: Vec<Uuid> = store.get_related(a.id, 1)?.iter().map(|c| c.id).collect();
        assert_eq!(depth1, vec![b.id]);

        let depth2: HashSet<Uuid> = store.get_related(a.id, 2)?.iter().map(|c| c.id).collect();
        assert_eq!(depth2, HashSet::from([b.id, c.id]));
        Ok(())
    }

    #[test]
    fn episode_listing_is_turn_ordered() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let episode = Uuid::new_v4();
        for turn in [2_u32, 0, 1] {
            let mut c = cell(&format!("turn {turn}"), MemoryType::Interaction);
            c.episode_id = Some(episode);
            c.turn_number = turn;
            store.create(&mut c)?;
        }
        let cells = store.get_by_episode(episode)?;
        let turns: Vec<u32> = cells.iter().map(|c| c.turn_number).collect();
        assert_eq!(turns, vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn get_by_type_orders_by_importance() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        for (content, importance) in [("low", 0.2_f32), ("high", 0.9), ("mid", 0.5)] {
            let mut c = cell(content, MemoryType::Principle);
            c.importance = importance;
            store.create(&mut c)?;
        }
        let cells = store.get_by_type(MemoryType::Principle, 10)?;
        assert_eq!(cells[0].content, "high");
        assert_eq!(cells[2].content, "low");
        Ok(())
    }

    #[test]
    fn record_access_bumps_counters() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut c = cell("x", MemoryType::Fact);
        store.create(&mut c)?;

        store.record_access(c.id)?;
        store.record_access(c.id)?;
        let loaded = store.get(c.id)?.unwrap();
        assert_eq!(loaded.access_count, 2);
        let last_access = loaded.last_access_at.expect("stamped");
        assert!(loaded.updated_at <= last_access);

        assert!(store.record_access(Uuid::new_v4()).is_err());
        Ok(())
    }

    #[test]
    fn keyword_search_finds_content_and_respects_filters() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut rust = cell("the user is learning rust generics", MemoryType::Fact);
        rust.importance = 0.8;
        store.create(&mut rust)?;
        let mut cooking = cell("pasta recipe with garlic", MemoryType::Fact);
        store.create(&mut cooking)?;

        let hits = store.search("rust generics", &SearchOptions::default())?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].cell.id, rust.id);
        assert_eq!(hits[0].match_type, MatchType::Keyword);

        // Type filter excludes everything.
        let options = SearchOptions {
            memory_types: vec![MemoryType::Mood],
            ..SearchOptions::default()
        };
        assert!(store.search("rust", &options)?.is_empty());

        // Importance filter.
        let options = SearchOptions {
            min_importance: Some(0.9),
            ..SearchOptions::default()
        };
        assert!(store.search("rust", &options)?.is_empty());
        Ok(())
    }

    #[test]
    fn empty_query_lists_by_importance_with_filters() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut a = cell("alpha", MemoryType::Goal);
        a.importance = 0.9;
        store.create(&mut a)?;
        let mut b = cell("beta", MemoryType::Fact);
        b.importance = 0.4;
        store.create(&mut b)?;

        let options = SearchOptions {
            memory_types: vec![MemoryType::Goal],
            ..SearchOptions::default()
        };
        let hits = store.search("", &options)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].cell.content, "alpha");
        Ok(())
    }

    #[test]
    fn relation_expansion_scores_and_dedupes() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut hit = cell("searching for the deploy runbook", MemoryType::Procedure);
        hit.importance = 0.5;
        store.create(&mut hit)?;
        let mut neighbour = cell("completely unrelated wording", MemoryType::Fact);
        store.create(&mut neighbour)?;
        store.add_relation(hit.id, neighbour.id, RelationType::Related, 1.0)?;

        let options = SearchOptions {
            expand_depth: 1,
            ..SearchOptions::default()
        };
        let hits = store.search("deploy runbook", &options)?;
        assert_eq!(hits.len(), 2);
        let related = hits
            .iter()
            .find(|h| h.match_type == MatchType::Related)
            .expect("related result present");
        assert_eq!(related.cell.id, neighbour.id);
        assert!((related.score - 0.4).abs() < 1e-6, "0.8 × source importance");
        assert!(!related.relations.is_empty());
        Ok(())
    }

    #[test]
    fn hybrid_scoring_marks_match_type() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut c = cell("vector similarity search notes", MemoryType::Knowledge);
        c.embedding = Some(vec![1.0, 0.0]);
        store.create(&mut c)?;

        let options = SearchOptions {
            query_embedding: Some(vec![1.0, 0.0]),
            ..SearchOptions::default()
        };
        let hits = store.search("vector similarity", &options)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].match_type, MatchType::Hybrid);
        Ok(())
    }

    #[test]
    fn search_limit_caps_results() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        for i in 0..20 {
            let mut c = cell(&format!("common keyword entry {i}"), MemoryType::Fact);
            store.create(&mut c)?;
        }
        let options = SearchOptions {
            limit: 5,
            ..SearchOptions::default()
        };
        let hits = store.search("common keyword", &options)?;
        assert_eq!(hits.len(), 5);
        Ok(())
    }

    #[test]
    fn strategic_projection_defaults_to_tentative() -> Result<()> {
        let store = MemoryStore::open_in_memory()?;
        let mut c = cell("always test before deploying", MemoryType::Principle);
        store.create(&mut c)?;

        let all = store.strategic_all()?;
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].tier, StrategicTier::Tentative);
        assert_eq!(all[0].apply_count, 0);

        let mut m = all.into_iter().next().unwrap();
        m.tier = StrategicTier::Candidate;
        m.apply_count = 4;
        m.success_rate = 0.75;
        m.source_sessions.insert("s1".to_string());
        store.strategic_upsert(&m)?;

        let reloaded = store.strategic_all()?;
        assert_eq!(reloaded[0].tier, StrategicTier::Candidate);
        assert_eq!(reloaded[0].apply_count, 4);
        assert!(reloaded[0].source_sessions.contains("s1"));
        Ok(())
    }

    #[test]
    fn fts_query_escapes_terms() {
        assert_eq!(build_fts_query("rust generics"), "\"rust\" OR \"generics\"");
        assert_eq!(build_fts_query("a b"), "", "short terms dropped");
        assert_eq!(build_fts_query("say \"hi\""), "\"say\"");
    }
}
