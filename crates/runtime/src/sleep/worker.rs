//! The sleep worker: entry gating, the exclusive sleep flag, the phase
//! pipeline (consolidation → reflection → proposals → DMN), and
//! mode-dependent application of proposals.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use anyhow::Result;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use noema_config::{Persona, SleepConfig};
use noema_memory::{MemoryStore, SearchOptions};
use noema_router::OutcomeTracker;

use super::consolidation::{Consolidation, consolidate};
use super::dmn::{DmnReport, run_dmn};
use super::proposals::{Proposal, ProposalRisk, apply, generate};
use super::reflection::{Insight, reflect};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepMode {
    Off,
    Supervised,
    Auto,
}

impl SleepMode {
    pub fn parse(s: &str) -> SleepMode {
        match s.trim().to_lowercase().as_str() {
            "off" => SleepMode::Off,
            "auto" => SleepMode::Auto,
            _ => SleepMode::Supervised,
        }
    }
}

/// Why a sleep attempt did not start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SleepGate {
    ModeOff,
    AlreadySleeping,
    TooFewInteractions { have: usize, need: usize },
    NotIdleLongEnough { idle_minutes: i64, need_minutes: i64 },
}

#[derive(Debug)]
pub enum SleepOutcome {
    Skipped(SleepGate),
    Completed(Box<SleepReport>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SleepReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub phases_completed: Vec<String>,
    pub consolidation: Consolidation,
    pub insights: Vec<Insight>,
    pub applied: Vec<Proposal>,
    pub queued: Vec<Proposal>,
    pub dmn: DmnReport,
    pub errors: Vec<String>,
}

pub struct SleepWorker {
    config: SleepConfig,
    mode: SleepMode,
    persona_path: PathBuf,
    is_sleeping: Mutex<bool>,
    interactions_since_sleep: AtomicUsize,
    last_activity: Mutex<DateTime<Utc>>,
    last_sleep: Mutex<Option<DateTime<Utc>>>,
}

impl SleepWorker {
    pub fn new(config: &SleepConfig, persona_path: impl AsRef<Path>) -> Self {
        Self {
            mode: SleepMode::parse(&config.mode),
            config: config.clone(),
            persona_path: persona_path.as_ref().to_path_buf(),
            is_sleeping: Mutex::new(false),
            interactions_since_sleep: AtomicUsize::new(0),
            last_activity: Mutex::new(Utc::now()),
            last_sleep: Mutex::new(None),
        }
    }

    /// Record user activity: bumps the interaction counter and the idle clock.
    pub fn note_interaction(&self) {
        self.interactions_since_sleep.fetch_add(1, Ordering::Relaxed);
        *self.last_activity.lock().expect("activity lock") = Utc::now();
    }

    pub fn is_sleeping(&self) -> bool {
        *self.is_sleeping.lock().expect("sleep flag lock")
    }

    /// Evaluate the entry conditions without taking the sleep flag.
    pub fn check_entry(&self, now: DateTime<Utc>) -> Option<SleepGate> {
        if self.mode == SleepMode::Off {
            return Some(SleepGate::ModeOff);
        }
        if self.is_sleeping() {
            return Some(SleepGate::AlreadySleeping);
        }
        let have = self.interactions_since_sleep.load(Ordering::Relaxed);
        if have < self.config.min_interactions {
            return Some(SleepGate::TooFewInteractions {
                have,
                need: self.config.min_interactions,
            });
        }
        let idle = now - *self.last_activity.lock().expect("activity lock");
        if idle < ChronoDuration::minutes(self.config.idle_timeout_minutes) {
            return Some(SleepGate::NotIdleLongEnough {
                idle_minutes: idle.num_minutes(),
                need_minutes: self.config.idle_timeout_minutes,
            });
        }
        None
    }

    /// Attempt a full sleep cycle. Returns `Skipped` when an entry condition
    /// holds; the cycle itself is capped at the configured duration, with a
    /// cancellation check between phases.
    #[instrument(skip_all)]
    pub async fn try_sleep(
        &self,
        store: &MemoryStore,
        tracker: &OutcomeTracker,
    ) -> Result<SleepOutcome> {
        if let Some(gate) = self.check_entry(Utc::now()) {
            return Ok(SleepOutcome::Skipped(gate));
        }

        // Exclusive flag: a concurrent attempt reports `already_sleeping`.
        {
            let mut flag = self.is_sleeping.lock().expect("sleep flag lock");
            if *flag {
                return Ok(SleepOutcome::Skipped(SleepGate::AlreadySleeping));
            }
            *flag = true;
        }

        let result = self.run_cycle(store, tracker).await;
        *self.is_sleeping.lock().expect("sleep flag lock") = false;

        let report = result?;
        *self.last_sleep.lock().expect("last sleep lock") = Some(Utc::now());
        self.interactions_since_sleep.store(0, Ordering::Relaxed);
        Ok(SleepOutcome::Completed(Box::new(report)))
    }

    async fn run_cycle(&self, store: &MemoryStore, tracker: &OutcomeTracker) -> Result<SleepReport> {
        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + std::time::Duration::from_secs(self.config.max_cycle_minutes * 60);
        let since = *self.last_sleep.lock().expect("last sleep lock");

        let mut report = SleepReport {
            started_at,
            duration_ms: 0,
            phases_completed: Vec::new(),
            consolidation: Consolidation::default(),
            insights: Vec::new(),
            applied: Vec::new(),
            queued: Vec::new(),
            dmn: DmnReport::default(),
            errors: Vec::new(),
        };

        info!(since = ?since, "sleep cycle starting");

        // Phase 1: consolidation.
        if self.phase_cancelled(&mut report, "consolidation", deadline, started) {
            return Ok(finish(report, started));
        }
        let options = SearchOptions {
            since,
            limit: 1000,
            ..SearchOptions::default()
        };
        let cells: Vec<_> = store.search("", &options)?.into_iter().map(|r| r.cell).collect();
        report.consolidation = consolidate(&cells);
        report.phases_completed.push("consolidation".to_string());

        // Phase 2: reflection.
        if self.phase_cancelled(&mut report, "reflection", deadline, started) {
            return Ok(finish(report, started));
        }
        report.insights = reflect(&report.consolidation);
        report.phases_completed.push("reflection".to_string());

        // Phase 3: proposal generation + mode-dependent application.
        if self.phase_cancelled(&mut report, "proposals", deadline, started) {
            return Ok(finish(report, started));
        }
        let mut persona = Persona::load_from(&self.persona_path)?;
        let max_delta = persona.boundaries.max_trait_delta.min(self.config.max_trait_delta);
        let proposals = generate(&report.insights, &persona, max_delta);
        let min_auto = persona.boundaries.min_auto_confidence;

        match self.mode {
            SleepMode::Off => unreachable!("gated above"),
            SleepMode::Supervised => {
                report.queued = proposals;
            }
            SleepMode::Auto => {
                let mut mutated = false;
                for proposal in proposals {
                    let auto_apply =
                        proposal.risk == ProposalRisk::Safe && proposal.confidence > min_auto;
                    if auto_apply {
                        if !mutated {
                            Persona::backup(&self.persona_path)?;
                            mutated = true;
                        }
                        match apply(&mut persona, &proposal) {
                            Ok(()) => report.applied.push(proposal),
                            Err(err) => {
                                warn!(?err, "proposal application failed");
                                report.errors.push(format!("apply: {err}"));
                                report.queued.push(proposal);
                            }
                        }
                    } else {
                        report.queued.push(proposal);
                    }
                }
                if mutated {
                    persona.last_sleep_cycle = Some(Utc::now());
                    persona.save_to(&self.persona_path)?;
                }
            }
        }
        report.phases_completed.push("proposals".to_string());

        // Phase 4: DMN — lower priority, errors are non-fatal by design.
        if self.phase_cancelled(&mut report, "dmn", deadline, started) {
            return Ok(finish(report, started));
        }
        report.dmn = run_dmn(tracker, store, self.config.min_outcome_samples);
        report.errors.extend(report.dmn.errors.clone());
        report.phases_completed.push("dmn".to_string());

        info!(
            phases = report.phases_completed.len(),
            applied = report.applied.len(),
            queued = report.queued.len(),
            promotions = report.dmn.promotions.len(),
            "sleep cycle complete"
        );
        Ok(finish(report, started))
    }

    fn phase_cancelled(
        &self,
        report: &mut SleepReport,
        phase: &str,
        deadline: Instant,
        started: Instant,
    ) -> bool {
        if Instant::now() >= deadline {
            let elapsed = started.elapsed().as_secs();
            warn!(phase, elapsed_secs = elapsed, "sleep cycle cap reached");
            report
                .errors
                .push(format!("sleep phase '{phase}' cancelled after {elapsed}s"));
            true
        } else {
            false
        }
    }
}

fn finish(mut report: SleepReport, started: Instant) -> SleepReport {
    report.duration_ms = started.elapsed().as_millis() as u64;
    report
}

// ── Tests ────────────────────────────────────────────────────────────────────
