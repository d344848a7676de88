// Store boundaries for the boss battle engine.
//
// The engine only needs: questions by (chapter, difficulty), a learner's
// profile, chapter progress and attempt history, and appending one attempt.
// `TableStore` serves these from module tables; `MemoryStore` keeps them in
// process for tests and tools.

use std::collections::HashMap;

use spacetimedb::{Identity, ReducerContext, Table};

use crate::error::StoreError;
use crate::question::PoolQuestion;
use crate::scorer::Attempt;
use crate::syllabus::Chapter;
use crate::tiers::{Difficulty, Stream};
use crate::{boss_attempt, chapter_progress, learner, question_bank, BossAttempt};

/// Read-only learner facts the engine consumes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LearnerProfile {
    pub stream: Stream,
    pub total_xp: u32,
}

pub trait ContentStore {
    /// Every question in one chapter's pool at one difficulty. May be empty.
    fn questions_for(&self, chapter_id: u32, difficulty: Difficulty) -> Result<Vec<PoolQuestion>, StoreError>;
}

pub trait ProgressStore {
    fn profile(&self, learner: &Identity) -> Result<Option<LearnerProfile>, StoreError>;

    /// The learner's chapters with per-difficulty completion
    fn chapters(&self, learner: &Identity) -> Result<Vec<Chapter>, StoreError>;

    /// Attempt history, chronological (most recent last)
    fn attempts(&self, learner: &Identity) -> Result<Vec<Attempt>, StoreError>;

    /// Append-only: existing attempts are never touched
    fn append_attempt(&mut self, learner: &Identity, attempt: Attempt) -> Result<(), StoreError>;
}

// ==================== TABLE STORE ====================

/// Store backed by the module's tables, scoped to one reducer call
pub struct TableStore<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> TableStore<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        TableStore { ctx }
    }
}

impl ContentStore for TableStore<'_> {
    fn questions_for(&self, chapter_id: u32, difficulty: Difficulty) -> Result<Vec<PoolQuestion>, StoreError> {
        Ok(self.ctx.db.question_bank()
            .chapter_id()
            .filter(&chapter_id)
            .filter(|q| q.difficulty == difficulty)
            .map(|q| q.to_pool_question())
            .collect())
    }
}

impl ProgressStore for TableStore<'_> {
    fn profile(&self, learner: &Identity) -> Result<Option<LearnerProfile>, StoreError> {
        Ok(self.ctx.db.learner()
            .identity()
            .find(learner)
            .map(|l| LearnerProfile { stream: l.stream, total_xp: l.total_xp }))
    }

    fn chapters(&self, learner: &Identity) -> Result<Vec<Chapter>, StoreError> {
        Ok(self.ctx.db.chapter_progress()
            .learner()
            .filter(learner)
            .map(|row| row.to_chapter())
            .collect())
    }

    fn attempts(&self, learner: &Identity) -> Result<Vec<Attempt>, StoreError> {
        let rows: Vec<BossAttempt> = self.ctx.db.boss_attempt().learner().filter(learner).collect();
        Ok(chronological(rows))
    }

    fn append_attempt(&mut self, learner: &Identity, attempt: Attempt) -> Result<(), StoreError> {
        self.ctx.db.boss_attempt()
            .try_insert(BossAttempt { id: 0, learner: *learner, attempt })
            .map(|_| ())
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

/// Order attempt rows by timestamp, insertion order breaking ties
pub fn chronological(mut rows: Vec<BossAttempt>) -> Vec<Attempt> {
    rows.sort_by_key(|row| (row.attempt.timestamp, row.id));
    rows.into_iter().map(|row| row.attempt).collect()
}

// ==================== MEMORY STORE ====================

#[derive(Debug, Default)]
pub struct MemoryStore {
    profiles: HashMap<Identity, LearnerProfile>,
    chapters: HashMap<Identity, Vec<Chapter>>,
    attempts: HashMap<Identity, Vec<Attempt>>,
    questions: Vec<PoolQuestion>,
    offline: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_profile(&mut self, learner: Identity, profile: LearnerProfile) {
        self.profiles.insert(learner, profile);
    }

    pub fn set_chapters(&mut self, learner: Identity, chapters: Vec<Chapter>) {
        self.chapters.insert(learner, chapters);
    }

    pub fn add_question(&mut self, question: PoolQuestion) {
        self.questions.push(question);
    }

    /// Simulate the backing store being unreachable
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

impl ContentStore for MemoryStore {
    fn questions_for(&self, chapter_id: u32, difficulty: Difficulty) -> Result<Vec<PoolQuestion>, StoreError> {
        self.check_online()?;
        Ok(self.questions
            .iter()
            .filter(|q| q.chapter_id == chapter_id && q.difficulty == difficulty)
            .cloned()
            .collect())
    }
}

impl ProgressStore for MemoryStore {
    fn profile(&self, learner: &Identity) -> Result<Option<LearnerProfile>, StoreError> {
        self.check_online()?;
        Ok(self.profiles.get(learner).copied())
    }

    fn chapters(&self, learner: &Identity) -> Result<Vec<Chapter>, StoreError> {
        self.check_online()?;
        Ok(self.chapters.get(learner).cloned().unwrap_or_default())
    }

    fn attempts(&self, learner: &Identity) -> Result<Vec<Attempt>, StoreError> {
        self.check_online()?;
        Ok(self.attempts.get(learner).cloned().unwrap_or_default())
    }

    fn append_attempt(&mut self, learner: &Identity, attempt: Attempt) -> Result<(), StoreError> {
        self.check_online()?;
        self.attempts.entry(*learner).or_default().push(attempt);
        Ok(())
    }
}
