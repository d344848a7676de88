use spacetimedb::{
    ReducerContext, Identity, Table, Timestamp, ScheduleAt,
    table, reducer, view, SpacetimeType,
};

pub mod assembler;
pub mod battle;
pub mod error;
pub mod question;
pub mod scorer;
pub mod store;
pub mod syllabus;
pub mod tiers;
pub mod unlock;

// Worker-only bulk import of content, profiles, progress and history
mod import;

use assembler::ExamMetadata;
use error::BattleError;
use question::{ExamQuestion, PoolQuestion, QuestionOption, SubmittedAnswer};
use scorer::Attempt;
use store::TableStore;
use syllabus::{Chapter, SubjectSummary};
use tiers::{Difficulty, Stream, Subject, TIER_CATALOG};
use unlock::TierStatus;

// ==================== HELPER FUNCTIONS ====================

/// Only authorized workers (gateway / progress tracker) may import data
fn is_authorized(ctx: &ReducerContext) -> bool {
    ctx.db.authorized_worker().identity().find(&ctx.sender).is_some()
}

fn short_id(identity: &Identity) -> String {
    let hex = identity.to_string();
    hex[..8.min(hex.len())].to_string()
}

/// Remove an exam and any pending timeout for it
fn close_exam(ctx: &ReducerContext, exam_id: u64) {
    for schedule in ctx.db.boss_exam_timeout_schedule().iter().filter(|s| s.exam_id == exam_id) {
        ctx.db.boss_exam_timeout_schedule().id().delete(&schedule.id);
    }
    ctx.db.boss_exam().id().delete(&exam_id);
}

/// Score an exam with the answers saved so far and append the attempt.
/// The exam is only closed once the attempt is safely stored.
fn finalize_exam(ctx: &ReducerContext, exam: BossExam) -> Result<(), String> {
    let mut store = TableStore::new(ctx);
    let finished = battle::finish_battle(
        &mut store,
        &exam.learner,
        exam.tier_id,
        &exam.questions,
        &exam.answers,
        ctx.timestamp,
    );
    if !finished.persisted {
        // Err rolls the transaction back: the exam stays open and can be resubmitted
        return Err(format!(
            "Scored {}% ({} stars) but the attempt could not be saved, please submit again",
            finished.result.score_percent, finished.result.stars
        ));
    }
    close_exam(ctx, exam.id);
    Ok(())
}

// ==================== TABLES ====================

/// Learner profile as synced from the platform
/// PRIVATE: clients read their own row via my_learner
#[table(name = learner)]
#[derive(Clone)]
pub struct Learner {
    #[primary_key]
    pub identity: Identity,

    pub name: String,

    /// Subject track; decides subjects and question pattern
    pub stream: Stream,

    /// Total experience points across the platform (read-only here)
    pub total_xp: u32,

    pub updated_at: Timestamp,
}

/// One chapter of a learner's syllabus with completed difficulties
/// Owned by the progress tracker; replaced wholesale by sync_chapter_progress
#[table(name = chapter_progress)]
pub struct ChapterProgress {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub learner: Identity,

    pub chapter_id: u32,

    pub subject: Subject,

    /// Display name carried into chapter analytics
    pub name: String,

    /// Difficulties passed at least once (mastered = all three)
    pub completed: Vec<Difficulty>,
}

impl ChapterProgress {
    pub fn to_chapter(&self) -> Chapter {
        Chapter {
            id: self.chapter_id,
            subject: self.subject,
            name: self.name.clone(),
            completed: self.completed.clone(),
        }
    }
}

/// Question pool content
/// PRIVATE: holds correct answers
#[table(name = question_bank)]
#[derive(Debug, Clone)]
pub struct BankQuestion {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub chapter_id: u32,

    pub difficulty: Difficulty,

    pub prompt: String,

    /// 2-4 options
    pub options: Vec<QuestionOption>,

    pub correct_option_id: String,

    pub explanation: Option<String>,
}

impl BankQuestion {
    pub fn to_pool_question(&self) -> PoolQuestion {
        PoolQuestion {
            id: self.id,
            chapter_id: self.chapter_id,
            difficulty: self.difficulty,
            prompt: self.prompt.clone(),
            options: self.options.clone(),
            correct_option_id: self.correct_option_id.clone(),
            explanation: self.explanation.clone(),
        }
    }
}

/// Boss exam in progress
/// PRIVATE: questions include correct answers; clients use my_exam_paper
/// One row per learner at most (unique learner) - a second start is rejected
#[table(name = boss_exam)]
pub struct BossExam {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[unique]
    pub learner: Identity,

    pub tier_id: u8,

    /// Assembled questions, options already shuffled
    pub questions: Vec<ExamQuestion>,

    pub metadata: ExamMetadata,

    /// Answers saved so far (one per question)
    pub answers: Vec<SubmittedAnswer>,

    pub started_at: Timestamp,

    /// started_at + stream duration; the exam auto-submits here
    pub deadline: Timestamp,
}

/// Completed boss exam - append-only history
#[table(name = boss_attempt)]
pub struct BossAttempt {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    #[index(btree)]
    pub learner: Identity,

    pub attempt: Attempt,
}

/// Schedule table for exam deadlines
#[table(name = boss_exam_timeout_schedule, scheduled(expire_boss_exam))]
pub struct BossExamTimeoutSchedule {
    #[primary_key]
    #[auto_inc]
    pub id: u64,

    /// Which exam this deadline is for
    pub exam_id: u64,

    pub scheduled_at: ScheduleAt,
}

/// Authorized identities that can call import reducers
#[table(name = authorized_worker)]
pub struct AuthorizedWorker {
    #[primary_key]
    pub identity: Identity,
}

// ==================== VIEWS ====================

/// Question as shown to the learner - no correct answer, no explanation
#[derive(SpacetimeType, Debug, Clone)]
pub struct PaperQuestion {
    pub id: u64,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    pub subject: Subject,
    pub chapter_name: String,
    pub difficulty: Difficulty,
}

#[derive(SpacetimeType, Debug, Clone)]
pub struct ExamPaper {
    pub exam_id: u64,
    pub tier_id: u8,
    pub tier_name: String,
    pub duration_minutes: u32,
    pub total_questions: u32,
    pub started_at: Timestamp,
    pub deadline: Timestamp,
    pub questions: Vec<PaperQuestion>,
    pub answers: Vec<SubmittedAnswer>,
}

/// View: the caller's own learner profile
#[view(name = my_learner, public)]
fn my_learner(ctx: &spacetimedb::ViewContext) -> Option<Learner> {
    ctx.db.learner().identity().find(ctx.sender)
}

/// View: every boss tier with live unlock status
/// Computed on read; nothing about "unlocked" is ever stored
#[view(name = my_boss_tiers, public)]
fn my_boss_tiers(ctx: &spacetimedb::ViewContext) -> Vec<TierStatus> {
    let Some(learner) = ctx.db.learner().identity().find(ctx.sender) else {
        return Vec::new();
    };
    let chapters: Vec<Chapter> = ctx.db.chapter_progress()
        .learner()
        .filter(&ctx.sender)
        .map(|row| row.to_chapter())
        .collect();
    let attempts = store::chronological(ctx.db.boss_attempt().learner().filter(&ctx.sender).collect());
    unlock::tier_statuses(&chapters, learner.stream.subjects(), &attempts, learner.total_xp)
}

/// View: per-subject mastery counts for the caller's stream
#[view(name = my_syllabus, public)]
fn my_syllabus(ctx: &spacetimedb::ViewContext) -> Vec<SubjectSummary> {
    let Some(learner) = ctx.db.learner().identity().find(ctx.sender) else {
        return Vec::new();
    };
    let chapters: Vec<Chapter> = ctx.db.chapter_progress()
        .learner()
        .filter(&ctx.sender)
        .map(|row| row.to_chapter())
        .collect();
    syllabus::summarize(&chapters, learner.stream.subjects())
}

/// View: the caller's exam in progress, answers stripped
#[view(name = my_exam_paper, public)]
fn my_exam_paper(ctx: &spacetimedb::ViewContext) -> Option<ExamPaper> {
    let exam = ctx.db.boss_exam().learner().find(ctx.sender)?;
    Some(ExamPaper {
        exam_id: exam.id,
        tier_id: exam.tier_id,
        tier_name: exam.metadata.tier_name.clone(),
        duration_minutes: exam.metadata.duration_minutes,
        total_questions: exam.metadata.total_questions,
        started_at: exam.started_at,
        deadline: exam.deadline,
        questions: exam.questions
            .iter()
            .map(|q| PaperQuestion {
                id: q.id,
                prompt: q.prompt.clone(),
                options: q.options.clone(),
                subject: q.subject,
                chapter_name: q.chapter_name.clone(),
                difficulty: q.difficulty,
            })
            .collect(),
        answers: exam.answers,
    })
}

/// View: the caller's attempt history (results and review screens)
#[view(name = my_boss_attempts, public)]
fn my_boss_attempts(ctx: &spacetimedb::ViewContext) -> Vec<BossAttempt> {
    ctx.db.boss_attempt().learner().filter(&ctx.sender).collect()
}

// ==================== REDUCERS ====================

#[reducer(init)]
pub fn init(ctx: &ReducerContext) -> Result<(), String> {
    // A broken catalog is a configuration error: refuse to publish
    tiers::validate_catalog(&TIER_CATALOG).map_err(|e| {
        log::error!("[BOSS] {}", e);
        e.to_string()
    })?;

    // In init, ctx.sender is the module owner identity
    if ctx.db.authorized_worker().identity().find(&ctx.sender).is_none() {
        ctx.db.authorized_worker().insert(AuthorizedWorker {
            identity: ctx.sender,
        });
    }

    log::info!("Boss battle module initialized ({} tiers)", TIER_CATALOG.len());
    Ok(())
}

/// Start a boss exam at `tier_id` for the caller
#[reducer]
pub fn start_boss_battle(ctx: &ReducerContext, tier_id: u8) -> Result<(), String> {
    // Same-learner exams are serialized here; the engine itself does no locking
    if let Some(existing) = ctx.db.boss_exam().learner().find(&ctx.sender) {
        log::warn!("[BOSS] start rejected learner:{} exam:{} in progress", short_id(&ctx.sender), existing.id);
        return Err(BattleError::ExamInProgress(existing.id).to_string());
    }

    let store = TableStore::new(ctx);
    let mut rng = ctx.rng();
    let exam = battle::start_battle(&store, &store, &ctx.sender, tier_id, &mut rng, ctx.timestamp)
        .map_err(|e| {
            log::warn!("[BOSS] start failed learner:{} tier:{} error:{}", short_id(&ctx.sender), tier_id, e);
            e.to_string()
        })?;

    let duration = std::time::Duration::from_secs(exam.metadata.duration_minutes as u64 * 60);
    let deadline = ctx.timestamp + duration;
    let total = exam.metadata.total_questions;
    let row = ctx.db.boss_exam().insert(BossExam {
        id: 0, // auto_inc
        learner: ctx.sender,
        tier_id,
        questions: exam.questions,
        metadata: exam.metadata,
        answers: Vec::new(),
        started_at: ctx.timestamp,
        deadline,
    });
    ctx.db.boss_exam_timeout_schedule().insert(BossExamTimeoutSchedule {
        id: 0,
        exam_id: row.id,
        scheduled_at: ScheduleAt::Time(deadline.into()),
    });

    log::info!("[BOSS] started exam:{} learner:{} tier:{} questions:{}", row.id, short_id(&ctx.sender), tier_id, total);
    Ok(())
}

/// Save (or change) the caller's answer to one question of their exam
#[reducer]
pub fn record_boss_answer(ctx: &ReducerContext, question_id: u64, option_id: String) -> Result<(), String> {
    let mut exam = ctx.db.boss_exam()
        .learner()
        .find(&ctx.sender)
        .ok_or_else(|| BattleError::NoActiveExam.to_string())?;

    if ctx.timestamp > exam.deadline {
        return Err("Time is up for this exam".to_string());
    }

    let question = exam.questions
        .iter()
        .find(|q| q.id == question_id)
        .ok_or(format!("Question {} is not part of this exam", question_id))?;
    if !question.options.iter().any(|o| o.id == option_id) {
        return Err(format!("Option '{}' does not exist for question {}", option_id, question_id));
    }

    battle::save_answer(&mut exam.answers, SubmittedAnswer { question_id, option_id });
    ctx.db.boss_exam().id().update(exam);
    Ok(())
}

/// Finish the caller's exam. `answers` override anything saved earlier.
#[reducer]
pub fn submit_boss_battle(ctx: &ReducerContext, answers: Vec<SubmittedAnswer>) -> Result<(), String> {
    let mut exam = ctx.db.boss_exam()
        .learner()
        .find(&ctx.sender)
        .ok_or_else(|| BattleError::NoActiveExam.to_string())?;

    if !battle::merge_submission(&mut exam.answers, answers, ctx.timestamp, exam.deadline) {
        log::warn!("[BOSS] late submit exam:{} learner:{} scoring saved answers only", exam.id, short_id(&ctx.sender));
    }

    let exam_id = exam.id;
    finalize_exam(ctx, exam)?;
    log::info!("[BOSS] submitted exam:{} learner:{}", exam_id, short_id(&ctx.sender));
    Ok(())
}

/// Leave the exam without recording an attempt
#[reducer]
pub fn abandon_boss_battle(ctx: &ReducerContext) -> Result<(), String> {
    let exam = ctx.db.boss_exam()
        .learner()
        .find(&ctx.sender)
        .ok_or_else(|| BattleError::NoActiveExam.to_string())?;

    close_exam(ctx, exam.id);
    log::info!("[BOSS] abandoned exam:{} learner:{} tier:{}", exam.id, short_id(&ctx.sender), exam.tier_id);
    Ok(())
}

/// Deadline reached (scheduled reducer): score whatever was answered
#[reducer]
pub fn expire_boss_exam(ctx: &ReducerContext, schedule: BossExamTimeoutSchedule) {
    // Only allow scheduler to call this, not clients
    if ctx.sender != ctx.identity() {
        log::warn!("Client {} attempted to call expire_boss_exam", ctx.sender);
        return;
    }

    if let Some(exam) = ctx.db.boss_exam().id().find(&schedule.exam_id) {
        let exam_id = exam.id;
        let learner = short_id(&exam.learner);
        match finalize_exam(ctx, exam) {
            Ok(()) => log::info!("[BOSS] expired exam:{} learner:{} auto-submitted", exam_id, learner),
            Err(e) => {
                // Exam is still open: keep a timeout pending so it cannot get stuck
                let retry_at = battle::next_expiry_retry(ctx.timestamp);
                ctx.db.boss_exam_timeout_schedule().insert(BossExamTimeoutSchedule {
                    id: 0,
                    exam_id,
                    scheduled_at: ScheduleAt::Time(retry_at.into()),
                });
                log::error!("[BOSS] expire failed exam:{} learner:{} retrying in {}s error:{}",
                    exam_id, learner, battle::EXPIRE_RETRY_DELAY.as_secs(), e);
            }
        }
    }

    // Clean up schedule row after handling event
    ctx.db.boss_exam_timeout_schedule().id().delete(&schedule.id);
}
