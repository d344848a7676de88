// Boss battle flows composed over the store traits:
// list tiers → start battle (unlock + assemble) → finish battle (score + append).

use std::collections::HashSet;
use std::time::Duration;

use rand::Rng;
use spacetimedb::{Identity, Timestamp};

use crate::assembler::{assemble, AssembledExam};
use crate::error::{BattleError, BattleResult};
use crate::question::{ExamQuestion, SubmittedAnswer};
use crate::scorer::{score, Attempt, AttemptResult};
use crate::store::{ContentStore, LearnerProfile, ProgressStore};
use crate::tiers::tier_by_id;
use crate::unlock::{evaluate, tier_statuses, TierStatus};

/// Questions served in this many recent attempts are not served again
pub const RECENT_ATTEMPT_WINDOW: usize = 3;

/// Delay before a failed auto-submit is tried again
pub const EXPIRE_RETRY_DELAY: Duration = Duration::from_secs(60);

fn require_profile<P: ProgressStore + ?Sized>(progress: &P, learner: &Identity) -> BattleResult<LearnerProfile> {
    progress.profile(learner)?.ok_or(BattleError::LearnerNotFound)
}

/// Ids served in the last `window` attempts, oldest first, no duplicates
pub fn recent_question_ids(attempts: &[Attempt], window: usize) -> Vec<u64> {
    let mut seen = HashSet::new();
    attempts[attempts.len().saturating_sub(window)..]
        .iter()
        .flat_map(|a| a.question_ids.iter().copied())
        .filter(|id| seen.insert(*id))
        .collect()
}

/// Tier selection screen for one learner
pub fn list_tiers<P: ProgressStore + ?Sized>(progress: &P, learner: &Identity) -> BattleResult<Vec<TierStatus>> {
    let profile = require_profile(progress, learner)?;
    let chapters = progress.chapters(learner)?;
    let attempts = progress.attempts(learner)?;
    Ok(tier_statuses(&chapters, profile.stream.subjects(), &attempts, profile.total_xp))
}

/// Check the tier is open and assemble an exam for it.
pub fn start_battle<P, C, R>(
    progress: &P,
    content: &C,
    learner: &Identity,
    tier_id: u8,
    rng: &mut R,
    now: Timestamp,
) -> BattleResult<AssembledExam>
where
    P: ProgressStore + ?Sized,
    C: ContentStore + ?Sized,
    R: Rng + ?Sized,
{
    let tier = tier_by_id(tier_id)?;
    let profile = require_profile(progress, learner)?;
    let chapters = progress.chapters(learner)?;
    let attempts = progress.attempts(learner)?;

    let decision = evaluate(tier, &chapters, profile.stream.subjects(), &attempts, profile.total_xp);
    if !decision.unlocked {
        return Err(BattleError::Locked { tier: tier.id, reason: decision.reason });
    }

    let recent = recent_question_ids(&attempts, RECENT_ATTEMPT_WINDOW);
    assemble(tier, profile.stream, &chapters, &recent, &attempts, content, rng, now)
}

/// Keep one answer per question, the newest winning
pub fn save_answer(saved: &mut Vec<SubmittedAnswer>, answer: SubmittedAnswer) {
    saved.retain(|a| a.question_id != answer.question_id);
    saved.push(answer);
}

/// Fold a final submission into the saved answers.
///
/// Past the deadline the submission is dropped and only answers saved in time
/// count. Returns whether the submission was applied.
pub fn merge_submission(
    saved: &mut Vec<SubmittedAnswer>,
    submitted: Vec<SubmittedAnswer>,
    now: Timestamp,
    deadline: Timestamp,
) -> bool {
    if now > deadline {
        return false;
    }
    for answer in submitted {
        save_answer(saved, answer);
    }
    true
}

/// When to try an auto-submit again after it could not be saved
pub fn next_expiry_retry(now: Timestamp) -> Timestamp {
    now + EXPIRE_RETRY_DELAY
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinishedBattle {
    pub attempt: Attempt,
    pub result: AttemptResult,
    /// False when the attempt could not be appended; the result is still valid
    pub persisted: bool,
}

/// Score a finished exam and append it to the learner's history.
///
/// Never fails: a store error is logged and reported via `persisted` so the
/// learner still gets their score.
pub fn finish_battle<P: ProgressStore + ?Sized>(
    progress: &mut P,
    learner: &Identity,
    tier_id: u8,
    questions: &[ExamQuestion],
    answers: &[SubmittedAnswer],
    now: Timestamp,
) -> FinishedBattle {
    let result = score(questions, answers);
    let attempt = Attempt::from_result(tier_id, now, questions, &result);
    let persisted = match progress.append_attempt(learner, attempt.clone()) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("[SCORE] attempt not saved tier:{} score:{}% error:{}", tier_id, result.score_percent, e);
            false
        }
    };
    log::info!(
        "[SCORE] tier:{} score:{}% stars:{} correct:{}/{} answered:{}",
        tier_id,
        result.score_percent,
        result.stars,
        result.correct,
        result.total,
        result.answered
    );
    FinishedBattle { attempt, result, persisted }
}
