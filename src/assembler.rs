// Boss exam assembly: scope → pools → quotas → (adaptive order) → sampling → shuffles.
//
// Sparse content is expected. Empty pools and short quotas are filled by
// backfill where possible and otherwise produce a shorter exam; the metadata
// always reports the real question count.

use std::collections::{HashMap, HashSet};

use rand::seq::SliceRandom;
use rand::Rng;
use spacetimedb::{SpacetimeType, Timestamp};

use crate::error::BattleResult;
use crate::question::{option_label, ExamQuestion, QuestionOption};
use crate::scorer::Attempt;
use crate::store::ContentStore;
use crate::syllabus::{subject_chapters, Chapter};
use crate::tiers::{Difficulty, Quota, Stream, Subject, Tier, UnlockRule};

/// Chapters below this historical accuracy count as weak
pub const WEAK_ACCURACY_THRESHOLD: f64 = 0.5;

#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct SubjectCount {
    pub subject: Subject,
    pub count: u32,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct ExamMetadata {
    pub tier_id: u8,
    pub tier_name: String,
    pub stream: Stream,
    pub duration_minutes: u32,
    /// Questions actually assembled
    pub total_questions: u32,
    /// What a fully stocked pool would have produced
    pub nominal_questions: u32,
    pub subjects: Vec<Subject>,
    /// Per-subject quota after the tier's hard bias
    pub pattern: Quota,
    pub subject_counts: Vec<SubjectCount>,
    /// Chapters prioritized by the weakness tier (empty for other tiers)
    pub weak_chapter_ids: Vec<u32>,
    pub generated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssembledExam {
    pub questions: Vec<ExamQuestion>,
    pub metadata: ExamMetadata,
}

/// Chapters each subject's questions are drawn from.
///
/// ChapterCount tiers use the first `n` chapters by id. Every other tier uses
/// the mastered chapters, falling back to the whole subject when none are
/// mastered so the exam is never empty for lack of mastery.
pub fn resolve_scope<'a>(tier: &Tier, subjects: &[Subject], chapters: &'a [Chapter]) -> Vec<(Subject, Vec<&'a Chapter>)> {
    subjects
        .iter()
        .map(|&subject| {
            let ordered = subject_chapters(chapters, subject);
            let scope: Vec<&Chapter> = match tier.unlock_rule {
                UnlockRule::ChapterCount { n } => ordered.into_iter().take(n as usize).collect(),
                _ => {
                    let mastered: Vec<&Chapter> = ordered.iter().copied().filter(|c| c.is_mastered()).collect();
                    if mastered.is_empty() {
                        ordered
                    } else {
                        mastered
                    }
                }
            };
            (subject, scope)
        })
        .collect()
}

/// Chapters whose aggregate accuracy over all attempts is below 50%.
/// Chapters never observed are not weak.
pub fn weak_chapters(attempts: &[Attempt]) -> HashSet<u32> {
    let mut totals: HashMap<u32, (u32, u32)> = HashMap::new();
    for attempt in attempts {
        for chapter in &attempt.analytics.by_chapter {
            let entry = totals.entry(chapter.chapter_id).or_insert((0, 0));
            entry.0 += chapter.tally.correct;
            entry.1 += chapter.tally.total;
        }
    }
    totals
        .into_iter()
        .filter(|(_, (correct, total))| *total >= 1 && (*correct as f64 / *total as f64) < WEAK_ACCURACY_THRESHOLD)
        .map(|(chapter_id, _)| chapter_id)
        .collect()
}

/// Shuffle a question's options and relabel them by position.
///
/// The correct option keeps its text; only its position and label change,
/// and `correct_option_id` is remapped to follow it.
pub fn shuffle_options<R: Rng + ?Sized>(question: &mut ExamQuestion, rng: &mut R) {
    let original = std::mem::take(&mut question.options);
    let correct_index = original.iter().position(|o| o.id == question.correct_option_id);

    let mut order: Vec<usize> = (0..original.len()).collect();
    order.shuffle(rng);

    question.options = order
        .iter()
        .enumerate()
        .map(|(position, &i)| QuestionOption {
            id: option_label(position),
            text: original[i].text.clone(),
        })
        .collect();
    if let Some(correct_index) = correct_index {
        if let Some(position) = order.iter().position(|&i| i == correct_index) {
            question.correct_option_id = option_label(position);
        }
    }
}

/// Load one subject's pools, bucketed by difficulty, tagged with provenance.
fn load_pools<C: ContentStore + ?Sized>(
    content: &C,
    subject: Subject,
    scope: &[&Chapter],
) -> BattleResult<HashMap<Difficulty, Vec<ExamQuestion>>> {
    let mut pools: HashMap<Difficulty, Vec<ExamQuestion>> = HashMap::new();
    for chapter in scope {
        for difficulty in Difficulty::ALL {
            for question in content.questions_for(chapter.id, difficulty)? {
                if let Err(e) = question.validate() {
                    log::warn!("[ASSEMBLE] skipping malformed content: {}", e);
                    continue;
                }
                pools.entry(difficulty).or_default().push(ExamQuestion {
                    id: question.id,
                    prompt: question.prompt,
                    options: question.options,
                    correct_option_id: question.correct_option_id,
                    explanation: question.explanation,
                    subject,
                    chapter_id: chapter.id,
                    chapter_name: chapter.name.clone(),
                    difficulty,
                });
            }
        }
    }
    Ok(pools)
}

/// Pick up to `quota.total()` questions for one subject.
fn draw_subject<R: Rng + ?Sized>(
    mut pools: HashMap<Difficulty, Vec<ExamQuestion>>,
    quota: &Quota,
    recent: &HashSet<u64>,
    weak: &HashSet<u32>,
    rng: &mut R,
) -> Vec<ExamQuestion> {
    let mut picked: Vec<ExamQuestion> = Vec::new();
    let mut picked_ids: HashSet<u64> = HashSet::new();
    let mut leftovers: Vec<ExamQuestion> = Vec::new();

    for difficulty in Difficulty::ALL {
        let mut bucket: Vec<ExamQuestion> = pools
            .remove(&difficulty)
            .unwrap_or_default()
            .into_iter()
            .filter(|q| !recent.contains(&q.id))
            .collect();
        bucket.shuffle(rng);
        if !weak.is_empty() {
            // Weak chapters first; ordering only, nothing is dropped
            let (mut front, back): (Vec<_>, Vec<_>) = bucket.into_iter().partition(|q| weak.contains(&q.chapter_id));
            front.extend(back);
            bucket = front;
        }

        let want = quota.for_difficulty(difficulty) as usize;
        let mut taken = 0;
        for question in bucket {
            if taken < want && picked_ids.insert(question.id) {
                picked.push(question);
                taken += 1;
            } else {
                leftovers.push(question);
            }
        }
    }

    let target = quota.total() as usize;
    if picked.len() < target {
        // Backfill ignores difficulty: any eligible question will do
        leftovers.retain(|q| !picked_ids.contains(&q.id));
        leftovers.shuffle(rng);
        let before = picked.len();
        for question in leftovers {
            if picked.len() >= target {
                break;
            }
            if picked_ids.insert(question.id) {
                picked.push(question);
            }
        }
        log::debug!("[ASSEMBLE] backfilled {} question(s), {} of {}", picked.len() - before, picked.len(), target);
    }

    picked
}

/// Build a boss exam for one learner.
///
/// `recent_question_ids` are excluded outright; `attempts` (chronological)
/// only feed the weakness tier's chapter ordering.
#[allow(clippy::too_many_arguments)]
pub fn assemble<C: ContentStore + ?Sized, R: Rng + ?Sized>(
    tier: &Tier,
    stream: Stream,
    chapters: &[Chapter],
    recent_question_ids: &[u64],
    attempts: &[Attempt],
    content: &C,
    rng: &mut R,
    now: Timestamp,
) -> BattleResult<AssembledExam> {
    let definition = stream.definition();
    let quota = definition.pattern.with_hard_bias(tier.hard_bias);
    let recent: HashSet<u64> = recent_question_ids.iter().copied().collect();
    let weak = if tier.is_weakness_tier() && !attempts.is_empty() {
        weak_chapters(attempts)
    } else {
        HashSet::new()
    };

    let mut questions = Vec::new();
    let mut subject_counts = Vec::new();
    for (subject, scope) in resolve_scope(tier, definition.subjects, chapters) {
        let pools = load_pools(content, subject, &scope)?;
        let mut drawn = draw_subject(pools, &quota, &recent, &weak, rng);
        drawn.shuffle(rng);
        for question in drawn.iter_mut() {
            shuffle_options(question, rng);
        }
        if drawn.is_empty() {
            log::warn!("[ASSEMBLE] tier:{} subject:{} produced no questions", tier.id, subject.code());
        }
        subject_counts.push(SubjectCount { subject, count: drawn.len() as u32 });
        questions.extend(drawn);
    }

    let mut weak_chapter_ids: Vec<u32> = weak.into_iter().collect();
    weak_chapter_ids.sort_unstable();

    let metadata = ExamMetadata {
        tier_id: tier.id,
        tier_name: tier.name.to_string(),
        stream,
        duration_minutes: definition.duration_minutes,
        total_questions: questions.len() as u32,
        nominal_questions: quota.total() * definition.subjects.len() as u32,
        subjects: definition.subjects.to_vec(),
        pattern: quota,
        subject_counts,
        weak_chapter_ids,
        generated_at: now,
    };
    log::info!(
        "[ASSEMBLE] tier:{} stream:{} questions:{}/{} weak_chapters:{}",
        tier.id,
        stream.code(),
        metadata.total_questions,
        metadata.nominal_questions,
        metadata.weak_chapter_ids.len()
    );

    Ok(AssembledExam { questions, metadata })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scorer::{AttemptAnalytics, ChapterTally, Tally};
    use crate::tiers::tier_by_id;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn chapter(id: u32, subject: Subject, mastered: bool) -> Chapter {
        Chapter {
            id,
            subject,
            name: format!("Chapter {}", id),
            completed: if mastered { Difficulty::ALL.to_vec() } else { Vec::new() },
        }
    }

    fn exam_question(id: u64, chapter_id: u32) -> ExamQuestion {
        ExamQuestion {
            id,
            prompt: format!("Q{}", id),
            options: ["w", "x", "y", "z"]
                .iter()
                .map(|t| QuestionOption { id: t.to_string(), text: format!("{} of {}", t, id) })
                .collect(),
            correct_option_id: "y".to_string(),
            explanation: None,
            subject: Subject::Physics,
            chapter_id,
            chapter_name: String::new(),
            difficulty: Difficulty::Medium,
        }
    }

    fn attempt_with(chapters: &[(u32, u32, u32)]) -> Attempt {
        Attempt {
            tier_id: 7,
            timestamp: Timestamp::from_micros_since_unix_epoch(0),
            question_ids: Vec::new(),
            score_percent: 50,
            stars: 1,
            answered: 0,
            analytics: AttemptAnalytics {
                by_chapter: chapters
                    .iter()
                    .map(|&(chapter_id, correct, total)| ChapterTally {
                        chapter_id,
                        chapter_name: String::new(),
                        subject: Subject::Physics,
                        tally: Tally { correct, total },
                    })
                    .collect(),
                ..Default::default()
            },
            outcomes: Vec::new(),
        }
    }

    #[test]
    fn test_scope_for_chapter_count_tiers() {
        let chapters: Vec<Chapter> = (1..=6).map(|id| chapter(id, Subject::Physics, false)).collect();
        let scope = resolve_scope(tier_by_id(2).unwrap(), &[Subject::Physics], &chapters);
        let ids: Vec<u32> = scope[0].1.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_scope_uses_mastered_with_fallback() {
        let chapters = vec![
            chapter(1, Subject::Physics, true),
            chapter(2, Subject::Physics, false),
            chapter(3, Subject::Physics, true),
            chapter(11, Subject::Chemistry, false),
            chapter(12, Subject::Chemistry, false),
        ];
        let scope = resolve_scope(tier_by_id(5).unwrap(), &[Subject::Physics, Subject::Chemistry], &chapters);
        let physics: Vec<u32> = scope[0].1.iter().map(|c| c.id).collect();
        let chemistry: Vec<u32> = scope[1].1.iter().map(|c| c.id).collect();
        assert_eq!(physics, vec![1, 3]);
        assert_eq!(chemistry, vec![11, 12]);
    }

    #[test]
    fn test_weak_chapters_aggregate_all_attempts() {
        let attempts = vec![
            attempt_with(&[(1, 0, 2), (2, 2, 2), (3, 0, 0)]),
            attempt_with(&[(1, 2, 2), (2, 0, 3), (4, 1, 3)]),
        ];
        let weak = weak_chapters(&attempts);
        // ch1: 2/4 = 50% not weak, ch2: 2/5 weak, ch3: never observed, ch4: 1/3 weak
        assert_eq!(weak, HashSet::from([2, 4]));
    }

    #[test]
    fn test_shuffle_options_keeps_correct_text() {
        let mut rng = StdRng::seed_from_u64(11);
        for id in 0..200 {
            let mut question = exam_question(id, 1);
            let before = question.correct_text().map(|s| s.to_string());
            shuffle_options(&mut question, &mut rng);
            assert_eq!(question.correct_text().map(|s| s.to_string()), before);
            let labels: Vec<&str> = question.options.iter().map(|o| o.id.as_str()).collect();
            assert_eq!(labels, vec!["a", "b", "c", "d"]);
        }
    }

    #[test]
    fn test_draw_prefers_weak_chapters_within_bucket() {
        let mut pools = HashMap::new();
        let bucket: Vec<ExamQuestion> = (0..20).map(|i| exam_question(i, if i % 2 == 0 { 1 } else { 2 })).collect();
        pools.insert(Difficulty::Medium, bucket);
        let quota = Quota { easy: 0, medium: 10, hard: 0 };
        let weak = HashSet::from([2]);

        let mut rng = StdRng::seed_from_u64(5);
        let drawn = draw_subject(pools, &quota, &HashSet::new(), &weak, &mut rng);
        assert_eq!(drawn.len(), 10);
        assert!(drawn.iter().all(|q| q.chapter_id == 2));
    }

    #[test]
    fn test_draw_backfills_across_difficulties() {
        let mut pools = HashMap::new();
        pools.insert(Difficulty::Easy, (0..8).map(|i| exam_question(i, 1)).collect());
        pools.insert(Difficulty::Hard, (100..102).map(|i| exam_question(i, 1)).collect());
        let quota = Quota { easy: 2, medium: 3, hard: 5 };

        let mut rng = StdRng::seed_from_u64(9);
        let recent = HashSet::from([0, 1]);
        let drawn = draw_subject(pools, &quota, &recent, &HashSet::new(), &mut rng);

        // 6 eligible easy + 2 hard = 8 < 10
        assert_eq!(drawn.len(), 8);
        assert!(drawn.iter().all(|q| !recent.contains(&q.id)));
        let unique: HashSet<u64> = drawn.iter().map(|q| q.id).collect();
        assert_eq!(unique.len(), drawn.len());
    }
}
