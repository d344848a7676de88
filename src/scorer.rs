// Grading and analytics for a finished boss exam.
// Pure and deterministic: scoring the same (questions, answers) twice yields the same result.

use std::collections::HashMap;

use spacetimedb::{SpacetimeType, Timestamp};

use crate::question::{ExamQuestion, SubmittedAnswer};
use crate::tiers::{Difficulty, Subject};

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tally {
    pub correct: u32,
    pub total: u32,
}

impl Tally {
    fn record(&mut self, is_correct: bool) {
        self.total += 1;
        if is_correct {
            self.correct += 1;
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(self.correct as f64 / self.total as f64)
        }
    }
}

#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct SubjectTally {
    pub subject: Subject,
    pub tally: Tally,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct DifficultyTally {
    pub difficulty: Difficulty,
    pub tally: Tally,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct ChapterTally {
    pub chapter_id: u32,
    pub chapter_name: String,
    pub subject: Subject,
    pub tally: Tally,
}

/// Correctness broken down three ways
#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq, Default)]
pub struct AttemptAnalytics {
    /// In order of first appearance in the exam (stream subject order)
    pub by_subject: Vec<SubjectTally>,
    /// Easy, medium, hard; difficulties with no questions are omitted
    pub by_difficulty: Vec<DifficultyTally>,
    /// Sorted by chapter id
    pub by_chapter: Vec<ChapterTally>,
}

#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct QuestionOutcome {
    pub question_id: u64,
    pub chosen_option_id: Option<String>,
    pub correct_option_id: String,
    pub is_correct: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttemptResult {
    pub correct: u32,
    pub answered: u32,
    pub total: u32,
    pub score_percent: u32,
    pub stars: u8,
    pub analytics: AttemptAnalytics,
    pub outcomes: Vec<QuestionOutcome>,
}

/// One completed, scored boss exam. Never mutated after creation.
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct Attempt {
    pub tier_id: u8,
    pub timestamp: Timestamp,
    /// Exactly the questions served, for future exclusion
    pub question_ids: Vec<u64>,
    pub score_percent: u32,
    pub stars: u8,
    /// Questions with a chosen option
    pub answered: u32,
    pub analytics: AttemptAnalytics,
    /// Per-question review, in exam order. Empty for imported history.
    pub outcomes: Vec<QuestionOutcome>,
}

impl Attempt {
    pub fn from_result(tier_id: u8, timestamp: Timestamp, questions: &[ExamQuestion], result: &AttemptResult) -> Attempt {
        Attempt {
            tier_id,
            timestamp,
            question_ids: questions.iter().map(|q| q.id).collect(),
            score_percent: result.score_percent,
            stars: result.stars,
            answered: result.answered,
            analytics: result.analytics.clone(),
            outcomes: result.outcomes.clone(),
        }
    }
}

/// Boss exam star thresholds. Stricter than the single-subject quiz on purpose.
pub fn stars_for_score(score_percent: u32) -> u8 {
    match score_percent {
        90.. => 3,
        60..=89 => 2,
        30..=59 => 1,
        _ => 0,
    }
}

pub fn percent(correct: u32, total: u32) -> u32 {
    if total == 0 {
        return 0;
    }
    (100.0 * correct as f64 / total as f64).round() as u32
}

/// Grade an exam. Missing answers count as incorrect.
pub fn score(questions: &[ExamQuestion], answers: &[SubmittedAnswer]) -> AttemptResult {
    // Later answers for the same question replace earlier ones
    let chosen: HashMap<u64, &str> = answers
        .iter()
        .map(|a| (a.question_id, a.option_id.as_str()))
        .collect();

    let mut correct = 0u32;
    let mut answered = 0u32;
    let mut by_subject: Vec<SubjectTally> = Vec::new();
    let mut by_difficulty: HashMap<Difficulty, Tally> = HashMap::new();
    let mut by_chapter: HashMap<u32, ChapterTally> = HashMap::new();
    let mut outcomes = Vec::with_capacity(questions.len());

    for question in questions {
        let pick = chosen.get(&question.id).copied();
        if pick.is_some() {
            answered += 1;
        }
        let is_correct = pick == Some(question.correct_option_id.as_str());
        if is_correct {
            correct += 1;
        }

        match by_subject.iter_mut().find(|s| s.subject == question.subject) {
            Some(entry) => entry.tally.record(is_correct),
            None => {
                let mut tally = Tally::default();
                tally.record(is_correct);
                by_subject.push(SubjectTally { subject: question.subject, tally });
            }
        }
        by_difficulty.entry(question.difficulty).or_default().record(is_correct);
        by_chapter
            .entry(question.chapter_id)
            .or_insert_with(|| ChapterTally {
                chapter_id: question.chapter_id,
                chapter_name: question.chapter_name.clone(),
                subject: question.subject,
                tally: Tally::default(),
            })
            .tally
            .record(is_correct);

        outcomes.push(QuestionOutcome {
            question_id: question.id,
            chosen_option_id: pick.map(|s| s.to_string()),
            correct_option_id: question.correct_option_id.clone(),
            is_correct,
        });
    }

    let by_difficulty = Difficulty::ALL
        .iter()
        .filter_map(|d| by_difficulty.get(d).map(|tally| DifficultyTally { difficulty: *d, tally: *tally }))
        .collect();
    let mut by_chapter: Vec<ChapterTally> = by_chapter.into_values().collect();
    by_chapter.sort_by_key(|c| c.chapter_id);

    let total = questions.len() as u32;
    let score_percent = percent(correct, total);
    AttemptResult {
        correct,
        answered,
        total,
        score_percent,
        stars: stars_for_score(score_percent),
        analytics: AttemptAnalytics { by_subject, by_difficulty, by_chapter },
        outcomes,
    }
}
