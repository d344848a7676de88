use spacetimedb::SpacetimeType;

use crate::tiers::{Difficulty, Subject};

/// A learner's progress on one chapter
#[derive(Debug, Clone, PartialEq)]
pub struct Chapter {
    /// Globally unique, sequential within a subject
    pub id: u32,
    pub subject: Subject,
    pub name: String,
    /// Difficulties passed at least once
    pub completed: Vec<Difficulty>,
}

impl Chapter {
    /// Mastered = every difficulty passed at least once
    pub fn is_mastered(&self) -> bool {
        Difficulty::ALL.iter().all(|d| self.completed.contains(d))
    }
}

/// Chapters of one subject, ordered by id
pub fn subject_chapters(chapters: &[Chapter], subject: Subject) -> Vec<&Chapter> {
    let mut list: Vec<&Chapter> = chapters.iter().filter(|c| c.subject == subject).collect();
    list.sort_by_key(|c| c.id);
    list
}

/// round(100 * mastered / in_scope), 0 for an empty scope
pub fn completion_percent(chapters: &[Chapter], subjects: &[Subject]) -> u32 {
    let in_scope: Vec<&Chapter> = chapters.iter().filter(|c| subjects.contains(&c.subject)).collect();
    if in_scope.is_empty() {
        return 0;
    }
    let mastered = in_scope.iter().filter(|c| c.is_mastered()).count();
    (100.0 * mastered as f64 / in_scope.len() as f64).round() as u32
}

/// Mastered vs total chapters for one subject
#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct SubjectSummary {
    pub subject: Subject,
    pub mastered: u32,
    pub total: u32,
}

pub fn summarize(chapters: &[Chapter], subjects: &[Subject]) -> Vec<SubjectSummary> {
    subjects
        .iter()
        .map(|&subject| {
            let list = subject_chapters(chapters, subject);
            SubjectSummary {
                subject,
                mastered: list.iter().filter(|c| c.is_mastered()).count() as u32,
                total: list.len() as u32,
            }
        })
        .collect()
}
