use spacetimedb::SpacetimeType;

use crate::error::{BattleError, BattleResult};
use crate::tiers::{Difficulty, Subject};

pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 4;

/// Labels assigned to options by position after shuffling
const OPTION_LABELS: [&str; MAX_OPTIONS] = ["a", "b", "c", "d"];

pub fn option_label(position: usize) -> String {
    OPTION_LABELS
        .get(position)
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("opt{}", position + 1))
}

#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct QuestionOption {
    pub id: String,
    pub text: String,
}

/// A question as stored in a chapter/difficulty pool
#[derive(Debug, Clone, PartialEq)]
pub struct PoolQuestion {
    pub id: u64,
    pub chapter_id: u32,
    pub difficulty: Difficulty,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: String,
    pub explanation: Option<String>,
}

impl PoolQuestion {
    /// 2-4 options, unique option ids, correct id must name one of them
    pub fn validate(&self) -> BattleResult<()> {
        validate_options(&self.options, &self.correct_option_id)
            .map_err(|reason| BattleError::InvalidQuestion(format!("question {}: {}", self.id, reason)))
    }
}

pub fn validate_options(options: &[QuestionOption], correct_option_id: &str) -> Result<(), String> {
    if options.len() < MIN_OPTIONS || options.len() > MAX_OPTIONS {
        return Err(format!("{} options, expected {}-{}", options.len(), MIN_OPTIONS, MAX_OPTIONS));
    }
    for (i, option) in options.iter().enumerate() {
        if options[..i].iter().any(|o| o.id == option.id) {
            return Err(format!("duplicate option id '{}'", option.id));
        }
    }
    if !options.iter().any(|o| o.id == correct_option_id) {
        return Err(format!("correct option '{}' is not one of the options", correct_option_id));
    }
    Ok(())
}

/// A question served in a boss exam, tagged with where it came from
#[derive(SpacetimeType, Debug, Clone, PartialEq)]
pub struct ExamQuestion {
    pub id: u64,
    pub prompt: String,
    pub options: Vec<QuestionOption>,
    pub correct_option_id: String,
    pub explanation: Option<String>,
    pub subject: Subject,
    pub chapter_id: u32,
    pub chapter_name: String,
    pub difficulty: Difficulty,
}

impl ExamQuestion {
    pub fn correct_text(&self) -> Option<&str> {
        self.options
            .iter()
            .find(|o| o.id == self.correct_option_id)
            .map(|o| o.text.as_str())
    }
}

/// A learner's chosen option for one question
#[derive(SpacetimeType, Debug, Clone, PartialEq, Eq)]
pub struct SubmittedAnswer {
    pub question_id: u64,
    pub option_id: String,
}
