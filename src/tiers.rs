// Static boss tier catalog and stream definitions.
// Everything here is process-wide constant data; behavior lives in unlock.rs and assembler.rs.

use spacetimedb::SpacetimeType;

use crate::error::{BattleError, BattleResult};

// ==================== SUBJECTS / DIFFICULTY ====================

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subject {
    Physics,
    Chemistry,
    Math,
    Biology,
}

impl Subject {
    /// Short code used in content files and analytics keys
    pub fn code(&self) -> &'static str {
        match self {
            Subject::Physics => "phy",
            Subject::Chemistry => "chem",
            Subject::Math => "math",
            Subject::Biology => "bio",
        }
    }

    pub fn from_code(code: &str) -> Option<Subject> {
        match code {
            "phy" => Some(Subject::Physics),
            "chem" => Some(Subject::Chemistry),
            "math" => Some(Subject::Math),
            "bio" => Some(Subject::Biology),
            _ => None,
        }
    }
}

#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub const ALL: [Difficulty; 3] = [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard];

    pub fn code(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    pub fn from_code(code: &str) -> Option<Difficulty> {
        match code {
            "easy" => Some(Difficulty::Easy),
            "medium" => Some(Difficulty::Medium),
            "hard" => Some(Difficulty::Hard),
            _ => None,
        }
    }
}

// ==================== STREAMS ====================

/// Per-subject question counts, split by difficulty
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Quota {
    pub easy: u32,
    pub medium: u32,
    pub hard: u32,
}

impl Quota {
    pub fn total(&self) -> u32 {
        self.easy + self.medium + self.hard
    }

    pub fn for_difficulty(&self, difficulty: Difficulty) -> u32 {
        match difficulty {
            Difficulty::Easy => self.easy,
            Difficulty::Medium => self.medium,
            Difficulty::Hard => self.hard,
        }
    }

    /// Move `round(medium * hard_bias)` questions from medium to hard.
    ///
    /// The total never changes. If the shift exceeds the medium quota (only
    /// possible with a bias outside the catalog's range), medium clamps to 0
    /// and the overflow is taken from easy instead.
    pub fn with_hard_bias(&self, hard_bias: f64) -> Quota {
        let shift = (self.medium as f64 * hard_bias).round().max(0.0) as u32;
        let from_medium = shift.min(self.medium);
        let from_easy = (shift - from_medium).min(self.easy);
        Quota {
            easy: self.easy - from_easy,
            medium: self.medium - from_medium,
            hard: self.hard + from_medium + from_easy,
        }
    }
}

/// The learner's subject track
#[derive(SpacetimeType, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stream {
    Jee,
    Neet,
}

pub struct StreamDefinition {
    pub subjects: &'static [Subject],
    /// Nominal per-subject pattern before tier bias
    pub pattern: Quota,
    pub duration_minutes: u32,
}

const JEE: StreamDefinition = StreamDefinition {
    subjects: &[Subject::Physics, Subject::Chemistry, Subject::Math],
    pattern: Quota { easy: 5, medium: 10, hard: 10 },
    duration_minutes: 180,
};

const NEET: StreamDefinition = StreamDefinition {
    subjects: &[Subject::Physics, Subject::Chemistry, Subject::Biology],
    pattern: Quota { easy: 15, medium: 20, hard: 10 },
    duration_minutes: 200,
};

impl Stream {
    pub fn definition(&self) -> &'static StreamDefinition {
        match self {
            Stream::Jee => &JEE,
            Stream::Neet => &NEET,
        }
    }

    pub fn subjects(&self) -> &'static [Subject] {
        self.definition().subjects
    }

    pub fn code(&self) -> &'static str {
        match self {
            Stream::Jee => "jee",
            Stream::Neet => "neet",
        }
    }

    pub fn from_code(code: &str) -> Option<Stream> {
        match code.to_ascii_lowercase().as_str() {
            "jee" => Some(Stream::Jee),
            "neet" => Some(Stream::Neet),
            _ => None,
        }
    }
}

// ==================== TIERS ====================

/// Tier whose exams prioritize the learner's historically weak chapters
pub const WEAKNESS_TIER_ID: u8 = 8;

/// `Final` counts attempts at this tier or above
pub const FINAL_TIER_MIN_TIER: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnlockRule {
    /// First `n` chapters of every subject in the stream must be mastered
    ChapterCount { n: u32 },
    /// Stream syllabus completion must reach `percent`
    SyllabusPercent { percent: u32 },
    /// Checked in order: tier attempted, attempt count, recent average
    HistoryGate {
        min_tier_attempted: u8,
        min_total_attempts: u32,
        min_recent_avg_score: u32,
    },
    Final {
        min_percent: u32,
        min_tier_nine_attempts: u32,
        min_xp: u32,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct Tier {
    pub id: u8,
    pub name: &'static str,
    pub short_label: &'static str,
    pub description: &'static str,
    /// Fraction of the medium quota converted to hard, in [0, 1)
    pub hard_bias: f64,
    pub unlock_rule: UnlockRule,
}

impl Tier {
    pub fn is_weakness_tier(&self) -> bool {
        self.id == WEAKNESS_TIER_ID
    }
}

/// The ten bosses, in unlock order
pub const TIER_CATALOG: [Tier; 10] = [
    Tier {
        id: 1,
        name: "Syllabus Scout",
        short_label: "B1",
        description: "Opening chapter of every subject",
        hard_bias: 0.0,
        unlock_rule: UnlockRule::ChapterCount { n: 1 },
    },
    Tier {
        id: 2,
        name: "Chapter Warden",
        short_label: "B2",
        description: "First three chapters of every subject",
        hard_bias: 0.0,
        unlock_rule: UnlockRule::ChapterCount { n: 3 },
    },
    Tier {
        id: 3,
        name: "Formula Golem",
        short_label: "B3",
        description: "First five chapters, a touch harder",
        hard_bias: 0.05,
        unlock_rule: UnlockRule::ChapterCount { n: 5 },
    },
    Tier {
        id: 4,
        name: "Halfway Hydra",
        short_label: "B4",
        description: "Half the syllabus mastered",
        hard_bias: 0.10,
        unlock_rule: UnlockRule::SyllabusPercent { percent: 50 },
    },
    Tier {
        id: 5,
        name: "Concept Kraken",
        short_label: "B5",
        description: "Two thirds of the syllabus mastered",
        hard_bias: 0.15,
        unlock_rule: UnlockRule::SyllabusPercent { percent: 65 },
    },
    Tier {
        id: 6,
        name: "Paper Phantom",
        short_label: "B6",
        description: "Most of the syllabus mastered",
        hard_bias: 0.20,
        unlock_rule: UnlockRule::SyllabusPercent { percent: 80 },
    },
    Tier {
        id: 7,
        name: "Veteran Sphinx",
        short_label: "B7",
        description: "Proven under exam conditions",
        hard_bias: 0.25,
        unlock_rule: UnlockRule::HistoryGate {
            min_tier_attempted: 6,
            min_total_attempts: 3,
            min_recent_avg_score: 60,
        },
    },
    Tier {
        id: 8,
        name: "Weakness Wraith",
        short_label: "B8",
        description: "Hunts the chapters you keep missing",
        hard_bias: 0.30,
        unlock_rule: UnlockRule::HistoryGate {
            min_tier_attempted: 7,
            min_total_attempts: 5,
            min_recent_avg_score: 65,
        },
    },
    Tier {
        id: 9,
        name: "Rank Leviathan",
        short_label: "B9",
        description: "Near-complete syllabus, heavy on hard questions",
        hard_bias: 0.40,
        unlock_rule: UnlockRule::SyllabusPercent { percent: 90 },
    },
    Tier {
        id: 10,
        name: "Exam Overlord",
        short_label: "B10",
        description: "Full mock exam at the hardest mix",
        hard_bias: 0.50,
        unlock_rule: UnlockRule::Final {
            min_percent: 95,
            min_tier_nine_attempts: 2,
            min_xp: 5000,
        },
    },
];

pub fn tier_by_id(id: u8) -> BattleResult<&'static Tier> {
    TIER_CATALOG
        .iter()
        .find(|t| t.id == id)
        .ok_or(BattleError::UnknownTier(id))
}

/// Reject malformed catalog entries. Run once at module init.
pub fn validate_catalog(catalog: &[Tier]) -> BattleResult<()> {
    if catalog.is_empty() {
        return Err(BattleError::Catalog("catalog is empty".to_string()));
    }
    for (i, tier) in catalog.iter().enumerate() {
        let expected_id = i as u8 + 1;
        if tier.id != expected_id {
            return Err(BattleError::Catalog(format!(
                "entry {} has id {}, expected {}",
                i, tier.id, expected_id
            )));
        }
        if tier.name.is_empty() || tier.short_label.is_empty() {
            return Err(BattleError::Catalog(format!("tier {} is missing a name", tier.id)));
        }
        if !(0.0..1.0).contains(&tier.hard_bias) {
            return Err(BattleError::Catalog(format!(
                "tier {} hard bias {} outside [0, 1)",
                tier.id, tier.hard_bias
            )));
        }
        match tier.unlock_rule {
            UnlockRule::ChapterCount { n } if n == 0 => {
                return Err(BattleError::Catalog(format!("tier {} requires 0 chapters", tier.id)));
            }
            UnlockRule::SyllabusPercent { percent } | UnlockRule::Final { min_percent: percent, .. }
                if percent > 100 =>
            {
                return Err(BattleError::Catalog(format!(
                    "tier {} requires {}% of the syllabus",
                    tier.id, percent
                )));
            }
            UnlockRule::HistoryGate { min_tier_attempted, min_recent_avg_score, .. }
                if min_tier_attempted == 0
                    || min_tier_attempted as usize > catalog.len()
                    || min_recent_avg_score > 100 =>
            {
                return Err(BattleError::Catalog(format!(
                    "tier {} has an unreachable history gate",
                    tier.id
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_is_valid() {
        assert!(validate_catalog(&TIER_CATALOG).is_ok());
        assert_eq!(TIER_CATALOG.len(), 10);
        assert!(TIER_CATALOG[WEAKNESS_TIER_ID as usize - 1].is_weakness_tier());
    }

    #[test]
    fn test_validate_rejects_bad_entries() {
        let mut broken = TIER_CATALOG;
        broken[3].hard_bias = 1.0;
        assert!(matches!(validate_catalog(&broken), Err(BattleError::Catalog(_))));

        let mut broken = TIER_CATALOG;
        broken[1].id = 5;
        assert!(matches!(validate_catalog(&broken), Err(BattleError::Catalog(_))));

        let mut broken = TIER_CATALOG;
        broken[0].unlock_rule = UnlockRule::ChapterCount { n: 0 };
        assert!(matches!(validate_catalog(&broken), Err(BattleError::Catalog(_))));

        let mut broken = TIER_CATALOG;
        broken[6].unlock_rule = UnlockRule::HistoryGate {
            min_tier_attempted: 11,
            min_total_attempts: 3,
            min_recent_avg_score: 60,
        };
        assert!(matches!(validate_catalog(&broken), Err(BattleError::Catalog(_))));
    }

    #[test]
    fn test_tier_lookup() {
        assert_eq!(tier_by_id(4).map(|t| t.name), Ok("Halfway Hydra"));
        assert_eq!(tier_by_id(11).map(|t| t.id), Err(BattleError::UnknownTier(11)));
    }

    #[test]
    fn test_hard_bias_shift() {
        let base = Stream::Jee.definition().pattern;
        let biased = base.with_hard_bias(0.10);
        assert_eq!(biased, Quota { easy: 5, medium: 9, hard: 11 });
        assert_eq!(biased.total(), base.total());

        // 20 * 0.15 = 3
        let neet = Stream::Neet.definition().pattern.with_hard_bias(0.15);
        assert_eq!(neet, Quota { easy: 15, medium: 17, hard: 13 });
    }

    #[test]
    fn test_hard_bias_never_underflows() {
        let quota = Quota { easy: 4, medium: 2, hard: 1 };
        let biased = quota.with_hard_bias(2.0);
        assert_eq!(biased, Quota { easy: 2, medium: 0, hard: 5 });
        assert_eq!(biased.total(), quota.total());
    }

    #[test]
    fn test_codes_round_trip_through_lookup() {
        assert_eq!(Subject::from_code("math"), Some(Subject::Math));
        assert_eq!(Subject::from_code("geo"), None);
        assert_eq!(Stream::from_code("JEE"), Some(Stream::Jee));
        assert_eq!(Difficulty::from_code("hard"), Some(Difficulty::Hard));
    }
}
