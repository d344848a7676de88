// Bulk import reducers for content, learner profiles, progress and history.
// Accept JSON arrays exported by the platform's document store (camelCase fields).

use spacetimedb::{reducer, ReducerContext, Identity, Timestamp, log, Table};
use crate::{is_authorized, Learner, ChapterProgress, BankQuestion, BossAttempt};
use crate::{learner, chapter_progress, question_bank, boss_attempt};
use crate::question::{validate_options, QuestionOption};
use crate::scorer::{Attempt, AttemptAnalytics, ChapterTally, DifficultyTally, SubjectTally, Tally};
use crate::tiers::{Difficulty, Stream, Subject};
use serde_json::Value;

fn str_field<'a>(val: &'a Value, key: &str) -> Result<&'a str, String> {
    val.get(key)
        .and_then(|v| v.as_str())
        .ok_or(format!("missing {}", key))
}

fn u64_field(val: &Value, key: &str) -> Result<u64, String> {
    val.get(key)
        .and_then(|v| v.as_u64())
        .ok_or(format!("missing {}", key))
}

fn u32_field(val: &Value, key: &str) -> Result<u32, String> {
    u32::try_from(u64_field(val, key)?).map_err(|_| format!("{} out of range", key))
}

fn array_field<'a>(val: &'a Value, key: &str) -> Result<&'a Vec<Value>, String> {
    val.get(key)
        .and_then(|v| v.as_array())
        .ok_or(format!("missing {}", key))
}

fn parse_array(json_data: &str, what: &str) -> Result<Vec<Value>, String> {
    let data: Value = serde_json::from_str(json_data)
        .map_err(|e| format!("Invalid JSON: {}", e))?;
    match data {
        Value::Array(items) => Ok(items),
        _ => Err(format!("Expected JSON array of {}", what)),
    }
}

fn parse_subject(val: &Value, key: &str) -> Result<Subject, String> {
    let code = str_field(val, key)?;
    Subject::from_code(code).ok_or(format!("unknown subject '{}'", code))
}

fn parse_difficulty(val: &Value, key: &str) -> Result<Difficulty, String> {
    let code = str_field(val, key)?;
    Difficulty::from_code(code).ok_or(format!("unknown difficulty '{}'", code))
}

fn parse_identity(hex: &str) -> Result<Identity, String> {
    Identity::from_hex(hex).map_err(|e| format!("invalid identity '{}': {}", hex, e))
}

/// Timestamps come either as SDK JSON {"__timestamp_micros_since_unix_epoch__": "123"}
/// or as RFC 3339 strings from the document store
pub fn parse_timestamp_json(val: &Value) -> Result<Timestamp, String> {
    if let Some(text) = val.as_str() {
        let parsed = chrono::DateTime::parse_from_rfc3339(text)
            .map_err(|e| format!("Invalid timestamp '{}': {}", text, e))?;
        return Ok(Timestamp::from_micros_since_unix_epoch(parsed.timestamp_micros()));
    }

    let micros_str = val.get("__timestamp_micros_since_unix_epoch__")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp field")?;
    let micros: i64 = micros_str.parse()
        .map_err(|e| format!("Invalid timestamp micros: {}", e))?;
    Ok(Timestamp::from_micros_since_unix_epoch(micros))
}

fn parse_tally(val: &Value) -> Result<Tally, String> {
    let tally = Tally {
        correct: u32_field(val, "correct")?,
        total: u32_field(val, "total")?,
    };
    if tally.correct > tally.total {
        return Err(format!("correct {} exceeds total {}", tally.correct, tally.total));
    }
    Ok(tally)
}

/// Parse one pool question: {chapterId, difficulty, promptText, options[{id,text}], correctOptionId, explanation?}
pub fn parse_question(val: &Value) -> Result<BankQuestion, String> {
    let options = array_field(val, "options")?
        .iter()
        .map(|o| {
            Ok(QuestionOption {
                id: str_field(o, "id")?.to_string(),
                text: str_field(o, "text")?.to_string(),
            })
        })
        .collect::<Result<Vec<_>, String>>()?;
    let correct_option_id = str_field(val, "correctOptionId")?.to_string();
    validate_options(&options, &correct_option_id)?;

    Ok(BankQuestion {
        id: 0, // auto_inc
        chapter_id: u32_field(val, "chapterId")?,
        difficulty: parse_difficulty(val, "difficulty")?,
        prompt: str_field(val, "promptText")?.to_string(),
        options,
        correct_option_id,
        explanation: val.get("explanation").and_then(|v| v.as_str()).map(|s| s.to_string()),
    })
}

/// Parse one chapter record: {chapterId, subject, name, completed: ["easy", ...]}
pub fn parse_chapter_progress(learner: Identity, val: &Value) -> Result<ChapterProgress, String> {
    let mut completed = Vec::new();
    for code in array_field(val, "completed")? {
        let code = code.as_str().ok_or("completed must hold strings")?;
        let difficulty = Difficulty::from_code(code).ok_or(format!("unknown difficulty '{}'", code))?;
        if !completed.contains(&difficulty) {
            completed.push(difficulty);
        }
    }
    Ok(ChapterProgress {
        id: 0,
        learner,
        chapter_id: u32_field(val, "chapterId")?,
        subject: parse_subject(val, "subject")?,
        name: str_field(val, "name")?.to_string(),
        completed,
    })
}

/// Parse one historical attempt: {tierId, timestamp, questionIds, scorePercent, stars, answered?, analytics?}
pub fn parse_attempt(val: &Value) -> Result<Attempt, String> {
    let tier_id = u8::try_from(u64_field(val, "tierId")?).map_err(|_| "tierId out of range".to_string())?;
    crate::tiers::tier_by_id(tier_id).map_err(|e| e.to_string())?;

    let analytics = match val.get("analytics") {
        Some(a) => AttemptAnalytics {
            by_subject: array_field(a, "bySubject")?
                .iter()
                .map(|s| Ok(SubjectTally { subject: parse_subject(s, "subject")?, tally: parse_tally(s)? }))
                .collect::<Result<Vec<_>, String>>()?,
            by_difficulty: array_field(a, "byDifficulty")?
                .iter()
                .map(|d| Ok(DifficultyTally { difficulty: parse_difficulty(d, "difficulty")?, tally: parse_tally(d)? }))
                .collect::<Result<Vec<_>, String>>()?,
            by_chapter: array_field(a, "byChapter")?
                .iter()
                .map(|c| {
                    Ok(ChapterTally {
                        chapter_id: u32_field(c, "chapterId")?,
                        chapter_name: str_field(c, "chapterName")?.to_string(),
                        subject: parse_subject(c, "subject")?,
                        tally: parse_tally(c)?,
                    })
                })
                .collect::<Result<Vec<_>, String>>()?,
        },
        None => AttemptAnalytics::default(),
    };

    let stars = u64_field(val, "stars")?;
    if stars > 3 {
        return Err(format!("stars {} out of range", stars));
    }
    Ok(Attempt {
        tier_id,
        timestamp: parse_timestamp_json(val.get("timestamp").ok_or("missing timestamp")?)?,
        question_ids: array_field(val, "questionIds")?
            .iter()
            .map(|v| v.as_u64().ok_or("questionIds must hold integers".to_string()))
            .collect::<Result<Vec<_>, String>>()?,
        score_percent: u32_field(val, "scorePercent")?.min(100),
        stars: stars as u8,
        // Older exports predate the answered count; per-question review is not migrated
        answered: match val.get("answered") {
            Some(_) => u32_field(val, "answered")?,
            None => 0,
        },
        analytics,
        outcomes: Vec::new(),
    })
}

/// Bulk import question pools from a JSON array
/// The whole batch is rejected if any record is malformed
#[reducer]
pub fn import_question_pool(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    if !is_authorized(ctx) {
        log::warn!("Unauthorized import_question_pool attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let records = parse_array(&json_data, "questions")?;
    let mut parsed = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        parsed.push(parse_question(record).map_err(|e| format!("Question {}: {}", i, e))?);
    }

    let count = parsed.len();
    for question in parsed {
        ctx.db.question_bank().insert(question);
    }
    log::info!("[IMPORT] {} questions added to pools", count);
    Ok(())
}

/// Upsert learner profiles: [{identity, name, stream, totalXp}]
#[reducer]
pub fn sync_learner_profile(ctx: &ReducerContext, json_data: String) -> Result<(), String> {
    if !is_authorized(ctx) {
        log::warn!("Unauthorized sync_learner_profile attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let records = parse_array(&json_data, "learners")?;
    for (i, record) in records.iter().enumerate() {
        let stream_code = str_field(record, "stream").map_err(|e| format!("Learner {}: {}", i, e))?;
        let learner = Learner {
            identity: parse_identity(str_field(record, "identity").map_err(|e| format!("Learner {}: {}", i, e))?)?,
            name: str_field(record, "name").map_err(|e| format!("Learner {}: {}", i, e))?.to_string(),
            stream: Stream::from_code(stream_code).ok_or(format!("Learner {}: unknown stream '{}'", i, stream_code))?,
            total_xp: u32_field(record, "totalXp").map_err(|e| format!("Learner {}: {}", i, e))?,
            updated_at: ctx.timestamp,
        };

        if ctx.db.learner().identity().find(&learner.identity).is_some() {
            ctx.db.learner().identity().update(learner);
        } else {
            ctx.db.learner().insert(learner);
        }
    }

    log::info!("[IMPORT] synced {} learner profiles", records.len());
    Ok(())
}

/// Replace one learner's chapter progress snapshot
#[reducer]
pub fn sync_chapter_progress(ctx: &ReducerContext, learner_identity: String, json_data: String) -> Result<(), String> {
    if !is_authorized(ctx) {
        log::warn!("Unauthorized sync_chapter_progress attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let learner = parse_identity(&learner_identity)?;
    let records = parse_array(&json_data, "chapters")?;
    let mut parsed = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        parsed.push(parse_chapter_progress(learner, record).map_err(|e| format!("Chapter {}: {}", i, e))?);
    }

    let stale: Vec<u64> = ctx.db.chapter_progress().learner().filter(&learner).map(|row| row.id).collect();
    for id in &stale {
        ctx.db.chapter_progress().id().delete(id);
    }
    let mastered = parsed.iter().filter(|row| row.to_chapter().is_mastered()).count();
    let count = parsed.len();
    for row in parsed {
        ctx.db.chapter_progress().insert(row);
    }

    log::info!("[IMPORT] chapter progress learner:{} chapters:{} mastered:{} replaced:{}", learner, count, mastered, stale.len());
    Ok(())
}

/// Append historical attempts for one learner (migration from the old store)
/// Existing attempts are never modified
#[reducer]
pub fn import_attempt_history(ctx: &ReducerContext, learner_identity: String, json_data: String) -> Result<(), String> {
    if !is_authorized(ctx) {
        log::warn!("Unauthorized import_attempt_history attempt by {}", ctx.sender);
        return Err("Unauthorized".to_string());
    }

    let learner = parse_identity(&learner_identity)?;
    let records = parse_array(&json_data, "attempts")?;
    let mut parsed = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        parsed.push(parse_attempt(record).map_err(|e| format!("Attempt {}: {}", i, e))?);
    }

    let count = parsed.len();
    for attempt in parsed {
        ctx.db.boss_attempt().insert(BossAttempt { id: 0, learner, attempt });
    }
    log::info!("✅ Imported {} boss attempts for {}", count, learner);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_question() {
        let question = parse_question(&json!({
            "chapterId": 12,
            "difficulty": "hard",
            "promptText": "Unit of force?",
            "options": [{"id": "a", "text": "Newton"}, {"id": "b", "text": "Joule"}],
            "correctOptionId": "a",
            "explanation": "F = ma"
        })).unwrap();
        assert_eq!(question.chapter_id, 12);
        assert_eq!(question.difficulty, Difficulty::Hard);
        assert_eq!(question.options.len(), 2);
        assert_eq!(question.explanation.as_deref(), Some("F = ma"));
    }

    #[test]
    fn test_parse_question_rejects_dangling_answer() {
        let err = parse_question(&json!({
            "chapterId": 12,
            "difficulty": "easy",
            "promptText": "?",
            "options": [{"id": "a", "text": "x"}, {"id": "b", "text": "y"}],
            "correctOptionId": "c"
        })).unwrap_err();
        assert!(err.contains("not one of the options"));

        assert!(parse_question(&json!({
            "chapterId": 1, "difficulty": "extreme", "promptText": "?",
            "options": [{"id": "a", "text": "x"}, {"id": "b", "text": "y"}],
            "correctOptionId": "a"
        })).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let sdk = parse_timestamp_json(&json!({"__timestamp_micros_since_unix_epoch__": "1700000000000000"})).unwrap();
        assert_eq!(sdk.to_micros_since_unix_epoch(), 1_700_000_000_000_000);

        let rfc = parse_timestamp_json(&json!("2023-11-14T22:13:20Z")).unwrap();
        assert_eq!(rfc.to_micros_since_unix_epoch(), 1_700_000_000_000_000);

        assert!(parse_timestamp_json(&json!("yesterday")).is_err());
    }

    #[test]
    fn test_parse_chapter_progress_dedups_difficulties() {
        let row = parse_chapter_progress(parse_identity(&"00".repeat(32)).unwrap(), &json!({
            "chapterId": 3,
            "subject": "chem",
            "name": "Mole Concept",
            "completed": ["easy", "medium", "easy", "hard"]
        })).unwrap();
        assert_eq!(row.completed, vec![Difficulty::Easy, Difficulty::Medium, Difficulty::Hard]);
        assert!(row.to_chapter().is_mastered());
    }

    #[test]
    fn test_parse_attempt() {
        let attempt = parse_attempt(&json!({
            "tierId": 4,
            "timestamp": "2024-03-01T10:00:00+05:30",
            "questionIds": [5, 9, 11],
            "scorePercent": 67,
            "stars": 2,
            "analytics": {
                "bySubject": [{"subject": "phy", "correct": 2, "total": 3}],
                "byDifficulty": [{"difficulty": "medium", "correct": 2, "total": 3}],
                "byChapter": [{"chapterId": 1, "chapterName": "Kinematics", "subject": "phy", "correct": 2, "total": 3}]
            }
        })).unwrap();
        assert_eq!(attempt.tier_id, 4);
        assert_eq!(attempt.question_ids, vec![5, 9, 11]);
        assert_eq!(attempt.analytics.by_chapter[0].tally, Tally { correct: 2, total: 3 });
        assert_eq!(attempt.answered, 0);
        assert!(attempt.outcomes.is_empty());

        assert!(parse_attempt(&json!({
            "tierId": 42, "timestamp": "2024-03-01T10:00:00Z",
            "questionIds": [], "scorePercent": 0, "stars": 0
        })).is_err());
    }
}
