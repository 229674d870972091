use crate::models::{Question, QuizOption, MAX_OPTIONS, MIN_OPTIONS, OPTION_KEYS};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

const TEXT_FIELDS: [&str; 3] = ["intrebare", "question", "text"];

#[derive(Debug, Clone, Default, Serialize)]
pub struct NormalizedBatch {
    pub questions: Vec<Question>,
    pub dropped: usize,
}

pub fn normalize(raw: &Value) -> Option<Question> {
    let record = raw.as_object()?;

    // The first present field wins even if it trims to nothing.
    let intrebare = TEXT_FIELDS
        .iter()
        .filter_map(|field| record.get(*field))
        .find(|value| is_present(value))
        .and_then(cell_text)?;

    let options = match record.get("options").and_then(Value::as_array) {
        Some(list) if !list.is_empty() => options_from_list(list),
        _ => options_from_flat_fields(record),
    };
    if options.len() < MIN_OPTIONS {
        return None;
    }

    let mut correct_answers = Vec::new();
    for answer in resolve_correct_answers(record, &options) {
        if options.iter().any(|o| o.id == answer) && !correct_answers.contains(&answer) {
            correct_answers.push(answer);
        }
    }
    if correct_answers.is_empty() {
        correct_answers.push(options[0].id.clone());
    }

    let allow_multiple = correct_answers.len() > 1
        || explicit_flag(record.get("allowMultiple")).unwrap_or(false);

    Some(Question {
        id: record.get("id").and_then(cell_text).unwrap_or_default(),
        intrebare,
        options,
        correct_answers,
        allow_multiple,
        created_at: record
            .get("createdAt")
            .and_then(Value::as_str)
            .and_then(|s| s.parse::<DateTime<Utc>>().ok()),
        created_by: record.get("createdBy").and_then(cell_text),
    })
}

pub fn normalize_batch(rows: &[Value]) -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for row in rows {
        match normalize(row) {
            Some(question) => batch.questions.push(question),
            None => batch.dropped += 1,
        }
    }
    batch
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::String(s) => !s.is_empty(),
        Value::Number(_) => true,
        Value::Bool(b) => *b,
        _ => false,
    }
}

fn cell_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    (!text.is_empty()).then_some(text)
}

fn option_letter(id: Option<&Value>, index: usize) -> Option<String> {
    match id.and_then(cell_text) {
        Some(id) => Some(id.to_lowercase()),
        None => OPTION_KEYS.get(index).map(|k| k.to_string()),
    }
}

fn push_option(options: &mut Vec<QuizOption>, id: String, text: String) {
    if options.len() < MAX_OPTIONS && !options.iter().any(|o| o.id == id) {
        options.push(QuizOption { id, text });
    }
}

fn options_from_list(list: &[Value]) -> Vec<QuizOption> {
    let mut options = Vec::new();
    for (index, entry) in list.iter().enumerate() {
        let Some(text) = entry
            .get("text")
            .and_then(cell_text)
            .or_else(|| entry.get("value").and_then(cell_text))
        else {
            continue;
        };
        let Some(id) = option_letter(entry.get("id"), index) else {
            continue;
        };
        push_option(&mut options, id, text);
    }
    options
}

fn options_from_flat_fields(record: &Map<String, Value>) -> Vec<QuizOption> {
    let mut options = Vec::new();
    for key in OPTION_KEYS {
        let text = [format!("varianta_{key}"), key.to_string(), format!("option_{key}")]
            .iter()
            .find_map(|field| record.get(field).and_then(cell_text));
        if let Some(text) = text {
            push_option(&mut options, key.to_string(), text);
        }
    }
    options
}

fn resolve_correct_answers(record: &Map<String, Value>, options: &[QuizOption]) -> Vec<String> {
    let letters = |items: Vec<String>| -> Vec<String> {
        items
            .into_iter()
            .map(|a| a.trim().to_lowercase())
            .filter(|a| !a.is_empty())
            .collect()
    };

    if let Some(list) = record.get("correctAnswers").and_then(Value::as_array) {
        if !list.is_empty() {
            return letters(list.iter().filter_map(cell_text).collect());
        }
    }
    match record.get("raspuns_corect") {
        Some(Value::String(joined)) => {
            return letters(joined.split(',').map(str::to_string).collect());
        }
        Some(other) => {
            if let Some(single) = cell_text(other) {
                return letters(vec![single]);
            }
        }
        None => {}
    }
    if let Some(single) = record.get("correct_answer").and_then(cell_text) {
        return letters(vec![single]);
    }
    options.first().map(|o| vec![o.id.clone()]).unwrap_or_default()
}

fn explicit_flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

pub fn template_sample() -> Question {
    Question {
        id: String::new(),
        intrebare: "Care dintre urmatoarele doua optiuni sunt corecte pentru ... ?".into(),
        options: (1..=4)
            .zip(OPTION_KEYS)
            .map(|(n, key)| QuizOption {
                id: key.into(),
                text: format!("Varianta {n}"),
            })
            .collect(),
        correct_answers: vec!["a".into(), "c".into()],
        allow_multiple: true,
        created_at: None,
        created_by: None,
    }
}
