use crate::access::access_level;
use crate::error::EngineError;
use crate::models::{score_answer, CurrentUser, Question, QuizResult, SourceKind};
use crate::normalize::normalize;
use crate::store::{DocumentStore, StoredDocument};
use chrono::Utc;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_QUESTION_TIME_LIMIT_SECS: u32 = 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuizError {
    #[error("no quiz in progress")]
    NoActiveQuiz,
    #[error("quiz already finished")]
    AlreadyFinished,
    #[error("quiz is not finished yet")]
    NotFinished,
    #[error("question {0} is not part of this quiz")]
    UnknownQuestion(String),
    #[error("question {0} was already graded")]
    AnswerLocked(String),
    #[error("question {0} is not the current question")]
    NotCurrentQuestion(String),
    #[error("current question has not been answered")]
    NotAnswered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizSelection {
    pub source_kind: SourceKind,
    pub source_id: String,
    pub requested_count: i64,
    #[serde(default)]
    pub randomize: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum RawAnswer {
    One(String),
    Many(Vec<String>),
    Other(serde_json::Value),
}

impl RawAnswer {
    pub fn letters(&self) -> BTreeSet<String> {
        let items: Vec<&str> = match self {
            RawAnswer::One(s) => vec![s.as_str()],
            RawAnswer::Many(list) => list.iter().map(String::as_str).collect(),
            RawAnswer::Other(_) => Vec::new(),
        };
        items
            .into_iter()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnswerOutcome {
    pub question_id: String,
    pub correct: bool,
    pub correct_answers: Vec<String>,
    pub implicit: bool,
}

#[derive(Debug, Clone)]
pub struct QuestionPool {
    pub source_kind: SourceKind,
    pub source_id: String,
    pub source_name: String,
    pub questions: Vec<Question>,
    pub dropped: usize,
}

impl QuestionPool {
    fn extend_from(&mut self, docs: Vec<StoredDocument>, namespace: Option<&str>) {
        for doc in docs {
            match normalize(&doc.data) {
                Some(mut question) => {
                    question.id = match namespace {
                        Some(set_id) => format!("{}-{}", set_id, doc.id),
                        None => doc.id,
                    };
                    self.questions.push(question);
                }
                None => self.dropped += 1,
            }
        }
    }
}

pub async fn load_pool(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    kind: SourceKind,
    source_id: &str,
) -> Result<QuestionPool, EngineError> {
    let pool = match kind {
        SourceKind::Set => {
            let set = store
                .get_set(source_id)
                .await?
                .ok_or_else(|| EngineError::not_found("question set", source_id))?;
            if access_level(user, &set).is_none() {
                return Err(EngineError::Forbidden);
            }
            let docs = store.list_questions(&set.id).await?;
            let mut pool = QuestionPool {
                source_kind: kind,
                source_id: set.id,
                source_name: set.name,
                questions: Vec::with_capacity(docs.len()),
                dropped: 0,
            };
            pool.extend_from(docs, None);
            pool
        }
        SourceKind::Bundle => {
            let bundle = store
                .get_bundle(source_id)
                .await?
                .ok_or_else(|| EngineError::not_found("quiz bundle", source_id))?;
            if access_level(user, &bundle).is_none() {
                return Err(EngineError::Forbidden);
            }
            let fetched = futures::future::try_join_all(
                bundle.set_ids.iter().map(|set_id| store.list_questions(set_id)),
            )
            .await?;
            let mut pool = QuestionPool {
                source_kind: kind,
                source_id: bundle.id,
                source_name: bundle.name,
                questions: Vec::new(),
                dropped: 0,
            };
            for (set_id, docs) in bundle.set_ids.iter().zip(fetched) {
                pool.extend_from(docs, Some(set_id.as_str()));
            }
            pool
        }
    };
    if pool.dropped > 0 {
        info!(
            "dropped {} malformed question records from {}",
            pool.dropped, pool.source_id
        );
    }
    Ok(pool)
}

pub async fn materialize<R: Rng + Send + ?Sized>(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    selection: &QuizSelection,
    time_limit_secs: u32,
    rng: &mut R,
) -> Result<QuizInstance, EngineError> {
    let pool = load_pool(store, user, selection.source_kind, &selection.source_id).await?;
    QuizInstance::from_pool(pool, selection.requested_count, selection.randomize, time_limit_secs, rng)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct QuizInstance {
    pub source_id: String,
    pub source_name: String,
    pub source_kind: SourceKind,
    pub questions: Vec<Question>,
    pub answers: HashMap<String, BTreeSet<String>>,
    pub validated: HashMap<String, bool>,
    // Graded by the timer; final.
    #[serde(default)]
    pub expired: HashSet<String>,
    pub current_index: usize,
    pub score: u32,
    pub incorrect_count: u32,
    pub time_limit_secs: u32,
    pub timer_seconds_remaining: u32,
    pub finished: bool,
    pub passed: bool,
}

impl QuizInstance {
    pub fn from_pool<R: Rng + ?Sized>(
        pool: QuestionPool,
        requested_count: i64,
        randomize: bool,
        time_limit_secs: u32,
        rng: &mut R,
    ) -> Result<Self, EngineError> {
        let QuestionPool {
            source_kind,
            source_id,
            source_name,
            mut questions,
            ..
        } = pool;
        if questions.is_empty() {
            return Err(EngineError::EmptyQuestionPool { source_id });
        }

        let available = questions.len();
        let count = requested_count.clamp(1, available as i64) as usize;
        if randomize {
            questions.shuffle(rng);
        }
        questions.truncate(count);
        debug!("materialized {} of {} questions from {}", count, available, source_id);

        Ok(Self {
            source_id,
            source_name,
            source_kind,
            questions,
            answers: HashMap::new(),
            validated: HashMap::new(),
            expired: HashSet::new(),
            current_index: 0,
            score: 0,
            incorrect_count: 0,
            time_limit_secs,
            timer_seconds_remaining: time_limit_secs,
            finished: false,
            passed: false,
        })
    }

    pub fn total_questions(&self) -> usize {
        self.questions.len()
    }

    pub fn current_question(&self) -> Option<&Question> {
        self.questions.get(self.current_index)
    }

    // Answers are only taken for the question at `current_index`.
    fn current_position(&self, question_id: &str) -> Result<usize, QuizError> {
        let index = self
            .questions
            .iter()
            .position(|q| q.id == question_id)
            .ok_or_else(|| QuizError::UnknownQuestion(question_id.to_string()))?;
        if index != self.current_index {
            return Err(QuizError::NotCurrentQuestion(question_id.to_string()));
        }
        Ok(index)
    }

    pub fn stage_answer(&mut self, question_id: &str, raw: &RawAnswer) -> Result<(), QuizError> {
        if self.finished {
            return Err(QuizError::AlreadyFinished);
        }
        self.current_position(question_id)?;
        if self.validated.contains_key(question_id) {
            return Err(QuizError::AnswerLocked(question_id.to_string()));
        }
        self.answers.insert(question_id.to_string(), raw.letters());
        Ok(())
    }

    pub fn submit_answer(&mut self, question_id: &str, raw: &RawAnswer) -> Result<AnswerOutcome, QuizError> {
        if self.finished {
            return Err(QuizError::AlreadyFinished);
        }
        let index = self.current_position(question_id)?;
        if self.expired.contains(question_id) {
            return Err(QuizError::AnswerLocked(question_id.to_string()));
        }
        self.answers.insert(question_id.to_string(), raw.letters());
        Ok(self.grade(index, false))
    }

    fn grade(&mut self, index: usize, implicit: bool) -> AnswerOutcome {
        let question = &self.questions[index];
        let question_id = question.id.clone();
        let correct = self
            .answers
            .get(&question_id)
            .is_some_and(|submitted| score_answer(question, submitted));
        let correct_answers = question.correct_answers.clone();

        match self.validated.insert(question_id.clone(), correct) {
            Some(true) => self.score -= 1,
            Some(false) => self.incorrect_count -= 1,
            None => {}
        }
        if implicit {
            self.expired.insert(question_id.clone());
        }
        if correct {
            self.score += 1;
        } else {
            self.incorrect_count += 1;
        }

        AnswerOutcome {
            question_id,
            correct,
            correct_answers,
            implicit,
        }
    }

    pub fn tick(&mut self, elapsed_secs: u32) -> Option<AnswerOutcome> {
        if self.finished || elapsed_secs == 0 {
            return None;
        }
        let current_id = self.current_question()?.id.clone();
        if self.validated.contains_key(&current_id) {
            return None;
        }
        self.timer_seconds_remaining = self.timer_seconds_remaining.saturating_sub(elapsed_secs);
        if self.timer_seconds_remaining > 0 {
            return None;
        }
        info!("time expired on question {}", current_id);
        Some(self.grade(self.current_index, true))
    }

    pub fn advance(&mut self) -> Result<(), QuizError> {
        if self.finished {
            return Err(QuizError::AlreadyFinished);
        }
        let current_id = self
            .current_question()
            .map(|q| q.id.as_str())
            .ok_or(QuizError::NotAnswered)?;
        if !self.validated.contains_key(current_id) {
            return Err(QuizError::NotAnswered);
        }
        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            self.timer_seconds_remaining = self.time_limit_secs;
        } else {
            self.finished = true;
            self.passed = self.score as usize * 2 >= self.questions.len();
        }
        Ok(())
    }

    pub fn finish(&self, user_id: &str) -> Result<QuizResult, QuizError> {
        if !self.finished {
            return Err(QuizError::NotFinished);
        }
        Ok(QuizResult {
            user_id: user_id.to_string(),
            source_kind: self.source_kind,
            source_id: self.source_id.clone(),
            source_name: self.source_name.clone(),
            correct_answers: self.score,
            total_questions: self.questions.len() as u32,
            passed: self.passed,
            timestamp: Utc::now(),
        })
    }
}
