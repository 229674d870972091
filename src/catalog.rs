use crate::access::access_level;
use crate::error::EngineError;
use crate::models::{
    normalize_email, CurrentUser, Question, QuestionSet, QuizBundle, QuizOption, QuizResult, SetSummary,
    ValidationIssue, Visibility,
};
use crate::normalize::{normalize, normalize_batch};
use crate::store::{Collection, DocumentStore, SharingOp};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use validator::Validate;

const MAX_TAGS: usize = 5;
pub const DEFAULT_BUNDLE_QUESTION_COUNT: i64 = 10;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewSet {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(default)]
    #[validate(length(max = 2000))]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewQuestion {
    #[validate(length(min = 1))]
    pub intrebare: String,
    pub options: Vec<QuizOption>,
    pub correct_answers: Vec<String>,
    #[serde(default)]
    pub allow_multiple: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct NewBundle {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub question_count: Option<i64>,
    #[validate(length(min = 1))]
    pub set_ids: Vec<String>,
    #[serde(default)]
    pub visibility: Visibility,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ShareRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportReport {
    pub imported: usize,
    pub dropped: usize,
    pub question_ids: Vec<String>,
}

fn check<T: Validate>(payload: &T) -> Result<(), EngineError> {
    payload.validate().map_err(EngineError::from)
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags.iter().flat_map(|t| t.split(',')) {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t == tag) {
            out.push(tag.to_string());
        }
    }
    out.truncate(MAX_TAGS);
    out
}

async fn owned_set(store: &dyn DocumentStore, user: &CurrentUser, set_id: &str) -> Result<QuestionSet, EngineError> {
    let set = store
        .get_set(set_id)
        .await?
        .ok_or_else(|| EngineError::not_found("question set", set_id))?;
    if set.owner_id != user.uid {
        return Err(EngineError::Forbidden);
    }
    Ok(set)
}

pub async fn create_set(store: &dyn DocumentStore, user: &CurrentUser, new: NewSet) -> Result<QuestionSet, EngineError> {
    check(&new)?;
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(EngineError::validation("name", "must not be empty"));
    }
    let set = store
        .insert_set(QuestionSet {
            id: String::new(),
            name,
            description: new.description.trim().to_string(),
            tags: normalize_tags(&new.tags),
            visibility: new.visibility,
            owner_id: user.uid.clone(),
            owner_name: user.owner_name(),
            shared_with: Vec::new(),
            question_count: 0,
            created_at: None,
            updated_at: None,
        })
        .await?;
    info!("user {} created question set {}", user.uid, set.id);
    Ok(set)
}

pub async fn list_set_questions(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    set_id: &str,
) -> Result<Vec<Question>, EngineError> {
    let set = store
        .get_set(set_id)
        .await?
        .ok_or_else(|| EngineError::not_found("question set", set_id))?;
    if access_level(user, &set).is_none() {
        return Err(EngineError::Forbidden);
    }
    let questions = store
        .list_questions(set_id)
        .await?
        .into_iter()
        .filter_map(|doc| {
            normalize(&doc.data).map(|mut q| {
                q.id = doc.id;
                q
            })
        })
        .collect();
    Ok(questions)
}

pub async fn add_question(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    set_id: &str,
    new: NewQuestion,
) -> Result<Question, EngineError> {
    check(&new)?;
    owned_set(store, user, set_id).await?;

    let options: Vec<QuizOption> = new
        .options
        .into_iter()
        .map(|o| QuizOption {
            id: o.id.trim().to_lowercase(),
            text: o.text.trim().to_string(),
        })
        .filter(|o| !o.text.is_empty())
        .collect();
    let correct_answers: Vec<String> = new
        .correct_answers
        .iter()
        .map(|a| a.trim().to_lowercase())
        .filter(|a| !a.is_empty())
        .collect();

    let mut question = Question {
        id: String::new(),
        intrebare: new.intrebare.trim().to_string(),
        options,
        correct_answers,
        allow_multiple: new.allow_multiple,
        created_at: Some(Utc::now()),
        created_by: Some(user.uid.clone()),
    };
    question.validate().map_err(EngineError::Validation)?;

    let doc = serde_json::to_value(&question).map_err(crate::store::StoreError::from)?;
    let ids = store.add_questions(set_id, vec![doc]).await?;
    question.id = ids.into_iter().next().unwrap_or_default();
    Ok(question)
}

pub async fn import_questions(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    set_id: &str,
    rows: &[Value],
) -> Result<ImportReport, EngineError> {
    owned_set(store, user, set_id).await?;
    let batch = normalize_batch(rows);
    let created_at = Utc::now();

    let mut docs = Vec::with_capacity(batch.questions.len());
    for mut question in batch.questions {
        question.created_at = Some(created_at);
        question.created_by = Some(user.uid.clone());
        docs.push(serde_json::to_value(&question).map_err(crate::store::StoreError::from)?);
    }

    let question_ids = if docs.is_empty() {
        Vec::new()
    } else {
        store.add_questions(set_id, docs).await?
    };
    info!(
        "imported {} questions into {} ({} rows dropped)",
        question_ids.len(),
        set_id,
        batch.dropped
    );
    Ok(ImportReport {
        imported: question_ids.len(),
        dropped: batch.dropped,
        question_ids,
    })
}

pub async fn delete_question(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    set_id: &str,
    question_id: &str,
) -> Result<(), EngineError> {
    owned_set(store, user, set_id).await?;
    if !store.delete_question(set_id, question_id).await? {
        return Err(EngineError::not_found("question", question_id));
    }
    Ok(())
}

pub async fn update_sharing(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    collection: Collection,
    id: &str,
    request: &ShareRequest,
    op: SharingOp,
) -> Result<Vec<String>, EngineError> {
    check(request)?;
    let owner = match collection {
        Collection::QuestionSets => store.get_set(id).await?.map(|s| s.owner_id),
        Collection::QuizBundles => store.get_bundle(id).await?.map(|b| b.owner_id),
    }
    .ok_or_else(|| EngineError::not_found(collection.as_str(), id))?;
    if owner != user.uid {
        return Err(EngineError::Forbidden);
    }
    let email = normalize_email(&request.email);
    Ok(store.update_sharing(collection, id, &email, op).await?)
}

pub async fn create_bundle(
    store: &dyn DocumentStore,
    user: &CurrentUser,
    new: NewBundle,
) -> Result<QuizBundle, EngineError> {
    check(&new)?;
    let name = new.name.trim().to_string();
    if name.is_empty() {
        return Err(EngineError::validation("name", "must not be empty"));
    }

    let mut set_ids: Vec<String> = Vec::new();
    for id in &new.set_ids {
        if !set_ids.contains(id) {
            set_ids.push(id.clone());
        }
    }
    let fetched = futures::future::try_join_all(set_ids.iter().map(|id| store.get_set(id))).await?;

    let mut issues = Vec::new();
    let mut summaries = Vec::with_capacity(fetched.len());
    for (i, set) in fetched.into_iter().enumerate() {
        match set {
            Some(set) if access_level(user, &set).is_some() => summaries.push(SetSummary {
                id: set.id,
                name: set.name,
                question_count: set.question_count,
            }),
            _ => issues.push(ValidationIssue::new(
                format!("setIds[{i}]"),
                "must reference an accessible question set",
            )),
        }
    }
    if !issues.is_empty() {
        return Err(EngineError::Validation(issues));
    }

    let total: u32 = summaries.iter().map(|s| s.question_count).sum();
    if total == 0 {
        return Err(EngineError::validation("setIds", "selected sets contain no questions"));
    }
    let question_count = new
        .question_count
        .unwrap_or(DEFAULT_BUNDLE_QUESTION_COUNT)
        .clamp(1, i64::from(total)) as u32;

    let bundle = store
        .insert_bundle(QuizBundle {
            id: String::new(),
            name,
            description: new.description.trim().to_string(),
            question_count,
            total_available_questions: total,
            set_ids,
            set_summaries: summaries,
            visibility: new.visibility,
            owner_id: user.uid.clone(),
            owner_name: user.owner_name(),
            shared_with: Vec::new(),
            created_at: None,
            updated_at: None,
        })
        .await?;
    info!("user {} created bundle {} over {} sets", user.uid, bundle.id, bundle.set_ids.len());
    Ok(bundle)
}

pub async fn history(store: &dyn DocumentStore, user: &CurrentUser) -> Result<Vec<QuizResult>, EngineError> {
    let mut results = store.results_for_user(&user.uid).await?;
    results.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    Ok(results)
}
