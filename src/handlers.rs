use crate::access::{resolve_accessible_bundles, resolve_accessible_sets};
use crate::catalog::{self, ImportReport, NewBundle, NewQuestion, NewSet, ShareRequest};
use crate::error::{AppError, EngineError};
use crate::models::{Accessible, CurrentUser, Question, QuestionSet, QuizBundle, QuizOption, QuizResult};
use crate::normalize::template_sample;
use crate::quiz::{materialize, AnswerOutcome, QuizError, QuizInstance, QuizSelection, RawAnswer};
use crate::state::{ActiveQuiz, AppState};
use crate::store::{Collection, SharingOp};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use validator::Validate;

fn request_id_from_headers(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
}

fn header_text(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn current_user(headers: &HeaderMap, req_id: &str) -> Result<CurrentUser, AppError> {
    let uid = header_text(headers, "x-user-id")
        .ok_or_else(|| AppError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", "not logged in", req_id))?;
    let mut user = CurrentUser::new(uid, header_text(headers, "x-user-email").as_deref());
    user.display_name = header_text(headers, "x-user-name");
    Ok(user)
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

impl<T> From<Vec<T>> for ListResponse<T> {
    fn from(items: Vec<T>) -> Self {
        Self { total: items.len(), items }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MeResponse {
    #[serde(flatten)]
    pub user: CurrentUser,
    pub owner_name: String,
}

pub async fn me(headers: HeaderMap) -> Result<Json<MeResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    Ok(Json(MeResponse {
        owner_name: user.owner_name(),
        user,
    }))
}

pub async fn list_sets(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListResponse<Accessible<QuestionSet>>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let sets = resolve_accessible_sets(state.store.as_ref(), &user)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(sets.into()))
}

pub async fn create_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewSet>,
) -> Result<(StatusCode, Json<QuestionSet>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let set = catalog::create_set(state.store.as_ref(), &user, payload)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok((StatusCode::CREATED, Json(set)))
}

pub async fn list_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(set_id): Path<String>,
) -> Result<Json<ListResponse<Question>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let questions = catalog::list_set_questions(state.store.as_ref(), &user, &set_id)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(questions.into()))
}

pub async fn add_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(set_id): Path<String>,
    Json(payload): Json<NewQuestion>,
) -> Result<(StatusCode, Json<Question>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let question = catalog::add_question(state.store.as_ref(), &user, &set_id, payload)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok((StatusCode::CREATED, Json(question)))
}

pub async fn delete_question(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path((set_id, question_id)): Path<(String, String)>,
) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    catalog::delete_question(state.store.as_ref(), &user, &set_id, &question_id)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct ImportPayload {
    pub rows: Vec<Value>,
}

pub async fn import_questions(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(set_id): Path<String>,
    Json(payload): Json<ImportPayload>,
) -> Result<Json<ImportReport>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let report = catalog::import_questions(state.store.as_ref(), &user, &set_id, &payload.rows)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(report))
}

pub async fn export_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(set_id): Path<String>,
) -> Result<Json<Vec<Question>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let questions = catalog::list_set_questions(state.store.as_ref(), &user, &set_id)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(questions))
}

pub async fn import_template() -> Json<Vec<Question>> {
    Json(vec![template_sample()])
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareResponse {
    pub shared_with: Vec<String>,
}

async fn change_sharing(
    state: &AppState,
    headers: &HeaderMap,
    collection: Collection,
    id: &str,
    request: &ShareRequest,
    op: SharingOp,
) -> Result<Json<ShareResponse>, AppError> {
    let req_id = request_id_from_headers(headers);
    let user = current_user(headers, &req_id)?;
    let shared_with = catalog::update_sharing(state.store.as_ref(), &user, collection, id, request, op)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(ShareResponse { shared_with }))
}

pub async fn share_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ShareRequest>,
) -> Result<Json<ShareResponse>, AppError> {
    change_sharing(&state, &headers, Collection::QuestionSets, &id, &payload, SharingOp::Add).await
}

pub async fn unshare_set(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ShareRequest>,
) -> Result<Json<ShareResponse>, AppError> {
    change_sharing(&state, &headers, Collection::QuestionSets, &id, &payload, SharingOp::Remove).await
}

pub async fn share_bundle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ShareRequest>,
) -> Result<Json<ShareResponse>, AppError> {
    change_sharing(&state, &headers, Collection::QuizBundles, &id, &payload, SharingOp::Add).await
}

pub async fn unshare_bundle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Json(payload): Json<ShareRequest>,
) -> Result<Json<ShareResponse>, AppError> {
    change_sharing(&state, &headers, Collection::QuizBundles, &id, &payload, SharingOp::Remove).await
}

pub async fn list_bundles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListResponse<Accessible<QuizBundle>>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let bundles = resolve_accessible_bundles(state.store.as_ref(), &user)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(bundles.into()))
}

pub async fn create_bundle(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<NewBundle>,
) -> Result<(StatusCode, Json<QuizBundle>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let bundle = catalog::create_bundle(state.store.as_ref(), &user, payload)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok((StatusCode::CREATED, Json(bundle)))
}

pub async fn history(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ListResponse<QuizResult>>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let results = catalog::history(state.store.as_ref(), &user)
        .await
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(results.into()))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionView {
    pub id: String,
    pub intrebare: String,
    pub options: Vec<QuizOption>,
    pub allow_multiple: bool,
    pub selected: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correct_answers: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizView {
    pub source_id: String,
    pub source_name: String,
    pub source_kind: crate::models::SourceKind,
    pub questions: Vec<QuestionView>,
    pub current_index: usize,
    pub total_questions: usize,
    pub score: u32,
    pub incorrect_count: u32,
    pub time_limit_secs: u32,
    pub timer_seconds_remaining: u32,
    pub finished: bool,
    pub passed: bool,
}

impl From<&QuizInstance> for QuizView {
    fn from(quiz: &QuizInstance) -> Self {
        let questions = quiz
            .questions
            .iter()
            .map(|q| {
                let correct = quiz.validated.get(&q.id).copied();
                QuestionView {
                    id: q.id.clone(),
                    intrebare: q.intrebare.clone(),
                    options: q.options.clone(),
                    allow_multiple: q.allow_multiple,
                    selected: quiz
                        .answers
                        .get(&q.id)
                        .map(|s| s.iter().cloned().collect())
                        .unwrap_or_default(),
                    correct,
                    correct_answers: correct.map(|_| q.correct_answers.clone()),
                }
            })
            .collect();
        Self {
            source_id: quiz.source_id.clone(),
            source_name: quiz.source_name.clone(),
            source_kind: quiz.source_kind,
            questions,
            current_index: quiz.current_index,
            total_questions: quiz.total_questions(),
            score: quiz.score,
            incorrect_count: quiz.incorrect_count,
            time_limit_secs: quiz.time_limit_secs,
            timer_seconds_remaining: quiz.timer_seconds_remaining,
            finished: quiz.finished,
            passed: quiz.passed,
        }
    }
}

fn with_active_quiz<T>(
    state: &AppState,
    uid: &str,
    f: impl FnOnce(&mut ActiveQuiz) -> Result<T, EngineError>,
) -> Result<T, EngineError> {
    let mut entry = state.quizzes.get_mut(uid).ok_or(QuizError::NoActiveQuiz)?;
    entry.sync_timer();
    f(entry.value_mut())
}

pub async fn start_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(selection): Json<QuizSelection>,
) -> Result<(StatusCode, Json<QuizView>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let mut rng = StdRng::from_entropy();
    let instance = materialize(
        state.store.as_ref(),
        &user,
        &selection,
        state.config.question_time_limit_secs,
        &mut rng,
    )
    .await
    .map_err(|e| e.into_app_error(req_id))?;
    let view = QuizView::from(&instance);
    if state.quizzes.insert(user.uid.clone(), ActiveQuiz::new(instance)).is_some() {
        info!("user {} abandoned a quiz in progress", user.uid);
    }
    info!("user {} started a quiz on {}", user.uid, selection.source_id);
    Ok((StatusCode::CREATED, Json(view)))
}

pub async fn get_quiz(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<QuizView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let view = with_active_quiz(&state, &user.uid, |active| Ok(QuizView::from(&active.instance)))
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(view))
}

pub async fn abandon_quiz(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    state
        .quizzes
        .remove(&user.uid)
        .ok_or_else(|| EngineError::from(QuizError::NoActiveQuiz).into_app_error(req_id))?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    #[validate(length(min = 1))]
    pub question_id: String,
    #[serde(default)]
    pub answer: Option<RawAnswer>,
}

impl AnswerPayload {
    fn raw(&self) -> RawAnswer {
        self.answer.clone().unwrap_or(RawAnswer::Many(Vec::new()))
    }
}

pub async fn stage_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AnswerPayload>,
) -> Result<Json<QuizView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let view = payload
        .validate()
        .map_err(EngineError::from)
        .and_then(|_| {
            with_active_quiz(&state, &user.uid, |active| {
                active.instance.stage_answer(&payload.question_id, &payload.raw())?;
                Ok(QuizView::from(&active.instance))
            })
        })
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(view))
}

#[derive(Debug, Serialize)]
pub struct AnswerResponse {
    pub outcome: AnswerOutcome,
    pub quiz: QuizView,
}

pub async fn submit_answer(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<AnswerPayload>,
) -> Result<Json<AnswerResponse>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let response = payload
        .validate()
        .map_err(EngineError::from)
        .and_then(|_| {
            with_active_quiz(&state, &user.uid, |active| {
                let outcome = active.instance.submit_answer(&payload.question_id, &payload.raw())?;
                Ok(AnswerResponse {
                    outcome,
                    quiz: QuizView::from(&active.instance),
                })
            })
        })
        .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(response))
}

pub async fn advance_quiz(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<QuizView>, AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    let view = with_active_quiz(&state, &user.uid, |active| {
        active.instance.advance()?;
        active.restart_clock();
        Ok(QuizView::from(&active.instance))
    })
    .map_err(|e| e.into_app_error(req_id))?;
    Ok(Json(view))
}

pub async fn finish_quiz(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<QuizResult>), AppError> {
    let req_id = request_id_from_headers(&headers);
    let user = current_user(&headers, &req_id)?;
    // Taking the slot is the commit point: a concurrent finish finds it empty.
    let Some((uid, active)) = state.quizzes.remove_if(&user.uid, |_, active| active.instance.finished) else {
        let err = if state.quizzes.contains_key(&user.uid) {
            QuizError::NotFinished
        } else {
            QuizError::NoActiveQuiz
        };
        return Err(EngineError::from(err).into_app_error(req_id));
    };
    let result = active
        .instance
        .finish(&uid)
        .map_err(|e| EngineError::from(e).into_app_error(req_id.clone()))?;
    if let Err(err) = state.store.append_result(result.clone()).await {
        state.quizzes.entry(uid).or_insert(active);
        return Err(EngineError::from(err).into_app_error(req_id));
    }
    info!(
        "user {} finished {} with {}/{}",
        user.uid, result.source_id, result.correct_answers, result.total_questions
    );
    Ok((StatusCode::CREATED, Json(result)))
}
