use crate::models::{QuestionSet, QuizBundle, QuizResult, Visibility};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("{collection} document {id} does not exist")]
    Missing { collection: &'static str, id: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessFilter {
    OwnerIs(String),
    SharedWith(String),
    Public,
}

impl AccessFilter {
    pub fn matches(&self, owner_id: &str, shared_with: &[String], visibility: Visibility) -> bool {
        match self {
            AccessFilter::OwnerIs(uid) => owner_id == uid,
            AccessFilter::SharedWith(email) => shared_with.iter().any(|e| e == email),
            AccessFilter::Public => visibility == Visibility::Public,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    QuestionSets,
    QuizBundles,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::QuestionSets => "questionSets",
            Collection::QuizBundles => "quizBundles",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SharingOp {
    Add,
    Remove,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Value,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn query_sets(&self, filter: AccessFilter) -> Result<Vec<QuestionSet>, StoreError>;
    async fn query_bundles(&self, filter: AccessFilter) -> Result<Vec<QuizBundle>, StoreError>;
    async fn get_set(&self, id: &str) -> Result<Option<QuestionSet>, StoreError>;
    async fn get_bundle(&self, id: &str) -> Result<Option<QuizBundle>, StoreError>;
    async fn insert_set(&self, set: QuestionSet) -> Result<QuestionSet, StoreError>;
    async fn insert_bundle(&self, bundle: QuizBundle) -> Result<QuizBundle, StoreError>;
    async fn update_sharing(
        &self,
        collection: Collection,
        id: &str,
        email: &str,
        op: SharingOp,
    ) -> Result<Vec<String>, StoreError>;
    async fn list_questions(&self, set_id: &str) -> Result<Vec<StoredDocument>, StoreError>;
    async fn add_questions(&self, set_id: &str, docs: Vec<Value>) -> Result<Vec<String>, StoreError>;
    async fn delete_question(&self, set_id: &str, question_id: &str) -> Result<bool, StoreError>;
    async fn append_result(&self, result: QuizResult) -> Result<(), StoreError>;
    async fn results_for_user(&self, user_id: &str) -> Result<Vec<QuizResult>, StoreError>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistentSnapshot {
    sets: HashMap<String, QuestionSet>,
    bundles: HashMap<String, QuizBundle>,
    questions: HashMap<String, Vec<StoredDocument>>,
    results: Vec<QuizResult>,
}

pub struct InMemoryStore {
    sets: RwLock<HashMap<String, QuestionSet>>,
    bundles: RwLock<HashMap<String, QuizBundle>>,
    questions: RwLock<HashMap<String, Vec<StoredDocument>>>,
    results: RwLock<Vec<QuizResult>>,
    last_timestamp_ms: AtomicI64,
    snapshot_path: Option<String>,
}

impl InMemoryStore {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path
            .and_then(|path| {
                let raw = std::fs::read_to_string(path).ok()?;
                match serde_json::from_str::<PersistentSnapshot>(&raw) {
                    Ok(s) => Some(s),
                    Err(err) => {
                        warn!("failed to read local snapshot {}: {}", path, err);
                        None
                    }
                }
            })
            .unwrap_or_default();

        Self {
            sets: RwLock::new(snapshot.sets),
            bundles: RwLock::new(snapshot.bundles),
            questions: RwLock::new(snapshot.questions),
            results: RwLock::new(snapshot.results),
            last_timestamp_ms: AtomicI64::new(0),
            snapshot_path: snapshot_path.map(str::to_string),
        }
    }

    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now().timestamp_millis();
        let prev = self
            .last_timestamp_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        DateTime::from_timestamp_millis(now.max(prev + 1)).unwrap_or_else(Utc::now)
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            sets: self.sets.read().await.clone(),
            bundles: self.bundles.read().await.clone(),
            questions: self.questions.read().await.clone(),
            results: self.results.read().await.clone(),
        }
    }

    pub async fn persist(&self) -> Result<(), StoreError> {
        let Some(path) = self.snapshot_path.as_ref() else {
            return Ok(());
        };
        let serialized = serde_json::to_vec_pretty(&self.snapshot().await)?;
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, serialized).await?;
        Ok(())
    }

    async fn persist_after(&self, op: &str) {
        if let Err(err) = self.persist().await {
            warn!("failed to persist local state after {}: {}", op, err);
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

fn apply_sharing(shared_with: &mut Vec<String>, email: &str, op: SharingOp) {
    match op {
        SharingOp::Add => {
            if !shared_with.iter().any(|e| e == email) {
                shared_with.push(email.to_string());
            }
        }
        SharingOp::Remove => shared_with.retain(|e| e != email),
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn query_sets(&self, filter: AccessFilter) -> Result<Vec<QuestionSet>, StoreError> {
        let sets = self.sets.read().await;
        Ok(sets
            .values()
            .filter(|s| filter.matches(&s.owner_id, &s.shared_with, s.visibility))
            .cloned()
            .collect())
    }

    async fn query_bundles(&self, filter: AccessFilter) -> Result<Vec<QuizBundle>, StoreError> {
        let bundles = self.bundles.read().await;
        Ok(bundles
            .values()
            .filter(|b| filter.matches(&b.owner_id, &b.shared_with, b.visibility))
            .cloned()
            .collect())
    }

    async fn get_set(&self, id: &str) -> Result<Option<QuestionSet>, StoreError> {
        Ok(self.sets.read().await.get(id).cloned())
    }

    async fn get_bundle(&self, id: &str) -> Result<Option<QuizBundle>, StoreError> {
        Ok(self.bundles.read().await.get(id).cloned())
    }

    async fn insert_set(&self, mut set: QuestionSet) -> Result<QuestionSet, StoreError> {
        if set.id.is_empty() {
            set.id = new_id();
        }
        let now = self.next_timestamp();
        set.created_at = Some(now);
        set.updated_at = Some(now);
        self.sets.write().await.insert(set.id.clone(), set.clone());
        self.persist_after("insert_set").await;
        Ok(set)
    }

    async fn insert_bundle(&self, mut bundle: QuizBundle) -> Result<QuizBundle, StoreError> {
        if bundle.id.is_empty() {
            bundle.id = new_id();
        }
        let now = self.next_timestamp();
        bundle.created_at = Some(now);
        bundle.updated_at = Some(now);
        self.bundles.write().await.insert(bundle.id.clone(), bundle.clone());
        self.persist_after("insert_bundle").await;
        Ok(bundle)
    }

    async fn update_sharing(
        &self,
        collection: Collection,
        id: &str,
        email: &str,
        op: SharingOp,
    ) -> Result<Vec<String>, StoreError> {
        let missing = || StoreError::Missing {
            collection: collection.as_str(),
            id: id.to_string(),
        };
        let now = self.next_timestamp();
        let shared_with = match collection {
            Collection::QuestionSets => {
                let mut sets = self.sets.write().await;
                let set = sets.get_mut(id).ok_or_else(missing)?;
                apply_sharing(&mut set.shared_with, email, op);
                set.updated_at = Some(now);
                set.shared_with.clone()
            }
            Collection::QuizBundles => {
                let mut bundles = self.bundles.write().await;
                let bundle = bundles.get_mut(id).ok_or_else(missing)?;
                apply_sharing(&mut bundle.shared_with, email, op);
                bundle.updated_at = Some(now);
                bundle.shared_with.clone()
            }
        };
        self.persist_after("update_sharing").await;
        Ok(shared_with)
    }

    async fn list_questions(&self, set_id: &str) -> Result<Vec<StoredDocument>, StoreError> {
        Ok(self
            .questions
            .read()
            .await
            .get(set_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn add_questions(&self, set_id: &str, docs: Vec<Value>) -> Result<Vec<String>, StoreError> {
        let ids = {
            let mut sets = self.sets.write().await;
            let set = sets.get_mut(set_id).ok_or_else(|| StoreError::Missing {
                collection: Collection::QuestionSets.as_str(),
                id: set_id.to_string(),
            })?;
            let mut questions = self.questions.write().await;
            let stored = questions.entry(set_id.to_string()).or_default();
            let mut ids = Vec::with_capacity(docs.len());
            for data in docs {
                let id = new_id();
                stored.push(StoredDocument { id: id.clone(), data });
                ids.push(id);
            }
            set.question_count += ids.len() as u32;
            set.updated_at = Some(self.next_timestamp());
            ids
        };
        self.persist_after("add_questions").await;
        Ok(ids)
    }

    async fn delete_question(&self, set_id: &str, question_id: &str) -> Result<bool, StoreError> {
        let removed = {
            let mut sets = self.sets.write().await;
            let set = sets.get_mut(set_id).ok_or_else(|| StoreError::Missing {
                collection: Collection::QuestionSets.as_str(),
                id: set_id.to_string(),
            })?;
            let mut questions = self.questions.write().await;
            let Some(stored) = questions.get_mut(set_id) else {
                return Ok(false);
            };
            let before = stored.len();
            stored.retain(|d| d.id != question_id);
            let removed = stored.len() < before;
            if removed {
                set.question_count = set.question_count.saturating_sub(1);
                set.updated_at = Some(self.next_timestamp());
            }
            removed
        };
        if removed {
            self.persist_after("delete_question").await;
        }
        Ok(removed)
    }

    async fn append_result(&self, result: QuizResult) -> Result<(), StoreError> {
        self.results.write().await.push(result);
        self.persist_after("append_result").await;
        Ok(())
    }

    async fn results_for_user(&self, user_id: &str) -> Result<Vec<QuizResult>, StoreError> {
        Ok(self
            .results
            .read()
            .await
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }
}
