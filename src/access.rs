use crate::error::EngineError;
use crate::models::{AccessLevel, Accessible, CurrentUser, QuestionSet, QuizBundle, Shareable, Visibility};
use crate::store::{AccessFilter, DocumentStore, StoreError};
use futures::TryFutureExt;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::warn;

pub async fn resolve_accessible_sets(
    store: &dyn DocumentStore,
    user: &CurrentUser,
) -> Result<Vec<Accessible<QuestionSet>>, EngineError> {
    resolve_with(user, |filter| store.query_sets(filter)).await
}

pub async fn resolve_accessible_bundles(
    store: &dyn DocumentStore,
    user: &CurrentUser,
) -> Result<Vec<Accessible<QuizBundle>>, EngineError> {
    resolve_with(user, |filter| store.query_bundles(filter)).await
}

pub fn access_level<T: Shareable>(user: &CurrentUser, doc: &T) -> Option<AccessLevel> {
    if doc.owner_id() == user.uid {
        return Some(AccessLevel::Owned);
    }
    if let Some(email) = user.sharing_key() {
        if doc.shared_with().iter().any(|e| *e == email) {
            return Some(AccessLevel::Shared);
        }
    }
    (doc.visibility() == Visibility::Public).then_some(AccessLevel::Public)
}

pub(crate) async fn resolve_with<T, F, Fut>(
    user: &CurrentUser,
    query: F,
) -> Result<Vec<Accessible<T>>, EngineError>
where
    T: Shareable,
    F: Fn(AccessFilter) -> Fut,
    Fut: Future<Output = Result<Vec<T>, StoreError>>,
{
    let failed = |criterion: AccessLevel| {
        move |source: StoreError| {
            warn!("{} access query failed for {}: {}", criterion.as_str(), user.uid, source);
            EngineError::AccessQueryFailure { criterion, source }
        }
    };

    let owned = query(AccessFilter::OwnerIs(user.uid.clone())).map_err(failed(AccessLevel::Owned));
    let shared = async {
        match user.sharing_key() {
            Some(email) => query(AccessFilter::SharedWith(email))
                .await
                .map_err(failed(AccessLevel::Shared)),
            None => Ok(Vec::new()),
        }
    };
    let public = query(AccessFilter::Public).map_err(failed(AccessLevel::Public));

    let (owned, shared, public) = futures::try_join!(owned, shared, public)?;

    let mut merge = AccessMerge::new(user);
    for (docs, level) in [
        (owned, AccessLevel::Owned),
        (shared, AccessLevel::Shared),
        (public, AccessLevel::Public),
    ] {
        for doc in docs {
            merge.insert(doc, level);
        }
    }
    Ok(merge.into_sorted())
}

// Overwrites only on a strictly higher rank, so query completion order never matters.
struct AccessMerge<'u, T> {
    user: &'u CurrentUser,
    entries: BTreeMap<String, Accessible<T>>,
}

impl<'u, T: Shareable> AccessMerge<'u, T> {
    fn new(user: &'u CurrentUser) -> Self {
        Self {
            user,
            entries: BTreeMap::new(),
        }
    }

    fn insert(&mut self, doc: T, candidate: AccessLevel) {
        let access = if doc.owner_id() == self.user.uid {
            AccessLevel::Owned
        } else {
            candidate
        };
        match self.entries.get(doc.id()) {
            Some(existing) if existing.access >= access => {}
            _ => {
                self.entries
                    .insert(doc.id().to_string(), Accessible { item: doc, access });
            }
        }
    }

    fn into_sorted(self) -> Vec<Accessible<T>> {
        let mut items: Vec<_> = self.entries.into_values().collect();
        items.sort_by(|a, b| b.item.updated_at().cmp(&a.item.updated_at()));
        items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    fn set(id: &str, owner: &str, shared: &[&str], visibility: Visibility, age_mins: Option<i64>) -> QuestionSet {
        QuestionSet {
            id: id.into(),
            name: id.to_uppercase(),
            description: String::new(),
            tags: vec![],
            visibility,
            owner_id: owner.into(),
            owner_name: owner.into(),
            shared_with: shared.iter().map(|s| s.to_string()).collect(),
            question_count: 0,
            created_at: None,
            updated_at: age_mins.map(|m| Utc::now() - Duration::minutes(m)),
        }
    }

    fn corpus() -> Vec<QuestionSet> {
        vec![
            set("own-public", "ana", &[], Visibility::Public, Some(30)),
            set("own-private", "ana", &[], Visibility::Private, Some(10)),
            set("shared-public", "bob", &["ana@x.io"], Visibility::Public, Some(20)),
            set("shared-private", "bob", &["ana@x.io"], Visibility::Private, None),
            set("public", "eve", &[], Visibility::Public, Some(5)),
            set("hidden", "eve", &[], Visibility::Private, Some(1)),
        ]
    }

    fn run_query(docs: &[QuestionSet], filter: &AccessFilter) -> Vec<QuestionSet> {
        docs.iter()
            .filter(|s| filter.matches(&s.owner_id, &s.shared_with, s.visibility))
            .cloned()
            .collect()
    }

    fn ana() -> CurrentUser {
        CurrentUser::new("ana", Some("Ana@X.io"))
    }

    #[tokio::test]
    async fn priority_and_dedup_regardless_of_completion_order() {
        let docs = corpus();
        // Public answers first, owned last.
        let delay = |filter: &AccessFilter| match filter {
            AccessFilter::OwnerIs(_) => 30,
            AccessFilter::SharedWith(_) => 15,
            AccessFilter::Public => 0,
        };
        let resolved = resolve_with(&ana(), |filter| {
            let hits = run_query(&docs, &filter);
            let wait = delay(&filter);
            async move {
                tokio::time::sleep(StdDuration::from_millis(wait)).await;
                Ok::<_, StoreError>(hits)
            }
        })
        .await
        .unwrap();

        let view: Vec<_> = resolved.iter().map(|a| (a.item.id.as_str(), a.access)).collect();
        assert_eq!(
            view,
            vec![
                ("public", AccessLevel::Public),
                ("own-private", AccessLevel::Owned),
                ("shared-public", AccessLevel::Shared),
                ("own-public", AccessLevel::Owned),
                ("shared-private", AccessLevel::Shared),
            ]
        );
    }

    #[tokio::test]
    async fn missing_email_skips_only_shared_query() {
        let docs = corpus();
        let calls = AtomicUsize::new(0);
        let user = CurrentUser::new("ana", None);
        let resolved = resolve_with(&user, |filter| {
            calls.fetch_add(1, Ordering::SeqCst);
            assert!(!matches!(filter, AccessFilter::SharedWith(_)));
            futures::future::ready(Ok::<_, StoreError>(run_query(&docs, &filter)))
        })
        .await
        .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let shared_public = resolved.iter().find(|a| a.item.id == "shared-public").unwrap();
        assert_eq!(shared_public.access, AccessLevel::Public);
        assert!(resolved.iter().all(|a| a.item.id != "shared-private"));
    }

    #[tokio::test]
    async fn any_failed_query_fails_resolution() {
        let docs = corpus();
        let err = resolve_with(&ana(), |filter| {
            let result = match filter {
                AccessFilter::Public => Err(StoreError::Unavailable("quota".into())),
                other => Ok(run_query(&docs, &other)),
            };
            futures::future::ready(result)
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            EngineError::AccessQueryFailure { criterion: AccessLevel::Public, .. }
        ));
    }

    #[tokio::test]
    async fn resolves_against_store() {
        let store = InMemoryStore::new(None);
        for s in corpus() {
            store.insert_set(s).await.unwrap();
        }
        let first = resolve_accessible_sets(&store, &ana()).await.unwrap();
        let second = resolve_accessible_sets(&store, &ana()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 5);
        // Store timestamps follow insertion order.
        assert_eq!(first[0].item.id, "public");
    }

    #[test]
    fn single_document_access_level() {
        let user = ana();
        let docs = corpus();
        assert_eq!(access_level(&user, &docs[0]), Some(AccessLevel::Owned));
        assert_eq!(access_level(&user, &docs[2]), Some(AccessLevel::Shared));
        assert_eq!(access_level(&user, &docs[4]), Some(AccessLevel::Public));
        assert_eq!(access_level(&user, &docs[5]), None);
    }
}
