use crate::config::Config;
use crate::quiz::{AnswerOutcome, QuizInstance};
use crate::store::{DocumentStore, InMemoryStore};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct ActiveQuiz {
    pub instance: QuizInstance,
    last_tick: Instant,
}

impl ActiveQuiz {
    pub fn new(instance: QuizInstance) -> Self {
        Self {
            instance,
            last_tick: Instant::now(),
        }
    }

    // Whole seconds only; the sub-second remainder carries over.
    pub fn sync_timer(&mut self) -> Option<AnswerOutcome> {
        let elapsed = self.last_tick.elapsed().as_secs();
        if elapsed == 0 {
            return None;
        }
        self.last_tick += Duration::from_secs(elapsed);
        self.instance.tick(u32::try_from(elapsed).unwrap_or(u32::MAX))
    }

    pub fn restart_clock(&mut self) {
        self.last_tick = Instant::now();
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub quizzes: Arc<DashMap<String, ActiveQuiz>>,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let store = InMemoryStore::new(config.local_state_path.as_deref());
        Self::with_store(Arc::new(store), config)
    }

    pub fn with_store(store: Arc<dyn DocumentStore>, config: Config) -> Self {
        Self {
            store,
            quizzes: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }
}
