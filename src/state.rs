//! Shared application state for request handlers.

use std::sync::Arc;

use crate::config::AppConfig;
use crate::doctor::AiDoctorService;
use crate::storage::{Database, KnowledgeStore};

/// Cloneable across handlers; every field is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub doctor: AiDoctorService,
    pub knowledge: KnowledgeStore,
    pub db: Database,
}

impl AppState {
    pub fn new(config: AppConfig, doctor: AiDoctorService, db: Database) -> Self {
        Self {
            config: Arc::new(config),
            doctor,
            knowledge: KnowledgeStore::new(db.clone()),
            db,
        }
    }
}
