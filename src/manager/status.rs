use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;

/// Initialization state of one attribute, surfaced through the state API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InitState {
    Queued,
    Loading,
    Reprocessing,
    Done,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttributeStatus {
    pub name: String,
    pub state: InitState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loading_finished: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprocessing_started: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reprocessing_progress: Option<f32>,
}

impl AttributeStatus {
    fn new(name: &str) -> Self {
        AttributeStatus {
            name: name.to_string(),
            state: InitState::Queued,
            loading_started: None,
            loading_finished: None,
            reprocessing_started: None,
            reprocessing_progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Up,
    Initializing,
}

/// Tracks per-attribute initialization progress for one sub-database.
#[derive(Default)]
pub struct StatusRegistry {
    map: Mutex<HashMap<String, AttributeStatus>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        StatusRegistry { map: Mutex::new(HashMap::new()) }
    }

    pub fn register(&self, name: &str) {
        self.map
            .lock()
            .entry(name.to_string())
            .or_insert_with(|| AttributeStatus::new(name));
    }

    pub fn mark_loading(&self, name: &str) {
        let mut map = self.map.lock();
        let status = map.entry(name.to_string()).or_insert_with(|| AttributeStatus::new(name));
        status.state = InitState::Loading;
        status.loading_started = Some(Utc::now());
    }

    pub fn mark_reprocessing(&self, name: &str, progress: f32) {
        let mut map = self.map.lock();
        let status = map.entry(name.to_string()).or_insert_with(|| AttributeStatus::new(name));
        if status.state != InitState::Reprocessing {
            status.reprocessing_started = Some(Utc::now());
        }
        status.state = InitState::Reprocessing;
        status.reprocessing_progress = Some(progress);
    }

    pub fn mark_done(&self, name: &str) {
        let mut map = self.map.lock();
        let status = map.entry(name.to_string()).or_insert_with(|| AttributeStatus::new(name));
        if status.state == InitState::Loading {
            status.loading_finished = Some(Utc::now());
        }
        status.state = InitState::Done;
        status.reprocessing_progress = None;
    }

    pub fn remove(&self, name: &str) {
        self.map.lock().remove(name);
    }

    pub fn report(&self) -> Vec<AttributeStatus> {
        let mut statuses: Vec<AttributeStatus> = self.map.lock().values().cloned().collect();
        statuses.sort_by(|a, b| a.name.cmp(&b.name));
        statuses
    }

    /// Node health rolls up to Up only when every attribute is done.
    pub fn health(&self) -> Health {
        if self.map.lock().values().all(|s| s.state == InitState::Done) {
            Health::Up
        } else {
            Health::Initializing
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "health": self.health(),
            "attributes": self.report(),
        })
    }
}
