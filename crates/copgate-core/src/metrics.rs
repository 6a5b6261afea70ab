//! In-memory request metrics: a fixed-size ring of recent records, running
//! aggregates, and a session snapshot refreshed by each Messages request.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use time::OffsetDateTime;

const RING_SIZE: usize = 200;

#[derive(Debug, Clone, Serialize)]
pub struct RequestRecord {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub endpoint: String,
    pub model: String,
    pub routed_model: String,
    pub backend: String,
    pub request_type: String,
    pub initiator: String,
    pub has_vision: bool,
    pub streaming: bool,
    pub tool_count: usize,
    pub thinking_budget: u32,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cached_tokens: i64,
    pub latency_ms: i64,
    pub status_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RequestRecord {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            timestamp: OffsetDateTime::now_utc(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
            routed_model: model.to_string(),
            backend: String::new(),
            request_type: "normal".to_string(),
            initiator: "user".to_string(),
            has_vision: false,
            streaming: false,
            tool_count: 0,
            thinking_budget: 0,
            input_tokens: 0,
            output_tokens: 0,
            cached_tokens: 0,
            latency_ms: 0,
            status_code: 200,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SubagentSnapshot {
    pub session_id: String,
    pub agent_id: String,
    pub agent_type: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SessionSnapshot {
    pub tools: Vec<String>,
    pub mcp_tools: Vec<String>,
    pub thinking_enabled: bool,
    pub thinking_budget: u32,
    pub thinking_type: String,
    pub beta_features: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subagent: Option<SubagentSnapshot>,
    pub user_id: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_seen: Option<OffsetDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Aggregates {
    pub total_requests: i64,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_cached_tokens: i64,
    pub model_counts: HashMap<String, i64>,
    pub backend_counts: HashMap<String, i64>,
    pub type_counts: HashMap<String, i64>,
    #[serde(with = "time::serde::rfc3339")]
    pub start_time: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub aggregates: Aggregates,
    pub session: SessionSnapshot,
    pub recent: Vec<RequestRecord>,
}

#[derive(Debug)]
struct Inner {
    aggregates: Aggregates,
    session: SessionSnapshot,
    ring: Vec<Option<RequestRecord>>,
    ring_pos: usize,
    ring_count: usize,
}

#[derive(Debug)]
pub struct MetricsStore {
    inner: Mutex<Inner>,
}

impl MetricsStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                aggregates: Aggregates {
                    total_requests: 0,
                    total_input_tokens: 0,
                    total_output_tokens: 0,
                    total_cached_tokens: 0,
                    model_counts: HashMap::new(),
                    backend_counts: HashMap::new(),
                    type_counts: HashMap::new(),
                    start_time: OffsetDateTime::now_utc(),
                },
                session: SessionSnapshot::default(),
                ring: vec![None; RING_SIZE],
                ring_pos: 0,
                ring_count: 0,
            }),
        }
    }

    pub fn record_request(&self, record: RequestRecord) {
        let mut inner = self.inner.lock().unwrap();

        inner.aggregates.total_requests += 1;
        inner.aggregates.total_input_tokens += record.input_tokens;
        inner.aggregates.total_output_tokens += record.output_tokens;
        inner.aggregates.total_cached_tokens += record.cached_tokens;

        let model = if record.routed_model.is_empty() {
            record.model.clone()
        } else {
            record.routed_model.clone()
        };
        *inner.aggregates.model_counts.entry(model).or_default() += 1;
        if !record.backend.is_empty() {
            *inner
                .aggregates
                .backend_counts
                .entry(record.backend.clone())
                .or_default() += 1;
        }
        if !record.request_type.is_empty() {
            *inner
                .aggregates
                .type_counts
                .entry(record.request_type.clone())
                .or_default() += 1;
        }

        let position = inner.ring_pos;
        inner.ring[position] = Some(record);
        inner.ring_pos = (position + 1) % RING_SIZE;
        if inner.ring_count < RING_SIZE {
            inner.ring_count += 1;
        }
    }

    pub fn update_session(&self, session: SessionSnapshot) {
        self.inner.lock().unwrap().session = session;
    }

    /// Read-consistent copy: aggregates, session, and recent records newest
    /// first.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap();

        let mut recent = Vec::with_capacity(inner.ring_count);
        for offset in 0..inner.ring_count {
            let index = (inner.ring_pos + RING_SIZE - 1 - offset) % RING_SIZE;
            if let Some(record) = &inner.ring[index] {
                recent.push(record.clone());
            }
        }

        MetricsSnapshot {
            aggregates: inner.aggregates.clone(),
            session: inner.session.clone(),
            recent,
        }
    }
}

impl Default for MetricsStore {
    fn default() -> Self {
        Self::new()
    }
}
