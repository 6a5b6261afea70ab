use std::sync::RwLock;

use copgate_protocol::copilot::ModelDescriptor;

use crate::config::Config;
use crate::metrics::MetricsStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountType {
    Individual,
    Business,
    Enterprise,
}

impl AccountType {
    pub fn parse(value: &str) -> Self {
        match value {
            "business" => AccountType::Business,
            "enterprise" => AccountType::Enterprise,
            _ => AccountType::Individual,
        }
    }

    pub fn base_url(self) -> &'static str {
        match self {
            AccountType::Individual => "https://api.githubcopilot.com",
            AccountType::Business => "https://api.business.githubcopilot.com",
            AccountType::Enterprise => "https://api.enterprise.githubcopilot.com",
        }
    }
}

/// Upstream credential material. Mutated only by login and the refresh loop.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub github_token: String,
    pub copilot_token: String,
    pub copilot_expires_at: i64,
    pub refresh_in: u64,
}

/// Process-wide state. Each field has its own lock; locks are never nested.
pub struct AppState {
    pub config: RwLock<Config>,
    pub credentials: RwLock<Credentials>,
    pub models: RwLock<Vec<ModelDescriptor>>,
    pub metrics: MetricsStore,
    pub http: wreq::Client,
    pub account_type: AccountType,
    pub vscode_version: String,
    pub show_token: bool,
}

impl AppState {
    pub fn new(
        config: Config,
        http: wreq::Client,
        account_type: AccountType,
        vscode_version: String,
        show_token: bool,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            credentials: RwLock::new(Credentials::default()),
            models: RwLock::new(Vec::new()),
            metrics: MetricsStore::new(),
            http,
            account_type,
            vscode_version,
            show_token,
        }
    }

    pub fn copilot_token(&self) -> String {
        self.credentials.read().unwrap().copilot_token.clone()
    }

    pub fn github_token(&self) -> String {
        self.credentials.read().unwrap().github_token.clone()
    }

    pub fn find_model(&self, id: &str) -> Option<ModelDescriptor> {
        self.models
            .read()
            .unwrap()
            .iter()
            .find(|model| model.id == id)
            .cloned()
    }

    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        self.models.read().unwrap().clone()
    }

    pub fn copilot_url(&self, path: &str) -> String {
        format!("{}{}", self.account_type.base_url(), path)
    }
}
