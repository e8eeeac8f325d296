// Infra for content moderation: classifier backends, the excluded-channel
// store and the audit sinks.

pub mod agents_client;
pub mod audit_sinks;
pub mod azure_client;
pub mod sqlite_excluded_channels;

pub use agents_client::AgentsClassifier;
pub use audit_sinks::{AuditSinks, SqliteAuditLog, TracingAuditSink};
pub use azure_client::AzureContentSafetyClassifier;
pub use sqlite_excluded_channels::SqliteExcludedChannelStore;

use crate::core::moderation::{
    BackendKind, Classifier, ClassifierError, ClassifierFactory, ConfigError, ModerationConfig,
    Severities,
};
use serde::Deserialize;
use std::sync::Arc;

/// Categories every backend is asked to score.
pub const CATEGORIES: [&str; 4] = ["Hate", "Sexual", "Violence", "SelfHarm"];

/// `{"categoriesAnalysis": [...]}`, the shape both backends answer with.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AnalysisResponse {
    #[serde(default)]
    categories_analysis: Vec<CategoryAnalysis>,
}

#[derive(Debug, Deserialize)]
struct CategoryAnalysis {
    category: String,
    severity: i32,
}

impl AnalysisResponse {
    fn into_severities(self) -> Severities {
        self.categories_analysis
            .into_iter()
            .map(|c| (c.category, c.severity))
            .collect()
    }
}

fn transport_error(err: reqwest::Error) -> ClassifierError {
    ClassifierError::Transport(err.to_string())
}

/// Picks the backend named in the configuration.
pub struct BackendClassifiers;

impl ClassifierFactory for BackendClassifiers {
    fn build(&self, config: &ModerationConfig) -> Result<Arc<dyn Classifier>, ConfigError> {
        config.validate()?;

        let classifier: Arc<dyn Classifier> = match config.backend_kind()? {
            BackendKind::Azure => {
                tracing::info!("Azure AI Content Safety moderator initialized");
                Arc::new(AzureContentSafetyClassifier::new(
                    config.azure.endpoint.clone(),
                    config.azure.api_key.clone(),
                ))
            }
            BackendKind::Agents => {
                tracing::info!(model = %config.agents.model, "Agents moderator initialized");
                Arc::new(AgentsClassifier::new(
                    config.agents.endpoint.clone(),
                    config.agents.api_key.clone(),
                    config.agents.model.clone(),
                    config.agents.system_prompt.clone(),
                )?)
            }
        };
        Ok(classifier)
    }
}
