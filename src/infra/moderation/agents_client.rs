// LLM-backed classifier over an OpenAI-compatible chat completion API.
//
// The model is prompted to answer with the same categoriesAnalysis JSON the
// content-safety service returns. Models wrap JSON in prose or code fences
// and sometimes add comments, so the answer is cleaned up before decoding.

use super::{transport_error, AnalysisResponse};
use crate::core::moderation::{Classifier, ClassifierError, ConfigError, Severities};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;

const MAX_SEVERITY: i32 = 6;

pub struct AgentsClassifier {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
    system_prompt: String,
    line_comment: Regex,
}

impl AgentsClassifier {
    pub fn new(
        endpoint: String,
        api_key: String,
        model: String,
        system_prompt: String,
    ) -> Result<Self, ConfigError> {
        let line_comment =
            Regex::new(r"//.*\n").map_err(|e| ConfigError::Classifier(e.to_string()))?;

        Ok(Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
            model,
            system_prompt,
            line_comment,
        })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.endpoint)
    }

    fn user_prompt(text: &str) -> String {
        // Debug formatting quotes and escapes the text.
        format!("Message: {:?}", text)
    }

    /// Pull the severities out of a free-form model answer.
    fn parse_answer(&self, answer: &str) -> Result<Severities, ClassifierError> {
        let (Some(start), Some(end)) = (answer.find('{'), answer.rfind('}')) else {
            return Err(ClassifierError::Malformed(
                "no JSON block found in response".to_string(),
            ));
        };
        if end <= start {
            return Err(ClassifierError::Malformed(
                "no JSON block found in response".to_string(),
            ));
        }

        let block = self.line_comment.replace_all(&answer[start..=end], "");
        let response: AnalysisResponse = serde_json::from_str(&block).map_err(|e| {
            ClassifierError::Malformed(format!("failed to unmarshal JSON response: {}", e))
        })?;

        if response.categories_analysis.is_empty() {
            return Err(ClassifierError::Malformed(
                "received empty analysis in JSON response".to_string(),
            ));
        }

        if let Some(bad) = response
            .categories_analysis
            .iter()
            .find(|c| !(0..=MAX_SEVERITY).contains(&c.severity))
        {
            return Err(ClassifierError::InvalidSeverity {
                category: bad.category.clone(),
                severity: bad.severity,
            });
        }

        Ok(response.into_severities())
    }
}

#[async_trait]
impl Classifier for AgentsClassifier {
    async fn classify(&self, text: &str) -> Result<Severities, ClassifierError> {
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": self.system_prompt},
                {"role": "user", "content": Self::user_prompt(text)},
            ],
            "temperature": 0.0,
        });

        let response = self
            .client
            .post(self.completions_url())
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let response_json: serde_json::Value = response.json().await.map_err(transport_error)?;
        let answer = response_json["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| {
                ClassifierError::Malformed("failed to parse response content".to_string())
            })?;

        self.parse_answer(answer).map_err(|err| {
            tracing::debug!(answer, "Unusable moderation answer from model");
            err
        })
    }
}
