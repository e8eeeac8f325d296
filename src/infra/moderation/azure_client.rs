// Azure AI Content Safety text analysis.
//
// POST {endpoint}/contentsafety/text:analyze with the subscription key in a
// header. The answer lists one severity per requested category.

use super::{transport_error, AnalysisResponse, CATEGORIES};
use crate::core::moderation::{Classifier, ClassifierError, Severities};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

const TEXT_ANALYZE_PATH: &str = "/contentsafety/text:analyze?api-version=2024-09-01";

/// Severities come back as 0, 2, 4 or 6.
const OUTPUT_TYPE: &str = "FourSeverityLevels";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TextAnalyzeRequest<'a> {
    text: &'a str,
    categories: &'a [&'a str],
    output_type: &'a str,
}

pub struct AzureContentSafetyClassifier {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl AzureContentSafetyClassifier {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn analyze_url(&self) -> String {
        format!("{}{}", self.endpoint, TEXT_ANALYZE_PATH)
    }

    fn parse_response(body: &str) -> Result<Severities, ClassifierError> {
        let response: AnalysisResponse = serde_json::from_str(body).map_err(|e| {
            ClassifierError::Malformed(format!("error decoding API response: {}", e))
        })?;
        Ok(response.into_severities())
    }
}

#[async_trait]
impl Classifier for AzureContentSafetyClassifier {
    async fn classify(&self, text: &str) -> Result<Severities, ClassifierError> {
        let payload = TextAnalyzeRequest {
            text,
            categories: &CATEGORIES,
            output_type: OUTPUT_TYPE,
        };

        let response = self
            .client
            .post(self.analyze_url())
            .header("Ocp-Apim-Subscription-Key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;

        if status != reqwest::StatusCode::OK {
            return Err(ClassifierError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Self::parse_response(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let payload = TextAnalyzeRequest {
            text: "hello",
            categories: &CATEGORIES,
            output_type: OUTPUT_TYPE,
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "text": "hello",
                "categories": ["Hate", "Sexual", "Violence", "SelfHarm"],
                "outputType": "FourSeverityLevels"
            })
        );
    }

    #[test]
    fn test_parse_response() {
        let body = r#"{
            "blocklistsMatch": [],
            "categoriesAnalysis": [
                {"category": "Hate", "severity": 2},
                {"category": "Violence", "severity": 6}
            ]
        }"#;

        let severities = AzureContentSafetyClassifier::parse_response(body).unwrap();
        assert_eq!(severities.get("Hate"), Some(&2));
        assert_eq!(severities.get("Violence"), Some(&6));
        assert_eq!(severities.len(), 2);
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        assert!(matches!(
            AzureContentSafetyClassifier::parse_response("<html>"),
            Err(ClassifierError::Malformed(_))
        ));
    }

    #[test]
    fn test_trailing_slash_is_trimmed() {
        let client = AzureContentSafetyClassifier::new(
            "https://example.cognitiveservices.azure.com/".to_string(),
            "key".to_string(),
        );
        assert_eq!(
            client.analyze_url(),
            "https://example.cognitiveservices.azure.com/contentsafety/text:analyze?api-version=2024-09-01"
        );
    }
}
