//! Vision API client implementation

use crate::error::{Error, Result};
use crate::models::*;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use std::time::Duration;

const DEFAULT_MAX_TOKENS: u32 = 800;

#[derive(Debug, Clone)]
pub struct VisionClientConfig {
    pub api_key: String,
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`
    pub api_base: String,
    pub model: String,
    pub timeout: Duration,
}

/// Vision API client
#[derive(Debug, Clone)]
pub struct VisionClient {
    client: reqwest::Client,
    config: VisionClientConfig,
}

impl VisionClient {
    pub fn new(config: VisionClientConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(Error::Config("api_key is empty".to_string()));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn build_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let auth_value = format!("Bearer {}", self.config.api_key);
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth_value)
                .map_err(|e| Error::Config(format!("Invalid auth header: {}", e)))?,
        );
        Ok(headers)
    }

    /// Build the request body for one image and one instruction.
    pub fn build_request(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> ChatCompletionRequest {
        let data_url = format!("data:{};base64,{}", mime_type, STANDARD.encode(image));

        ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: vec![
                    ContentPart::Text {
                        text: instruction.to_string(),
                    },
                    ContentPart::ImageUrl {
                        image_url: ImageUrl { url: data_url },
                    },
                ],
            }],
            response_format: ResponseFormat {
                kind: "json_object".to_string(),
            },
            max_tokens: Some(DEFAULT_MAX_TOKENS),
            temperature: 0.0,
        }
    }

    /// Ask the model about `image` and return its answer as a JSON object.
    pub async fn extract_json(
        &self,
        image: &[u8],
        mime_type: &str,
        instruction: &str,
    ) -> Result<serde_json::Map<String, serde_json::Value>> {
        let url = format!(
            "{}/chat/completions",
            self.config.api_base.trim_end_matches('/')
        );
        let body = self.build_request(image, mime_type, instruction);

        tracing::debug!(
            "Vision request: model={}, image_bytes={}",
            self.config.model,
            image.len()
        );

        let response = self
            .client
            .post(&url)
            .headers(self.build_headers()?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiErrorBody>(&text)
                .map(|b| b.error.message)
                .unwrap_or(text);
            return Err(Error::Api {
                message,
                status: status.as_u16(),
            });
        }

        let parsed: ChatCompletionResponse = serde_json::from_str(&text)?;
        parse_answer(&parsed)
    }
}

/// Pull the JSON object out of the first choice.
///
/// Models sometimes wrap JSON in a fenced code block even in JSON mode,
/// so fences are stripped before parsing.
pub(crate) fn parse_answer(
    response: &ChatCompletionResponse,
) -> Result<serde_json::Map<String, serde_json::Value>> {
    let content = response
        .choices
        .first()
        .and_then(|c| c.message.content.as_deref())
        .ok_or(Error::EmptyAnswer)?;

    let trimmed = content
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    match serde_json::from_str::<serde_json::Value>(trimmed)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(Error::EmptyAnswer),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_client() -> VisionClient {
        VisionClient::new(VisionClientConfig {
            api_key: "sk-test".to_string(),
            api_base: "http://localhost:9/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn response_with(content: &str) -> ChatCompletionResponse {
        serde_json::from_value(serde_json::json!({
            "choices": [{ "message": { "content": content } }]
        }))
        .unwrap()
    }

    #[test]
    fn test_new_rejects_empty_key() {
        let result = VisionClient::new(VisionClientConfig {
            api_key: "  ".to_string(),
            api_base: "http://localhost/v1".to_string(),
            model: "m".to_string(),
            timeout: Duration::from_secs(1),
        });
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_build_request_embeds_data_url() {
        let client = test_client();
        let request = client.build_request(b"abc", "image/png", "read it");
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["response_format"]["type"], "json_object");
        assert_eq!(json["messages"][0]["content"][0]["type"], "text");
        assert_eq!(json["messages"][0]["content"][1]["type"], "image_url");
        assert_eq!(
            json["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,YWJj"
        );
    }

    #[test]
    fn test_parse_answer_plain_json() {
        let map = parse_answer(&response_with(r#"{"serie": "ABC"}"#)).unwrap();
        assert_eq!(map["serie"], "ABC");
    }

    #[test]
    fn test_parse_answer_fenced_json() {
        let map = parse_answer(&response_with("```json\n{\"color\": \"ROJO\"}\n```")).unwrap();
        assert_eq!(map["color"], "ROJO");
    }

    #[test]
    fn test_parse_answer_rejects_non_object() {
        assert!(matches!(
            parse_answer(&response_with("[1, 2]")),
            Err(Error::EmptyAnswer)
        ));
    }

    #[test]
    fn test_parse_answer_no_choices() {
        let empty: ChatCompletionResponse =
            serde_json::from_value(serde_json::json!({ "choices": [] })).unwrap();
        assert!(matches!(parse_answer(&empty), Err(Error::EmptyAnswer)));
    }
}
