use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::classify::truncate_text;

/// The remote generative service, reduced to the two calls the client makes.
///
/// Implementations return the decoded JSON body on success. Failures should keep the
/// service's own message (and HTTP status, when there is one) in the error chain, since
/// that text is what gets classified.
pub trait GenerativeTransport: Send + Sync {
    /// Text-to-image prediction (`models/{model}:predict`).
    fn predict(&self, model: &str, payload: &Value) -> Result<Value>;

    /// Multimodal content generation (`models/{model}:generateContent`).
    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value>;
}

pub struct HttpTransport {
    api_base: String,
    api_key: String,
    timeout: Duration,
    http: HttpClient,
}

impl HttpTransport {
    pub fn new(api_base: &str, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
            http: HttpClient::new(),
        }
    }

    fn endpoint(&self, model: &str, method: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:{}", self.api_base, model_path, method)
    }

    fn post(&self, service: &str, endpoint: &str, payload: &Value) -> Result<Value> {
        tracing::debug!(%endpoint, "sending {service} request");
        let response = self
            .http
            .post(endpoint)
            .header("x-goog-api-key", &self.api_key)
            .timeout(self.timeout)
            .json(payload)
            .send()
            .map_err(|err| err.without_url())
            .with_context(|| format!("{service} request failed"))?;
        response_json_or_error(service, response)
    }
}

impl GenerativeTransport for HttpTransport {
    fn predict(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint(model, "predict");
        self.post("Imagen", &endpoint, payload)
    }

    fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
        let endpoint = self.endpoint(model, "generateContent");
        self.post("Gemini", &endpoint, payload)
    }
}

fn response_json_or_error(service: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{service} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{service} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{service} returned a malformed JSON payload"))?;
    Ok(parsed)
}
