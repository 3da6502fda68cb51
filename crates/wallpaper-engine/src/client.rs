use anyhow::anyhow;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::classify::classify_error;
use crate::config::{StudioConfig, DEFAULT_EDIT_MODEL, DEFAULT_IMAGE_MODEL};
use crate::error::GenerationError;
use crate::transport::{GenerativeTransport, HttpTransport};

/// Generated wallpapers are always portrait.
pub const GENERATE_ASPECT_RATIO: &str = "9:16";
pub const GENERATE_MIME_TYPE: &str = "image/png";
pub const UPSCALE_INSTRUCTION: &str = "Upscale this image to 4K resolution. Enhance all details, improve lighting and shadows, and make it look photorealistic and ultra-sharp. Do not change the composition or content.";

/// Stateless wrapper around the remote image service.
///
/// Each call is a single attempt: no retries, no cancellation. `Ok(None)` means the
/// service answered without an image, which is a valid outcome and not an error.
pub struct GenerationClient {
    transport: Option<Box<dyn GenerativeTransport>>,
    image_model: String,
    edit_model: String,
}

impl GenerationClient {
    pub fn from_config(config: &StudioConfig) -> Self {
        let transport = match config.api_key.as_deref() {
            Some(api_key) => Some(Box::new(HttpTransport::new(
                &config.api_base,
                api_key,
                config.request_timeout,
            )) as Box<dyn GenerativeTransport>),
            None => {
                tracing::error!("API_KEY environment variable not set; image calls will fail");
                None
            }
        };
        Self {
            transport,
            image_model: config.image_model.clone(),
            edit_model: config.edit_model.clone(),
        }
    }

    pub fn with_transport(transport: impl GenerativeTransport + 'static) -> Self {
        Self {
            transport: Some(Box::new(transport)),
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            edit_model: DEFAULT_EDIT_MODEL.to_string(),
        }
    }

    pub fn uninitialized() -> Self {
        Self {
            transport: None,
            image_model: DEFAULT_IMAGE_MODEL.to_string(),
            edit_model: DEFAULT_EDIT_MODEL.to_string(),
        }
    }

    pub fn with_models(mut self, image_model: &str, edit_model: &str) -> Self {
        self.image_model = image_model.to_string();
        self.edit_model = edit_model.to_string();
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.transport.is_some()
    }

    pub fn generate(
        &self,
        prompt: &str,
        negative_prompt: Option<&str>,
    ) -> Result<Option<String>, GenerationError> {
        if prompt.trim().is_empty() {
            return Err(GenerationError::EmptyPrompt);
        }
        let transport = self.transport()?;
        let payload = generate_payload(prompt, negative_prompt);
        let response = transport
            .predict(&self.image_model, &payload)
            .map_err(|err| report("generate", classify_error(&err)))?;
        match extract_generated_image(&response) {
            Some(data) => ensure_decodable("generate", data).map(Some),
            None => Ok(None),
        }
    }

    pub fn edit(
        &self,
        image_data: &str,
        instruction: &str,
    ) -> Result<Option<String>, GenerationError> {
        if instruction.trim().is_empty() {
            return Err(GenerationError::EmptyInstruction);
        }
        self.transform("edit", image_data, instruction)
    }

    pub fn upscale(&self, image_data: &str) -> Result<Option<String>, GenerationError> {
        self.transform("upscale", image_data, UPSCALE_INSTRUCTION)
    }

    fn transform(
        &self,
        operation: &str,
        image_data: &str,
        instruction: &str,
    ) -> Result<Option<String>, GenerationError> {
        let mime_type = sniff_mime_type(image_data)?;
        let transport = self.transport()?;
        let payload = content_payload(image_data, mime_type, instruction);
        let response = transport
            .generate_content(&self.edit_model, &payload)
            .map_err(|err| report(operation, classify_error(&err)))?;
        let extracted = extract_inline_image(&response)
            .map_err(|err| report(operation, classify_error(&err)))?;
        match extracted {
            Some(data) => ensure_decodable(operation, data).map(Some),
            None => {
                tracing::warn!(
                    operation,
                    "model returned no image; it may have replied with text instead"
                );
                Ok(None)
            }
        }
    }

    fn transport(&self) -> Result<&dyn GenerativeTransport, GenerationError> {
        self.transport
            .as_deref()
            .ok_or(GenerationError::ClientUninitialized)
    }
}

fn report(operation: &str, err: GenerationError) -> GenerationError {
    tracing::error!(
        operation,
        kind = %err.kind(),
        detail = err.detail().unwrap_or_default(),
        "image service call failed"
    );
    err
}

fn generate_payload(prompt: &str, negative_prompt: Option<&str>) -> Value {
    let mut parameters = Map::new();
    parameters.insert("sampleCount".to_string(), Value::Number(1.into()));
    parameters.insert(
        "aspectRatio".to_string(),
        Value::String(GENERATE_ASPECT_RATIO.to_string()),
    );
    parameters.insert(
        "outputOptions".to_string(),
        json!({ "mimeType": GENERATE_MIME_TYPE }),
    );
    if let Some(negative) = negative_prompt.filter(|value| !value.trim().is_empty()) {
        parameters.insert(
            "negativePrompt".to_string(),
            Value::String(negative.to_string()),
        );
    }
    json!({
        "instances": [{ "prompt": prompt }],
        "parameters": parameters,
    })
}

fn content_payload(image_data: &str, mime_type: &str, instruction: &str) -> Value {
    json!({
        "contents": [{
            "role": "user",
            "parts": [
                {
                    "inlineData": {
                        "mimeType": mime_type,
                        "data": image_data,
                    }
                },
                { "text": instruction },
            ],
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
        },
    })
}

/// First image in a predict response. Handles the REST shape
/// (`predictions[].bytesBase64Encoded`) and the SDK shape
/// (`generatedImages[].image.imageBytes`).
fn extract_generated_image(response: &Value) -> Option<String> {
    let rows = response
        .get("predictions")
        .or_else(|| response.get("generatedImages"))
        .and_then(Value::as_array)?;

    for row in rows {
        let Some(obj) = row.as_object() else {
            continue;
        };
        let nested = obj
            .get("image")
            .or_else(|| obj.get("generatedImage"))
            .and_then(Value::as_object);
        let encoded = obj
            .get("bytesBase64Encoded")
            .or_else(|| obj.get("bytes_base64_encoded"))
            .or_else(|| nested.and_then(|image| image.get("imageBytes")))
            .or_else(|| nested.and_then(|image| image.get("bytesBase64Encoded")))
            .and_then(Value::as_str)
            .filter(|data| !data.is_empty());
        if let Some(data) = encoded {
            return Some(data.to_string());
        }
        if let Some(reason) = obj.get("raiFilteredReason").and_then(Value::as_str) {
            tracing::warn!(reason, "generated image was filtered by the service");
        }
    }
    None
}

/// First inline image part, in candidate order. A prompt the service refused to answer
/// is an error so the block reason can be classified.
fn extract_inline_image(response: &Value) -> anyhow::Result<Option<String>> {
    if let Some(reason) = response
        .get("promptFeedback")
        .and_then(|feedback| feedback.get("blockReason"))
        .and_then(Value::as_str)
    {
        return Err(anyhow!("prompt blocked by the service: {reason}"));
    }

    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for candidate in candidates {
        let parts = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            let data = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(|inline| inline.get("data"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            if !data.is_empty() {
                return Ok(Some(data.to_string()));
            }
        }
    }
    Ok(None)
}

fn ensure_decodable(operation: &str, data: String) -> Result<String, GenerationError> {
    match BASE64.decode(data.as_bytes()) {
        Ok(_) => Ok(data),
        Err(err) => Err(report(
            operation,
            GenerationError::Unknown {
                detail: format!("service returned an image that is not valid base64: {err}"),
            },
        )),
    }
}

/// Mime type of a base64 image, from its magic bytes. Unknown formats are sent as PNG.
pub fn sniff_mime_type(image_data: &str) -> Result<&'static str, GenerationError> {
    let bytes = BASE64
        .decode(image_data.trim().as_bytes())
        .map_err(|_| GenerationError::InvalidImageData)?;
    if bytes.is_empty() {
        return Err(GenerationError::InvalidImageData);
    }
    Ok(image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or(GENERATE_MIME_TYPE))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use serde_json::{json, Value};

    use super::{GenerationClient, GENERATE_ASPECT_RATIO, UPSCALE_INSTRUCTION};
    use crate::error::{FailureKind, GenerationError};
    use crate::transport::GenerativeTransport;

    // 1x1 PNG
    const PNG_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

    #[derive(Clone)]
    enum Reply {
        Json(Value),
        Fail(String),
    }

    #[derive(Clone, Default)]
    struct ScriptedTransport {
        replies: Arc<Mutex<Vec<Reply>>>,
        calls: Arc<Mutex<Vec<(String, String, Value)>>>,
    }

    impl ScriptedTransport {
        fn replying(reply: Reply) -> Self {
            let transport = Self::default();
            transport.replies.lock().unwrap().push(reply);
            transport
        }

        fn calls(&self) -> Vec<(String, String, Value)> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, method: &str, model: &str, payload: &Value) -> Result<Value> {
            self.calls
                .lock()
                .unwrap()
                .push((method.to_string(), model.to_string(), payload.clone()));
            match self.replies.lock().unwrap().pop() {
                Some(Reply::Json(value)) => Ok(value),
                Some(Reply::Fail(message)) => Err(anyhow!(message)),
                None => Err(anyhow!("no scripted reply")),
            }
        }
    }

    impl GenerativeTransport for ScriptedTransport {
        fn predict(&self, model: &str, payload: &Value) -> Result<Value> {
            self.answer("predict", model, payload)
        }

        fn generate_content(&self, model: &str, payload: &Value) -> Result<Value> {
            self.answer("generateContent", model, payload)
        }
    }

    fn client(transport: &ScriptedTransport) -> GenerationClient {
        GenerationClient::with_transport(transport.clone())
    }

    #[test]
    fn generate_without_credential_fails_before_any_call() {
        let client = GenerationClient::uninitialized();
        assert_eq!(
            client.generate("a forest", None),
            Err(GenerationError::ClientUninitialized)
        );
        assert_eq!(
            client.upscale(PNG_B64),
            Err(GenerationError::ClientUninitialized)
        );
        assert!(!client.is_initialized());
    }

    #[test]
    fn blank_prompt_is_rejected_locally() {
        let transport = ScriptedTransport::default();
        let client = client(&transport);
        assert_eq!(client.generate("  ", None), Err(GenerationError::EmptyPrompt));
        assert_eq!(client.edit(PNG_B64, ""), Err(GenerationError::EmptyInstruction));
        assert_eq!(client.edit("%%%", "make it blue"), Err(GenerationError::InvalidImageData));
        assert!(transport.calls().is_empty());
    }

    #[test]
    fn generate_returns_first_prediction() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "predictions": [
                {"bytesBase64Encoded": PNG_B64, "mimeType": "image/png"},
                {"bytesBase64Encoded": "Zm9v"}
            ]
        })));
        let client = client(&transport);
        assert_eq!(
            client.generate("a forest", Some("fog")),
            Ok(Some(PNG_B64.to_string()))
        );

        let calls = transport.calls();
        assert_eq!(calls.len(), 1);
        let (method, model, payload) = &calls[0];
        assert_eq!(method, "predict");
        assert_eq!(model, "imagen-3.0-generate-002");
        assert_eq!(payload["instances"][0]["prompt"], json!("a forest"));
        assert_eq!(payload["parameters"]["sampleCount"], json!(1));
        assert_eq!(payload["parameters"]["aspectRatio"], json!(GENERATE_ASPECT_RATIO));
        assert_eq!(payload["parameters"]["negativePrompt"], json!("fog"));
    }

    #[test]
    fn generate_omits_blank_negative_prompt() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({"predictions": []})));
        let client = client(&transport);
        let _ = client.generate("a forest", Some(""));
        let calls = transport.calls();
        assert!(calls[0].2["parameters"].get("negativePrompt").is_none());
    }

    #[test]
    fn generate_accepts_sdk_response_shape() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "generatedImages": [{"image": {"imageBytes": PNG_B64}}]
        })));
        assert_eq!(
            client(&transport).generate("a forest", None),
            Ok(Some(PNG_B64.to_string()))
        );
    }

    #[test]
    fn generate_with_zero_images_is_none() {
        for body in [
            json!({}),
            json!({"predictions": []}),
            json!({"predictions": [{"raiFilteredReason": "filtered"}]}),
        ] {
            let transport = ScriptedTransport::replying(Reply::Json(body));
            assert_eq!(client(&transport).generate("a forest", None), Ok(None));
        }
    }

    #[test]
    fn generate_classifies_transport_failures() {
        let cases = [
            ("Imagen request failed (400): API_KEY_INVALID", FailureKind::InvalidCredential),
            ("Imagen request failed (400): blocked for SAFETY", FailureKind::SafetyRejected),
            ("Imagen request failed (429): Rate limit exceeded", FailureKind::RateLimited),
            ("Imagen request failed (500): internal", FailureKind::ServiceUnavailable),
            ("Imagen request failed (400): Invalid aspect ratio", FailureKind::InvalidRequest),
            ("connection reset", FailureKind::Unknown),
        ];
        for (message, kind) in cases {
            let transport = ScriptedTransport::replying(Reply::Fail(message.to_string()));
            let err = client(&transport)
                .generate("a forest", None)
                .expect_err("scripted failure");
            assert_eq!(err.kind(), kind, "{message}");
            assert_eq!(err.detail(), Some(message));
        }
    }

    #[test]
    fn generate_rejects_undecodable_payload() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "predictions": [{"bytesBase64Encoded": "not base64!"}]
        })));
        let err = client(&transport)
            .generate("a forest", None)
            .expect_err("bad payload");
        assert_eq!(err.kind(), FailureKind::Unknown);
    }

    #[test]
    fn edit_sends_image_then_instruction_and_returns_first_inline_part() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "Here is your image"},
                    {"inlineData": {"mimeType": "image/png", "data": PNG_B64}},
                    {"inlineData": {"mimeType": "image/png", "data": "Zm9v"}}
                ]}
            }]
        })));
        let client = client(&transport);
        assert_eq!(
            client.edit(PNG_B64, "add a moon"),
            Ok(Some(PNG_B64.to_string()))
        );

        let calls = transport.calls();
        let (method, model, payload) = &calls[0];
        assert_eq!(method, "generateContent");
        assert_eq!(model, "gemini-2.5-flash");
        let parts = &payload["contents"][0]["parts"];
        assert_eq!(parts[0]["inlineData"]["mimeType"], json!("image/png"));
        assert_eq!(parts[0]["inlineData"]["data"], json!(PNG_B64));
        assert_eq!(parts[1]["text"], json!("add a moon"));
    }

    #[test]
    fn edit_with_text_only_reply_is_none() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "candidates": [{"content": {"parts": [{"text": "I can't do that"}]}}]
        })));
        assert_eq!(client(&transport).edit(PNG_B64, "add a moon"), Ok(None));
    }

    #[test]
    fn edit_accepts_snake_case_inline_data() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "candidates": [{"content": {"parts": [{"inline_data": {"data": PNG_B64}}]}}]
        })));
        assert_eq!(
            client(&transport).edit(PNG_B64, "add a moon"),
            Ok(Some(PNG_B64.to_string()))
        );
    }

    #[test]
    fn blocked_prompt_feedback_is_a_safety_rejection() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "promptFeedback": {"blockReason": "SAFETY"}
        })));
        let err = client(&transport)
            .edit(PNG_B64, "something unsafe")
            .expect_err("blocked");
        assert_eq!(err.kind(), FailureKind::SafetyRejected);
    }

    #[test]
    fn upscale_uses_fixed_instruction() {
        let transport = ScriptedTransport::replying(Reply::Json(json!({
            "candidates": [{"content": {"parts": [{"inlineData": {"data": PNG_B64}}]}}]
        })));
        let client = client(&transport).with_models("imagen-4.0-generate-001", "gemini-2.5-flash-image");
        assert_eq!(client.upscale(PNG_B64), Ok(Some(PNG_B64.to_string())));

        let calls = transport.calls();
        assert_eq!(calls[0].1, "gemini-2.5-flash-image");
        assert_eq!(
            calls[0].2["contents"][0]["parts"][1]["text"],
            json!(UPSCALE_INSTRUCTION)
        );
    }

    #[test]
    fn upscale_failures_go_through_the_same_classifier() {
        let transport =
            ScriptedTransport::replying(Reply::Fail("Gemini request failed (503): overloaded".to_string()));
        let err = client(&transport).upscale(PNG_B64).expect_err("outage");
        assert_eq!(err.kind(), FailureKind::ServiceUnavailable);
        assert!(err.is_retryable());
    }

    #[test]
    fn unknown_image_format_is_sent_as_png() -> Result<()> {
        assert_eq!(super::sniff_mime_type("Zm9v")?, "image/png");
        assert_eq!(super::sniff_mime_type(PNG_B64)?, "image/png");
        // JPEG magic bytes
        assert_eq!(super::sniff_mime_type("/9j/4AAQSkZJRg==")?, "image/jpeg");
        Ok(())
    }
}
