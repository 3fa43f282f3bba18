use crate::config::DEFAULT_GEMINI_MODEL;
use crate::emotion::Emotion;
use crate::narrate::{NarrateError, NarrativeGenerator};
use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GeminiNarrativeGenerator {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiNarrativeGenerator {
    pub fn new(api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            model: DEFAULT_GEMINI_MODEL.to_owned(),
            base_url: GEMINI_BASE_URL.to_owned(),
        }
    }

    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    contents: Vec<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    role: &'static str,
    parts: Vec<Part>,
}

#[derive(Serialize)]
struct Part {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Option<Vec<Candidate>>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    parts: Option<Vec<ResponsePart>>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

#[derive(Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

fn build_prompt(emotion: Emotion, intensity: u8) -> String {
    format!(
        "You are Bloom, a therapeutic assistant focused on mental health and wellness. \
A person is experiencing strong {emotion} (intensity {intensity}/10). \
Based on these inputs, provide a compassionate observation or a brief advice.\n\n\
Guidelines:\n\
Use conversational language, no clinical terms\n\
Keep the paragraph under 50 words\n\
Sound like a wise friend, not a therapist"
    )
}

fn text_from_response(response: GenerateResponse) -> Result<String, NarrateError> {
    if let Some(feedback) = &response.prompt_feedback {
        if feedback.block_reason.is_some() {
            return Err(NarrateError::ContentPolicyRejected);
        }
    }

    let candidate = response
        .candidates
        .and_then(|mut c| if c.is_empty() { None } else { Some(c.remove(0)) })
        .ok_or_else(|| NarrateError::InvalidResponse("no candidates in response".to_owned()))?;

    if candidate.finish_reason.as_deref() == Some("SAFETY") {
        return Err(NarrateError::ContentPolicyRejected);
    }

    let text = candidate
        .content
        .and_then(|c| c.parts)
        .and_then(|parts| parts.into_iter().find_map(|p| p.text))
        .unwrap_or_default();

    let text = text.trim().to_owned();
    if text.is_empty() {
        return Err(NarrateError::InvalidResponse("empty response text".to_owned()));
    }
    Ok(text)
}

impl NarrativeGenerator for GeminiNarrativeGenerator {
    fn generate(
        &self,
        emotion: Emotion,
        intensity: u8,
    ) -> BoxFuture<'_, Result<String, NarrateError>> {
        let this = self.clone();
        async move {
            let request = GenerateRequest {
                contents: vec![Content {
                    role: "user",
                    parts: vec![Part {
                        text: build_prompt(emotion, intensity),
                    }],
                }],
                generation_config: GenerationConfig {
                    temperature: 0.9,
                    top_p: 0.95,
                },
            };

            let url = format!(
                "{}/models/{}:generateContent?key={}",
                this.base_url,
                urlencoding::encode(&this.model),
                this.api_key
            );

            let response = this
                .client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&request)
                .send()
                .await
                .map_err(NarrateError::Http)?;

            if !response.status().is_success() {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(NarrateError::Api(status, body));
            }

            let parsed: GenerateResponse = response
                .json()
                .await
                .map_err(|e| NarrateError::InvalidResponse(e.to_string()))?;

            text_from_response(parsed)
        }
        .boxed()
    }
}
