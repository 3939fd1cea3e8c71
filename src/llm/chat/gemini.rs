use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use reqwest::header::{ HeaderMap, HeaderValue, CONTENT_TYPE };
use serde::{ Deserialize, Serialize };

use super::{ check_status, sse_stream, ChatClient, CompletionResponse, DataLine, TextStream };
use crate::llm::{ LlmConfig, LlmError };

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

#[derive(Serialize)]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Deserialize, Default)]
struct GoogleResponse {
    #[serde(default)]
    candidates: Vec<GoogleCandidate>,
}

#[derive(Deserialize)]
struct GoogleCandidate {
    #[serde(default)]
    content: Option<GoogleContent>,
}

#[derive(Deserialize)]
struct GoogleContent {
    #[serde(default)]
    parts: Vec<GooglePart>,
}

#[derive(Deserialize)]
struct GooglePart {
    #[serde(default)]
    text: Option<String>,
}

impl GoogleResponse {
    /// Text of the first candidate, with all of its parts joined.
    fn text(&self) -> String {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|content| {
                content.parts
                    .iter()
                    .filter_map(|p| p.text.as_deref())
                    .collect::<String>()
            })
            .unwrap_or_default()
    }
}

fn parse_gemini_data(data: &str) -> Result<DataLine, LlmError> {
    let data = data.trim();
    if data.is_empty() {
        return Ok(DataLine::Skip);
    }
    let chunk: GoogleResponse = serde_json
        ::from_str(data)
        .map_err(|e| LlmError::MalformedChunk(format!("{} in chunk {}", e, data)))?;
    let text = chunk.text();
    if text.is_empty() {
        Ok(DataLine::Skip)
    } else {
        Ok(DataLine::Text(text))
    }
}

pub struct GeminiChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            "x-goog-api-key",
            HeaderValue::from_str(&api_key).map_err(|e|
                LlmError::Config(format!("Invalid API key format: {}", e))
            )?
        );
        let http = HttpClient::builder().default_headers(headers).build()?;

        Ok(Self {
            http,
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url
                .filter(|u| !u.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| LlmError::Config("Google API key is required for GeminiChatClient".into()))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/models/{}:{}", self.base_url.trim_end_matches('/'), self.model, method)
    }

    fn payload(prompt: &str) -> GeminiRequest {
        GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart { text: prompt.to_string() }],
            }],
        }
    }
}

#[async_trait]
impl ChatClient for GeminiChatClient {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, LlmError> {
        info!("GeminiChatClient::complete() → model={} base_url={}", self.model, self.base_url);
        let resp = self.http.post(self.endpoint("generateContent")).json(&Self::payload(prompt)).send().await?;
        let body: GoogleResponse = check_status(resp).await?.json().await?;

        let text = body.text();
        if text.is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(CompletionResponse { response: text })
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        info!("GeminiChatClient::complete_stream() → model={} base_url={}", self.model, self.base_url);
        let request = self.http
            .post(self.endpoint("streamGenerateContent"))
            .query(&[("alt", "sse")])
            .json(&Self::payload(prompt));
        sse_stream(request, parse_gemini_data).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
