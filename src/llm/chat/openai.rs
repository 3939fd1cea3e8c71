use async_trait::async_trait;
use log::info;
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };

use super::{ check_status, sse_stream, ChatClient, CompletionResponse, DataLine, TextStream };
use crate::llm::{ LlmConfig, LlmError };

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
}

#[derive(Serialize, Deserialize)]
struct OpenAIMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIStreamResponse {
    #[serde(default)]
    choices: Vec<OpenAIStreamChoice>,
}

#[derive(Deserialize)]
struct OpenAIStreamChoice {
    #[serde(default)]
    delta: Option<OpenAIDelta>,
}

#[derive(Deserialize)]
struct OpenAIDelta {
    content: Option<String>,
}

fn parse_openai_data(data: &str) -> Result<DataLine, LlmError> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(DataLine::Done);
    }
    if data.is_empty() {
        return Ok(DataLine::Skip);
    }
    let chunk: OpenAIStreamResponse = serde_json
        ::from_str(data)
        .map_err(|e| LlmError::MalformedChunk(format!("{} in chunk {}", e, data)))?;
    let text: String = chunk.choices
        .iter()
        .filter_map(|c| c.delta.as_ref().and_then(|d| d.content.as_deref()))
        .collect();
    if text.is_empty() {
        Ok(DataLine::Skip)
    } else {
        Ok(DataLine::Text(text))
    }
}

impl OpenAIChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>
    ) -> Result<Self, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e|
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
            .ok_or_else(|| LlmError::Config("OpenAI API key is required".into()))?;

        Self::new(api_key, config.completion_model.clone(), config.base_url.clone())
    }

    fn url(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    fn request(&self, prompt: &str, stream: bool) -> OpenAIChatRequest {
        OpenAIChatRequest {
            model: self.model.clone(),
            messages: vec![OpenAIMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            stream: stream.then_some(true),
        }
    }
}

#[async_trait]
impl ChatClient for OpenAIChatClient {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, LlmError> {
        info!("OpenAIChatClient::complete() → model={} base_url={}", self.model, self.base_url);
        let resp = self.http.post(self.url()).json(&self.request(prompt, false)).send().await?;
        let body: OpenAIResponse = check_status(resp).await?.json().await?;

        let content = body.choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .filter(|c| !c.is_empty())
            .ok_or(LlmError::EmptyResponse)?;
        Ok(CompletionResponse { response: content })
    }

    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        info!("OpenAIChatClient::complete_stream() → model={} base_url={}", self.model, self.base_url);
        let request = self.http.post(self.url()).json(&self.request(prompt, true));
        sse_stream(request, parse_openai_data).await
    }

    fn get_model(&self) -> String {
        self.model.clone()
    }
}
