pub mod gemini;
pub mod openai;

use async_trait::async_trait;
use futures::{ Future, Stream, StreamExt };
use log::debug;
use serde::Deserialize;
use std::pin::Pin;
use std::sync::Arc;
use super::{ LlmConfig, LlmError, LlmType };
use self::gemini::GeminiChatClient;
use self::openai::OpenAIChatClient;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String, LlmError>> + Send>>;

#[derive(Deserialize, Debug, Clone)]
pub struct CompletionResponse {
    pub response: String,
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<CompletionResponse, LlmError>;

    /// Text fragments in arrival order. Dropping the stream cancels the upstream call.
    async fn complete_stream(&self, prompt: &str) -> Result<TextStream, LlmError> {
        let resp = self.complete(prompt).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(resp.response) })))
    }

    fn get_model(&self) -> String;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, LlmError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Gemini => Arc::new(GeminiChatClient::from_config(config)?),
        LlmType::OpenAI => Arc::new(OpenAIChatClient::from_config(config)?),
    };
    Ok(client)
}

pub fn create_streaming_response<F, Fut>(response_fn: F) -> TextStream
    where
        F: FnOnce(mpsc::Sender<Result<String, LlmError>>) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        response_fn(tx).await;
    });

    Box::pin(ReceiverStream::new(rx))
}

/// What one upstream `data:` payload means for the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataLine {
    Text(String),
    Skip,
    Done,
}

pub type DataParser = fn(&str) -> Result<DataLine, LlmError>;

/// Splits a byte stream into lines, holding partial lines (and partial UTF-8
/// sequences) until the rest arrives.
#[derive(Debug, Default)]
pub struct SseLineDecoder {
    buffer: Vec<u8>,
}

impl SseLineDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).trim_end_matches('\r').to_string())
    }
}

pub fn sse_data(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(|data| data.strip_prefix(' ').unwrap_or(data))
}

pub(crate) async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(LlmError::Status { status: status.as_u16(), body })
}

/// Sends `request` and turns the upstream SSE body into a [`TextStream`].
///
/// Connection failures and non-success statuses are returned here, before any
/// fragment is produced. The accepted response then lives inside the producer
/// task, which exits as soon as the consumer drops the stream.
pub async fn sse_stream(
    request: reqwest::RequestBuilder,
    parser: DataParser
) -> Result<TextStream, LlmError> {
    let resp = check_status(request.send().await?).await?;
    Ok(
        create_streaming_response(move |tx| async move {
            tokio::select! {
                _ = tx.closed() => {
                    debug!("Stream consumer went away, dropping upstream response");
                }
                _ = pump_sse(resp, parser, &tx) => {}
            }
        })
    )
}

async fn pump_sse(
    resp: reqwest::Response,
    parser: DataParser,
    tx: &mpsc::Sender<Result<String, LlmError>>
) {
    let mut decoder = SseLineDecoder::default();
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                let _ = tx.send(Err(LlmError::Request(e))).await;
                return;
            }
        };
        for line in decoder.push(&chunk) {
            if !forward_line(&line, parser, tx).await {
                return;
            }
        }
    }
    if let Some(line) = decoder.finish() {
        forward_line(&line, parser, tx).await;
    }
}

/// Returns false once the stream should stop.
async fn forward_line(
    line: &str,
    parser: DataParser,
    tx: &mpsc::Sender<Result<String, LlmError>>
) -> bool {
    let Some(data) = sse_data(line) else {
        return true;
    };
    match parser(data) {
        Ok(DataLine::Text(text)) => tx.send(Ok(text)).await.is_ok(),
        Ok(DataLine::Skip) => true,
        Ok(DataLine::Done) => false,
        Err(e) => {
            let _ = tx.send(Err(e)).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_joins_lines_split_across_chunks() {
        let mut decoder = SseLineDecoder::default();
        assert!(decoder.push(b"data: {\"a\"").is_empty());
        assert_eq!(decoder.push(b":1}\r\n\r\ndata: x\n"), vec!["data: {\"a\":1}", "", "data: x"]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn decoder_keeps_multibyte_characters_split_between_chunks() {
        let bytes = "data: café\n".as_bytes();
        let split = bytes.len() - 2;
        let mut decoder = SseLineDecoder::default();
        assert!(decoder.push(&bytes[..split]).is_empty());
        assert_eq!(decoder.push(&bytes[split..]), vec!["data: café"]);
    }

    #[test]
    fn decoder_flushes_unterminated_tail() {
        let mut decoder = SseLineDecoder::default();
        decoder.push(b"data: last");
        assert_eq!(decoder.finish().as_deref(), Some("data: last"));
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn sse_data_strips_one_leading_space() {
        assert_eq!(sse_data("data: hello"), Some("hello"));
        assert_eq!(sse_data("data:hello"), Some("hello"));
        assert_eq!(sse_data("data:  two"), Some(" two"));
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data("event: message"), None);
    }

    struct FixedClient;

    #[async_trait]
    impl ChatClient for FixedClient {
        async fn complete(&self, prompt: &str) -> Result<CompletionResponse, LlmError> {
            Ok(CompletionResponse { response: format!("echo: {}", prompt) })
        }

        fn get_model(&self) -> String {
            "fixed".to_string()
        }
    }

    #[tokio::test]
    async fn default_stream_yields_the_whole_completion_once() {
        let fragments: Vec<_> = FixedClient.complete_stream("hi").await.unwrap().collect().await;
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].as_ref().unwrap(), "echo: hi");
    }

    #[tokio::test]
    async fn dropping_the_stream_stops_the_producer() {
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
        let mut stream = create_streaming_response(move |tx| async move {
            let mut n = 0u64;
            loop {
                if tx.send(Ok(n.to_string())).await.is_err() {
                    break;
                }
                n += 1;
            }
            let _ = done_tx.send(());
        });

        assert_eq!(stream.next().await.unwrap().unwrap(), "0");
        drop(stream);

        tokio::time::timeout(std::time::Duration::from_secs(1), done_rx).await.unwrap().unwrap();
    }
}
