use clap::builder::BoolishValueParser;
use clap::Parser;
use crate::llm::{ LlmConfig, LlmError, LlmType };

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    // --- Server Args ---
    /// Host address and port for the server to listen on.
    #[arg(long, env = "SERVER_ADDR", default_value = "127.0.0.1:8000")]
    pub server_addr: String,

    /// Comma-separated list of allowed CORS origins ("*" allows any origin).
    #[arg(long, env = "CORS_ORIGINS", default_value = "http://localhost:3000")]
    pub cors_origins: String,

    #[arg(long, env = "ENABLE_TLS", default_value = "false", value_parser = BoolishValueParser::new())]
    pub enable_tls: bool,

    /// Path to the TLS certificate file (PEM format). Requires --tls-key-path.
    #[arg(long, env = "TLS_CERT_PATH")]
    pub tls_cert_path: Option<String>,

    /// Path to the TLS private key file (PEM format). Requires --tls-cert-path.
    #[arg(long, env = "TLS_KEY_PATH")]
    pub tls_key_path: Option<String>,

    // --- Chat LLM Provider Args ---
    /// Type of LLM provider for chat completion (gemini, openai)
    #[arg(long, env = "CHAT_LLM_TYPE", default_value = "gemini")]
    pub chat_llm_type: String,

    /// Base URL for the Chat LLM provider API. Providers fall back to their public endpoint.
    #[arg(long, env = "CHAT_BASE_URL")]
    pub chat_base_url: Option<String>,

    /// API Key for the Chat LLM provider. Falls back to GEMINI_API_KEY / GOOGLE_API_KEY.
    #[arg(long, env = "CHAT_API_KEY", default_value = "")]
    pub chat_api_key: String,

    #[arg(long, env = "GEMINI_API_KEY", hide = true)]
    pub gemini_api_key: Option<String>,

    #[arg(long, env = "GOOGLE_API_KEY", hide = true)]
    pub google_api_key: Option<String>,

    /// Model name for chat completion
    #[arg(long, env = "CHAT_MODEL", default_value = "gemini-2.5-flash")]
    pub chat_model: String,

    // --- History Store Args ---
    /// Conversation store type (local, s3, redis, memory)
    #[arg(long, env = "HISTORY_TYPE", default_value = "local")]
    pub history_type: String,

    /// Forces the s3 conversation store regardless of HISTORY_TYPE.
    #[arg(long, env = "USE_S3", default_value = "false", value_parser = BoolishValueParser::new())]
    pub use_s3: bool,

    #[arg(long, env = "S3_BUCKET", default_value = "")]
    pub s3_bucket: String,

    /// Key prefix for conversation documents inside the bucket.
    #[arg(long, env = "S3_PREFIX", default_value = "")]
    pub s3_prefix: String,

    /// Directory for the local conversation store.
    #[arg(long, env = "MEMORY_DIR", default_value = "../memory")]
    pub memory_dir: String,

    /// Redis endpoint for the redis conversation store (e.g., redis://127.0.0.1:6379)
    #[arg(long, env = "HISTORY_HOST", default_value = "redis://127.0.0.1:6379")]
    pub history_host: String,

    /// Prefix for Redis history keys.
    #[arg(long, env = "HISTORY_REDIS_PREFIX", default_value = "history:")]
    pub history_redis_prefix: String,

    /// Batch size for Redis SCAN command when listing sessions.
    #[arg(long, env = "HISTORY_REDIS_SCAN_COUNT", default_value = "100")]
    pub history_redis_scan_count: usize,

    // --- Prompt Args ---
    /// Path to the prompt configuration file.
    #[arg(long, env = "PROMPTS_PATH", default_value = "json/prompts.json")]
    pub prompts_path: String,

    /// Most recent turns included in the chat prompt. 0 includes every turn.
    #[arg(long, env = "HISTORY_LIMIT", default_value = "10")]
    pub history_limit: usize,

    /// Speaker label style in the chat prompt (upper, title)
    #[arg(long, env = "PROMPT_ROLE_STYLE", default_value = "upper")]
    pub prompt_role_style: String,

    // --- Auth Args ---
    /// JWKS endpoint of the identity provider. Protected endpoints are open when unset.
    #[arg(long, env = "JWKS_URL")]
    pub jwks_url: Option<String>,

    #[arg(long, env = "JWKS_CACHE_SECS", default_value = "3600")]
    pub jwks_cache_secs: u64,

    #[arg(long, env = "JWT_ISSUER")]
    pub jwt_issuer: Option<String>,

    #[arg(long, env = "JWT_AUDIENCE")]
    pub jwt_audience: Option<String>,

    /// Require a bearer token for /api/idea as well as /api/consultation.
    #[arg(long, env = "IDEA_REQUIRE_AUTH", default_value = "false", value_parser = BoolishValueParser::new())]
    pub idea_require_auth: bool,
}

impl Args {
    pub fn history_backend_type(&self) -> String {
        if self.use_s3 { "s3".to_string() } else { self.history_type.trim().to_lowercase() }
    }

    pub fn resolved_api_key(&self) -> Option<String> {
        [Some(self.chat_api_key.clone()), self.gemini_api_key.clone(), self.google_api_key.clone()]
            .into_iter()
            .flatten()
            .map(|k| k.trim().to_string())
            .find(|k| !k.is_empty())
    }

    pub fn chat_llm_config(&self) -> Result<LlmConfig, LlmError> {
        Ok(LlmConfig {
            llm_type: self.chat_llm_type.parse::<LlmType>()?,
            api_key: self.resolved_api_key(),
            completion_model: Some(self.chat_model.clone()).filter(|m| !m.trim().is_empty()),
            base_url: self.chat_base_url.clone().filter(|u| !u.trim().is_empty()),
        })
    }

    pub fn tls_paths(&self) -> Option<(&str, &str)> {
        if !self.enable_tls {
            return None;
        }
        match (&self.tls_cert_path, &self.tls_key_path) {
            (Some(cert), Some(key)) => Some((cert.as_str(), key.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Parsing reads the process environment; tests that touch it run one at a time.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn args(extra: &[&str]) -> Args {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        parse(extra)
    }

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["genai-relay"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn use_s3_overrides_history_type() {
        assert_eq!(args(&["--history-type", "Redis"]).history_backend_type(), "redis");
        assert_eq!(
            args(&["--history-type", "local", "--use-s3"]).history_backend_type(),
            "s3"
        );
    }

    #[test]
    fn api_key_falls_back_to_gemini_key() {
        let a = args(&["--chat-api-key", " ", "--gemini-api-key", "g-key"]);
        assert_eq!(a.resolved_api_key().as_deref(), Some("g-key"));
        let a = args(&["--chat-api-key", "c-key", "--gemini-api-key", "g-key"]);
        assert_eq!(a.resolved_api_key().as_deref(), Some("c-key"));
    }

    #[test]
    fn tls_needs_flag_and_both_paths() {
        assert!(args(&["--tls-cert-path", "c.pem", "--tls-key-path", "k.pem"]).tls_paths().is_none());
        assert!(args(&["--enable-tls", "--tls-cert-path", "c.pem"]).tls_paths().is_none());
        assert_eq!(
            args(&["--enable-tls", "--tls-cert-path", "c.pem", "--tls-key-path", "k.pem"]).tls_paths(),
            Some(("c.pem", "k.pem"))
        );
    }

    #[test]
    fn boolean_env_flags_accept_any_case() {
        let _env = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        std::env::set_var("USE_S3", "True");
        std::env::set_var("IDEA_REQUIRE_AUTH", "YES");
        let parsed = parse(&["--history-type", "local"]);
        std::env::set_var("USE_S3", "FALSE");
        let disabled = parse(&["--history-type", "local"]);
        std::env::remove_var("USE_S3");
        std::env::remove_var("IDEA_REQUIRE_AUTH");

        assert_eq!(parsed.history_backend_type(), "s3");
        assert!(parsed.idea_require_auth);
        assert_eq!(disabled.history_backend_type(), "local");
    }
}
