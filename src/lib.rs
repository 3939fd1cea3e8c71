pub mod agent;
pub mod auth;
pub mod cli;
pub mod config;
pub mod history;
pub mod llm;
pub mod models;
pub mod server;

use agent::TwinAgent;
use cli::Args;
use config::prompt::{ initialize_prompts, ChatPromptOptions, RoleStyle };
use history::{ initialize_history_backend, ConversationStore };
use log::info;
use server::{ api::AppState, Server };
use std::error::Error;
use std::sync::Arc;

pub async fn run(args: Args) -> Result<(), Box<dyn Error + Send + Sync>> {
    info!("--- Core Configuration ---");
    info!("Server Address: {}", args.server_addr);
    info!("CORS Origins: {}", args.cors_origins);
    info!("Chat LLM Type: {}", args.chat_llm_type);
    info!("Chat Model: {}", args.chat_model);
    info!("History Store Type: {}", args.history_backend_type());
    info!("History Limit: {}", args.history_limit);
    info!("Prompts Path: {}", args.prompts_path);
    info!("TLS Enabled: {}", args.tls_paths().is_some());
    info!("JWKS URL: {}", args.jwks_url.as_deref().unwrap_or("(none)"));
    info!("-------------------------");

    let chat_client = llm::chat::new_client(&args.chat_llm_config()?)?;
    info!("Chat model ready: {}", chat_client.get_model());

    let prompts = initialize_prompts(&args.prompts_path)?;
    let options = ChatPromptOptions {
        role_style: args.prompt_role_style.parse::<RoleStyle>()?,
        history_limit: args.history_limit,
    };

    let store = ConversationStore::new(initialize_history_backend(&args).await?);
    let agent = Arc::new(TwinAgent::new(chat_client.clone(), store, prompts.clone(), options));
    let verifier = auth::initialize_verifier(&args)?;

    let state = AppState {
        agent,
        chat_client,
        prompts,
        prompts_path: args.prompts_path.clone(),
        verifier,
        idea_requires_auth: args.idea_require_auth,
    };

    Server::new(args, state).run().await
}
