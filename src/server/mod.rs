pub mod api;
pub mod error;
pub mod sse;

use crate::cli::Args;
use api::AppState;
use log::{ error, info, warn };
use std::error::Error;
use std::net::SocketAddr;

pub struct Server {
    args: Args,
    state: AppState,
}

impl Server {
    pub fn new(args: Args, state: AppState) -> Self {
        Self { args, state }
    }

    pub async fn run(self) -> Result<(), Box<dyn Error + Send + Sync>> {
        let addr: SocketAddr = self.args.server_addr.parse()?;
        let cors = api::cors_layer(&self.args.cors_origins);
        let app = api::router(self.state, cors);

        match self.args.tls_paths() {
            Some((cert_path, key_path)) => {
                if rustls::crypto::ring::default_provider().install_default().is_err() {
                    warn!("A rustls crypto provider was already installed");
                }
                let tls_config = axum_server::tls_rustls::RustlsConfig
                    ::from_pem_file(cert_path, key_path).await
                    .map_err(|e| {
                        error!("Failed to load TLS certificate/key: {}", e);
                        e
                    })?;
                info!("Starting HTTPS server on: https://{}", addr);
                axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service()).await?;
            }
            None => {
                if self.args.enable_tls {
                    error!("ENABLE_TLS was set but TLS_CERT_PATH/TLS_KEY_PATH are missing. Serving plain HTTP.");
                }
                let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
                    error!("Failed to bind HTTP server to {}: {}", addr, e);
                    e
                })?;
                info!("Starting HTTP server on: http://{}", addr);
                axum::serve(listener, app.into_make_service())
                    .with_graceful_shutdown(shutdown_signal()).await?;
            }
        }
        info!("Server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
