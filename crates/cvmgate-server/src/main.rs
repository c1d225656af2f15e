//! cvmgate server
//!
//! Runs inside an Azure confidential VM. Every `GET /execute` collects fresh
//! attestation evidence through the platform attestation client, verifies
//! the resulting MAA token and only then runs the protected action.
//!
//! Configuration comes from command line flags, each with an environment
//! variable fallback.

use anyhow::Context;
use api::AppState;
use axum::{Router, routing::get};
use clap::Parser;
use cvmgate::{
    AttestationFlow, ClaimPolicy, ClaimValidator, EvidenceCollector, EvidenceConfig, HttpConfig,
    KeyDirectoryClient, TokenFileMode, TokenVerifier,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod api;
mod web_error;

/// Attestation-gated secret release for confidential VMs
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Socket address to listen on (e.g., "0.0.0.0:8080" or "[::]:8080")
    #[arg(short, long, env = "CVMGATE_LISTEN", default_value = "0.0.0.0:8080")]
    listen: SocketAddr,

    /// Path of the attestation client binary
    #[arg(
        long,
        env = "ATTESTATION_CLIENTBIN_PATH",
        default_value = "/usr/local/bin/AttestationClient"
    )]
    client_bin_path: PathBuf,

    /// File the attestation client's output is redirected into
    #[arg(long, env = "ATTESTATION_TOKEN_FILE", default_value = "/var/tmp/maa_token.jwt")]
    token_file: PathBuf,

    /// MAA tenant URL passed to the client with `-a`; empty uses the client default
    #[arg(long, env = "ATTESTATION_TENANT_URL", default_value = "")]
    tenant_url: String,

    /// Kill the attestation client if it runs longer than this
    #[arg(long)]
    attestation_timeout_secs: Option<u64>,

    /// Give every request its own token file instead of sharing one
    #[arg(long)]
    per_request_token_file: bool,

    /// Reject tokens without an `exp` claim
    #[arg(long)]
    require_expiration: bool,

    /// Also require the vTPM to be enabled in the attested VM configuration
    #[arg(long)]
    require_tpm: bool,
}

impl Args {
    fn evidence_config(&self) -> EvidenceConfig {
        let mut config = EvidenceConfig::new(&self.client_bin_path, &self.token_file)
            .tenant_url(self.tenant_url.as_str());
        if let Some(secs) = self.attestation_timeout_secs {
            config = config.timeout(Duration::from_secs(secs));
        }
        if self.per_request_token_file {
            config = config.token_file_mode(TokenFileMode::PerInvocation);
        }
        config
    }

    fn claim_policy(&self) -> ClaimPolicy {
        let mut policy = ClaimPolicy::new();
        if self.require_expiration {
            policy = policy.require_expiration();
        }
        if self.require_tpm {
            policy = policy.require_tpm();
        }
        policy
    }

    fn attestation_flow(&self) -> anyhow::Result<AttestationFlow> {
        let directory = KeyDirectoryClient::new(HttpConfig::default())
            .context("Failed to build the key directory HTTP client")?;
        let verifier = TokenVerifier::new(directory, ClaimValidator::new(self.claim_policy()));
        Ok(AttestationFlow::new(
            EvidenceCollector::new(self.evidence_config()),
            verifier,
        ))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "cvmgate=debug,cvmgate_server=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        client = %args.client_bin_path.display(),
        token_file = %args.token_file.display(),
        tenant_url = %args.tenant_url,
        "cvmgate server starting"
    );

    let state = AppState {
        flow: Arc::new(args.attestation_flow()?),
    };

    let app = Router::new()
        .route("/health", get(api::health_check))
        .route("/execute", get(api::execute))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
