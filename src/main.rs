use std::sync::Arc;
use futures_util::future::join_all;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use consumer_host_client::api::ConsumerHostClient;
use consumer_host_client::config::Config;
use consumer_host_client::gate::RequestGate;
use consumer_host_client::http::create_http_client;
use consumer_host_client::session::consent::{ConsentRequest, DialogConsent};
use consumer_host_client::session::signer::{LocalWallet, WalletSigner};
use consumer_host_client::session::store::FileTokenStore;
use consumer_host_client::session::SessionManager;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load Config
    let config = Config::load()?;

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Consumer host: {}", config.endpoint);

    let wallet: Arc<dyn WalletSigner> = match &config.private_key {
        Some(key) => Arc::new(LocalWallet::from_private_key(key)?),
        None => {
            warn!("CONSUMER_HOST_PRIVATE_KEY not set, using a throwaway wallet");
            Arc::new(LocalWallet::random())
        }
    };
    info!("Wallet: {}", wallet.address());

    let (consent, requests) = DialogConsent::channel(1);
    tokio::spawn(prompt_on_terminal(requests));

    let http = create_http_client(config.request_timeout())?;
    let session = SessionManager::new(
        http,
        config.session_config()?,
        wallet,
        Arc::new(consent),
        Arc::new(FileTokenStore::new(&config.token_dir)),
    );
    let client = ConsumerHostClient::new(Arc::new(session), RequestGate::new(config.gate_options()));

    let outcome = client.session().login(false).await;
    if !outcome.status {
        error!("Login failed: {}", outcome.msg);
        return Ok(());
    }

    match client.get_api_keys(true).await {
        Ok(keys) => {
            info!("{} API key(s)", keys.len());
            for key in keys {
                info!("  #{} {} (used {} times)", key.id, key.name, key.times);
            }
        }
        Err(e) => error!("Failed to load API keys: {}", e),
    }

    let deployments: Vec<String> = std::env::args().skip(1).collect();
    let listings = join_all(deployments.iter().map(|id| client.get_project_indexers(id))).await;
    for (id, listing) in deployments.iter().zip(listings) {
        match listing {
            Ok(project) => info!("{}: {} indexer(s)", id, project.indexers.len()),
            Err(e) => error!("{}: failed to load indexers: {}", id, e),
        }
    }

    Ok(())
}

/// Answers sign-in confirmations from stdin.
async fn prompt_on_terminal(mut requests: tokio::sync::mpsc::Receiver<ConsentRequest>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(request) = requests.recv().await {
        println!(
            "Sign a login message with {} to access the consumer host? No transaction is sent. [y/N]",
            request.account
        );
        match lines.next_line().await {
            Ok(Some(answer)) if answer.trim().eq_ignore_ascii_case("y") => request.accept(),
            _ => request.cancel(),
        }
    }
}
