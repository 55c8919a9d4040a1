//! Consumer host session: bearer token acquisition through a wallet-signed
//! SIWE login, per-account persistence, and the gated request wrapper that
//! re-authenticates once when the server reports the session as gone.

pub mod consent;
pub mod signer;
pub mod siwe;
pub mod store;

use dashmap::DashMap;
use parking_lot::RwLock;
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::codes::error_from_body;
use crate::error::{parse_error, AppError, Result};
use consent::SignConsent;
use signer::{normalize_account, WalletSigner};
use siwe::SiweMessage;
use store::{token_storage_key, TokenStore};

/// Probe used by [`SessionManager::check_if_has_login`].
pub const PROBE_PATH: &str = "users/apikey";

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub endpoint: Url,
    /// SIWE domain, usually the host name of the app.
    pub domain: String,
    pub uri: String,
    pub statement: Option<String>,
    pub chain_id: u64,
}

/// Result of [`SessionManager::login`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    pub status: bool,
    pub msg: String,
}

impl LoginOutcome {
    fn ok() -> Self {
        Self {
            status: true,
            msg: String::new(),
        }
    }

    fn failed(msg: String) -> Self {
        Self { status: false, msg }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionToken {
    pub account: String,
    pub value: String,
}

/// Surfaces alert-flagged request failures to the user.
pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Default notifier: failures go to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, message: &str) {
        warn!("Consumer host request failed: {}", message);
    }
}

/// A call to a gated consumer host endpoint.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            body: Some(body),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            method: Method::DELETE,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    message: &'a str,
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

pub struct SessionManager {
    http: Client,
    config: SessionConfig,
    wallet: RwLock<Arc<dyn WalletSigner>>,
    consent: Arc<dyn SignConsent>,
    store: Arc<dyn TokenStore>,
    notifier: Arc<dyn Notifier>,
    tokens: DashMap<String, String>,
    login_locks: DashMap<String, Arc<Mutex<()>>>,
    has_login: AtomicBool,
    loading: AtomicBool,
}

impl SessionManager {
    pub fn new(
        http: Client,
        config: SessionConfig,
        wallet: Arc<dyn WalletSigner>,
        consent: Arc<dyn SignConsent>,
        store: Arc<dyn TokenStore>,
    ) -> Self {
        Self {
            http,
            config,
            wallet: RwLock::new(wallet),
            consent,
            store,
            notifier: Arc::new(TracingNotifier),
            tokens: DashMap::new(),
            login_locks: DashMap::new(),
            has_login: AtomicBool::new(false),
            loading: AtomicBool::new(false),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Normalized address of the connected wallet.
    pub fn account(&self) -> String {
        normalize_account(&self.wallet.read().address())
    }

    /// Point the session at another wallet account. Tokens stay partitioned per account.
    pub fn switch_wallet(&self, wallet: Arc<dyn WalletSigner>) {
        *self.wallet.write() = wallet;
        self.has_login.store(false, Ordering::SeqCst);
    }

    pub fn has_login(&self) -> bool {
        self.has_login.load(Ordering::SeqCst)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::SeqCst)
    }

    /// Token for the current account, from memory or durable storage.
    pub async fn current_token(&self) -> Result<Option<SessionToken>> {
        let account = self.account();
        Ok(self
            .cached_token(&account)
            .await?
            .map(|value| SessionToken { account, value }))
    }

    /// Ensure the current account holds a token. Without `force_refresh` a
    /// cached token is reused without prompting; otherwise the user is asked
    /// to consent, the wallet signs a SIWE message and the server issues a token.
    pub async fn login(&self, force_refresh: bool) -> LoginOutcome {
        let stale = if force_refresh {
            match self.cached_token(&self.account()).await {
                Ok(token) => token,
                Err(e) => return LoginOutcome::failed(parse_error(&e)),
            }
        } else {
            None
        };

        match self.ensure_token(stale.as_deref()).await {
            Ok(_) => LoginOutcome::ok(),
            Err(e) => LoginOutcome::failed(parse_error(&e)),
        }
    }

    /// Probe the server with whatever token is cached and record whether it is accepted.
    pub async fn check_if_has_login(&self) -> bool {
        let _loading = LoadingGuard::start(&self.loading);

        let token = match self.cached_token(&self.account()).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not read stored token: {}", e);
                None
            }
        };
        let has_login = match self
            .send::<Value>(&ApiRequest::get(PROBE_PATH), token.as_deref())
            .await
        {
            Err(e) if e.requires_reauth() => false,
            Err(e) => {
                debug!("Login probe failed without a session error: {}", e);
                true
            }
            Ok(_) => true,
        };
        self.has_login.store(has_login, Ordering::SeqCst);
        has_login
    }

    /// Forget the current account's token in memory and in storage.
    pub async fn logout(&self) -> Result<()> {
        let account = self.account();
        self.tokens.remove(&account);
        self.store.remove(&token_storage_key(&account)).await?;
        self.has_login.store(false, Ordering::SeqCst);
        info!("Logged out {}", account);
        Ok(())
    }

    /// Call a gated endpoint. Signs in first when no token is cached; a
    /// "not logged in" answer triggers one forced login and one retry. When
    /// `alert` is set, the final error is also sent to the notifier.
    pub async fn request<T: DeserializeOwned>(&self, request: &ApiRequest, alert: bool) -> Result<T> {
        let result = self.request_with_reauth(request).await;
        if alert {
            if let Err(e) = &result {
                self.notifier.notify(&parse_error(e));
            }
        }
        result
    }

    /// Token for the current account, signing in without forcing a refresh
    /// when none is cached. Lets callers settle consent before entering a
    /// retrying section.
    pub(crate) async fn ensure_signed_in(&self) -> Result<String> {
        match self.cached_token(&self.account()).await? {
            Some(token) => Ok(token),
            None => self.ensure_token(None).await,
        }
    }

    async fn request_with_reauth<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T> {
        let token = self.ensure_signed_in().await?;

        match self.send(request, Some(token.as_str())).await {
            Err(e) if e.requires_reauth() => {
                info!("Consumer host session rejected on {}, signing in again", request.path);
                let fresh = match self.ensure_token(Some(token.as_str())).await {
                    Ok(fresh) => fresh,
                    Err(login_err) => {
                        warn!("Re-login failed: {}", parse_error(&login_err));
                        return Err(e);
                    }
                };
                self.send(request, Some(fresh.as_str())).await
            }
            other => other,
        }
    }

    /// Returns the cached token unless it equals `stale`, signing in otherwise.
    /// `stale` is the token a caller saw rejected, so a login another caller
    /// completed in the meantime is reused instead of prompting again.
    async fn ensure_token(&self, stale: Option<&str>) -> Result<String> {
        let wallet = self.wallet.read().clone();
        let account = normalize_account(&wallet.address());

        let lock = self
            .login_locks
            .entry(account.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        // A login that finished while we waited on the lock already did the work.
        if let Some(token) = self.cached_token(&account).await? {
            if stale != Some(token.as_str()) {
                self.tokens.insert(account.clone(), token.clone());
                self.has_login.store(true, Ordering::SeqCst);
                return Ok(token);
            }
        }

        match self.sign_in(wallet.as_ref(), &account).await {
            Ok(token) => {
                self.store.set(&token_storage_key(&account), &token).await?;
                self.tokens.insert(account.clone(), token.clone());
                self.has_login.store(true, Ordering::SeqCst);
                info!("Signed in to consumer host as {}", account);
                Ok(token)
            }
            Err(e) => {
                self.has_login.store(false, Ordering::SeqCst);
                warn!("Consumer host login for {} failed: {}", account, e);
                Err(e)
            }
        }
    }

    async fn sign_in(&self, wallet: &dyn WalletSigner, account: &str) -> Result<String> {
        if !self.consent.confirm(account).await {
            return Err(AppError::UserRejected);
        }

        let message = SiweMessage::new(
            &self.config.domain,
            &wallet.address(),
            self.config.statement.as_deref(),
            &self.config.uri,
            self.config.chain_id,
        )
        .to_string();
        let signature = wallet.sign_message(&message).await?;

        let response = self
            .http
            .post(self.url("login")?)
            .json(&LoginRequest {
                message: &message,
                signature: &signature,
            })
            .send()
            .await?;

        let status = response.status();
        let body = read_body(response).await?;
        if let Some(err) = error_from_body(&body) {
            return Err(AppError::Server(err));
        }
        if !status.is_success() {
            return Err(AppError::Operation(format!("Login failed with HTTP {}", status)));
        }

        let LoginResponse { token } = serde_json::from_value(body)?;
        Ok(token)
    }

    async fn send<T: DeserializeOwned>(&self, request: &ApiRequest, token: Option<&str>) -> Result<T> {
        let mut builder = self
            .http
            .request(request.method.clone(), self.url(&request.path)?);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();
        let body = read_body(response).await?;

        if let Some(err) = error_from_body(&body) {
            return Err(AppError::Server(err));
        }
        if !status.is_success() {
            return Err(AppError::Operation(format!(
                "{} {} returned HTTP {}",
                request.method, request.path, status
            )));
        }

        Ok(serde_json::from_value(body)?)
    }

    async fn cached_token(&self, account: &str) -> Result<Option<String>> {
        if let Some(token) = self.tokens.get(account) {
            return Ok(Some(token.value().clone()));
        }

        let stored = self.store.get(&token_storage_key(account)).await?;
        if let Some(token) = &stored {
            self.tokens.insert(account.to_string(), token.clone());
        }
        Ok(stored)
    }

    fn url(&self, path: &str) -> Result<Url> {
        let base = self.config.endpoint.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{}/{}", base, path.trim_start_matches('/')))?)
    }
}

async fn read_body(response: reqwest::Response) -> Result<Value> {
    let bytes = response.bytes().await?;
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
}

struct LoadingGuard<'a>(&'a AtomicBool);

impl<'a> LoadingGuard<'a> {
    fn start(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
