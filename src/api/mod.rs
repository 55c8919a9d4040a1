//! Typed calls to the consumer host's gated endpoints.

pub mod codes;
pub mod types;

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::gate::{make_cache_key, CacheKeyOptions, RequestGate};
use crate::session::{ApiRequest, SessionManager};
use types::{
    ApiKey, ChannelLimit, ChannelSpent, ChannelState, HostingPlan, HostingPlanUpdate,
    NewHostingPlan, ProjectIndexers, Statistics, UserInfo,
};

/// Project listings change slowly; dashboards poll them from many widgets at once.
const PROJECT_INDEXERS_TTL: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ConsumerHostClient {
    session: Arc<SessionManager>,
    gate: RequestGate,
}

impl ConsumerHostClient {
    pub fn new(session: Arc<SessionManager>, gate: RequestGate) -> Self {
        Self { session, gate }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn gate(&self) -> &RequestGate {
        &self.gate
    }

    async fn call<T: DeserializeOwned>(&self, request: ApiRequest, alert: bool) -> Result<T> {
        debug!("{} {}", request.method, request.path);
        self.session.request(&request, alert).await
    }

    pub async fn get_api_keys(&self, alert: bool) -> Result<Vec<ApiKey>> {
        self.call(ApiRequest::get("users/apikey"), alert).await
    }

    pub async fn create_api_key(&self, name: &str, alert: bool) -> Result<ApiKey> {
        self.call(ApiRequest::post("users/apikey/new", json!({ "name": name })), alert)
            .await
    }

    pub async fn delete_api_key(&self, id: u64, alert: bool) -> Result<Value> {
        self.call(ApiRequest::delete(format!("users/apikey/{}", id)), alert)
            .await
    }

    pub async fn get_hosting_plans(&self, alert: bool) -> Result<Vec<HostingPlan>> {
        self.call(ApiRequest::get("users/hosting-plans"), alert).await
    }

    pub async fn create_hosting_plan(&self, plan: &NewHostingPlan, alert: bool) -> Result<HostingPlan> {
        self.call(ApiRequest::post("users/hosting-plans", json!(plan)), alert)
            .await
    }

    pub async fn update_hosting_plan(
        &self,
        id: u64,
        update: &HostingPlanUpdate,
        alert: bool,
    ) -> Result<HostingPlan> {
        self.call(
            ApiRequest::post(format!("users/hosting-plans/{}", id), json!(update)),
            alert,
        )
        .await
    }

    /// Indexers serving a deployment. Routed through the gate so concurrent
    /// callers for the same deployment share one request. Sign-in happens
    /// before the gate so a declined prompt is never retried.
    pub async fn get_project_indexers(&self, deployment_id: &str) -> Result<ProjectIndexers> {
        let key = make_cache_key(
            "getProjectIndexers",
            CacheKeyOptions {
                suffix: Some(deployment_id),
                ..Default::default()
            },
        );
        if self.gate.cached::<ProjectIndexers>(&key).is_none() {
            self.session.ensure_signed_in().await?;
        }

        let request = ApiRequest::get(format!("projects/{}", deployment_id));
        self.gate
            .limit(
                || self.session.request::<ProjectIndexers>(&request, false),
                Some(&key),
                Some(PROJECT_INDEXERS_TTL),
            )
            .await
    }

    pub async fn get_channel_state(&self, channel_id: &str, alert: bool) -> Result<ChannelState> {
        self.call(ApiRequest::get(format!("users/channels/{}/state", channel_id)), alert)
            .await
    }

    pub async fn get_channel_limit(&self, channel_id: &str, alert: bool) -> Result<ChannelLimit> {
        self.call(ApiRequest::get(format!("users/channels/{}/limit", channel_id)), alert)
            .await
    }

    pub async fn get_channel_spent(&self, channel_id: &str, alert: bool) -> Result<ChannelSpent> {
        self.call(ApiRequest::get(format!("users/channels/{}/spent", channel_id)), alert)
            .await
    }

    pub async fn get_statistics(&self, alert: bool) -> Result<Statistics> {
        self.call(ApiRequest::get("users/statistic"), alert).await
    }

    /// Usage aggregated between two unix timestamps (seconds).
    pub async fn get_aggregation(&self, start: i64, end: i64, alert: bool) -> Result<Statistics> {
        self.call(
            ApiRequest::get("users/aggregation")
                .query("start", start)
                .query("end", end),
            alert,
        )
        .await
    }

    pub async fn refresh_user_info(&self, alert: bool) -> Result<UserInfo> {
        self.call(ApiRequest::post("users/refresh", json!({})), alert)
            .await
    }
}
