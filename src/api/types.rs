use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ApiKey {
    pub id: u64,
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub times: u64,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct HostingPlan {
    pub id: u64,
    pub deployment_id: String,
    pub price: String,
    pub maximum: u32,
    pub expiration: u64,
    #[serde(default)]
    pub is_actived: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NewHostingPlan {
    pub deployment_id: String,
    pub price: String,
    pub expiration: u64,
    pub maximum: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HostingPlanUpdate {
    pub price: String,
    pub expiration: u64,
    pub maximum: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProjectIndexer {
    pub indexer: String,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub max_time: Option<u64>,
    #[serde(default)]
    pub block_height: Option<u64>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ProjectIndexers {
    #[serde(default)]
    pub indexers: Vec<ProjectIndexer>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelSpent {
    pub spent: String,
    #[serde(default)]
    pub remote: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelLimit {
    pub price: String,
    pub limit: u64,
    #[serde(default)]
    pub period: Option<u64>,
}

/// Channel state payloads are passed through to the caller untouched.
pub type ChannelState = Value;
pub type Statistics = Value;
pub type UserInfo = Value;
