use reqwest::Client;
use std::time::Duration;
use crate::error::Result;

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);

pub fn create_http_client(request_timeout: Duration) -> Result<Client> {
    let client = Client::builder()
        .tcp_nodelay(true)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(10)
        .connect_timeout(CONNECTION_TIMEOUT)
        .timeout(request_timeout)
        .build()?;

    Ok(client)
}
