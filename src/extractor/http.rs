//! Per-attempt HTTP client construction

use std::time::Duration;

use reqwest::{Client, Response};

use crate::error::ExtractError;
use crate::identity::Identity;

/// Network settings shared by both extractors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HttpSettings {
    /// Upper bound on one attempt, body included
    pub timeout: Duration,
    /// Route through the identity's proxy
    pub use_proxy: bool,
}

impl HttpSettings {
    /// Settings with the given timeout, routed through proxies
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            use_proxy: true,
        }
    }
}

/// Fresh client bound to one identity
pub(crate) fn build_client(
    identity: &Identity,
    settings: &HttpSettings,
) -> Result<Client, ExtractError> {
    let mut builder = Client::builder()
        .user_agent(identity.user_agent.as_str())
        .timeout(settings.timeout);

    if settings.use_proxy {
        let proxy_url = identity
            .route
            .proxy_url()
            .map_err(|e| ExtractError::Transport(format!("invalid proxy {}: {}", identity.route, e)))?;
        let proxy = reqwest::Proxy::all(proxy_url).map_err(|e| {
            ExtractError::Transport(format!("invalid proxy {}: {}", identity.route, e))
        })?;
        builder = builder.proxy(proxy);
    } else {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|e| ExtractError::Transport(format!("failed to create HTTP client: {}", e)))
}

/// GET `url`, turning non-success statuses into [`ExtractError::Response`]
pub(crate) async fn get(client: &Client, url: &str) -> Result<Response, ExtractError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| ExtractError::from_reqwest(&e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(ExtractError::Response {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    Ok(response)
}
