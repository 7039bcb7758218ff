//! Policy-server HTTP client (§4.7, §6, §10.6).
//!
//! Grounded on `pkg/apiserver/client.go`'s request shapes; both transport
//! variants from §10.6 are supported — tenant+IP query parameters (the
//! newer schema) and the by-hostname path variant — selected by whether
//! `host_name` is configured.

use bamboo_core::model::{ErrorEnvelope, HostEndpointPolicy};
use bamboo_core::AgentError;

#[derive(Debug, Clone)]
pub struct PolicyClient {
    http: reqwest::Client,
    base_url: String,
    tenant_id: u64,
    host_ipv4: String,
    host_name: Option<String>,
}

impl PolicyClient {
    pub fn new(base_url: String, tenant_id: u64, host_ipv4: String, host_name: Option<String>) -> Self {
        Self { http: reqwest::Client::new(), base_url, tenant_id, host_ipv4, host_name }
    }

    fn fetch_url(&self) -> String {
        match &self.host_name {
            Some(name) => {
                format!("{}/api/internal/v1/hostEndpoints/byName/{}/fetchPolicies", self.base_url, name)
            }
            None => format!(
                "{}/api/internal/v1/hostEndpoints/fetchPolicies?tenantID={}&ip={}",
                self.base_url, self.tenant_id, self.host_ipv4
            ),
        }
    }

    /// `GET /api/v1/ping` — called once at startup; any non-200 is fatal
    /// (§6, §7 category 1).
    pub async fn ping(&self) -> Result<(), AgentError> {
        let url = format!("{}/api/v1/ping", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AgentError::Startup(format!("pinging policy server: {e}")))?;
        if !response.status().is_success() {
            return Err(AgentError::Startup(format!(
                "policy server ping returned {}",
                response.status()
            )));
        }
        Ok(())
    }

    /// Fetches this host's policy bundle. Non-200 responses are always
    /// `Remote` (retryable next tick), never fatal (§7 category 3).
    pub async fn fetch_policies(&self) -> Result<HostEndpointPolicy, AgentError> {
        let response = self
            .http
            .get(self.fetch_url())
            .send()
            .await
            .map_err(|e| AgentError::Remote(format!("fetching policies: {e}")))?;

        if response.status().is_success() {
            return response
                .json::<HostEndpointPolicy>()
                .await
                .map_err(|e| AgentError::Remote(format!("decoding policy bundle: {e}")));
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ErrorEnvelope>(&body) {
            Ok(envelope) => Err(AgentError::Remote(format!(
                "policy server error {} ({}): {}",
                envelope.code, envelope.name, envelope.message
            ))),
            Err(_) => Err(AgentError::Remote(format!("policy server returned {status}: {body}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_transport_used_without_host_name() {
        let client = PolicyClient::new("https://api.example.com".into(), 42, "10.0.0.5".into(), None);
        assert_eq!(
            client.fetch_url(),
            "https://api.example.com/api/internal/v1/hostEndpoints/fetchPolicies?tenantID=42&ip=10.0.0.5"
        );
    }

    #[test]
    fn by_name_transport_used_when_host_name_set() {
        let client = PolicyClient::new(
            "https://api.example.com".into(),
            42,
            "10.0.0.5".into(),
            Some("web-01".into()),
        );
        assert_eq!(
            client.fetch_url(),
            "https://api.example.com/api/internal/v1/hostEndpoints/byName/web-01/fetchPolicies"
        );
    }
}
