use std::time::Duration;

use reqwest_middleware::ClientWithMiddleware;
use reqwest_tracing::TracingMiddleware;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpClientConfig {
    #[serde(default)]
    pub connect_timeout_seconds: Option<u64>,
}

impl HttpClientConfig {
    /// Client with per-request tracing spans. Request timeouts are the
    /// caller's concern, only connection establishment is bounded here.
    pub fn new_tracing_client(&self) -> anyhow::Result<ClientWithMiddleware> {
        let mut builder = reqwest::Client::builder();

        if let Some(secs) = self.connect_timeout_seconds {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }

        let client = builder.build()?;

        Ok(reqwest_middleware::ClientBuilder::new(client)
            .with(TracingMiddleware::default())
            .build())
    }
}
