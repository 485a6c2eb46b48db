//! http-probe: `HealthProbe` issuing a single GET against the application.
//!
//! Any HTTP response counts as reachable and yields its status code; only
//! transport failures (refused, DNS, timeout) are reported as errors.

use std::time::Duration;

use domain::{CoreError, HealthProbe};
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ProbeError {
    #[error("http client setup: {0}")]
    Client(#[source] reqwest::Error),
    #[error("no response from {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

impl From<ProbeError> for CoreError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::Client(_) => CoreError::Fatal(e.to_string()),
            ProbeError::Unreachable { .. } => CoreError::Transient(e.to_string()),
        }
    }
}

pub struct HttpProbe {
    url: String,
    client: reqwest::blocking::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ProbeError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ProbeError::Client)?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }

    /// Probe `http://<host>:<port>/`.
    pub fn for_host(host: &str, port: u16, timeout: Duration) -> Result<Self, ProbeError> {
        Self::new(format!("http://{}:{}/", host, port), timeout)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn get(&self) -> Result<u16, ProbeError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .map_err(|source| ProbeError::Unreachable {
                url: self.url.clone(),
                source,
            })?;
        let status = resp.status().as_u16();
        debug!(url = %self.url, status, "probe response");
        Ok(status)
    }
}

impl HealthProbe for HttpProbe {
    fn probe(&self) -> Result<u16, CoreError> {
        Ok(self.get()?)
    }
}
