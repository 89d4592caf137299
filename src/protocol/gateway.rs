//! HTTP gateway protocol client
//!
//! Talks to a protocol gateway that speaks the binary Mochimo protocol on the
//! indexer's behalf and returns JSON:
//! - `GET {base}/probe/{ip}` → [`ProbeReply`]
//! - `GET {base}/block/{ip}/{height}` → [`Block`]

use std::net::Ipv4Addr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::debug;

use super::{Block, PeerStatus, ProbeReply, ProtocolClient};
use crate::error::{IndexerError, Result};

pub struct GatewayClient {
    base: String,
    http: Client,
}

impl GatewayClient {
    /// Create a client with a request timeout to avoid hanging on dead peers
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    pub fn probe_url(&self, ip: Ipv4Addr) -> String {
        format!("{}/probe/{}", self.base, ip)
    }

    pub fn block_url(&self, ip: Ipv4Addr, height: u64) -> String {
        format!("{}/block/{}/{}", self.base, ip, height)
    }
}

#[async_trait]
impl ProtocolClient for GatewayClient {
    async fn probe(&self, ip: Ipv4Addr) -> Result<ProbeReply> {
        let response = match self.http.get(self.probe_url(ip)).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Ok(ProbeReply::failed(PeerStatus::Timeout)),
            Err(e) => return Err(e.into()),
        };

        // The gateway answers 504 when the peer itself timed out
        if response.status() == StatusCode::GATEWAY_TIMEOUT {
            return Ok(ProbeReply::failed(PeerStatus::Timeout));
        }
        if !response.status().is_success() {
            debug!(%ip, status = %response.status(), "[GATEWAY] probe rejected");
            return Ok(ProbeReply::failed(PeerStatus::Error));
        }

        Ok(response.json::<ProbeReply>().await?)
    }

    async fn download_block(&self, ip: Ipv4Addr, height: u64) -> Result<Block> {
        let response = self.http.get(self.block_url(ip, height)).send().await?;
        if !response.status().is_success() {
            return Err(IndexerError::Network(format!(
                "block {} from {} returned status {}",
                height,
                ip,
                response.status()
            )));
        }
        Ok(response.json::<Block>().await?)
    }
}
