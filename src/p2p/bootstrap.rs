//! Bootstrap Module
//!
//! Seeds the peer directory from ordered peer-list sources. Remote lists are
//! fetched over HTTP, anything else is read as a local file. The first source
//! that yields at least one routable address wins; the rest are skipped.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use tracing::{info, warn};

use super::directory::PeerDirectory;
use super::parse_peer_list;
use crate::error::{IndexerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapSource {
    Url(url::Url),
    File(PathBuf),
}

impl BootstrapSource {
    /// `http://` and `https://` sources are URLs, everything else is a path
    pub fn parse(source: &str) -> Result<Self> {
        let source = source.trim();
        if source.starts_with("http://") || source.starts_with("https://") {
            let url = url::Url::parse(source)
                .map_err(|e| IndexerError::Config(format!("Invalid source {}: {}", source, e)))?;
            Ok(BootstrapSource::Url(url))
        } else {
            Ok(BootstrapSource::File(PathBuf::from(source)))
        }
    }

    pub fn describe(&self) -> String {
        match self {
            BootstrapSource::Url(url) => url.to_string(),
            BootstrapSource::File(path) => path.display().to_string(),
        }
    }

    /// Fetch the raw peer list
    pub async fn fetch(&self, http: &Client) -> Result<String> {
        match self {
            BootstrapSource::Url(url) => {
                let response = http.get(url.clone()).send().await?;
                if !response.status().is_success() {
                    return Err(IndexerError::Bootstrap(format!(
                        "{} returned status {}",
                        url,
                        response.status()
                    )));
                }
                Ok(response.text().await?)
            }
            BootstrapSource::File(path) => Ok(tokio::fs::read_to_string(path).await?),
        }
    }
}

pub struct Bootstrapper {
    sources: Vec<BootstrapSource>,
    http: Client,
}

impl Bootstrapper {
    pub fn new(sources: &[String], timeout: Duration) -> Result<Self> {
        let sources = sources
            .iter()
            .map(|s| BootstrapSource::parse(s))
            .collect::<Result<Vec<_>>>()?;
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| IndexerError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { sources, http })
    }

    pub fn sources(&self) -> &[BootstrapSource] {
        &self.sources
    }

    /// Try each source in order until one yields routable peers.
    /// Returns the number of addresses the winning source listed.
    pub async fn seed(&self, directory: &PeerDirectory, now: i64) -> Result<usize> {
        for source in &self.sources {
            let name = source.describe();
            let data = match source.fetch(&self.http).await {
                Ok(data) => data,
                Err(e) => {
                    warn!("[BOOTSTRAP] {} unavailable: {}", name, e);
                    continue;
                }
            };

            let peers = parse_peer_list(&data);
            if peers.is_empty() {
                warn!("[BOOTSTRAP] {} contained no valid peers", name);
                continue;
            }

            let added = directory.add_all(&peers, &name, now);
            info!(
                "[BOOTSTRAP] {} listed {} peers ({} new)",
                name,
                peers.len(),
                added.len()
            );
            return Ok(peers.len());
        }

        Err(IndexerError::Bootstrap(format!(
            "none of {} sources yielded a routable peer",
            self.sources.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_source_classification() {
        assert!(matches!(
            BootstrapSource::parse("https://mochimo.org/startnodes.lst").unwrap(),
            BootstrapSource::Url(_)
        ));
        assert!(matches!(
            BootstrapSource::parse("/var/lib/startnodes.lst").unwrap(),
            BootstrapSource::File(_)
        ));
    }

    #[tokio::test]
    async fn test_first_useful_source_wins() {
        let mut empty = tempfile::NamedTempFile::new().unwrap();
        writeln!(empty, "10.0.0.1\n127.0.0.1").unwrap();
        let mut good = tempfile::NamedTempFile::new().unwrap();
        writeln!(good, "1.2.3.4\n5.6.7.8").unwrap();
        let mut skipped = tempfile::NamedTempFile::new().unwrap();
        writeln!(skipped, "9.9.9.9").unwrap();

        let sources: Vec<String> = std::iter::once("/nonexistent/startnodes.lst".to_string())
            .chain(
                [&empty, &good, &skipped]
                    .iter()
                    .map(|f| f.path().display().to_string()),
            )
            .collect();
        let bootstrapper = Bootstrapper::new(&sources, Duration::from_secs(1)).unwrap();
        let directory = PeerDirectory::new(30, 259_200);

        assert_eq!(bootstrapper.seed(&directory, 0).await.unwrap(), 2);
        assert_eq!(directory.len(), 2);
        assert!(directory.get(&"9.9.9.9".parse().unwrap()).is_none());
    }

    #[tokio::test]
    async fn test_all_sources_failing_is_an_error() {
        let bootstrapper =
            Bootstrapper::new(&["/nonexistent/a.lst".to_string()], Duration::from_secs(1)).unwrap();
        let directory = PeerDirectory::new(30, 259_200);
        let err = bootstrapper.seed(&directory, 0).await.unwrap_err();
        assert!(matches!(err, IndexerError::Bootstrap(_)));
    }
}
