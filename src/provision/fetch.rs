use std::io::Write;

use anyhow::{anyhow, Result};

#[cfg(feature = "download")]
use crate::ui::Ui;

/// Network side of model provisioning.
///
/// Implementations stream the resource at `url` into `sink` and return the
/// number of bytes written. They must not touch the filesystem themselves.
pub trait ModelFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64>;
}

/// Fetcher for builds or runs where downloads are not allowed.
#[derive(Clone, Copy, Debug, Default)]
pub struct OfflineFetcher;

impl ModelFetcher for OfflineFetcher {
    fn fetch(&self, url: &str, _sink: &mut dyn Write) -> Result<u64> {
        Err(anyhow!(
            "downloads are disabled; cannot fetch {} (place the model file locally)",
            url
        ))
    }
}

/// HTTP(S) fetcher with a progress bar.
#[cfg(feature = "download")]
pub struct HttpFetcher {
    agent: ureq::Agent,
    ui: Ui,
}

#[cfg(feature = "download")]
impl HttpFetcher {
    pub fn new(ui: Ui) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(std::time::Duration::from_secs(15))
            .timeout_read(std::time::Duration::from_secs(60))
            .build();
        Self { agent, ui }
    }
}

#[cfg(feature = "download")]
impl ModelFetcher for HttpFetcher {
    fn fetch(&self, url: &str, sink: &mut dyn Write) -> Result<u64> {
        use anyhow::Context;

        let response = self
            .agent
            .get(url)
            .call()
            .with_context(|| format!("request {}", url))?;
        let total = response
            .header("Content-Length")
            .and_then(|len| len.trim().parse::<u64>().ok());
        let bar = self.ui.download_bar(total);
        let mut reader = bar.wrap_read(response.into_reader());
        let written = std::io::copy(&mut reader, sink).with_context(|| format!("read {}", url))?;
        bar.finish_and_clear();
        Ok(written)
    }
}
