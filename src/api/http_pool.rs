use std::time::Duration;

use reqwest::{Client, ClientBuilder, Proxy};

use crate::config::AppConfig;
use crate::errors::Result;

const USER_AGENT: &str = concat!("spowlo/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP connection pool for backend calls.
#[derive(Debug, Clone)]
pub struct HttpPool {
    client: Client,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl HttpPool {
    pub fn new(connect_timeout_secs: u64, request_timeout_secs: u64) -> Result<Self> {
        let connect_timeout = Duration::from_secs(connect_timeout_secs);
        let request_timeout = Duration::from_secs(request_timeout_secs);
        let client = Self::builder(connect_timeout, request_timeout).build()?;

        Ok(Self {
            client,
            connect_timeout,
            request_timeout,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let pool = Self::new(config.connect_timeout_secs, config.request_timeout_secs)?;
        match &config.proxy {
            Some(proxy_url) if !proxy_url.trim().is_empty() => pool.with_proxy(proxy_url),
            _ => Ok(pool),
        }
    }

    pub fn with_proxy(mut self, proxy_url: &str) -> Result<Self> {
        let proxy = Proxy::all(proxy_url)?;
        self.client = Self::builder(self.connect_timeout, self.request_timeout)
            .proxy(proxy)
            .build()?;
        log::info!("Routing backend requests through proxy {}", proxy_url);
        Ok(self)
    }

    fn builder(connect_timeout: Duration, request_timeout: Duration) -> ClientBuilder {
        ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(30)))
            .timeout(request_timeout)
            .connect_timeout(connect_timeout)
            .user_agent(USER_AGENT)
            .gzip(true)
            .brotli(true)
            .tcp_keepalive(Duration::from_secs(60))
            .tcp_nodelay(true)
    }

    pub fn get_client(&self) -> &Client {
        &self.client
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}
