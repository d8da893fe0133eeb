use serde::{Deserialize, Serialize};
use std::{path::Path, time::Duration};
use tokio::fs;

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    pub bind: String,
    pub upstream: UpstreamConf,
    pub poll_interval_secs: u64,
    pub csv: CsvConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct UpstreamConf {
    pub url: String,
    pub connect_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct CsvConf {
    pub path: String, // ex: "./public/Dados.csv"
    pub refresh_interval_secs: u64,
    pub enabled: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:3001".into(),
            upstream: UpstreamConf::default(),
            poll_interval_secs: 60,
            csv: CsvConf::default(),
        }
    }
}

impl Default for UpstreamConf {
    fn default() -> Self {
        Self {
            url: "http://192.168.0.110:8080/Tecnicon/Link?d=Nzg5NA==".into(),
            connect_timeout_secs: 20,
            refresh_timeout_secs: 15,
            user_agent: "FactoryDashboard/1.0 (Sistema Monitoramento)".into(),
        }
    }
}

impl Default for CsvConf {
    fn default() -> Self {
        Self {
            path: "./public/Dados.csv".into(),
            refresh_interval_secs: 20,
            enabled: true,
        }
    }
}

impl ProxyConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn csv_refresh_interval(&self) -> Duration {
        Duration::from_secs(self.csv.refresh_interval_secs.max(1))
    }

    /// FLOORWATCH_UPSTREAM_URL / FLOORWATCH_BIND / FLOORWATCH_CSV_PATH priment sur le YAML
    fn apply_env<F>(mut self, var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("FLOORWATCH_UPSTREAM_URL") {
            self.upstream.url = url;
        }
        if let Some(bind) = var("FLOORWATCH_BIND") {
            self.bind = bind;
        }
        if let Some(path) = var("FLOORWATCH_CSV_PATH") {
            self.csv.path = path;
        }
        self
    }
}

fn parse_config(txt: &str) -> ProxyConfig {
    if txt.trim().is_empty() {
        return ProxyConfig::default();
    }
    serde_yaml::from_str(txt).unwrap_or_else(|e| {
        tracing::warn!("[config] config invalide: {e}");
        ProxyConfig::default()
    })
}

pub async fn load_config() -> ProxyConfig {
    let path = std::env::var("FLOORWATCH_CONFIG").unwrap_or_else(|_| "floorwatch.yaml".into());
    let cfg = if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        parse_config(&txt)
    } else {
        tracing::warn!("[config] pas de {path}, usage config par défaut");
        ProxyConfig::default()
    };
    cfg.apply_env(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()))
}
