/**
 * CLIENT UPSTREAM - Requêtes vers le système de suivi de production legacy
 *
 * Une seule URL configurée, GET avec en-têtes fixes. La réponse est du HTML
 * non fiable : on ne garde que le corps texte et les cookies de session.
 */

use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, CONNECTION, COOKIE, SET_COOKIE,
    USER_AGENT,
};
use std::time::Duration;

use crate::config::UpstreamConf;

const ACCEPT_CONNECT: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";
const ACCEPT_REFRESH: &str = "text/html,application/xhtml+xml";

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("upstream unreachable: {0}")]
    Network(#[source] reqwest::Error),
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),
    #[error("upstream answered HTTP {0}")]
    Status(u16),
}

/// Page reçue : cookies `Set-Cookie` joints par "; " (None si absents)
#[derive(Debug, Clone)]
pub struct UpstreamPage {
    pub cookie: Option<String>,
    pub body: String,
}

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    user_agent: String,
}

impl UpstreamClient {
    pub fn new(conf: &UpstreamConf) -> Self {
        Self {
            http: reqwest::Client::new(),
            url: conf.url.clone(),
            user_agent: conf.user_agent.clone(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET unique; `cookie` présent = réutilisation de la session existante
    pub async fn fetch(
        &self,
        cookie: Option<&str>,
        timeout: Duration,
    ) -> Result<UpstreamPage, UpstreamError> {
        let headers = self.headers(cookie);
        let response = self
            .http
            .get(&self.url)
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_error(e, timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status.as_u16()));
        }

        let cookies: Vec<&str> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        let cookie = (!cookies.is_empty()).then(|| cookies.join("; "));

        let body = response.text().await.map_err(|e| map_error(e, timeout))?;
        Ok(UpstreamPage { cookie, body })
    }

    fn headers(&self, cookie: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Ok(ua) = HeaderValue::from_str(&self.user_agent) {
            headers.insert(USER_AGENT, ua);
        }
        headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        match cookie.and_then(|c| HeaderValue::from_str(c).ok()) {
            Some(value) => {
                headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_REFRESH));
                headers.insert(COOKIE, value);
            }
            None => {
                headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_CONNECT));
                headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("pt-BR,pt;q=0.9"));
            }
        }
        headers
    }
}

fn map_error(err: reqwest::Error, timeout: Duration) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Timeout(timeout)
    } else {
        UpstreamError::Network(err)
    }
}
