use rand::thread_rng;
use reqwest::blocking::Client;
use reqwest::header::{ACCEPT, CONTENT_LANGUAGE, CONNECTION, CONTENT_TYPE, USER_AGENT};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use super::request::{self, now_millis};
use super::response::{classify, Recognition};
use crate::fingerprint::Signature;
use crate::proxy::transport::blocking_client;
use crate::proxy::{ProxyDescriptor, ProxyError};

#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Proxy(#[from] ProxyError),
}

/// A sequence of requests over one connection with one client identity
pub trait RecognitionSession {
    fn recognize(&mut self, signature: &Signature) -> Result<Recognition, RecognitionError>;
}

/// Opens sessions against the recognition service
pub trait RecognitionService: Send + Sync {
    /// Fresh client through `proxy` with its own User-Agent. The identity
    /// lives exactly as long as the session: a consensus run shares one, a
    /// single-shot request (and any retry after a rotation) gets a new one.
    fn open_session(
        &self,
        proxy: Option<&ProxyDescriptor>,
    ) -> Result<Box<dyn RecognitionSession>, RecognitionError>;
}

/// HTTP client for the recognition service
#[derive(Debug, Clone)]
pub struct RecognitionClient {
    host: String,
    timeout: Duration,
}

impl RecognitionClient {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

impl RecognitionService for RecognitionClient {
    fn open_session(
        &self,
        proxy: Option<&ProxyDescriptor>,
    ) -> Result<Box<dyn RecognitionSession>, RecognitionError> {
        let client = blocking_client(proxy, self.timeout)?;
        let mut rng = thread_rng();
        Ok(Box::new(HttpSession {
            client,
            host: self.host.clone(),
            user_agent: request::pick_user_agent(&mut rng),
            language: request::pick_content_language(&mut rng),
        }))
    }
}

struct HttpSession {
    client: Client,
    host: String,
    user_agent: &'static str,
    language: &'static str,
}

impl RecognitionSession for HttpSession {
    fn recognize(&mut self, signature: &Signature) -> Result<Recognition, RecognitionError> {
        let url = request::request_url(&self.host);
        let body = request::request_body(signature, &mut thread_rng(), now_millis());

        debug!(
            "Sending signature at {}ms ({}ms sample)",
            signature.offset_ms, signature.sample_ms
        );
        let response = self
            .client
            .post(&url)
            .header(USER_AGENT, self.user_agent)
            .header(ACCEPT, "*/*")
            .header(CONNECTION, "keep-alive")
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_LANGUAGE, self.language)
            .json(&body)
            .send()?;

        let status = response.status().as_u16();
        let text = response.text()?;
        if status != 200 {
            debug!("Recognition service answered HTTP {}", status);
        }
        Ok(classify(status, &text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyKind;

    #[test]
    fn test_open_session_direct_and_proxied() {
        let client = RecognitionClient::new("http://127.0.0.1:9/tag/", Duration::from_secs(1));
        assert!(client.open_session(None).is_ok());

        let proxy = ProxyDescriptor::new(ProxyKind::Socks5, "127.0.0.1", 9050);
        assert!(client.open_session(Some(&proxy)).is_ok());
    }

    #[test]
    fn test_transport_failure_is_an_error() {
        let client = RecognitionClient::new("http://127.0.0.1:9/tag/", Duration::from_millis(500));
        let mut session = client.open_session(None).unwrap();
        let signature = Signature {
            uri: "data:audio/vnd.shazam.sig;base64,AAAA".to_string(),
            sample_ms: 12_000,
            offset_ms: 0,
        };
        assert!(matches!(
            session.recognize(&signature),
            Err(RecognitionError::Transport(_))
        ));
    }
}
