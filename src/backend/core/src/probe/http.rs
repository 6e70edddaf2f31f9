use async_trait::async_trait;
use std::time::Duration;

use super::{timeout_message, Probe, ProbeResult, ProbeTarget};
use crate::error::Result;

/// HTTP GET probe. Any response counts as reachable; only transport errors are `down`.
pub struct HttpProbe {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpProbe {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;

        Ok(Self { client, timeout })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self, target: &ProbeTarget) -> ProbeResult {
        let ProbeTarget::Http(url) = target else {
            return ProbeResult::down(format!("not an HTTP target: {}", target));
        };

        match self.client.get(url.clone()).send().await {
            Ok(response) => ProbeResult::up(format!("OK: {}", response.status().as_u16())),
            Err(e) if e.is_timeout() => ProbeResult::down(timeout_message(self.timeout)),
            Err(e) => ProbeResult::down(format!("HTTP request failed: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CheckKind, Outcome};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target(uri: &str) -> ProbeTarget {
        ProbeTarget::parse(CheckKind::Http, uri).unwrap()
    }

    #[tokio::test]
    async fn test_success_response_is_up() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(Duration::from_secs(2), "monitra-test").unwrap();
        let result = probe.check(&target(&format!("{}/health", server.uri()))).await;

        assert_eq!(result.outcome, Outcome::Up);
        assert_eq!(result.message.as_deref(), Some("OK: 200"));
    }

    #[tokio::test]
    async fn test_server_error_still_reachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(Duration::from_secs(2), "monitra-test").unwrap();
        let result = probe.check(&target(&server.uri())).await;

        assert_eq!(result.outcome, Outcome::Up);
        assert_eq!(result.message.as_deref(), Some("OK: 503"));
    }

    #[tokio::test]
    async fn test_slow_response_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(3)))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(Duration::from_millis(200), "monitra-test").unwrap();
        let result = probe.check(&target(&server.uri())).await;

        assert_eq!(result.outcome, Outcome::Down);
        assert!(result.message.unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_connection_refused_is_down() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let probe = HttpProbe::new(Duration::from_secs(2), "monitra-test").unwrap();
        let result = probe.check(&target(&format!("http://{}", addr))).await;

        assert_eq!(result.outcome, Outcome::Down);
        assert!(result.message.unwrap().starts_with("HTTP request failed"));
    }
}
