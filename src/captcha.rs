use async_trait::async_trait;
use base64::Engine;
use log::{debug, error, info, warn};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::CaptchaConfig;

const SUBMIT_URL: &str = "http://2captcha.com/in.php";
const RESULT_URL: &str = "http://2captcha.com/res.php";
const NOT_READY: &str = "CAPCHA_NOT_READY";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum CaptchaError {
    #[error("captcha submission rejected: {0}")]
    Rejected(String),
    #[error("captcha could not be solved: {0}")]
    Unsolvable(String),
    #[error("no captcha answer after {0:?}")]
    Timeout(Duration),
    #[error("captcha service unreachable: {0}")]
    Network(#[from] reqwest::Error),
}

#[async_trait]
pub trait CaptchaSolver: Send + Sync {
    /// Returns the text shown in the captcha image
    async fn solve(&self, image_png: &[u8]) -> Result<String, CaptchaError>;
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: i64,
    request: String,
}

#[derive(Debug, PartialEq, Eq)]
enum PollState {
    Solved(String),
    Pending,
    Failed(String),
}

impl ApiResponse {
    fn poll_state(self) -> PollState {
        if self.status == 1 {
            PollState::Solved(self.request)
        } else if self.request == NOT_READY {
            PollState::Pending
        } else {
            PollState::Failed(self.request)
        }
    }
}

/// Client for the 2Captcha image recognition API
pub struct TwoCaptcha {
    client: reqwest::Client,
    api_key: String,
    timeout: Duration,
    poll_interval: Duration,
}

impl TwoCaptcha {
    pub fn new(api_key: String, timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            timeout,
            poll_interval,
        }
    }

    /// `None` when no API key is configured
    pub fn from_config(config: &CaptchaConfig) -> Option<Self> {
        config
            .api_key
            .clone()
            .map(|key| Self::new(key, config.timeout, config.poll_interval))
    }

    fn max_polls(&self) -> u32 {
        let interval = self.poll_interval.as_secs_f64().max(0.001);
        ((self.timeout.as_secs_f64() / interval) as u32).max(1)
    }

    async fn submit(&self, image_png: &[u8]) -> Result<String, CaptchaError> {
        let body = base64::engine::general_purpose::STANDARD.encode(image_png);

        info!("Submitting captcha to 2Captcha");
        let response: ApiResponse = self
            .client
            .post(SUBMIT_URL)
            .form(&[
                ("method", "base64"),
                ("key", self.api_key.as_str()),
                ("body", body.as_str()),
                ("json", "1"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;

        if response.status != 1 {
            error!("2Captcha rejected the captcha: {}", response.request);
            return Err(CaptchaError::Rejected(response.request));
        }
        Ok(response.request)
    }

    async fn poll(&self, captcha_id: &str) -> Result<PollState, CaptchaError> {
        let response: ApiResponse = self
            .client
            .get(RESULT_URL)
            .query(&[
                ("key", self.api_key.as_str()),
                ("action", "get"),
                ("id", captcha_id),
                ("json", "1"),
            ])
            .timeout(REQUEST_TIMEOUT)
            .send()
            .await?
            .json()
            .await?;
        Ok(response.poll_state())
    }
}

#[async_trait]
impl CaptchaSolver for TwoCaptcha {
    async fn solve(&self, image_png: &[u8]) -> Result<String, CaptchaError> {
        let captcha_id = self.submit(image_png).await?;
        debug!("Captcha accepted with id {}, waiting for the answer", captcha_id);

        for _ in 0..self.max_polls() {
            tokio::time::sleep(self.poll_interval).await;
            match self.poll(&captcha_id).await? {
                PollState::Solved(answer) => {
                    info!("Captcha solved: {}", answer);
                    return Ok(answer);
                }
                PollState::Pending => continue,
                PollState::Failed(reason) => {
                    error!("2Captcha could not solve the captcha: {}", reason);
                    return Err(CaptchaError::Unsolvable(reason));
                }
            }
        }

        warn!("Timed out waiting for 2Captcha after {:?}", self.timeout);
        Err(CaptchaError::Timeout(self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> ApiResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_poll_states() {
        assert_eq!(
            response(r#"{"status":1,"request":"7R4K"}"#).poll_state(),
            PollState::Solved("7R4K".to_string())
        );
        assert_eq!(
            response(r#"{"status":0,"request":"CAPCHA_NOT_READY"}"#).poll_state(),
            PollState::Pending
        );
        assert_eq!(
            response(r#"{"status":0,"request":"ERROR_CAPTCHA_UNSOLVABLE"}"#).poll_state(),
            PollState::Failed("ERROR_CAPTCHA_UNSOLVABLE".to_string())
        );
    }

    #[test]
    fn test_poll_budget() {
        let solver = TwoCaptcha::new("k".into(), Duration::from_secs(120), Duration::from_secs(5));
        assert_eq!(solver.max_polls(), 24);

        let tiny = TwoCaptcha::new("k".into(), Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(tiny.max_polls(), 1);
    }

    #[test]
    fn test_disabled_without_key() {
        let config = CaptchaConfig {
            api_key: None,
            timeout: Duration::from_secs(120),
            poll_interval: Duration::from_secs(5),
            fallback: "0000".into(),
        };
        assert!(TwoCaptcha::from_config(&config).is_none());
    }
}
