use super::error::NotifyError;
use crate::models::webhook::WebhookPayload;
use reqwest::blocking::Client;
use std::time::Duration;

pub trait WebhookTransport: Send {
    fn post(&self, payload: &WebhookPayload) -> Result<(), NotifyError>;
}

pub struct ReqwestTransport {
    client: Client,
    url: String,
}

impl ReqwestTransport {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .user_agent(concat!("qr-gate/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl WebhookTransport for ReqwestTransport {
    fn post(&self, payload: &WebhookPayload) -> Result<(), NotifyError> {
        let resp = self.client.post(&self.url).json(payload).send()?;
        let status = resp.status();
        if !status.is_success() {
            return Err(NotifyError::Status(status.as_u16()));
        }
        Ok(())
    }
}
