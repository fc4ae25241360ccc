//! Out-of-band delivery of confirmation codes through the Telegram Bot API.

use log::{debug, info, warn};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::errors::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum MessengerError {
    #[error("request to messaging API failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<MessengerError> for ApiError {
    fn from(e: MessengerError) -> Self {
        ApiError::UpstreamError(e.to_string())
    }
}

#[derive(Clone)]
pub enum Messenger {
    Telegram(TelegramClient),
    Dummy(DummyMessenger),
}

impl Messenger {
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), MessengerError> {
        match self {
            Messenger::Telegram(client) => client.send_message(chat_id, text).await,
            Messenger::Dummy(dummy) => {
                dummy.send_message(chat_id, text);
                Ok(())
            }
        }
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

#[derive(Clone)]
pub struct TelegramClient {
    http: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramClient {
    pub fn new(api_url: &str, token: &str) -> Result<Self, MessengerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), MessengerError> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        self.http
            .post(&url)
            .json(&SendMessage { chat_id, text })
            .send()
            .await?
            .error_for_status()?;
        info!("Message delivered to Telegram chat {}", chat_id);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub chat_id: String,
    pub text: String,
}

/// Logs messages instead of delivering them and keeps them for inspection.
#[derive(Clone, Default)]
pub struct DummyMessenger {
    sent: Arc<Mutex<Vec<SentMessage>>>,
}

impl DummyMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    fn send_message(&self, chat_id: &str, text: &str) {
        warn!("Messenger not configured, message to {} not delivered", chat_id);
        debug!("Undelivered message for {}: {}", chat_id, text);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(SentMessage {
                chat_id: chat_id.to_string(),
                text: text.to_string(),
            });
        }
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn posts_message_to_bot_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/botTEST-TOKEN/sendMessage")
            .match_body(Matcher::Json(serde_json::json!({
                "chat_id": "42",
                "text": "Your confirmation code: 12345"
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"ok":true,"result":{}}"#)
            .expect(1)
            .create_async()
            .await;

        let client = TelegramClient::new(&server.url(), "TEST-TOKEN").unwrap();
        let messenger = Messenger::Telegram(client);
        messenger
            .send_message("42", "Your confirmation code: 12345")
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn delivery_failure_is_an_upstream_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/botTEST-TOKEN/sendMessage")
            .with_status(400)
            .with_body(r#"{"ok":false,"description":"Bad Request: chat not found"}"#)
            .create_async()
            .await;

        let client = TelegramClient::new(&server.url(), "TEST-TOKEN").unwrap();
        let err = client.send_message("42", "hi").await.unwrap_err();
        let api_err: ApiError = err.into();
        assert!(matches!(api_err, ApiError::UpstreamError(_)));
    }

    #[tokio::test]
    async fn dummy_records_messages() {
        let dummy = DummyMessenger::new();
        let messenger = Messenger::Dummy(dummy.clone());
        messenger.send_message("7", "hello").await.unwrap();
        assert_eq!(
            dummy.sent(),
            vec![SentMessage { chat_id: "7".into(), text: "hello".into() }]
        );
    }
}
