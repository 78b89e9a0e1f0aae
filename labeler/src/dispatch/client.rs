//! Training-service client
//!
//! The trainer is a black box behind four POST endpoints. Any non-2xx status
//! is treated as a failed delivery.

use async_trait::async_trait;
use labeler_common::protocol::{endpoints, InitTraining, StopTraining, TestData, TrainBatch};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("labeler/", env!("CARGO_PKG_VERSION"));

/// Delivery errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// Trainer could not be reached (connection refused, timeout, ...)
    #[error("Training service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Trainer answered with a non-success status
    #[error("Training service rejected delivery with status {0}: {1}")]
    Rejected(u16, String),

    /// `init_training` kept failing until the configured max wait ran out
    #[error("Training service unreachable at init after {attempts} attempts: {last_error}")]
    ServiceUnreachableAtInit { attempts: u32, last_error: String },

    /// Client could not be built
    #[error("Client configuration error: {0}")]
    Config(String),
}

/// The training service as seen by the dispatcher
#[async_trait]
pub trait TrainingService: Send + Sync {
    async fn init_training(&self, body: &InitTraining) -> Result<(), DeliveryError>;
    async fn train(&self, body: &TrainBatch) -> Result<(), DeliveryError>;
    async fn test_data(&self, body: &TestData) -> Result<(), DeliveryError>;
    async fn stop_training(&self, body: &StopTraining) -> Result<(), DeliveryError>;
}

/// HTTP implementation of [`TrainingService`]
pub struct HttpTrainerClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpTrainerClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DeliveryError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| DeliveryError::Config(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint)
    }

    async fn post<T: Serialize + Sync>(&self, endpoint: &str, body: &T) -> Result<(), DeliveryError> {
        let url = self.endpoint_url(endpoint);
        tracing::debug!(url = %url, "Posting to training service");

        let response = self
            .http_client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| DeliveryError::ServiceUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected(status.as_u16(), error_text));
        }

        Ok(())
    }
}

#[async_trait]
impl TrainingService for HttpTrainerClient {
    async fn init_training(&self, body: &InitTraining) -> Result<(), DeliveryError> {
        self.post(endpoints::INIT_TRAINING, body).await
    }

    async fn train(&self, body: &TrainBatch) -> Result<(), DeliveryError> {
        self.post(endpoints::TRAIN, body).await
    }

    async fn test_data(&self, body: &TestData) -> Result<(), DeliveryError> {
        self.post(endpoints::TEST_DATA, body).await
    }

    async fn stop_training(&self, body: &StopTraining) -> Result<(), DeliveryError> {
        self.post(endpoints::STOP_TRAINING, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_url_joins_without_double_slash() {
        let client =
            HttpTrainerClient::new("http://trainer:3333/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://trainer:3333");
        assert_eq!(
            client.endpoint_url(endpoints::INIT_TRAINING),
            "http://trainer:3333/init_training"
        );
    }

    #[tokio::test]
    async fn test_unreachable_trainer_is_service_unavailable() {
        // Reserve a port, then release it so nothing is listening there
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = HttpTrainerClient::new(
            &format!("http://127.0.0.1:{}", port),
            Duration::from_millis(500),
        )
        .unwrap();
        let result = client
            .init_training(&InitTraining {
                labels_list: vec!["cat".to_string()],
            })
            .await;

        assert!(matches!(result, Err(DeliveryError::ServiceUnavailable(_))));
    }
}
