//! `upload_wandb`: a thin HTTP adapter forwarding archive metadata to a
//! configurable metrics endpoint. No dashboard of our own, just the sink.

use std::collections::BTreeMap;

use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WandbError {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error("upload rejected with status {0}")]
    StatusNotOk(StatusCode),
}

/// Forwards one Experiment/Pair's metadata to a metrics sink.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn upload(&self, experiment_id: &str, fields: &BTreeMap<String, String>) -> Result<(), WandbError>;
}

/// Posts `{experiment_id, fields}` as JSON to a configured endpoint.
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Self {
        HttpSink {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait::async_trait]
impl Sink for HttpSink {
    async fn upload(&self, experiment_id: &str, fields: &BTreeMap<String, String>) -> Result<(), WandbError> {
        let body = serde_json::json!({
            "experiment_id": experiment_id,
            "fields": fields,
        });
        let res = self.client.post(&self.endpoint).json(&body).send().await?;
        match res.status() {
            StatusCode::OK | StatusCode::CREATED | StatusCode::ACCEPTED => Ok(()),
            status => Err(WandbError::StatusNotOk(status)),
        }
    }
}
