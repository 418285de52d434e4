use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::models::envelope::ApiResponse;
use crate::models::job::{JobParams, JobRecord};
use crate::models::remote::{Device, RemoteKind};

/// Client for the job control API and the device registry.
///
/// Every call returns the `{ code, message, data }` envelope; anything other
/// than code 200 is a [`ControlError::Rejected`].
pub struct ControlClient {
    http: Client,
    base_url: String,
}

#[derive(Deserialize)]
struct CreatedJob {
    id: i64,
}

impl ControlClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ControlError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ControlError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<ApiResponse<T>, ControlError> {
        let response = request.send().await.map_err(ControlError::Http)?;
        let envelope: ApiResponse<T> = response.json().await.map_err(ControlError::Http)?;

        if !envelope.is_ok() {
            return Err(ControlError::Rejected {
                code: envelope.code,
                message: envelope.message,
            });
        }
        Ok(envelope)
    }

    /// Pull the full, authoritative job list.
    pub async fn list_jobs(&self) -> Result<Vec<JobRecord>, ControlError> {
        let envelope = self
            .call::<Vec<JobRecord>>(self.http.get(self.url("/jobs")))
            .await?;
        envelope.data.ok_or(ControlError::MissingData("jobs"))
    }

    pub async fn list_remotes(&self, kind: RemoteKind) -> Result<Vec<Device>, ControlError> {
        let envelope = self
            .call::<Vec<Device>>(
                self.http
                    .get(self.url("/remotes"))
                    .query(&[("type", kind.as_ref())]),
            )
            .await?;
        envelope.data.ok_or(ControlError::MissingData("remotes"))
    }

    pub async fn find_remote(&self, kind: RemoteKind, id: i64) -> Result<Option<Device>, ControlError> {
        Ok(self
            .list_remotes(kind)
            .await?
            .into_iter()
            .find(|device| device.id == id))
    }

    /// Create a job, returning the id the control plane assigned.
    pub async fn create_job(&self, params: &JobParams) -> Result<i64, ControlError> {
        let envelope = self
            .call::<CreatedJob>(self.http.post(self.url("/jobs")).json(params))
            .await?;
        envelope
            .data
            .map(|created| created.id)
            .ok_or(ControlError::MissingData("created job"))
    }

    pub async fn update_job(&self, id: i64, params: &JobParams) -> Result<String, ControlError> {
        self.command(self.http.put(self.url(&format!("/jobs/{id}"))).json(params))
            .await
    }

    pub async fn start_job(&self, id: i64) -> Result<String, ControlError> {
        self.command(self.http.post(self.url(&format!("/jobs/{id}/start"))))
            .await
    }

    pub async fn stop_job(&self, id: i64) -> Result<String, ControlError> {
        self.command(self.http.post(self.url(&format!("/jobs/{id}/stop"))))
            .await
    }

    pub async fn delete_job(&self, id: i64) -> Result<String, ControlError> {
        self.command(self.http.delete(self.url(&format!("/jobs/{id}"))))
            .await
    }

    /// Commands only report success; their bodies never feed the store.
    async fn command(&self, request: RequestBuilder) -> Result<String, ControlError> {
        let envelope = self.call::<serde_json::Value>(request).await?;
        Ok(envelope.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Control API rejected the request ({code}): {message}")]
    Rejected { code: i32, message: String },

    #[error("Control API response carried no {0}")]
    MissingData(&'static str),
}
