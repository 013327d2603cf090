//! HTTP client for the external prediction service.

use super::{PredictRequest, PredictResponse, PredictorEndpointConfig};
use reqwest::blocking::Client;
use std::time::Duration;

/// Blocking client for the prediction service's /predict endpoint.
pub struct PredictionClient {
    client: Client,
    config: PredictorEndpointConfig,
}

impl PredictionClient {
    pub fn new(config: PredictorEndpointConfig) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_s))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self { client, config })
    }

    /// Request a prediction for one feature snapshot.
    ///
    /// # Returns
    /// * `Ok(PredictResponse)` on HTTP 200 with a parseable body
    /// * `Err(String)` with error details otherwise
    pub fn predict(&self, request: &PredictRequest) -> Result<PredictResponse, String> {
        let url = format!("{}/predict", self.config.service_url.trim_end_matches('/'));

        log::debug!("Requesting prediction from {} for {}", url, request.ue_id);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("X-Api-Key", &self.config.api_key)
            .json(request)
            .send()
            .map_err(|e| format!("Network error: {}", e))?;

        let status = response.status();
        if status.is_success() {
            response
                .json::<PredictResponse>()
                .map_err(|e| format!("Malformed prediction response: {}", e))
        } else if status.is_client_error() {
            let body = response.text().unwrap_or_default();
            if status.as_u16() == 401 {
                Err("Authentication failed. Check API key in predictor.toml".to_string())
            } else {
                Err(format!("Invalid request ({}): {}", status.as_u16(), body))
            }
        } else {
            let body = response.text().unwrap_or_default();
            Err(format!("Server error ({}): {}", status.as_u16(), body))
        }
    }
}
