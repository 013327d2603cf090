//! Control-plane contracts with external collaborators.
//!
//! Carries the wire payloads exchanged with the external prediction
//! service and the harness (predict requests, QoS feedback, mode control),
//! the TOML configuration for reaching the service, and the blocking HTTP
//! client used by the remote predictor. The HTTP server side of these
//! contracts lives outside this crate.

pub mod client;
pub mod command;
pub mod config;

pub use client::PredictionClient;
pub use command::{
    ModeBody, PredictRequest, PredictResponse, QosFeedback, QosFeedbackAck, RfMetricsEntry,
};
pub use config::PredictorEndpointConfig;
