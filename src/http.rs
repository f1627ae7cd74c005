//! Axum response mapping for the dashboard's HTTP layer.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::error::Error;
use crate::metrics::NormalizedMetrics;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::AuthRequired | Self::ClientMisconfigured(_) | Self::RefreshFailed(_) => {
                StatusCode::UNAUTHORIZED
            }
            Self::InvalidRange { .. } | Self::InvalidDate(_) => StatusCode::BAD_REQUEST,
            Self::RefreshTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            #[cfg(feature = "client")]
            Self::Http(_) => StatusCode::BAD_GATEWAY,
            Self::Store(_) | Self::Config(_) | Self::Cancelled => {
                tracing::error!(error = %self, "Dashboard internal error");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal error").into_response();
            }
        };

        if status == StatusCode::BAD_GATEWAY || status == StatusCode::GATEWAY_TIMEOUT {
            tracing::warn!(error = %self, "Upstream service error");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Render a latest-stat lookup: the metrics, or `404` when no day had data.
pub fn latest_stat_response(latest: Option<NormalizedMetrics>) -> Response {
    match latest {
        Some(metrics) => Json(metrics).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no data available" })),
        )
            .into_response(),
    }
}
