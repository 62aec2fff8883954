// Copyright 2026 beacon authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Per-request errors surfaced by the gateway: bad input comes back as 4xx,
//! upstream and descriptor trouble as 5xx, always with the textual cause in
//! the JSON body.

use axum::{Json, response::IntoResponse};
use beacon_error::StatusCode;
use serde::Serialize;
use snafu::Snafu;
use strum::EnumProperty;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: StatusCode,
    pub message: String,
}

#[derive(Debug, Snafu, strum_macros::EnumProperty)]
#[snafu(visibility(pub))]
pub enum ApiError {
    #[snafu(display("Invalid request body: {reason}"))]
    #[strum(props(status_code = "invalid_argument"))]
    InvalidBody { reason: String },

    #[snafu(display("Unknown method {symbol}"))]
    #[strum(props(status_code = "not_found"))]
    UnknownMethod { symbol: String },

    #[snafu(display("Descriptor lookup for {symbol} failed: {reason}"))]
    #[strum(props(status_code = "internal"))]
    Descriptor { symbol: String, reason: String },

    #[snafu(display("Failed to format reply: {reason}"))]
    #[strum(props(status_code = "internal"))]
    FormatReply { reason: String },

    // The upstream status carries its own classification.
    #[snafu(display("Upstream call failed: {message}"))]
    Upstream { code: tonic::Code, message: String },
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        if let Self::Upstream { code, .. } = self {
            return StatusCode::from_tonic_code(*code);
        }
        self.get_str("status_code")
            .and_then(|value| value.parse().ok())
            .unwrap_or(StatusCode::Unknown)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = Json(ErrorBody {
            code: self.status_code(),
            message: self.to_string(),
        });
        (self.status_code().http_status(), body).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_input_maps_to_4xx() {
        let error = ApiError::InvalidBody {
            reason: "trailing garbage".to_string(),
        };
        assert_eq!(error.status_code(), StatusCode::InvalidArgument);
        assert_eq!(error.status_code().http_status().as_u16(), 400);

        let error = ApiError::UnknownMethod {
            symbol: "apis.Greeter/Nope".to_string(),
        };
        assert_eq!(error.status_code().http_status().as_u16(), 404);
    }

    #[test]
    fn upstream_status_drives_the_http_code() {
        let error = ApiError::Upstream {
            code: tonic::Code::Unavailable,
            message: "no ready subchannel".to_string(),
        };
        assert_eq!(error.status_code().http_status().as_u16(), 503);

        let error = ApiError::Upstream {
            code: tonic::Code::Internal,
            message: "boom".to_string(),
        };
        assert_eq!(error.status_code().http_status().as_u16(), 500);
    }
}
