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

//! Status codes shared by beacon's HTTP and gRPC surfaces.
//!
//! Each variant carries its HTTP and tonic equivalents as enum properties so
//! a single classification drives both transports.

use http::StatusCode as HttpStatusCode;
use serde::Serialize;
use strum::EnumProperty;
use tonic::Code as TonicCode;

#[derive(
    Clone,
    Copy,
    Debug,
    Eq,
    PartialEq,
    Serialize,
    strum_macros::EnumProperty,
    strum_macros::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StatusCode {
    #[strum(props(http_status = "400", tonic_code = "3"))]
    InvalidArgument,
    #[strum(props(http_status = "404", tonic_code = "5"))]
    NotFound,
    #[strum(props(http_status = "409", tonic_code = "6"))]
    Conflict,
    #[strum(props(http_status = "504", tonic_code = "4"))]
    DeadlineExceeded,
    #[strum(props(http_status = "503", tonic_code = "14"))]
    Unavailable,
    #[strum(props(http_status = "500", tonic_code = "13"))]
    Internal,
    #[strum(props(http_status = "500", tonic_code = "13"))]
    Unknown,
}

impl StatusCode {
    pub fn http_status(self) -> HttpStatusCode {
        self.get_str("http_status")
            .and_then(|value| value.parse::<u16>().ok())
            .and_then(|value| HttpStatusCode::from_u16(value).ok())
            .unwrap_or(HttpStatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn tonic_code(self) -> TonicCode {
        let value = self
            .get_str("tonic_code")
            .and_then(|value| value.parse::<i32>().ok())
            .unwrap_or(TonicCode::Internal as i32);
        TonicCode::from_i32(value)
    }

    /// Classify an upstream gRPC status for the HTTP surface.
    pub fn from_tonic_code(code: TonicCode) -> Self {
        match code {
            TonicCode::InvalidArgument => Self::InvalidArgument,
            TonicCode::NotFound | TonicCode::Unimplemented => Self::NotFound,
            TonicCode::AlreadyExists | TonicCode::Aborted => Self::Conflict,
            TonicCode::DeadlineExceeded => Self::DeadlineExceeded,
            TonicCode::Unavailable => Self::Unavailable,
            TonicCode::Internal | TonicCode::DataLoss => Self::Internal,
            _ => Self::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_mapping() {
        assert_eq!(
            StatusCode::InvalidArgument.http_status(),
            HttpStatusCode::BAD_REQUEST
        );
        assert_eq!(StatusCode::NotFound.http_status(), HttpStatusCode::NOT_FOUND);
        assert_eq!(
            StatusCode::Unavailable.http_status(),
            HttpStatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            StatusCode::Unknown.http_status(),
            HttpStatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn tonic_code_mapping() {
        assert_eq!(
            StatusCode::InvalidArgument.tonic_code(),
            TonicCode::InvalidArgument
        );
        assert_eq!(StatusCode::NotFound.tonic_code(), TonicCode::NotFound);
        assert_eq!(StatusCode::Internal.tonic_code(), TonicCode::Internal);
    }

    #[test]
    fn upstream_classification() {
        assert_eq!(
            StatusCode::from_tonic_code(TonicCode::Unavailable),
            StatusCode::Unavailable
        );
        assert_eq!(
            StatusCode::from_tonic_code(TonicCode::Unauthenticated),
            StatusCode::Unknown
        );
    }
}
