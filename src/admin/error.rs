// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Every error the admin API can return. The `Display` string is the wire
/// `error` kind; the HTTP status is fixed per kind.
#[derive(Debug, Error, PartialEq)]
pub enum ApiError {
    #[error("bad_json")]
    BadJson,
    #[error("missing_credentials")]
    MissingCredentials,
    #[error("missing_fields")]
    MissingFields,
    #[error("missing_password")]
    MissingPassword,
    #[error("cannot_disable_self")]
    CannotDisableSelf,
    #[error("cannot_delete_self")]
    CannotDeleteSelf,
    #[error("to must be >= from")]
    RangeOrder,
    #[error("format must be jsonl or csv")]
    BadFormat,
    #[error("{0}")]
    BadDatetime(String),

    #[error("missing_token")]
    MissingToken,
    #[error("invalid_token")]
    InvalidToken,
    #[error("invalid_credentials")]
    InvalidCredentials,

    #[error("not_found")]
    NotFound,

    #[error("no_admins")]
    NoAdmins,
    #[error("already_initialized")]
    AlreadyInitialized,
    #[error("username_taken")]
    UsernameTaken,

    #[error("list_failed")]
    ListFailed,
    #[error("create_failed")]
    CreateFailed,
    #[error("update_failed")]
    UpdateFailed,
    #[error("delete_failed")]
    DeleteFailed,
    #[error("login_failed")]
    LoginFailed,
    #[error("bootstrap_failed")]
    BootstrapFailed,

    #[error("log database not configured")]
    DbUnavailable,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        use ApiError::*;
        match self {
            BadJson | MissingCredentials | MissingFields | MissingPassword
            | CannotDisableSelf | CannotDeleteSelf | RangeOrder | BadFormat
            | BadDatetime(_) => StatusCode::BAD_REQUEST,
            MissingToken | InvalidToken | InvalidCredentials => StatusCode::UNAUTHORIZED,
            NotFound => StatusCode::NOT_FOUND,
            NoAdmins | AlreadyInitialized | UsernameTaken => StatusCode::CONFLICT,
            ListFailed | CreateFailed | UpdateFailed | DeleteFailed | LoginFailed
            | BootstrapFailed => StatusCode::INTERNAL_SERVER_ERROR,
            DbUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status(),
            [(header::CACHE_CONTROL, "no-store")],
            Json(json!({ "error": self.to_string() })),
        )
            .into_response()
    }
}
