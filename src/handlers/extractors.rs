//! Request extractors shared by the handlers.

use crate::{errors::AppError, state::AppState};
use axum::{
    Form,
    extract::{ConnectInfo, FromRequest, FromRequestParts, Multipart, Request},
    http::{header, request::Parts},
};
use axum_extra::extract::cookie::CookieJar;
use std::{collections::HashMap, convert::Infallible, net::SocketAddr};

pub const SESSION_COOKIE: &str = "filedrop_session";

/// Proof that the caller holds a live session cookie.
///
/// Handlers that take this extractor reject anonymous requests with 401.
#[derive(Debug, Clone)]
pub struct Authenticated {
    pub token: String,
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        match jar.get(SESSION_COOKIE).map(|c| c.value().to_string()) {
            Some(token) if state.sessions.is_valid(&token) => Ok(Self { token }),
            _ => Err(AppError::unauthorized("authentication required")),
        }
    }
}

/// Remote IP of the connection, or `"unknown"` when the server was not
/// started with connect info.
#[derive(Debug, Clone)]
pub struct ClientAddr(pub String);

impl<S> FromRequestParts<S> for ClientAddr
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let addr = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string())
            .unwrap_or_else(|| "unknown".into());
        Ok(Self(addr))
    }
}

/// Text form fields from either a urlencoded or a multipart body.
///
/// Multipart file parts are read as text too, so only use this for small forms.
#[derive(Debug, Default)]
pub struct FormFields(pub HashMap<String, String>);

impl FormFields {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str).filter(|v| !v.is_empty())
    }
}

impl<S> FromRequest<S> for FormFields
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_multipart = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("multipart/form-data"));

        if !is_multipart {
            let Form(fields) = Form::<HashMap<String, String>>::from_request(req, state)
                .await
                .map_err(|err| AppError::bad_request(err.body_text()))?;
            return Ok(Self(fields));
        }

        let mut multipart = Multipart::from_request(req, state)
            .await
            .map_err(|err| AppError::bad_request(err.body_text()))?;
        let mut fields = HashMap::new();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };
            fields.insert(name, field.text().await?);
        }
        Ok(Self(fields))
    }
}
