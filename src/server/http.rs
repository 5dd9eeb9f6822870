//! HTTP listener: login callback, logout, certificate and health

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Query, State, rejection::QueryRejection},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tracing::warn;

use crate::authenticator::{
    Authenticator, CALLBACK_PATH, CERTIFICATE_PATH, CallbackParams, HttpReply, LOGOUT_PATH,
};

/// Build the router for the HTTP listener
pub fn create_router(authenticator: Arc<Authenticator>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route(CALLBACK_PATH, get(callback_handler))
        .route(LOGOUT_PATH, get(logout_handler).post(logout_handler))
        .route(CERTIFICATE_PATH, get(certificate_handler))
        .with_state(authenticator)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

async fn callback_handler(
    State(authenticator): State<Arc<Authenticator>>,
    params: Result<Query<CallbackParams>, QueryRejection>,
    headers: HeaderMap,
) -> Response {
    let params = match params {
        Ok(Query(params)) => params,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Unparseable callback query");
            CallbackParams::default()
        }
    };
    let cookies = cookie_header(&headers);
    into_response(authenticator.callback(&params, cookies.as_deref()).await)
}

async fn logout_handler(
    State(authenticator): State<Arc<Authenticator>>,
    headers: HeaderMap,
) -> Response {
    let cookies = cookie_header(&headers);
    into_response(authenticator.logout(cookies.as_deref()).await)
}

async fn certificate_handler(State(authenticator): State<Arc<Authenticator>>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/x-pem-file")],
        authenticator.certificate_pem().to_string(),
    )
        .into_response()
}

/// All `cookie` headers joined into one (HTTP/2 may split them)
fn cookie_header(headers: &HeaderMap) -> Option<String> {
    let parts: Vec<&str> = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

fn into_response(reply: HttpReply) -> Response {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, reply.body).into_response();
    for (name, value) in reply.headers {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().append(name, value);
            }
            _ => warn!("Dropping unrepresentable response header"),
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append(header::COOKIE, HeaderValue::from_static("a=1"));
        headers.append(header::COOKIE, HeaderValue::from_static("b=2"));
        assert_eq!(cookie_header(&headers).as_deref(), Some("a=1; b=2"));
        assert!(cookie_header(&HeaderMap::new()).is_none());
    }

    #[test]
    fn reply_headers_are_appended_in_order() {
        let reply = HttpReply {
            status: 302,
            headers: vec![
                ("location".to_string(), "https://app.example.com/".to_string()),
                ("set-cookie".to_string(), "a=1".to_string()),
                ("set-cookie".to_string(), "b=2".to_string()),
            ],
            body: String::new(),
        };
        let response = into_response(reply);
        assert_eq!(response.status(), StatusCode::FOUND);
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["a=1", "b=2"]);
        assert_eq!(
            response.headers().get(header::LOCATION).unwrap(),
            "https://app.example.com/"
        );
    }
}
