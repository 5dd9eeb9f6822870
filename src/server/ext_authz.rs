//! Envoy ext_authz gRPC adapter
//!
//! Translates `CheckRequest` into [`CheckInput`] and a [`Decision`] back into
//! `CheckResponse`. Redirects and denials become a `DeniedHttpResponse`
//! carrying the status, `Location` and `Set-Cookie` headers Envoy relays to
//! the browser.

use std::sync::Arc;

use envoy_types::ext_authz::v3::CheckResponseExt;
use envoy_types::ext_authz::v3::pb::{
    Authorization, AuthorizationServer, CheckRequest, CheckResponse,
};
use envoy_types::pb::envoy::config::core::v3::header_value_option::HeaderAppendAction;
use envoy_types::pb::envoy::config::core::v3::{HeaderValue, HeaderValueOption};
use envoy_types::pb::envoy::r#type::v3::HttpStatus;
use envoy_types::pb::envoy::service::auth::v3::check_response::HttpResponse;
use envoy_types::pb::envoy::service::auth::v3::{DeniedHttpResponse, OkHttpResponse};
use tonic::{Request, Response, Status};

use crate::authenticator::{Authenticator, CheckInput, Decision};

/// ext_authz `Authorization` service backed by an [`Authenticator`]
pub struct ExtAuthzService {
    authenticator: Arc<Authenticator>,
}

impl ExtAuthzService {
    /// Create the service
    #[must_use]
    pub fn new(authenticator: Arc<Authenticator>) -> Self {
        Self { authenticator }
    }

    /// Wrap in the generated tonic server
    #[must_use]
    pub fn into_server(self) -> AuthorizationServer<Self> {
        AuthorizationServer::new(self)
    }
}

#[tonic::async_trait]
impl Authorization for ExtAuthzService {
    async fn check(
        &self,
        request: Request<CheckRequest>,
    ) -> std::result::Result<Response<CheckResponse>, Status> {
        let input = check_input(request.get_ref());
        let decision = self.authenticator.check(&input).await;
        Ok(Response::new(check_response(decision)))
    }
}

/// Extract method, path and headers from the request attributes
fn check_input(request: &CheckRequest) -> CheckInput {
    let Some(http) = request
        .attributes
        .as_ref()
        .and_then(|a| a.request.as_ref())
        .and_then(|r| r.http.as_ref())
    else {
        return CheckInput {
            method: "GET".to_string(),
            path: "/".to_string(),
            ..CheckInput::default()
        };
    };

    CheckInput {
        method: http.method.clone(),
        path: if http.path.is_empty() {
            "/".to_string()
        } else {
            http.path.clone()
        },
        headers: http
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .collect(),
    }
}

fn check_response(decision: Decision) -> CheckResponse {
    match decision {
        Decision::Allow {
            headers,
            remove_headers,
            reason,
        } => {
            let mut response = CheckResponse::with_status(Status::ok(reason));
            response.http_response = Some(HttpResponse::OkResponse(OkHttpResponse {
                headers: headers
                    .into_iter()
                    .map(|(k, v)| header(k, v, HeaderAppendAction::OverwriteIfExistsOrAdd))
                    .collect(),
                headers_to_remove: remove_headers,
                ..Default::default()
            }));
            response
        }
        Decision::Redirect {
            location,
            set_cookies,
            reason,
        } => {
            let mut headers = vec![header(
                "location".to_string(),
                location,
                HeaderAppendAction::OverwriteIfExistsOrAdd,
            )];
            headers.extend(set_cookies_headers(set_cookies));
            denied(Status::unauthenticated(reason), 302, headers)
        }
        Decision::Deny {
            status,
            set_cookies,
            reason,
        } => denied(
            Status::unauthenticated(reason),
            status,
            set_cookies_headers(set_cookies).collect(),
        ),
    }
}

fn denied(status: Status, http_status: u16, headers: Vec<HeaderValueOption>) -> CheckResponse {
    let mut response = CheckResponse::with_status(status);
    response.http_response = Some(HttpResponse::DeniedResponse(DeniedHttpResponse {
        status: Some(HttpStatus {
            code: i32::from(http_status),
        }),
        headers,
        ..Default::default()
    }));
    response
}

fn set_cookies_headers(cookies: Vec<String>) -> impl Iterator<Item = HeaderValueOption> {
    cookies.into_iter().map(|c| {
        header(
            "set-cookie".to_string(),
            c,
            HeaderAppendAction::AppendIfExistsOrAdd,
        )
    })
}

fn header(key: String, value: String, action: HeaderAppendAction) -> HeaderValueOption {
    HeaderValueOption {
        header: Some(HeaderValue {
            key,
            value,
            ..Default::default()
        }),
        append_action: action as i32,
        ..Default::default()
    }
}
