//! Cross-cutting request handling: context installation, method override,
//! CORS, protocol discovery (OPTIONS), and version negotiation.

use crate::context::RequestContext;
use crate::error::ProtocolError;
use crate::metrics;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderName, HeaderValue, Method, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use freight_core::{DRAFT_INTEROP_VERSION, TUS_RESUMABLE_VERSION};
use tracing::Instrument;

/// Which protocol dialect a request speaks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProtocolVariant {
    /// tus 1.0.0.
    V1,
    /// The IETF resumable upload interop draft.
    Draft,
}

fn header_value(req: &Request, name: &str) -> String {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string()
}

/// The protocol middleware wrapped around every route.
pub async fn protocol_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let request_id: String = header_value(&req, "x-request-id").chars().take(36).collect();
    let span = tracing::info_span!(
        "request",
        method = %req.method(),
        path = %req.uri().path(),
        request_id = %request_id,
    );

    handle(state, req, next).instrument(span).await
}

async fn handle(state: AppState, mut req: Request, next: Next) -> Response {
    let config = &state.config.server;

    // The request context carries the cancellation layers for everything
    // downstream.
    let ctx = RequestContext::new(&state.shutdown, config.graceful_request_completion_timeout());
    req.extensions_mut().insert(ctx);

    // Method overriding for clients that cannot issue PATCH or DELETE.
    let override_header = header_value(&req, "x-http-method-override");
    if req.method() == Method::POST
        && !override_header.is_empty()
        && let Ok(method) = Method::from_bytes(override_header.as_bytes())
    {
        *req.method_mut() = method;
    }

    tracing::info!("request incoming");
    metrics::REQUESTS_TOTAL
        .with_label_values(&[req.method().as_str()])
        .inc();

    let variant = if config.enable_experimental_protocol
        && header_value(&req, "upload-draft-interop-version") == DRAFT_INTEROP_VERSION
    {
        ProtocolVariant::Draft
    } else {
        ProtocolVariant::V1
    };
    req.extensions_mut().insert(variant);

    // Headers stamped onto whatever response leaves this request.
    let mut common: Vec<(HeaderName, HeaderValue)> = vec![(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    )];
    if variant == ProtocolVariant::V1 {
        common.push((
            HeaderName::from_static("tus-resumable"),
            HeaderValue::from_static(TUS_RESUMABLE_VERSION),
        ));
    }

    let method = req.method().clone();

    if !config.cors.disable
        && let Some(origin) = req.headers().get(header::ORIGIN).cloned()
    {
        let allowed = origin
            .to_str()
            .is_ok_and(|value| state.allow_origin.is_match(value));
        if !allowed {
            return finalize(ProtocolError::OriginNotAllowed.into_response(), common, &method);
        }

        common.push((header::ACCESS_CONTROL_ALLOW_ORIGIN, origin));
        common.push((header::VARY, HeaderValue::from_static("Origin")));
        if config.cors.allow_credentials {
            common.push((
                header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
                HeaderValue::from_static("true"),
            ));
        }

        let cors_values = if method == Method::OPTIONS {
            // Preflight request.
            [
                (header::ACCESS_CONTROL_ALLOW_METHODS, &config.cors.allow_methods),
                (header::ACCESS_CONTROL_ALLOW_HEADERS, &config.cors.allow_headers),
                (header::ACCESS_CONTROL_MAX_AGE, &config.cors.max_age),
            ]
            .to_vec()
        } else {
            // Actual request.
            vec![(header::ACCESS_CONTROL_EXPOSE_HEADERS, &config.cors.expose_headers)]
        };
        for (name, value) in cors_values {
            if let Ok(value) = HeaderValue::from_str(value) {
                common.push((name, value));
            }
        }
    }

    // Version check for tus v1. GET and HEAD are exempt so a plain browser
    // visit works; OPTIONS is exempt so discovery needs no prior knowledge.
    if variant == ProtocolVariant::V1
        && method != Method::GET
        && method != Method::HEAD
        && method != Method::OPTIONS
        && header_value(&req, "tus-resumable") != TUS_RESUMABLE_VERSION
    {
        return finalize(ProtocolError::UnsupportedVersion.into_response(), common, &method);
    }

    let response = next.run(req).await;
    finalize(response, common, &method)
}

fn finalize(
    mut response: Response,
    common: Vec<(HeaderName, HeaderValue)>,
    method: &Method,
) -> Response {
    for (name, value) in common {
        response.headers_mut().insert(name, value);
    }

    // A HEAD response carries no body, including for errors.
    if method == Method::HEAD {
        *response.body_mut() = Body::empty();
    }

    tracing::info!(status = %response.status(), "response outgoing");
    response
}
