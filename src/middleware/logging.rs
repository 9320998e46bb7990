use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    http::header,
    Error,
};
use futures_util::future::LocalBoxFuture;
use std::{
    future::{ready, Ready},
    time::Instant,
};
use tracing::{error, info, warn};

/// Logs each request's start and outcome.
///
/// WebSocket upgrades to the assistant are logged once as a call connection;
/// their lifetime is logged by the session actor itself.
pub struct RequestLogging;

impl<S, B> Transform<S, ServiceRequest> for RequestLogging
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = RequestLoggingMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggingMiddleware { service }))
    }
}

pub struct RequestLoggingMiddleware<S> {
    service: S,
}

fn is_websocket_upgrade(req: &ServiceRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

impl<S, B> Service<ServiceRequest> for RequestLoggingMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let start_time = Instant::now();
        let method = req.method().to_string();
        let uri = req.uri().to_string();
        let remote_addr = req
            .connection_info()
            .realip_remote_addr()
            .unwrap_or("unknown")
            .to_string();
        let upgrade = is_websocket_upgrade(&req);

        if upgrade {
            info!(uri = %uri, remote_addr = %remote_addr, "WebSocket upgrade requested");
        } else {
            info!(method = %method, uri = %uri, remote_addr = %remote_addr, "Request started");
        }

        let fut = self.service.call(req);

        Box::pin(async move {
            let result = fut.await;
            let duration = start_time.elapsed();

            match &result {
                Ok(response) if upgrade => {
                    let status = response.status();
                    if status == actix_web::http::StatusCode::SWITCHING_PROTOCOLS {
                        info!(uri = %uri, remote_addr = %remote_addr, "WebSocket connection accepted");
                    } else {
                        warn!(uri = %uri, status = %status.as_u16(), "WebSocket upgrade refused");
                    }
                }
                Ok(response) => {
                    info!(
                        method = %method,
                        uri = %uri,
                        remote_addr = %remote_addr,
                        status = %response.status().as_u16(),
                        duration_ms = %duration.as_millis(),
                        "Request completed"
                    );
                }
                Err(err) => {
                    error!(
                        method = %method,
                        uri = %uri,
                        remote_addr = %remote_addr,
                        duration_ms = %duration.as_millis(),
                        error = %err,
                        "Request failed"
                    );
                }
            }

            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn test_detects_websocket_upgrade() {
        let req = TestRequest::get()
            .insert_header((header::UPGRADE, "WebSocket"))
            .to_srv_request();
        assert!(is_websocket_upgrade(&req));

        let req = TestRequest::get().to_srv_request();
        assert!(!is_websocket_upgrade(&req));
    }

    #[actix_web::test]
    async fn test_passes_responses_through() {
        use actix_web::{http::StatusCode, web, App, HttpResponse};

        let app = actix_web::test::init_service(
            App::new()
                .wrap(RequestLogging)
                .route("/ok", web::get().to(|| async { HttpResponse::Ok().body("fine") }))
                .route("/ws/assistant", web::get().to(|| async { HttpResponse::BadRequest().finish() })),
        )
        .await;

        let resp = actix_web::test::call_service(&app, TestRequest::get().uri("/ok").to_request()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(actix_web::test::read_body(resp).await, web::Bytes::from_static(b"fine"));

        let req = TestRequest::get()
            .uri("/ws/assistant")
            .insert_header((header::UPGRADE, "websocket"))
            .to_request();
        let resp = actix_web::test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
