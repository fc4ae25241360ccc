use actix_cors::Cors;
use actix_web::dev::{forward_ready, Payload, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::http::header::{HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use actix_web::{web, Error, FromRequest, HttpRequest};
use log::{error, info, warn};
use std::future::{ready, Future, Ready};
use std::pin::Pin;
use std::rc::Rc;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ApiError;
use crate::models::TokenKind;
use crate::services::AuthService;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Cross-origin policy for browser clients: any origin, with credentials.
pub fn cors_policy() -> Cors {
    Cors::default()
        .allow_any_origin()
        .supports_credentials()
        .allowed_methods(vec!["GET", "POST", "OPTIONS", "DELETE", "PATCH", "PUT"])
        .allowed_headers(vec![AUTHORIZATION, CONTENT_TYPE])
        .max_age(3600)
}

// Logger middleware to log all requests and responses
pub struct RequestLogger;

impl<S, B> Transform<S, ServiceRequest> for RequestLogger
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Transform = RequestLoggerMiddleware<S>;
    type InitError = ();
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(RequestLoggerMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct RequestLoggerMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for RequestLoggerMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + 'static>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let method = req.method().clone();
        let path = req.path().to_owned();
        let client_ip = req.connection_info().realip_remote_addr()
            .map(|s| s.to_owned())
            .unwrap_or_else(|| String::from("unknown"));
        let request_id = Uuid::new_v4().simple().to_string();

        info!(
            "→ [{}] Request: \x1B[1;34m{} {}\x1B[0m from IP: {}",
            request_id, method, path, client_ip
        );

        let service = self.service.clone();

        Box::pin(async move {
            let start = std::time::Instant::now();
            let mut res = service.call(req).await?;
            let elapsed = start.elapsed();

            if let Ok(value) = HeaderValue::from_str(&request_id) {
                res.headers_mut().insert(HeaderName::from_static(REQUEST_ID_HEADER), value);
            }

            let status = res.status();

            if status.is_success() {
                info!(
                    "← [{}] Response: \x1B[1;32m{}\x1B[0m for {} {} completed in {:.2?}",
                    request_id, status, method, path, elapsed
                );
            } else if status.is_client_error() {
                warn!(
                    "← [{}] Response: \x1B[1;33m{}\x1B[0m for {} {} completed in {:.2?}",
                    request_id, status, method, path, elapsed
                );
            } else {
                error!(
                    "← [{}] Response: \x1B[1;31m{}\x1B[0m for {} {} completed in {:.2?}",
                    request_id, status, method, path, elapsed
                );
            }

            Ok(res)
        })
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(req: &HttpRequest) -> Result<&str, ApiError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| ApiError::AuthError("Not authenticated".to_string()))?;
    let value = header
        .to_str()
        .map_err(|_| ApiError::AuthError("Malformed authorization header".to_string()))?;
    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() => {
            Ok(token.trim())
        }
        _ => Err(ApiError::AuthError("Not authenticated".to_string())),
    }
}

fn subject_of(req: &HttpRequest, kind: TokenKind) -> Result<i32, ApiError> {
    let config = req
        .app_data::<web::Data<AppConfig>>()
        .ok_or_else(|| ApiError::InternalError("Application config is not registered".to_string()))?;
    let token = bearer_token(req)?;
    AuthService::decode_token(token, kind, config)
}

/// Account id carried by a valid access token.
#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedAccount {
    pub account_id: i32,
}

impl FromRequest for AuthenticatedAccount {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(subject_of(req, TokenKind::Access).map(|account_id| AuthenticatedAccount { account_id }))
    }
}

/// Account id carried by a valid refresh token.
#[derive(Debug, Clone, Copy)]
pub struct RefreshSubject {
    pub account_id: i32,
}

impl FromRequest for RefreshSubject {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(subject_of(req, TokenKind::Refresh).map(|account_id| RefreshSubject { account_id }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    #[test]
    fn extracts_bearer_token() {
        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Bearer abc.def.ghi"))
            .to_http_request();
        assert_eq!(bearer_token(&req).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn rejects_missing_or_foreign_scheme() {
        let req = TestRequest::default().to_http_request();
        assert!(matches!(bearer_token(&req), Err(ApiError::AuthError(_))));

        let req = TestRequest::default()
            .insert_header((AUTHORIZATION, "Basic dXNlcjpwYXNz"))
            .to_http_request();
        assert!(matches!(bearer_token(&req), Err(ApiError::AuthError(_))));
    }

    #[actix_web::test]
    async fn access_extractor_rejects_refresh_token() {
        let config = AppConfig::for_tests();
        let refresh = AuthService::generate_token(5, TokenKind::Refresh, &config).unwrap();
        let access = AuthService::generate_token(5, TokenKind::Access, &config).unwrap();

        let req = TestRequest::default()
            .app_data(web::Data::new(config.clone()))
            .insert_header((AUTHORIZATION, format!("Bearer {}", refresh)))
            .to_http_request();
        let result = AuthenticatedAccount::extract(&req).await;
        assert!(matches!(result, Err(ApiError::AuthError(_))));

        let req = TestRequest::default()
            .app_data(web::Data::new(config))
            .insert_header((AUTHORIZATION, format!("Bearer {}", access)))
            .to_http_request();
        assert_eq!(AuthenticatedAccount::extract(&req).await.unwrap().account_id, 5);
    }
}
