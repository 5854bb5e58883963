use crate::config::{AppConfig, UserRole};
use actix_web::{
    dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform},
    Error, HttpMessage,
};
use serde::Serialize;
use std::{
    future::{ready, Future, Ready},
    pin::Pin,
    rc::Rc,
};
use tracing::warn;

/// Authenticated caller, attached to request extensions by `ApiKeyAuth`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: UserRole,
}

impl Identity {
    pub fn is_reviewer(&self) -> bool {
        matches!(self.role, UserRole::Doctor | UserRole::Admin)
    }
}

pub struct ApiKeyAuth;

impl<S, B> Transform<S, ServiceRequest> for ApiKeyAuth
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type InitError = ();
    type Transform = ApiKeyAuthMiddleware<S>;
    type Future = Ready<Result<Self::Transform, Self::InitError>>;

    fn new_transform(&self, service: S) -> Self::Future {
        ready(Ok(ApiKeyAuthMiddleware {
            service: Rc::new(service),
        }))
    }
}

pub struct ApiKeyAuthMiddleware<S> {
    service: Rc<S>,
}

impl<S, B> Service<ServiceRequest> for ApiKeyAuthMiddleware<S>
where
    S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error> + 'static,
    S::Future: 'static,
    B: 'static,
{
    type Response = ServiceResponse<B>;
    type Error = Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>>>>;

    forward_ready!(service);

    fn call(&self, req: ServiceRequest) -> Self::Future {
        let srv = self.service.clone();

        // Skip auth for /health and OPTIONS requests
        if req.method() == actix_web::http::Method::OPTIONS || req.path() == "/health" {
            return Box::pin(async move { srv.call(req).await });
        }

        let config = match req.app_data::<actix_web::web::Data<AppConfig>>() {
            Some(c) => c,
            None => {
                warn!("AppConfig missing in app_data");
                return Box::pin(async move {
                    Err(actix_web::error::ErrorInternalServerError("Configuration error"))
                });
            }
        };

        let token = match req.headers().get("Authorization") {
            Some(header_value) => header_value
                .to_str()
                .ok()
                .and_then(|auth_str| auth_str.strip_prefix("Bearer "))
                .map(str::to_string),
            // Fallback to query param for WebSocket compatibility
            None => qstring::QString::from(req.query_string())
                .get("api_key")
                .map(str::to_string),
        };

        let identity = token.as_deref().and_then(|t| config.identity_for_key(t)).map(|entry| Identity {
            user_id: entry.user_id.clone(),
            role: entry.role,
        });

        let identity = match identity {
            Some(identity) => identity,
            None => {
                return Box::pin(async move {
                    Err(actix_web::error::ErrorUnauthorized("Invalid or missing API key"))
                });
            }
        };

        req.extensions_mut().insert(identity);

        Box::pin(async move {
            let res = srv.call(req).await?;
            Ok(res)
        })
    }
}
