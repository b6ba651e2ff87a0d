//! Per-call metadata pipeline.
//!
//! Stages run in order on every outgoing request, unary or streaming:
//! request-id, then session token, then (optionally) call logging. The
//! pipeline is built once per client and never retries.

use crate::auth::session::SessionState;
use crate::pool::PoolDispatch;
use crate::{AUTHORIZATION_HEADER, BEARER_PREFIX, REQUEST_ID_HEADER};

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Request, Response};
use log::debug;
use tonic::Status;
use tonic::body::Body;
use tower::{BoxError, Service};
use uuid::Uuid;

/// The channel handed to service stubs.
pub type RpcChannel = PipelineService<PoolDispatch>;

pub trait MetadataStage: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply(&self, headers: &mut HeaderMap) -> Result<(), Status>;
}

/// Adds `x-request-id` unless the caller already set one.
#[derive(Debug, Default)]
pub struct RequestIdStage;

impl MetadataStage for RequestIdStage {
    fn name(&self) -> &'static str {
        "request-id"
    }

    fn apply(&self, headers: &mut HeaderMap) -> Result<(), Status> {
        let name = HeaderName::from_static(REQUEST_ID_HEADER);
        if headers.contains_key(&name) {
            return Ok(());
        }

        let value = HeaderValue::from_str(&Uuid::new_v4().to_string())
            .map_err(|e| Status::internal(format!("request id header: {e}")))?;
        headers.insert(name, value);
        Ok(())
    }
}

/// Adds `authorization: Bearer <token>` when a session is held.
#[derive(Debug)]
pub struct AuthStage {
    session: Arc<SessionState>,
}

impl AuthStage {
    pub fn new(session: Arc<SessionState>) -> Self {
        Self { session }
    }
}

impl MetadataStage for AuthStage {
    fn name(&self) -> &'static str {
        "auth"
    }

    fn apply(&self, headers: &mut HeaderMap) -> Result<(), Status> {
        let Some(token) = self.session.get() else {
            return Ok(());
        };

        let mut value = HeaderValue::from_str(&format!("{BEARER_PREFIX}{}", token.as_str()))
            .map_err(|_| Status::unauthenticated("session token is not a valid header value"))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static(AUTHORIZATION_HEADER), value);
        Ok(())
    }
}

/// Tower service that runs the metadata stages and then forwards the request.
pub struct PipelineService<S> {
    inner: S,
    stages: Arc<[Box<dyn MetadataStage>]>,
    log_calls: bool,
}

impl<S: Clone> Clone for PipelineService<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            stages: Arc::clone(&self.stages),
            log_calls: self.log_calls,
        }
    }
}

impl<S> std::fmt::Debug for PipelineService<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.stages.iter().map(|stage| stage.name()).collect();
        f.debug_struct("PipelineService")
            .field("stages", &names)
            .field("log_calls", &self.log_calls)
            .finish()
    }
}

impl<S> PipelineService<S> {
    pub fn new(inner: S, stages: Vec<Box<dyn MetadataStage>>, log_calls: bool) -> Self {
        Self {
            inner,
            stages: stages.into(),
            log_calls,
        }
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }
}

/// Request-id, then auth, then optional logging.
pub fn build_pipeline(
    dispatch: PoolDispatch,
    session: Arc<SessionState>,
    log_calls: bool,
) -> RpcChannel {
    let stages: Vec<Box<dyn MetadataStage>> = vec![
        Box::new(RequestIdStage),
        Box::new(AuthStage::new(session)),
    ];
    PipelineService::new(dispatch, stages, log_calls)
}

impl<S> Service<Request<Body>> for PipelineService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Into<BoxError>,
{
    type Response = Response<Body>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        // The clone may not be ready; call the instance that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let stages = Arc::clone(&self.stages);
        let log_calls = self.log_calls;

        Box::pin(async move {
            for stage in stages.iter() {
                stage
                    .apply(request.headers_mut())
                    .map_err(|status| Box::new(status) as BoxError)?;
            }

            if !log_calls {
                return inner.call(request).await.map_err(Into::into);
            }

            let method = request.uri().path().to_string();
            let started = Instant::now();
            let result = inner.call(request).await.map_err(Into::into);
            match &result {
                Ok(response) => debug!(
                    "RPC {method} -> HTTP {} in {:?}",
                    response.status(),
                    started.elapsed()
                ),
                Err(e) => debug!("RPC {method} failed after {:?}: {e}", started.elapsed()),
            }
            result
        })
    }
}
