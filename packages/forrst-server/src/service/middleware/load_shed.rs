//! Admission control for the request pipeline.
//!
//! At most `max_concurrent_requests` requests are in flight; anything beyond
//! that is refused immediately with `UNAVAILABLE` instead of queueing. The
//! stack is tower's `ConcurrencyLimit` under `LoadShed`, with [`shed_error`]
//! folding their boxed errors back into [`ForrstError`].

use forrst_core::ForrstError;
use tower::limit::ConcurrencyLimit;
use tower::load_shed::error::Overloaded;
use tower::load_shed::LoadShed;
use tower::util::MapErr;
use tower::{BoxError, Layer, ServiceBuilder};
use tracing::warn;

/// Error mapper installed on top of the shedding stack.
pub type ShedErrorFn = fn(BoxError) -> ForrstError;

/// `S` behind a concurrency limit that sheds instead of waiting.
pub type AdmissionService<S> = MapErr<LoadShed<ConcurrencyLimit<S>>, ShedErrorFn>;

/// Recovers a [`ForrstError`] from the pipeline's boxed error.
///
/// Errors raised further down pass through untouched; a shed request becomes
/// `Unavailable`.
pub fn shed_error(err: BoxError) -> ForrstError {
    match err.downcast::<ForrstError>() {
        Ok(err) => *err,
        Err(err) if err.is::<Overloaded>() => {
            warn!("request shed: server at capacity");
            ForrstError::Unavailable {
                message: "server overloaded".to_string(),
            }
        }
        Err(err) => ForrstError::Internal(anyhow::anyhow!(err)),
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AdmissionLayer {
    max_in_flight: usize,
}

impl AdmissionLayer {
    #[must_use]
    pub fn new(max_in_flight: u32) -> Self {
        Self {
            max_in_flight: usize::try_from(max_in_flight).unwrap_or(usize::MAX),
        }
    }
}

impl<S> Layer<S> for AdmissionLayer {
    type Service = AdmissionService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ServiceBuilder::new()
            .map_err(shed_error as ShedErrorFn)
            .load_shed()
            .concurrency_limit(self.max_in_flight)
            .service(inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use forrst_core::{Call, ErrorCode, RequestEnvelope, ResponseEnvelope};
    use tokio::sync::Semaphore;
    use tower::{service_fn, ServiceExt};

    use super::*;

    fn request() -> RequestEnvelope {
        RequestEnvelope::new(Call::new("urn:acme:forrst:fn:work"))
    }

    #[test]
    fn overload_maps_to_unavailable() {
        let err = shed_error(Box::new(Overloaded::new()));
        assert_eq!(err.code(), ErrorCode::Unavailable);
    }

    #[test]
    fn foreign_errors_become_internal() {
        let err = shed_error("socket closed".into());
        assert_eq!(err.code(), ErrorCode::InternalError);
    }

    #[tokio::test]
    async fn inner_errors_pass_through() {
        let svc = AdmissionLayer::new(4).layer(service_fn(|_req: RequestEnvelope| async {
            Err::<ResponseEnvelope, _>(ForrstError::invalid_arguments("bad input"))
        }));
        let err = svc.oneshot(request()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidArguments);
    }

    #[tokio::test]
    async fn requests_beyond_capacity_are_shed_until_a_slot_frees() {
        let gate = Arc::new(Semaphore::new(0));
        let svc = AdmissionLayer::new(1).layer(service_fn({
            let gate = Arc::clone(&gate);
            move |req: RequestEnvelope| {
                let gate = Arc::clone(&gate);
                async move {
                    let _pass = gate.acquire().await;
                    Ok::<_, ForrstError>(ResponseEnvelope::empty(req.id))
                }
            }
        }));

        let held = tokio::spawn(svc.clone().oneshot(request()));
        tokio::time::sleep(Duration::from_millis(20)).await;

        let err = svc.clone().oneshot(request()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unavailable);

        gate.add_permits(2);
        assert!(held.await.unwrap().is_ok());
        assert!(svc.oneshot(request()).await.is_ok());
    }
}
