//! Service trait definitions for the network layer

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use vigil_topology::NodeId;

use crate::error::NetworkResult;
use crate::message::{ServiceMessage, decode, encode};

/// Context provided to service handlers
#[derive(Debug, Clone)]
pub struct ServiceContext {
    /// The node that sent the request
    pub sender: NodeId,
}

/// Trait for request-response services
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// The request type this service handles
    type Request: ServiceMessage;

    /// Handle a request and return a response
    async fn handle(
        &self,
        request: Self::Request,
        ctx: ServiceContext,
    ) -> NetworkResult<<Self::Request as ServiceMessage>::Response>;
}

/// Type-erased service handler for internal use
pub(crate) trait ServiceHandler: Send + Sync {
    fn handle(
        &self,
        payload: Bytes,
        ctx: ServiceContext,
    ) -> Pin<Box<dyn Future<Output = NetworkResult<Bytes>> + Send>>;
}

/// Concrete implementation of ServiceHandler
struct TypedServiceHandler<S: Service> {
    service: Arc<S>,
}

impl<S: Service> ServiceHandler for TypedServiceHandler<S> {
    fn handle(
        &self,
        payload: Bytes,
        ctx: ServiceContext,
    ) -> Pin<Box<dyn Future<Output = NetworkResult<Bytes>> + Send>> {
        let service = self.service.clone();

        Box::pin(async move {
            let request: S::Request = decode(&payload)?;
            let response = service.handle(request, ctx).await?;
            encode(&response)
        })
    }
}

pub(crate) fn create_service_handler<S: Service>(service: Arc<S>) -> Arc<dyn ServiceHandler> {
    Arc::new(TypedServiceHandler { service })
}
