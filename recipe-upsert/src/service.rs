use crate::errors::UpsertError;
use crate::handler::UpsertHandler;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::body::{Bytes, Incoming};
use hyper::header::ORIGIN;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::http::full_body;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Adapts [`UpsertHandler`] to hyper: buffers the request body and runs the
/// handler in its own task, so a panic becomes a `server-error` response
/// instead of a dropped connection.
pub struct UpsertService {
    handler: Arc<UpsertHandler>,
}

impl UpsertService {
    pub fn new(handler: Arc<UpsertHandler>) -> Self {
        UpsertService { handler }
    }
}

impl Service<Request<Incoming>> for UpsertService {
    type Response = Response<BoxBody<Bytes, Self::Error>>;
    type Error = UpsertError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let handler = self.handler.clone();

        Box::pin(async move {
            let response = serve(handler, req).await;
            Ok(response.map(|bytes| full_body(bytes)))
        })
    }
}

async fn serve<B>(handler: Arc<UpsertHandler>, req: Request<B>) -> Response<Bytes>
where
    B: hyper::body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<UpsertError>,
{
    let origin = req
        .headers()
        .get(ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => return handler.failure_response(&e.into(), origin.as_deref()),
    };
    let request = Request::from_parts(parts, body);

    let task_handler = handler.clone();
    match tokio::spawn(async move { task_handler.handle(request).await }).await {
        Ok(response) => response,
        Err(e) => {
            let error = UpsertError::InternalError(format!("handler task failed: {e}"));
            handler.failure_response(&error, origin.as_deref())
        }
    }
}
