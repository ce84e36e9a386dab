//! The stage contract.

use axum::response::Response;
use futures_util::future::BoxFuture;

use crate::pipeline::context::RequestContext;
use crate::pipeline::error::AppError;

/// What a stage decided to do with the request.
#[derive(Debug)]
pub enum Flow {
    /// Hand the request to the next stage.
    Continue,
    /// The response is ready; skip all remaining stages.
    Complete(Response),
}

pub type StageFuture<'a> = BoxFuture<'a, Result<Flow, AppError>>;

/// One unit in the request pipeline.
///
/// `on_request` runs in pipeline order. `on_response` runs in reverse order,
/// and only for stages whose `on_request` was invoked, so a stage may decorate
/// the final response (including error responses) it contributed to.
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    fn on_request<'a>(&'a self, ctx: &'a mut RequestContext) -> StageFuture<'a>;

    fn on_response<'a>(&'a self, _ctx: &'a RequestContext, response: Response) -> BoxFuture<'a, Response> {
        Box::pin(async move { response })
    }
}
