//! Ordered route table for intercepted requests.
//!
//! Each route is `(name, predicate, handler)`. Dispatch walks the table in
//! registration order and hands the request to the first route whose
//! predicate matches; requests nothing claims come back as `NotHandled`.

use std::future::Future;

use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::state::AppState;

type Predicate = Box<dyn Fn(&Method, &str) -> bool + Send + Sync>;
type Handler = Box<dyn Fn(Request, AppState) -> BoxFuture<'static, Response> + Send + Sync>;

pub enum RouteOutcome {
    Handled(Response),
    NotHandled,
}

struct Route {
    name: &'static str,
    predicate: Predicate,
    handler: Handler,
}

#[derive(Default)]
pub struct VirtualRouter {
    routes: Vec<Route>,
}

impl VirtualRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a route. Earlier routes take precedence.
    pub fn route<P, H, Fut>(mut self, name: &'static str, predicate: P, handler: H) -> Self
    where
        P: Fn(&Method, &str) -> bool + Send + Sync + 'static,
        H: Fn(Request, AppState) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        self.routes.push(Route {
            name,
            predicate: Box::new(predicate),
            handler: Box::new(move |req, state| handler(req, state).boxed()),
        });
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.routes.iter().map(|r| r.name)
    }

    pub async fn dispatch(&self, req: Request, state: AppState) -> RouteOutcome {
        let matched = self
            .routes
            .iter()
            .find(|r| (r.predicate)(req.method(), req.uri().path()));

        match matched {
            Some(route) => {
                tracing::trace!(route = route.name, path = %req.uri().path(), "route matched");
                RouteOutcome::Handled((route.handler)(req, state).await)
            }
            None => RouteOutcome::NotHandled,
        }
    }
}
