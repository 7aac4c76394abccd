//! Interceptor chain
//!
//! Every outbound call runs through an ordered list of [`Interceptor`]s and
//! ends at a [`Dispatch`] that puts it on the wire. Each interceptor decides
//! whether, and how often, to hand the request to the rest of the chain.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, Response, Url};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Outbound request as seen by interceptors.
///
/// Cheap to clone (the body is reference counted) so retries can resend it.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl RelayRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn path(&self) -> &str {
        self.url.path()
    }
}

/// A stage of the outbound pipeline
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: RelayRequest, next: Next<'_>) -> Result<Response>;
}

/// Terminal stage that performs the HTTP exchange
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn dispatch(&self, request: RelayRequest) -> Result<Response>;
}

/// The remainder of the chain after the current interceptor.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    interceptors: &'a [Arc<dyn Interceptor>],
    dispatcher: &'a dyn Dispatch,
}

impl<'a> Next<'a> {
    pub fn new(interceptors: &'a [Arc<dyn Interceptor>], dispatcher: &'a dyn Dispatch) -> Self {
        Self {
            interceptors,
            dispatcher,
        }
    }

    /// Hand `request` to the next stage.
    pub async fn run(self, request: RelayRequest) -> Result<Response> {
        match self.interceptors.split_first() {
            Some((current, rest)) => {
                current
                    .intercept(request, Next::new(rest, self.dispatcher))
                    .await
            }
            None => self.dispatcher.dispatch(request).await,
        }
    }
}

/// [`Dispatch`] over a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestDispatcher {
    client: reqwest::Client,
}

impl ReqwestDispatcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Dispatch for ReqwestDispatcher {
    async fn dispatch(&self, request: RelayRequest) -> Result<Response> {
        let mut builder = self
            .client
            .request(request.method, request.url)
            .headers(request.headers);

        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        builder.send().await.map_err(Error::network)
    }
}
