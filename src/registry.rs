/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Handler registration and dispatch: criteria matching selects which
//! registered adapter handles a given ICAP request.

use async_trait::async_trait;

use crate::error::IcapResult;
use crate::message::{IcapRequest, IcapResponse};

/// The outcome of a handler processing a request.
pub enum Adaptation {
    /// The encapsulated message was modified in place; serialize it back
    /// with a `200 OK`.
    Modified(IcapRequest),
    /// No modification was made. Maps to `204 No Content` if the client
    /// allowed it, otherwise the engine re-serializes the original,
    /// unmodified message as a `200 OK`.
    Unmodified,
    /// Replace the entire response with a caller-built one (e.g. a `403
    /// Forbidden` with an explanatory body).
    Replace(IcapResponse),
}

/// An adaptation handler: the unit of user-authored content-inspection or
/// rewriting logic this engine dispatches to.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one ICAP transaction. Implementations may mutate the
    /// request's encapsulated HTTP message and return
    /// [`Adaptation::Modified`], request a [`Adaptation::Replace`]ment
    /// response, or signal [`Adaptation::Unmodified`].
    async fn handle(&self, request: IcapRequest) -> IcapResult<Adaptation>;

    /// Asks the handler whether it needs more of a previewed body before
    /// deciding. Default: no, the preview is always enough. A handler
    /// that inspects full-body content (e.g. a virus scanner) overrides
    /// this to request the remainder via `100 Continue`.
    fn wants_more_after_preview(&self, _request: &IcapRequest) -> bool {
        false
    }
}

/// The ICAP method a [`Criterion`] matches against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Reqmod,
    Respmod,
    Options,
}

impl Method {
    fn matches(self, method: &str) -> bool {
        matches!(
            (self, method),
            (Self::Reqmod, "REQMOD") | (Self::Respmod, "RESPMOD") | (Self::Options, "OPTIONS")
        )
    }
}

type RawPredicate = Box<dyn Fn(&IcapRequest) -> bool + Send + Sync>;

/// Criteria a registered handler is matched against: method, URI path
/// prefix, and optional typed or raw predicates.
pub struct Criterion {
    method: Method,
    path_prefix: String,
    content_type: Option<String>,
    raw: Option<RawPredicate>,
}

impl Criterion {
    /// Match `method` against any ICAP request whose URI path starts with
    /// `path_prefix`.
    pub fn new(method: Method, path_prefix: impl Into<String>) -> Self {
        Self {
            method,
            path_prefix: path_prefix.into(),
            content_type: None,
            raw: None,
        }
    }

    /// Additionally require the encapsulated message's `Content-Type` to
    /// match `content_type` exactly (media type only, parameters ignored).
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    /// Additionally require an arbitrary predicate over the parsed
    /// request to hold.
    pub fn with_predicate(
        mut self,
        predicate: impl Fn(&IcapRequest) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.raw = Some(Box::new(predicate));
        self
    }

    fn matches(&self, request: &IcapRequest) -> bool {
        if !self.method.matches(&request.request_line.method) {
            return false;
        }
        if !request.request_line.path().starts_with(&self.path_prefix) {
            return false;
        }
        if let Some(want) = &self.content_type {
            let actual = request
                .http_request
                .as_ref()
                .map(|r| r.headers.get("content-type"))
                .or_else(|| request.http_response.as_ref().map(|r| r.headers.get("content-type")))
                .flatten();
            match actual {
                Some(ct) if ct.split(';').next().unwrap_or("").trim() == want => {}
                _ => return false,
            }
        }
        if let Some(predicate) = &self.raw {
            if !predicate(request) {
                return false;
            }
        }
        true
    }

    /// Specificity key used to sort registered handlers so the most
    /// specific criteria are tried first: longer path prefixes first,
    /// a content-type predicate before none, any raw predicate last.
    fn specificity(&self) -> (std::cmp::Reverse<usize>, bool, bool) {
        (
            std::cmp::Reverse(self.path_prefix.len()),
            self.content_type.is_none(),
            self.raw.is_some(),
        )
    }
}

struct Registration {
    criterion: Criterion,
    handler: Box<dyn Handler>,
    registration_order: usize,
}

/// An ordered collection of registered handlers, matched by [`Criterion`].
///
/// Registration is order-preserving; call [`HandlerRegistry::finalize`]
/// once, before accepting connections, to sort handlers so the most
/// specific criteria are tried first. Lookup returns the first match.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: Vec<Registration>,
    finalized: bool,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `criterion`. Must be called before
    /// [`HandlerRegistry::finalize`].
    pub fn register(&mut self, criterion: Criterion, handler: impl Handler + 'static) {
        let registration_order = self.registrations.len();
        self.registrations.push(Registration {
            criterion,
            handler: Box::new(handler),
            registration_order,
        });
        self.finalized = false;
    }

    /// Sort registrations by specificity, breaking ties by registration
    /// order. Idempotent; safe to call multiple times (e.g. after
    /// additional registrations at runtime), though the engine only
    /// guarantees this has run once before the listener starts.
    pub fn finalize(&mut self) {
        self.registrations.sort_by(|a, b| {
            a.criterion
                .specificity()
                .cmp(&b.criterion.specificity())
                .then(a.registration_order.cmp(&b.registration_order))
        });
        self.finalized = true;
        log::debug!("handler registry finalized with {} registrations", self.registrations.len());
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Return the first handler whose criterion matches `request`.
    pub fn find(&self, request: &IcapRequest) -> Option<&dyn Handler> {
        let found = self
            .registrations
            .iter()
            .find(|r| r.criterion.matches(request))
            .map(|r| r.handler.as_ref());
        if found.is_none() {
            log::debug!(
                "no handler matched {} {}",
                request.request_line.method,
                request.request_line.path()
            );
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::{HeadersDict, RequestLine};

    struct Echo;

    #[async_trait]
    impl Handler for Echo {
        async fn handle(&self, request: IcapRequest) -> IcapResult<Adaptation> {
            Ok(Adaptation::Modified(request))
        }
    }

    fn request(method: &str, path: &str) -> IcapRequest {
        IcapRequest::new(
            RequestLine::new(method, &format!("icap://h{path}"), "ICAP/1.0"),
            HeadersDict::new(),
        )
    }

    #[test]
    fn more_specific_path_prefix_wins() {
        let mut registry = HandlerRegistry::new();
        registry.register(Criterion::new(Method::Reqmod, "/"), Echo);
        registry.register(Criterion::new(Method::Reqmod, "/specific"), Echo);
        registry.finalize();

        let req = request("REQMOD", "/specific/thing");
        let found = registry.find(&req);
        assert!(found.is_some());
        // Can't distinguish *which* Echo matched without identity, but
        // confirm the more specific one doesn't get skipped by order.
        let mut registry2 = HandlerRegistry::new();
        registry2.register(Criterion::new(Method::Reqmod, "/specific"), Echo);
        registry2.register(Criterion::new(Method::Reqmod, "/"), Echo);
        registry2.finalize();
        assert!(registry2.find(&req).is_some());
    }

    #[test]
    fn no_match_returns_none() {
        let mut registry = HandlerRegistry::new();
        registry.register(Criterion::new(Method::Reqmod, "/only"), Echo);
        registry.finalize();
        let req = request("REQMOD", "/elsewhere");
        assert!(registry.find(&req).is_none());
    }

    #[test]
    fn method_mismatch_does_not_match() {
        let mut registry = HandlerRegistry::new();
        registry.register(Criterion::new(Method::Respmod, "/"), Echo);
        registry.finalize();
        let req = request("REQMOD", "/");
        assert!(registry.find(&req).is_none());
    }

    #[test]
    fn raw_predicate_is_honored() {
        let mut registry = HandlerRegistry::new();
        registry.register(
            Criterion::new(Method::Reqmod, "/").with_predicate(|r| r.request_line.path() == "/match-me"),
            Echo,
        );
        registry.finalize();
        assert!(registry.find(&request("REQMOD", "/no")).is_none());
        assert!(registry.find(&request("REQMOD", "/match-me")).is_some());
    }
}
