//! Route registry.
//!
//! Routes live in a concurrent map keyed by `(template, method)`. Templates
//! with placeholders additionally get a [`PathMatcher`], kept in registration
//! order. Resolution scans the matchers first; the first one that matches
//! decides the lookup key, so overlapping templates must be registered most
//! specific first. Only when no matcher fits is the raw path used as a
//! literal key.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tracing::debug;

use crate::handler::RouteHandler;
use crate::method::Method;
use crate::middleware::Middleware;
use crate::template::PathMatcher;

/// A registered endpoint. Immutable once stored.
pub(crate) struct Route {
    pub(crate) template: String,
    pub(crate) method: Method,
    pub(crate) handler: RouteHandler,
    pub(crate) middlewares: Vec<Middleware>,
}

/// Result of a successful lookup.
pub(crate) struct Resolved {
    pub(crate) template: String,
    pub(crate) route: Arc<Route>,
    pub(crate) path_params: Option<HashMap<String, String>>,
}

pub(crate) struct Registry {
    routes: DashMap<(String, Method), Arc<Route>>,
    /// Append-only. Writers serialize on `append_lock` and publish a new
    /// snapshot; readers load the current snapshot without locking.
    matchers: ArcSwap<Vec<Arc<PathMatcher>>>,
    append_lock: Mutex<()>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            routes: DashMap::new(),
            matchers: ArcSwap::from_pointee(Vec::new()),
            append_lock: Mutex::new(()),
        }
    }

    /// The route is stored before its matcher is published, so a reader
    /// never matches a template that has no route yet.
    pub(crate) fn register(&self, route: Route) {
        let matcher = PathMatcher::compile(&route.template);

        debug!(template = %route.template, method = %route.method, "route registered");
        self.routes.insert((route.template.clone(), route.method), Arc::new(route));

        if let Some(matcher) = matcher {
            let _guard = self.append_lock.lock().unwrap_or_else(PoisonError::into_inner);
            let mut next: Vec<Arc<PathMatcher>> = self.matchers.load().iter().cloned().collect();
            next.push(Arc::new(matcher));
            self.matchers.store(Arc::new(next));
        }
    }

    pub(crate) fn resolve(&self, path: &str, method: Method) -> Option<Resolved> {
        let matchers = self.matchers.load();
        let matched = matchers
            .iter()
            .find_map(|m| m.captures(path).map(|caps| (m.template(), caps)));

        let (template, path_params) = match matched {
            Some((template, caps)) => (template.to_owned(), Some(caps)),
            None => (path.to_owned(), None),
        };

        let key = (template, method);
        let route = Arc::clone(self.routes.get(&key)?.value());
        Some(Resolved { template: key.0, route, path_params })
    }
}

impl Default for Registry {
    fn default() -> Self { Self::new() }
}
