/*
 * router.rs
 * Copyright (C) 2026 Chris Burdess
 *
 * This file is part of Gemella, a Gemini protocol server and client.
 *
 * Gemella is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Gemella is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Gemella.  If not, see <http://www.gnu.org/licenses/>.
 */

//! Path router: an ordered list of exact, prefix and regex routes. Routes
//! are scanned in registration order and the first match wins; an optional
//! default handler catches everything else.

use std::fmt;
use std::sync::Arc;

use regex::Regex;

use super::handler::RequestHandler;

/// Rejected route registration (bad regex pattern).
#[derive(Debug)]
pub struct RouteError {
    pub pattern: String,
    reason: String,
}

impl fmt::Display for RouteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid regex pattern {}: {}", self.pattern, self.reason)
    }
}

impl std::error::Error for RouteError {}

enum RoutePattern {
    Exact(String),
    Prefix(String),
    Regex(Regex),
}

impl RoutePattern {
    fn matches(&self, path: &str) -> bool {
        match self {
            RoutePattern::Exact(pattern) => pattern == path,
            RoutePattern::Prefix(pattern) => path.starts_with(pattern),
            RoutePattern::Regex(pattern) => pattern.is_match(path),
        }
    }
}

struct Route {
    pattern: RoutePattern,
    handler: Arc<dyn RequestHandler>,
}

/// Ordered route table.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    default: Option<Arc<dyn RequestHandler>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route requests whose path equals `pattern` exactly.
    pub fn add_exact(&mut self, pattern: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.routes.push(Route {
            pattern: RoutePattern::Exact(pattern.into()),
            handler,
        });
    }

    /// Route requests whose path starts with `pattern`.
    pub fn add_prefix(&mut self, pattern: impl Into<String>, handler: Arc<dyn RequestHandler>) {
        self.routes.push(Route {
            pattern: RoutePattern::Prefix(pattern.into()),
            handler,
        });
    }

    /// Route requests whose path matches the regex `pattern` (anchor with
    /// `^`/`$` for whole-path matches). Invalid patterns are rejected at
    /// registration.
    pub fn add_regex(
        &mut self,
        pattern: &str,
        handler: Arc<dyn RequestHandler>,
    ) -> Result<(), RouteError> {
        let compiled = Regex::new(pattern).map_err(|e| RouteError {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.routes.push(Route {
            pattern: RoutePattern::Regex(compiled),
            handler,
        });
        Ok(())
    }

    /// Handler used when no route matches.
    pub fn set_default(&mut self, handler: Arc<dyn RequestHandler>) {
        self.default = Some(handler);
    }

    /// First matching handler in registration order, else the default.
    pub fn route(&self, path: &str) -> Option<Arc<dyn RequestHandler>> {
        for route in &self.routes {
            if route.pattern.matches(path) {
                return Some(route.handler.clone());
            }
        }
        self.default.clone()
    }
}
