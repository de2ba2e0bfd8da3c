/*
 * mod.rs
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

//! The Gemini server: configuration, middleware pipeline, routing, the
//! static-file and Titan handlers, the per-connection protocol driver and
//! the accept loop.

pub mod config;
mod connection;
pub mod handler;
pub mod middleware;
pub mod router;
mod server;
pub mod titan;

pub use config::{
    AccessControlConfig, CertificateAuthConfig, Config, ConfigError, LoggingConfig, PathRule,
    RateLimitConfig, ServerConfig, TitanConfig,
};
pub use handler::{RequestHandler, StaticFileHandler};
pub use middleware::{AccessControl, CertificateAuth, Cidr, Decision, Middleware, RateLimiter};
pub use router::{RouteError, Router};
pub use server::{GeminiServer, ServerError, ShutdownHandle};
pub use titan::TitanHandler;
