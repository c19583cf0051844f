//! Host adapter: a page-rendering application served over HTTP.
//!
//! This is the one place the coordinator meets a request-processing
//! contract. Everything under [`crate::coordinator`] and
//! [`crate::loader`] is independent of it.

pub mod page;
pub mod server;

pub use page::{builtin_resolver, Page, PageDefiner, RenderedSite, SiteLifecycle};
pub use server::{router, serve_http, SiteCoordinator};
