//! Stock Query Engine
//!
//! A natural-language query routing and parameter-resolution engine for
//! Chinese stock-market questions:
//! - Resolves company names, codes, and sector spans to canonical identities
//! - Maps relative temporal phrases onto the trading calendar
//! - Classifies each query into a deterministic route
//! - Validates parameters against the route's requirements
//! - Dispatches to downstream handlers with branch-level fault isolation
//! - Formats results into one unified table/text/error payload
//!
//! PIPELINE:
//! INPUT → EXTRACT → CLASSIFY → VALIDATE → DISPATCH → FORMAT

pub mod calendar;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod extractor;
pub mod formatter;
pub mod handlers;
pub mod models;
pub mod numerals;
pub mod reference;
pub mod resolver;
pub mod router;
pub mod validator;

pub use error::{EngineError, ErrorCode, Result};

// Re-export common types
pub use dispatch::{HandlerRegistry, QueryHandler};
pub use engine::QueryEngine;
pub use formatter::{FormattedResult, ResultKind};
pub use models::*;
pub use reference::{CalendarCache, CalendarSource, ReferenceCache, ReferenceDataSource};
