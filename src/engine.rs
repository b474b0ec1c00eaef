//! Query engine facade
//!
//! One entry point: raw query text in, unified `QueryResponse` out.
//! Resolution and validation failures are terminal and never reach a
//! handler; downstream failures surface inside the payload. Nothing panics
//! across this boundary.

use crate::dispatch::HandlerRegistry;
use crate::error::{EngineError, ErrorCode};
use crate::extractor::ParameterExtractor;
use crate::formatter;
use crate::models::{Diagnostics, ErrorBody, QueryResponse, QueryType, ValidationCode};
use crate::reference::{CalendarCache, ReferenceCache};
use crate::{router, validator};
use chrono::NaiveDate;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

pub struct QueryEngine {
    calendar: Arc<CalendarCache>,
    extractor: ParameterExtractor,
    registry: HandlerRegistry,
}

impl QueryEngine {
    pub fn new(
        reference: Arc<ReferenceCache>,
        calendar: Arc<CalendarCache>,
        registry: HandlerRegistry,
    ) -> Self {
        let extractor = ParameterExtractor::new(reference, calendar.clone());
        Self {
            calendar,
            extractor,
            registry,
        }
    }

    /// Resolve and route one query relative to the current date.
    pub async fn resolve_and_route(&self, query: &str) -> QueryResponse {
        self.resolve_and_route_at(query, chrono::Local::now().date_naive())
            .await
    }

    /// Same pipeline with an explicit reference date, for reproducibility.
    pub async fn resolve_and_route_at(&self, query: &str, today: NaiveDate) -> QueryResponse {
        let query_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%query_id, query, "query received");

        // Input validation
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return error_response(
                query_id,
                started,
                QueryType::Unknown,
                "empty input",
                body_from_engine(&EngineError::EmptyInput),
            );
        }
        if !has_content(trimmed) {
            return error_response(
                query_id,
                started,
                QueryType::Unknown,
                "no recognizable content",
                body_from_engine(&EngineError::InvalidInput(trimmed.to_string())),
            );
        }

        // Extraction
        let params = match self.extractor.extract(trimmed, today).await {
            Ok(params) => params,
            Err(err) => {
                warn!(%query_id, error = %err, "extraction infrastructure failure");
                return error_response(
                    query_id,
                    started,
                    QueryType::Unknown,
                    "extraction failed",
                    body_from_engine(&err),
                );
            }
        };

        // Classification
        let decision = router::classify(trimmed, &params);
        if decision.category == QueryType::Unknown {
            return error_response(
                query_id,
                started,
                QueryType::Unknown,
                decision.reasoning,
                body_from_engine(&EngineError::UnknownQuery),
            );
        }

        // Validation, against the latest session with data.
        let latest_session = match self.latest_session(today).await {
            Ok(date) => date,
            Err(err) => {
                return error_response(
                    query_id,
                    started,
                    decision.category,
                    decision.reasoning,
                    body_from_engine(&err),
                )
            }
        };
        let validation = validator::validate(&decision, &params, latest_session);
        if !validation.is_valid {
            let code = validation
                .error_code
                .unwrap_or(ValidationCode::ExtractionFailed);
            // The extraction near-miss carries the precise code and
            // suggestion; prefer it over the generic validation text.
            let body = match (&params.error, code) {
                (
                    Some(err),
                    ValidationCode::ExtractionFailed | ValidationCode::MissingSectorSuffix,
                ) => ErrorBody {
                    code: err.code,
                    message: err.message.clone(),
                    suggestion: err.suggestion.clone(),
                },
                _ => ErrorBody {
                    code: code.error_code(),
                    message: validation.detail.unwrap_or_default(),
                    suggestion: None,
                },
            };
            return error_response(query_id, started, decision.category, decision.reasoning, body);
        }

        // Dispatch
        let outcome = match self.registry.execute(&decision, &params).await {
            Ok(outcome) => outcome,
            Err(err) => {
                return error_response(
                    query_id,
                    started,
                    decision.category,
                    decision.reasoning,
                    body_from_engine(&err),
                )
            }
        };

        if !outcome.any_success() {
            let detail = outcome
                .branches
                .iter()
                .filter_map(|b| b.error.as_deref())
                .collect::<Vec<_>>()
                .join("；");
            let body = ErrorBody {
                code: ErrorCode::AllBranchesFailed,
                message: format!("所有处理分支均失败：{}", detail),
                suggestion: None,
            };
            let mut response = error_response(
                query_id,
                started,
                decision.category,
                decision.reasoning,
                body,
            );
            // Keep per-branch detail available to the caller.
            response.payload = Some(formatter::format_outcome(&outcome));
            return response;
        }

        let payload = formatter::format_outcome(&outcome);
        info!(
            %query_id,
            route = %decision.category,
            branches = outcome.branches.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "query completed"
        );
        QueryResponse {
            success: true,
            route_type: decision.category,
            payload: Some(payload),
            error: None,
            diagnostics: Diagnostics {
                query_id,
                route_reasoning: decision.reasoning.to_string(),
                elapsed_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    async fn latest_session(&self, today: NaiveDate) -> crate::error::Result<NaiveDate> {
        let snap = self.calendar.snapshot().await?;
        snap.latest_on_or_before(today).ok_or_else(|| {
            EngineError::ReferenceUnavailable(format!("{} 之前没有任何交易日", today))
        })
    }
}

fn has_content(text: &str) -> bool {
    text.chars()
        .any(|c| c.is_alphanumeric() || ('\u{4e00}'..='\u{9fff}').contains(&c))
}

fn body_from_engine(err: &EngineError) -> ErrorBody {
    ErrorBody {
        code: err.code(),
        message: err.to_string(),
        suggestion: err.suggestion(),
    }
}

fn error_response(
    query_id: Uuid,
    started: Instant,
    route_type: QueryType,
    reasoning: &str,
    body: ErrorBody,
) -> QueryResponse {
    warn!(%query_id, code = ?body.code, message = %body.message, "query rejected");
    QueryResponse {
        success: false,
        route_type,
        payload: None,
        error: Some(body),
        diagnostics: Diagnostics {
            query_id,
            route_reasoning: reasoning.to_string(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        },
    }
}
