//! Handler dispatch and composition
//!
//! Routes fan out to one or more downstream handlers. Every branch runs
//! under its own timeout and reports its own outcome; a failing or slow
//! branch never cancels its siblings, and one successful branch is enough
//! for an aggregate success.

use crate::error::{EngineError, ErrorCode, Result};
use crate::models::{
    BranchOutcome, CompositionMode, ExtractedParams, HandlerKind, HandlerReply, HandlerRequest,
    RouteDecision,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, warn};

pub const DEFAULT_BRANCH_TIMEOUT: Duration = Duration::from_secs(30);

/// A downstream domain handler. Implementations own their transport;
/// the dispatcher only sees request in, reply out.
#[async_trait]
pub trait QueryHandler: Send + Sync {
    fn kind(&self) -> HandlerKind;
    async fn handle(&self, request: HandlerRequest) -> Result<HandlerReply>;
}

/// Result of executing one route: every branch outcome, in target order.
#[derive(Debug)]
pub struct DispatchOutcome {
    pub branches: Vec<BranchOutcome>,
}

impl DispatchOutcome {
    pub fn any_success(&self) -> bool {
        self.branches.iter().any(|b| b.success)
    }
}

pub struct HandlerRegistry {
    handlers: HashMap<HandlerKind, Arc<dyn QueryHandler>>,
    branch_timeout: Duration,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_BRANCH_TIMEOUT)
    }

    pub fn with_timeout(branch_timeout: Duration) -> Self {
        Self {
            handlers: HashMap::new(),
            branch_timeout,
        }
    }

    pub fn register(&mut self, handler: Arc<dyn QueryHandler>) {
        debug!(handler = handler.kind().name(), "handler registered");
        self.handlers.insert(handler.kind(), handler);
    }

    pub fn get(&self, kind: HandlerKind) -> Option<Arc<dyn QueryHandler>> {
        self.handlers.get(&kind).cloned()
    }

    /// Execute every target of `decision` under its composition mode.
    pub async fn execute(
        &self,
        decision: &RouteDecision,
        params: &ExtractedParams,
    ) -> Result<DispatchOutcome> {
        if decision.targets.is_empty() {
            return Err(EngineError::HandlerFailed {
                handler: "none".to_string(),
                detail: "路由没有任何处理目标".to_string(),
            });
        }

        let mut resolved = Vec::with_capacity(decision.targets.len());
        for kind in &decision.targets {
            let handler = self.get(*kind).ok_or_else(|| EngineError::HandlerFailed {
                handler: kind.name().to_string(),
                detail: "未注册".to_string(),
            })?;
            resolved.push(handler);
        }

        let base_request = HandlerRequest {
            query: params.raw_query.clone(),
            params: params.clone(),
            context: None,
        };

        let branches = match decision.mode {
            CompositionMode::Single => {
                vec![run_branch(resolved.remove(0), base_request, self.branch_timeout).await]
            }
            CompositionMode::Sequential => {
                self.run_sequential(resolved, base_request).await
            }
            CompositionMode::Concurrent => {
                self.run_concurrent(resolved, base_request).await
            }
        };

        for branch in branches.iter().filter(|b| !b.success) {
            warn!(
                handler = branch.handler.name(),
                error = ?branch.error,
                "branch failed"
            );
        }

        Ok(DispatchOutcome { branches })
    }

    /// Each handler's successful output feeds the next one's context.
    async fn run_sequential(
        &self,
        handlers: Vec<Arc<dyn QueryHandler>>,
        base_request: HandlerRequest,
    ) -> Vec<BranchOutcome> {
        let mut branches = Vec::with_capacity(handlers.len());
        let mut context: Option<serde_json::Value> = None;

        for handler in handlers {
            let mut request = base_request.clone();
            request.context = context.clone();
            let outcome = run_branch(handler, request, self.branch_timeout).await;
            if outcome.success {
                context = outcome.data.clone();
            }
            branches.push(outcome);
        }
        branches
    }

    /// All branches fan out as independent tasks; the join barrier waits
    /// for every one of them.
    async fn run_concurrent(
        &self,
        handlers: Vec<Arc<dyn QueryHandler>>,
        base_request: HandlerRequest,
    ) -> Vec<BranchOutcome> {
        let mut tasks = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let kind = handler.kind();
            let request = base_request.clone();
            let budget = self.branch_timeout;
            tasks.push((kind, tokio::spawn(run_branch(handler, request, budget))));
        }

        let mut branches = Vec::with_capacity(tasks.len());
        for (kind, task) in tasks {
            match task.await {
                Ok(outcome) => branches.push(outcome),
                Err(join_err) => branches.push(BranchOutcome {
                    handler: kind,
                    success: false,
                    data: None,
                    error: Some(format!("branch task failed: {}", join_err)),
                    error_code: Some(ErrorCode::Internal),
                    elapsed_ms: 0,
                }),
            }
        }
        branches
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Run one handler under the branch timeout and fold every failure shape
/// into a `BranchOutcome`.
async fn run_branch(
    handler: Arc<dyn QueryHandler>,
    request: HandlerRequest,
    budget: Duration,
) -> BranchOutcome {
    let kind = handler.kind();
    let started = std::time::Instant::now();

    let (success, data, error, error_code) = match timeout(budget, handler.handle(request)).await
    {
        Err(_) => (
            false,
            None,
            Some(format!("'{}'处理超时", kind.name())),
            Some(ErrorCode::HandlerTimeout),
        ),
        Ok(Err(err)) => (false, None, Some(err.to_string()), Some(err.code())),
        Ok(Ok(reply)) => {
            let code = if reply.success {
                None
            } else {
                Some(ErrorCode::HandlerFailed)
            };
            (reply.success, Some(reply.data), reply.error, code)
        }
    };

    BranchOutcome {
        handler: kind,
        success,
        data,
        error,
        error_code,
        elapsed_ms: started.elapsed().as_millis() as u64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::{FailingHandler, SlowHandler, StaticHandler};
    use crate::models::QueryType;
    use serde_json::json;

    fn request_params() -> ExtractedParams {
        ExtractedParams::new("测试查询")
    }

    fn registry_with(handlers: Vec<Arc<dyn QueryHandler>>) -> HandlerRegistry {
        let mut registry = HandlerRegistry::with_timeout(Duration::from_millis(200));
        for handler in handlers {
            registry.register(handler);
        }
        registry
    }

    #[tokio::test]
    async fn test_single_route_passes_through() {
        let registry = registry_with(vec![Arc::new(StaticHandler::new(
            HandlerKind::StructuredData,
            json!([{ "close": 1835.0 }]),
        ))]);
        let decision =
            RouteDecision::single(QueryType::SqlOnly, HandlerKind::StructuredData, "test");
        let outcome = registry.execute(&decision, &request_params()).await.unwrap();
        assert_eq!(outcome.branches.len(), 1);
        assert!(outcome.any_success());
    }

    #[tokio::test]
    async fn test_unregistered_handler_is_an_error() {
        let registry = registry_with(vec![]);
        let decision =
            RouteDecision::single(QueryType::SqlOnly, HandlerKind::StructuredData, "test");
        let err = registry.execute(&decision, &request_params()).await.unwrap_err();
        assert!(matches!(err, EngineError::HandlerFailed { .. }));
    }

    #[tokio::test]
    async fn test_sequential_feeds_context_forward() {
        let first = Arc::new(StaticHandler::new(
            HandlerKind::StructuredData,
            json!({"pct_chg": 5.2}),
        ));
        let second = Arc::new(StaticHandler::echo_context(
            HandlerKind::DocumentRetrieval,
        ));
        let registry = registry_with(vec![first, second]);
        let decision = RouteDecision {
            category: QueryType::SqlFirst,
            targets: vec![HandlerKind::StructuredData, HandlerKind::DocumentRetrieval],
            mode: CompositionMode::Sequential,
            reasoning: "test",
        };
        let outcome = registry.execute(&decision, &request_params()).await.unwrap();
        assert!(outcome.branches[1].success);
        // The second branch saw the first branch's output.
        assert_eq!(
            outcome.branches[1].data.as_ref().unwrap()["context"]["pct_chg"],
            json!(5.2)
        );
    }

    #[tokio::test]
    async fn test_concurrent_partial_failure_keeps_successes() {
        let ok = Arc::new(StaticHandler::new(
            HandlerKind::StructuredData,
            json!([{ "close": 10.0 }]),
        ));
        let bad = Arc::new(FailingHandler::new(
            HandlerKind::DocumentRetrieval,
            "后端不可用",
        ));
        let registry = registry_with(vec![ok, bad]);
        let decision = RouteDecision {
            category: QueryType::Parallel,
            targets: vec![HandlerKind::StructuredData, HandlerKind::DocumentRetrieval],
            mode: CompositionMode::Concurrent,
            reasoning: "test",
        };
        let outcome = registry.execute(&decision, &request_params()).await.unwrap();
        assert!(outcome.any_success());
        assert!(outcome.branches[0].success);
        assert!(!outcome.branches[1].success);
        assert!(outcome.branches[1].error.is_some());
    }

    struct PanickingHandler(HandlerKind);

    #[async_trait]
    impl QueryHandler for PanickingHandler {
        fn kind(&self) -> HandlerKind {
            self.0
        }

        async fn handle(&self, _request: HandlerRequest) -> Result<HandlerReply> {
            panic!("handler crashed");
        }
    }

    #[tokio::test]
    async fn test_crashed_branch_names_its_own_handler() {
        let ok = Arc::new(StaticHandler::new(
            HandlerKind::StructuredData,
            json!([{ "close": 10.0 }]),
        ));
        let crashing = Arc::new(PanickingHandler(HandlerKind::DocumentRetrieval));
        let registry = registry_with(vec![ok, crashing]);
        let decision = RouteDecision {
            category: QueryType::Parallel,
            targets: vec![HandlerKind::StructuredData, HandlerKind::DocumentRetrieval],
            mode: CompositionMode::Concurrent,
            reasoning: "test",
        };
        let outcome = registry.execute(&decision, &request_params()).await.unwrap();
        assert!(outcome.branches[0].success);
        assert_eq!(outcome.branches[1].handler, HandlerKind::DocumentRetrieval);
        assert_eq!(outcome.branches[1].error_code, Some(ErrorCode::Internal));
        assert!(outcome.any_success());
    }

    #[tokio::test]
    async fn test_slow_branch_times_out_without_aborting_others() {
        let fast = Arc::new(StaticHandler::new(
            HandlerKind::StructuredData,
            json!([{ "close": 10.0 }]),
        ));
        let slow = Arc::new(SlowHandler::new(
            HandlerKind::DocumentRetrieval,
            Duration::from_secs(5),
        ));
        let registry = registry_with(vec![fast, slow]);
        let decision = RouteDecision {
            category: QueryType::Parallel,
            targets: vec![HandlerKind::StructuredData, HandlerKind::DocumentRetrieval],
            mode: CompositionMode::Concurrent,
            reasoning: "test",
        };
        let outcome = registry.execute(&decision, &request_params()).await.unwrap();
        assert!(outcome.branches[0].success);
        assert_eq!(
            outcome.branches[1].error_code,
            Some(ErrorCode::HandlerTimeout)
        );
        assert!(outcome.any_success());
    }
}
