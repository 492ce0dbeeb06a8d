/// Tags every log line of one pass over an order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CorrelationId(uuid::Uuid);

impl CorrelationId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Span context for one pass of work on an order
#[derive(Debug, Clone)]
pub struct WorkflowSpan {
    pub correlation_id: CorrelationId,
    pub order_id: String,
    /// What started the pass: `orchestrate`, `resolve_checkpoint`, `cascade_step`, ...
    pub operation: &'static str,
}

impl WorkflowSpan {
    pub fn new(order_id: impl Into<String>, operation: &'static str) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            order_id: order_id.into(),
            operation,
        }
    }

    /// Build the tracing span for this pass
    ///
    /// Use with `tracing::Instrument` across `.await` points.
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "workflow",
            correlation_id = %self.correlation_id,
            order_id = %self.order_id,
            operation = self.operation,
        )
    }

    /// Enter the span on the current thread
    pub fn enter(&self) -> tracing::span::EnteredSpan {
        self.span().entered()
    }
}

/// Log an error with the identifiers an operator searches by, then pass it on
pub trait ErrorContext {
    /// Log the error with its correlation ID
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self;

    /// Log the error with the order it belongs to
    fn with_order_id(self, order_id: &str) -> Self;

    /// Log the error with the workflow it belongs to
    fn with_workflow_id(self, workflow_id: &str) -> Self;
}

impl<T, E> ErrorContext for Result<T, E>
where
    E: std::fmt::Display,
{
    fn with_correlation_id(self, correlation_id: CorrelationId) -> Self {
        self.map_err(|e| {
            tracing::error!(
                correlation_id = %correlation_id,
                error = %e,
                "error occurred"
            );
            e
        })
    }

    fn with_order_id(self, order_id: &str) -> Self {
        self.map_err(|e| {
            tracing::error!(
                order_id = %order_id,
                error = %e,
                "error occurred"
            );
            e
        })
    }

    fn with_workflow_id(self, workflow_id: &str) -> Self {
        self.map_err(|e| {
            tracing::error!(
                workflow_id = %workflow_id,
                error = %e,
                "error occurred"
            );
            e
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_correlation_id_generation() {
        let id1 = CorrelationId::new();
        let id2 = CorrelationId::new();

        // IDs should be unique
        assert_ne!(id1, id2);

        assert_eq!(id1.as_str().len(), 36);
    }

    #[test]
    fn test_workflow_span_creation() {
        let span = WorkflowSpan::new("order-9", "orchestrate");

        assert_eq!(span.order_id, "order-9");
        assert_eq!(span.operation, "orchestrate");
        let _entered = span.enter();
    }

    #[test]
    fn test_error_context_passes_values_through() {
        let ok: Result<u32, String> = Ok(7);
        assert_eq!(ok.with_order_id("order-1"), Ok(7));

        let err: Result<u32, String> = Err("store offline".to_string());
        assert_eq!(
            err.with_correlation_id(CorrelationId::new()),
            Err("store offline".to_string())
        );
    }

    #[tokio::test]
    async fn test_span_instruments_futures() {
        use tracing::Instrument;

        let span = WorkflowSpan::new("order-2", "cascade_step");
        let value = async { 42 }.instrument(span.span()).await;
        assert_eq!(value, 42);
    }
}
