use std::fmt;

/// Abstract error kind, independent of which pipe raised it.
///
/// Mirrors spec §7: every [`FluxError`] carries one of these so callers can
/// branch on category without downcasting to a concrete error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FluxErrorKind {
    /// Failure of a codec, file, socket, or external store.
    Io,
    /// Input violates a declared invariant (schema mismatch, illegal row, ...).
    Validation,
    /// Strictly a subtype of `Validation`: a sorted stream observed a
    /// decreasing key.
    OutOfOrder,
    /// A deadline elapsed before the operation completed.
    Timeout,
    /// A bounded resource (group size, buffer, ...) was exceeded.
    ExcessiveResources,
    /// A transport error was observed crossing a sync/async bridge.
    Queue,
    /// A capability the caller asked for is not implemented by this
    /// collaborator (e.g. an optional `Bucket` method).
    Unsupported,
    /// An unexpected condition; wraps an opaque cause.
    Internal,
}

impl fmt::Display for FluxErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FluxErrorKind::Io => "io",
            FluxErrorKind::Validation => "validation",
            FluxErrorKind::OutOfOrder => "out_of_order",
            FluxErrorKind::Timeout => "timeout",
            FluxErrorKind::ExcessiveResources => "excessive_resources",
            FluxErrorKind::Queue => "queue",
            FluxErrorKind::Unsupported => "unsupported",
            FluxErrorKind::Internal => "internal",
        };
        f.write_str(label)
    }
}

/// The framework's single error type. Every pipe, adapter, and SPI
/// implementation returns this (or a crate-local error that converts into
/// it at the pipe boundary).
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FluxError {
    kind: FluxErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl FluxError {
    pub fn new(kind: FluxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: FluxErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> FluxErrorKind {
        self.kind
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::Io, message)
    }

    pub fn io_from(err: std::io::Error, context: impl Into<String>) -> Self {
        Self::with_source(FluxErrorKind::Io, context, err)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::Validation, message)
    }

    pub fn out_of_order(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::OutOfOrder, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::Timeout, message)
    }

    pub fn excessive_resources(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::ExcessiveResources, message)
    }

    pub fn queue(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::Queue, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::Unsupported, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FluxErrorKind::Internal, message)
    }

    pub fn is_out_of_order(&self) -> bool {
        matches!(self.kind, FluxErrorKind::OutOfOrder)
    }
}

/// Accumulates errors observed while closing more than one owned resource.
///
/// Per spec §4.A: "errors inside close for multiple owned resources are
/// accumulated — the last error is surfaced, earlier errors logged."
#[derive(Default)]
pub struct CloseErrors {
    last: Option<FluxError>,
}

impl CloseErrors {
    pub fn new() -> Self {
        Self { last: None }
    }

    pub fn record(&mut self, result: Result<()>) {
        if let Err(err) = result {
            if let Some(previous) = self.last.replace(err) {
                tracing::warn!(error = %previous, "suppressed earlier close() error");
            }
        }
    }

    pub fn finish(self) -> Result<()> {
        match self.last {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

pub type Result<T> = std::result::Result<T, FluxError>;
