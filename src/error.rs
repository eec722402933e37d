use anyhow::anyhow;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    ParentNotFound,
    AlreadyConnected,
    CircularReference,
    Forbidden,
    MalformedGraph,
    InvalidInput,
    Unknown,
}

/// Engine error with a stable machine code, a caller-safe message and the
/// underlying cause. Rule-check failures are never represented here; they are
/// returned as data alongside passing checks.
#[derive(Debug)]
pub struct EngineError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub public: &'static str,
    pub source: anyhow::Error,
}

impl EngineError {
    pub fn not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::NotFound,
            code: "not_found",
            public,
            source,
        }
    }

    pub fn parent_not_found(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::ParentNotFound,
            code: "parent_not_found",
            public,
            source,
        }
    }

    pub fn already_connected(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::AlreadyConnected,
            code: "already_connected",
            public,
            source,
        }
    }

    pub fn circular_reference(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::CircularReference,
            code: "circular_reference",
            public,
            source,
        }
    }

    pub fn forbidden(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Forbidden,
            code: "forbidden",
            public,
            source,
        }
    }

    pub fn malformed(code: &'static str, public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::MalformedGraph,
            code,
            public,
            source,
        }
    }

    pub fn invalid(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::InvalidInput,
            code: "invalid_input",
            public,
            source,
        }
    }

    pub fn unknown(public: &'static str, source: anyhow::Error) -> Self {
        Self {
            kind: ErrorKind::Unknown,
            code: "unknown_error",
            public,
            source,
        }
    }

    pub fn message(public: &'static str) -> Self {
        Self::unknown(public, anyhow!(public))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.public, self.code)
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
