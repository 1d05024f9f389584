use crate::ast::Span;
use thiserror::Error;

/// Highlight color of a diagnostic site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteColor {
    Red,
    Green,
    Cyan,
    Yellow,
}

/// A highlighted region of the source attached to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Site {
    pub span: Span,
    pub color: SiteColor,
}

impl Site {
    pub fn red(span: Span) -> Self {
        Site { span, color: SiteColor::Red }
    }

    pub fn green(span: Span) -> Self {
        Site { span, color: SiteColor::Green }
    }

    pub fn cyan(span: Span) -> Self {
        Site { span, color: SiteColor::Cyan }
    }
}

#[derive(Debug, Error)]
pub enum CompilerError {
    #[error("Lex error: {0}")]
    LexError(String, Vec<Site>),

    #[error("Syntax error: {0}")]
    SyntaxError(String, Vec<Site>),

    #[error("Type error: {0}")]
    TypeError(String, Vec<Site>),

    #[error("SSA error: {0}")]
    SsaInternalError(String, Vec<Site>),

    #[error("SPIR-V generation error: {0}")]
    CodegenError(String, Vec<Site>),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{message}")]
    Context {
        message: String,
        #[source]
        source: Box<CompilerError>,
    },
}

impl CompilerError {
    /// All highlighted sites, in the order they were attached.
    pub fn sites(&self) -> &[Site] {
        match self {
            Self::LexError(_, sites)
            | Self::SyntaxError(_, sites)
            | Self::TypeError(_, sites)
            | Self::SsaInternalError(_, sites)
            | Self::CodegenError(_, sites) => sites,
            Self::Internal(_) => &[],
            Self::Context { source, .. } => source.sites(),
        }
    }

    /// The primary site: the first red one, or the first one of any color.
    pub fn span(&self) -> Option<Span> {
        let sites = self.sites();
        sites
            .iter()
            .find(|s| s.color == SiteColor::Red)
            .or_else(|| sites.first())
            .map(|s| s.span)
    }

    /// The message without the category prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::LexError(msg, _)
            | Self::SyntaxError(msg, _)
            | Self::TypeError(msg, _)
            | Self::SsaInternalError(msg, _)
            | Self::CodegenError(msg, _)
            | Self::Internal(msg) => msg,
            Self::Context { message, .. } => message,
        }
    }

    /// The innermost error of a context chain.
    pub fn root(&self) -> &CompilerError {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, CompilerError>;

pub trait ResultExt<T> {
    fn context(self, message: impl Into<String>) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|source| CompilerError::Context {
            message: message.into(),
            source: Box::new(source),
        })
    }
}

// Bail macros without span

#[macro_export]
macro_rules! bail_ssa {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::SsaInternalError(format!($($arg)*), Vec::new()))
    };
}

#[macro_export]
macro_rules! bail_codegen {
    ($($arg:tt)*) => {
        return Err($crate::error::CompilerError::CodegenError(format!($($arg)*), Vec::new()))
    };
}

// Bail macros with span

#[macro_export]
macro_rules! bail_lex_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::LexError(
            format!($($arg)*),
            vec![$crate::error::Site::red($span)],
        ))
    };
}

#[macro_export]
macro_rules! bail_syntax_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::SyntaxError(
            format!($($arg)*),
            vec![$crate::error::Site::red($span)],
        ))
    };
}

#[macro_export]
macro_rules! bail_type_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::TypeError(
            format!($($arg)*),
            vec![$crate::error::Site::red($span)],
        ))
    };
}

#[macro_export]
macro_rules! bail_ssa_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::SsaInternalError(
            format!($($arg)*),
            vec![$crate::error::Site::red($span)],
        ))
    };
}

#[macro_export]
macro_rules! bail_codegen_at {
    ($span:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::CodegenError(
            format!($($arg)*),
            vec![$crate::error::Site::red($span)],
        ))
    };
}

// Multi-site bail macros

/// Previous declaration in green, offending one in red.
#[macro_export]
macro_rules! bail_type_dual {
    ($previous:expr, $current:expr, $($arg:tt)*) => {
        return Err($crate::error::CompilerError::TypeError(
            format!($($arg)*),
            vec![$crate::error::Site::green($previous), $crate::error::Site::red($current)],
        ))
    };
}

#[macro_export]
macro_rules! bail_type_sites {
    ([$($site:expr),* $(,)?], $($arg:tt)*) => {
        return Err($crate::error::CompilerError::TypeError(format!($($arg)*), vec![$($site),*]))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primary_span_prefers_red() {
        let err = CompilerError::TypeError(
            "mismatch".to_string(),
            vec![Site::green(Span::new(0, 1)), Site::red(Span::new(4, 5)), Site::cyan(Span::new(8, 9))],
        );
        assert_eq!(err.span(), Some(Span::new(4, 5)));
        assert_eq!(err.sites().len(), 3);
    }

    #[test]
    fn test_context_keeps_root_sites() {
        let inner: Result<()> = Err(CompilerError::CodegenError(
            "bad".to_string(),
            vec![Site::red(Span::new(2, 3))],
        ));
        let err = inner.context("while emitting 'main'").unwrap_err();
        assert_eq!(err.to_string(), "while emitting 'main'");
        assert_eq!(err.root().message(), "bad");
        assert_eq!(err.span(), Some(Span::new(2, 3)));
        assert!(std::error::Error::source(&err).is_some());
    }
}
