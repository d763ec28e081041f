//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it

use filecat::CatalogError;
use std::fmt;
use std::path::Path;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    /// The main error message
    pub message: String,
    /// Additional context about what was happening
    pub context: Option<String>,
    /// Suggestions for how to fix the error
    pub suggestions: Vec<String>,
}

impl HelpfulError {
    /// Create a new helpful error
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Add a suggestion for fixing the error
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    /// Add multiple suggestions
    pub fn with_suggestions(mut self, suggestions: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.suggestions.extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    // === Common error constructors ===

    /// Path does not exist
    pub fn path_not_found(path: &Path) -> Self {
        Self::new(format!("Path not found: {}", path.display()))
            .with_context("The specified path does not exist on the filesystem")
            .with_suggestions([
                format!("TRY: Check that the path exists: ls -la {}", path.display()),
                "TRY: Check for typos in the path".to_string(),
            ])
    }

    /// Catalog could not be opened
    pub fn catalog_unavailable(path: &Path, reason: &str) -> Self {
        Self::new(format!("Failed to open catalog: {}", reason))
            .with_context(format!("Database path: {}", path.display()))
            .with_suggestions([
                "TRY: Ensure the directory exists and is writable".to_string(),
                "TRY: Point at another catalog with --db <path>".to_string(),
            ])
    }

    /// Argument was not valid JSON
    pub fn invalid_json(what: &str, details: &str) -> Self {
        Self::new(format!("Invalid JSON for {}: {}", what, details))
            .with_suggestions([
                "TRY: Quote the document for your shell: '{\"field\": \"size\", \"op\": \"gt\", \"value\": 1000}'".to_string(),
                "TRY: Read it from a file with @path/to/doc.json, or from stdin with -".to_string(),
            ])
    }

    /// Condition tree or rule failed validation
    pub fn invalid_document(what: &str, errors: &[String]) -> Self {
        Self::new(format!("Invalid {}", what))
            .with_context(errors.join("\n"))
            .with_suggestions([
                "TRY: Conditions look like {\"field\": \"type\", \"op\": \"eq\", \"value\": \"image\"}".to_string(),
                "TRY: Combine them with {\"all\": [...]}, {\"any\": [...]} or {\"not\": {...}}".to_string(),
            ])
    }

    /// Saved view id unknown
    pub fn view_not_found(id: i64) -> Self {
        Self::new(format!("Saved view not found: {}", id))
            .with_suggestion("TRY: List saved views: filecat view list")
    }

    /// Map a library error onto the closest helpful form.
    pub fn from_catalog(err: CatalogError) -> Self {
        match err {
            CatalogError::Validation(errors) => Self::invalid_document("document", errors.messages()),
            CatalogError::Compile(e) => Self::invalid_document("query", &[e.to_string()]),
            CatalogError::Concurrency(msg) => Self::new(format!("Catalog is busy: {}", msg))
                .with_suggestion("TRY: Wait for other filecat processes to finish, then retry"),
            other => Self::new(other.to_string()),
        }
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

/// Emit a failed command as a JSON object on stdout.
pub fn print_json_error(err: &anyhow::Error) {
    let payload = match err.downcast_ref::<HelpfulError>() {
        Some(helpful) => serde_json::json!({
            "error": helpful.message,
            "context": helpful.context,
            "suggestions": helpful.suggestions,
        }),
        None => serde_json::json!({ "error": format!("{:#}", err) }),
    };
    println!("{}", payload);
}
