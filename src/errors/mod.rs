//! Error types shared by the engine and the layers
//!
//! Layers report [`LayerError`]s, which always carry a source location when one
//! is known. The engine wraps them, together with its own failure modes, in
//! [`CompileError`].

use std::fmt;
use std::io;

use serde::Serialize;

/// 1-based line and column of a node or token in the source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SourceLocation {
    pub line: usize,
    pub col: usize,
}

impl SourceLocation {
    pub fn new(line: usize, col: usize) -> Self {
        Self { line, col }
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind")]
pub enum LayerErrorKind {
    DuplicateAnnotation { layer: String, identifier: String, key: String },
    UnresolvedReference { identifier: String, layer: String },
    MalformedAnnotation { message: String },
    TypeMismatch { expected: String, found: String },
    ArgumentCount { function: String, expected: usize, found: usize },
    Subtype { expected: String, actual: String },
    FeatureNotSupported { feature: String },
    FunctionDefinition { function: String, variable: String, argument_idx: usize },
    CanonicalNameCollision { name: String },
    ControlFlow { message: String },
    Solver { message: String },
}

impl fmt::Display for LayerErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateAnnotation { layer, identifier, key } => {
                write!(f, "Duplicate annotation: '{}' of '{}' is already defined in layer '{}'", key, identifier, layer)
            }
            Self::UnresolvedReference { identifier, layer } => {
                write!(f, "Unresolved reference: '{}' has no '{}' annotation in scope", identifier, layer)
            }
            Self::MalformedAnnotation { message } => {
                write!(f, "Malformed annotation: {}", message)
            }
            Self::TypeMismatch { expected, found } => {
                write!(f, "Type mismatch: expected {}, found {}", expected, found)
            }
            Self::ArgumentCount { function, expected, found } => {
                write!(f, "Function {} expects {} arguments, but {} were given", function, expected, found)
            }
            Self::Subtype { expected, actual } => {
                write!(f, "Refinement violated: {} is not a subtype of {}", actual, expected)
            }
            Self::FeatureNotSupported { feature } => {
                write!(f, "Feature not supported: {}", feature)
            }
            Self::FunctionDefinition { function, variable, argument_idx } => {
                write!(
                    f,
                    "Invalid signature for {}: argument {} refers to '{}' before it is bound",
                    function, argument_idx, variable
                )
            }
            Self::CanonicalNameCollision { name } => {
                write!(f, "Name '{}' collides with a canonical argument name", name)
            }
            Self::ControlFlow { message } => {
                write!(f, "Control flow error: {}", message)
            }
            Self::Solver { message } => {
                write!(f, "Solver error: {}", message)
            }
        }
    }
}

/// Error raised by a single layer's check, optionally located in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayerError {
    pub kind: LayerErrorKind,
    pub location: Option<SourceLocation>,
    pub suggestions: Vec<String>,
}

impl LayerError {
    pub fn new(kind: LayerErrorKind) -> Self {
        Self {
            kind,
            location: None,
            suggestions: Vec::new(),
        }
    }

    pub fn at(mut self, location: SourceLocation) -> Self {
        self.location = Some(location);
        self
    }

    /// Attaches a location unless one is already present.
    pub fn or_at(mut self, location: SourceLocation) -> Self {
        self.location.get_or_insert(location);
        self
    }

    pub fn with_suggestion(mut self, suggestion: String) -> Self {
        self.suggestions.push(suggestion);
        self
    }

    pub fn with_suggestions(mut self, suggestions: Vec<String>) -> Self {
        self.suggestions = suggestions;
        self
    }

    pub fn duplicate_annotation(layer: &str, identifier: &str, key: &str) -> Self {
        Self::new(LayerErrorKind::DuplicateAnnotation {
            layer: layer.to_string(),
            identifier: identifier.to_string(),
            key: key.to_string(),
        })
    }

    pub fn unresolved(identifier: &str, layer: &str, location: SourceLocation, candidates: &[String]) -> Self {
        let mut error = Self::new(LayerErrorKind::UnresolvedReference {
            identifier: identifier.to_string(),
            layer: layer.to_string(),
        })
        .at(location);

        let similar = find_similar_names(identifier, candidates, 2);
        if !similar.is_empty() {
            let suggestions = similar
                .iter()
                .take(3)
                .map(|s| format!("Did you mean '{}'?", s))
                .collect();
            error = error.with_suggestions(suggestions);
        }

        error
    }

    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(LayerErrorKind::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        })
        .at(location)
    }

    pub fn argument_count(function: &str, expected: usize, found: usize, location: SourceLocation) -> Self {
        Self::new(LayerErrorKind::ArgumentCount {
            function: function.to_string(),
            expected,
            found,
        })
        .at(location)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(LayerErrorKind::MalformedAnnotation { message: message.into() })
    }

    pub fn unsupported(feature: impl Into<String>, location: SourceLocation) -> Self {
        Self::new(LayerErrorKind::FeatureNotSupported { feature: feature.into() }).at(location)
    }
}

impl fmt::Display for LayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(location) = &self.location {
            write!(f, "{}: ", location)?;
        }
        write!(f, "{}", self.kind)?;

        for suggestion in &self.suggestions {
            write!(f, "\n  hint: {}", suggestion)?;
        }

        Ok(())
    }
}

impl std::error::Error for LayerError {}

/// Syntax error reported by the frontend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl ParseError {
    pub fn new(message: impl Into<String>, location: SourceLocation) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: Syntax error: {}", self.location, self.message)
    }
}

impl std::error::Error for ParseError {}

/// Errors that abort a whole typecheck call.
#[derive(Debug)]
pub enum CompileError {
    Parse(ParseError),
    /// No constructor is registered for the layer name.
    UnknownLayer { name: String },
    CycleDetected { cycle: Vec<String> },
    LayerCheckFailure { layer: String, error: LayerError },
    /// The control-flow pre-pass rejected the program.
    ControlFlow(LayerError),
    /// The collector found a malformed layer declaration.
    Collect(LayerError),
    Config(String),
    Io(io::Error),
}

impl CompileError {
    /// Source position of the underlying error, when it has one.
    pub fn location(&self) -> Option<SourceLocation> {
        match self {
            Self::Parse(e) => Some(e.location),
            Self::LayerCheckFailure { error, .. } | Self::ControlFlow(error) | Self::Collect(error) => error.location,
            _ => None,
        }
    }

    /// Name of the layer whose check failed, if this is a layer failure.
    pub fn layer_name(&self) -> Option<&str> {
        match self {
            Self::LayerCheckFailure { layer, .. } => Some(layer),
            _ => None,
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "{}", e),
            Self::UnknownLayer { name } => write!(f, "Unknown layer: '{}'", name),
            Self::CycleDetected { cycle } => {
                write!(f, "Cycle in layer dependencies: {}", cycle.join(" -> "))
            }
            Self::LayerCheckFailure { layer, error } => write!(f, "[{}] {}", layer, error),
            Self::ControlFlow(e) | Self::Collect(e) => write!(f, "{}", e),
            Self::Config(message) => write!(f, "Configuration error: {}", message),
            Self::Io(e) => write!(f, "I/O error: {}", e),
        }
    }
}

impl std::error::Error for CompileError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Parse(e) => Some(e),
            Self::LayerCheckFailure { error, .. } | Self::ControlFlow(error) | Self::Collect(error) => Some(error),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ParseError> for CompileError {
    fn from(error: ParseError) -> Self {
        Self::Parse(error)
    }
}

impl From<io::Error> for CompileError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

/// Error collector for gathering rendered diagnostics across files
pub struct ErrorCollector {
    errors: Vec<String>,
    max_errors: usize,
    dropped: usize,
}

impl ErrorCollector {
    pub fn new() -> Self {
        Self::with_max(100)
    }

    pub fn with_max(max_errors: usize) -> Self {
        Self {
            errors: Vec::new(),
            max_errors,
            dropped: 0,
        }
    }

    pub fn add(&mut self, error: impl fmt::Display) {
        if self.errors.len() < self.max_errors {
            self.errors.push(error.to_string());
        } else {
            self.dropped += 1;
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Number of errors seen, including the ones past `max_errors`.
    pub fn error_count(&self) -> usize {
        self.errors.len() + self.dropped
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

impl Default for ErrorCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute Levenshtein distance for "did you mean" suggestions
pub fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let a_len = a_chars.len();
    let b_len = b_chars.len();

    if a_len == 0 { return b_len; }
    if b_len == 0 { return a_len; }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for i in 1..=a_len {
        curr[0] = i;
        for j in 1..=b_len {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b_len]
}

/// Find similar names for "did you mean" suggestions
pub fn find_similar_names(target: &str, candidates: &[String], max_distance: usize) -> Vec<String> {
    let mut results: Vec<(String, usize)> = candidates
        .iter()
        .map(|c| (c.clone(), levenshtein_distance(target, c)))
        .filter(|(_, dist)| *dist <= max_distance && *dist > 0)
        .collect();

    results.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    results.into_iter().map(|(name, _)| name).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levenshtein() {
        assert_eq!(levenshtein_distance("kitten", "sitting"), 3);
        assert_eq!(levenshtein_distance("", "abc"), 3);
        assert_eq!(levenshtein_distance("same", "same"), 0);
    }

    #[test]
    fn test_unresolved_suggestions() {
        let candidates = vec!["counter".to_string(), "count".to_string(), "other".to_string()];
        let error = LayerError::unresolved("coutn", "types", SourceLocation::new(3, 1), &candidates);

        assert_eq!(error.location, Some(SourceLocation::new(3, 1)));
        assert_eq!(error.suggestions, vec!["Did you mean 'count'?".to_string()]);
    }

    #[test]
    fn test_display_includes_location() {
        let error = LayerError::type_mismatch("int", "bool", SourceLocation::new(4, 5));
        assert_eq!(error.to_string(), "4:5: Type mismatch: expected int, found bool");

        let wrapped = CompileError::LayerCheckFailure { layer: "typecheck".to_string(), error };
        assert_eq!(wrapped.layer_name(), Some("typecheck"));
        assert_eq!(wrapped.location(), Some(SourceLocation::new(4, 5)));
    }

    #[test]
    fn test_collector_caps_errors() {
        let mut collector = ErrorCollector::with_max(2);
        collector.add("a");
        collector.add("b");
        collector.add("c");

        assert_eq!(collector.errors().len(), 2);
        assert_eq!(collector.error_count(), 3);
        assert_eq!(collector.dropped(), 1);
    }
}
