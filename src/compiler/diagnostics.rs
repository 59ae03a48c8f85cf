use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::compiler::source::SourceRange;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "debug"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// Everything the compiler can complain about.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Message {
    #[error("{0}")]
    Parse(String),
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("unknown function `{0}`")]
    UnknownFunction(String),
    #[error("unknown type `{0}`")]
    UnknownType(String),
    #[error("unknown field `{1}` of `{0}`")]
    UnknownField(String, String),
    #[error("duplicate declaration of `{0}`")]
    DuplicateDeclaration(String),
    #[error("expected a value of type {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },
    #[error("`{0}` expects {1} arguments, {2} given")]
    ArgumentCount(String, usize, usize),
    #[error("this expression cannot be assigned to")]
    NotAssignable,
    #[error("this expression cannot be indexed")]
    NotIndexable,
    #[error("character {0:?} is not in the character table")]
    BadCharacter(char),
    #[error("bit-field `{0}` does not fit in a machine word")]
    BitFieldOverflow(String),
    #[error("`{0}` outside of a loop")]
    OutsideLoop(&'static str),
    #[error("`return` outside of a function")]
    ReturnOutsideFunction,
    #[error("`create_pointer` requires a constant address")]
    NonConstantPointer,
    #[error("unknown instruction `{0}`")]
    UnknownMnemonic(String),
    #[error("unknown label `{0}` in assembly block")]
    UnknownAsmLabel(String),
    #[error("cannot read `{0}`: {1}")]
    FileError(String, String),
    #[error("link failed: {0}")]
    Link(String),
    #[error("function `{0}` is never called")]
    UnusedFunction(String),
    #[error("variable `{0}` is never used")]
    UnusedVariable(String),
    #[error("unsupported expression: {0}")]
    Unsupported(&'static str),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: Message,
}

/// Accumulated diagnostics, keyed and ordered by source range.
///
/// Compilation keeps going past errors so one run surfaces as many problems
/// as possible; the final image is only produced when no Error was recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
    entries: BTreeMap<SourceRange, Vec<Diagnostic>>,
}

impl Diagnostics {
    pub fn new() -> Diagnostics {
        Diagnostics::default()
    }

    pub fn report(&mut self, range: SourceRange, severity: Severity, message: Message) {
        self.entries
            .entry(range)
            .or_default()
            .push(Diagnostic { severity, message });
    }

    pub fn error(&mut self, range: SourceRange, message: Message) {
        self.report(range, Severity::Error, message);
    }

    pub fn debug(&mut self, range: SourceRange, message: Message) {
        self.report(range, Severity::Debug, message);
    }

    pub fn has_errors(&self) -> bool {
        self.iter().any(|(_, d)| d.severity == Severity::Error)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SourceRange, &Diagnostic)> {
        self.entries
            .iter()
            .flat_map(|(range, list)| list.iter().map(move |d| (*range, d)))
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (range, diagnostic) in self.iter() {
            writeln!(f, "{}: {}: {}", range, diagnostic.severity, diagnostic.message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::source::SourcePosition;

    #[test]
    fn test_ordering_and_errors() {
        let mut diagnostics = Diagnostics::new();
        let later = SourceRange::at(SourcePosition::new(4, 1));
        let earlier = SourceRange::at(SourcePosition::new(2, 1));

        diagnostics.debug(later, Message::UnusedVariable("x".to_string()));
        assert!(!diagnostics.has_errors());

        diagnostics.error(earlier, Message::UnknownVariable("y".to_string()));
        assert!(diagnostics.has_errors());

        let ranges: Vec<SourceRange> = diagnostics.iter().map(|(range, _)| range).collect();
        assert_eq!(ranges, vec![earlier, later]);
    }

    #[test]
    fn test_display() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.error(
            SourceRange::at(SourcePosition::new(1, 5)),
            Message::UnknownVariable("a".to_string()),
        );
        assert_eq!(diagnostics.to_string(), "1:5: error: unknown variable `a`\n");
    }
}
