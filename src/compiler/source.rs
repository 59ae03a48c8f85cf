use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SourcePosition {
    pub line: usize,
    pub column: usize,
}

impl SourcePosition {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }

    pub fn increment_column(&mut self) {
        self.column += 1;
    }

    pub fn increment_line(&mut self) {
        self.line += 1;
        self.column = 1;
    }
}

impl Default for SourcePosition {
    fn default() -> Self {
        Self::new(1, 1)
    }
}

impl fmt::Display for SourcePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// The span of source text an AST node or diagnostic covers.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct SourceRange {
    pub start: SourcePosition,
    pub end: SourcePosition,
}

impl SourceRange {
    pub fn new(start: SourcePosition, end: SourcePosition) -> Self {
        Self { start, end }
    }

    pub fn at(position: SourcePosition) -> Self {
        Self {
            start: position,
            end: position,
        }
    }

    /// The smallest range covering both `self` and `other`.
    pub fn to(self, other: SourceRange) -> SourceRange {
        SourceRange {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for SourceRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_union() {
        let a = SourceRange::at(SourcePosition::new(1, 4));
        let b = SourceRange::at(SourcePosition::new(2, 1));
        assert_eq!(a.to(b).start, SourcePosition::new(1, 4));
        assert_eq!(a.to(b).end, SourcePosition::new(2, 1));
    }

    #[test]
    fn test_display() {
        let range = SourceRange::new(SourcePosition::new(3, 1), SourcePosition::new(3, 7));
        assert_eq!(range.to_string(), "3:1-3:7");
        assert_eq!(SourceRange::at(SourcePosition::new(3, 1)).to_string(), "3:1");
    }
}
