/// Broad failure category.
///
/// Geometry anomalies (zero-length tangents) are repaired locally and never
/// show up here; solver non-convergence is reported through
/// `solve::SolveReport`, not as an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Streamline, gradient table, volume or configuration has the wrong shape.
    InputShape,
    /// The requested in-memory assembly exceeds the configured budget.
    ResourceExhaustion,
    /// Reading or writing a file failed.
    Io,
    /// Non-finite or non-positive values where a physical signal is expected.
    Numerical,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::InputShape => 2,
            ErrorKind::ResourceExhaustion => 3,
            ErrorKind::Io => 4,
            ErrorKind::Numerical => 5,
        }
    }
}

#[derive(Clone)]
pub struct FitError {
    kind: ErrorKind,
    message: String,
}

impl FitError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

impl std::fmt::Display for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for FitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FitError")
            .field("kind", &self.kind)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for FitError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_distinct_per_kind() {
        let kinds = [
            ErrorKind::InputShape,
            ErrorKind::ResourceExhaustion,
            ErrorKind::Io,
            ErrorKind::Numerical,
        ];
        let mut codes: Vec<u8> = kinds.iter().map(|k| k.exit_code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), kinds.len());
    }

    #[test]
    fn display_is_the_message() {
        let err = FitError::new(ErrorKind::InputShape, "streamline 3 has 1 node");
        assert_eq!(err.to_string(), "streamline 3 has 1 node");
        assert_eq!(err.exit_code(), 2);
    }
}
