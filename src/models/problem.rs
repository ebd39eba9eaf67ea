use std::fmt;

/// A recoverable problem found while importing or uploading.
///
/// Problems are accumulated and returned alongside normal results; they are
/// data, not control flow. Causes are carried as rendered strings so problem
/// sets stay structurally comparable.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ImportProblem {
    /// A single file could not be processed as expected.
    File {
        file: String,
        message: String,
        cause: Option<String>,
    },
    /// Two nodes could not be linked.
    Link {
        parent: i32,
        child: i32,
        message: String,
        cause: Option<String>,
    },
    /// A reference inside a metadata document could not be matched to
    /// any node.
    Match {
        parent: i32,
        reference: String,
        message: String,
        cause: Option<String>,
    },
}

impl ImportProblem {
    pub fn file<F, M>(file: F, message: M) -> ImportProblem
    where
        F: Into<String>,
        M: Into<String>,
    {
        ImportProblem::File {
            file: file.into(),
            message: message.into(),
            cause: None,
        }
    }

    pub fn link<M, C>(parent: i32, child: i32, message: M, cause: &C)
    -> ImportProblem
    where
        M: Into<String>,
        C: fmt::Display + ?Sized,
    {
        ImportProblem::Link {
            parent,
            child,
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }

    pub fn unmatched<R, M>(parent: i32, reference: R, message: M) -> ImportProblem
    where
        R: Into<String>,
        M: Into<String>,
    {
        ImportProblem::Match {
            parent,
            reference: reference.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Attach a rendered cause.
    pub fn caused_by<C>(mut self, error: &C) -> ImportProblem
    where
        C: fmt::Display + ?Sized,
    {
        let target = match self {
            ImportProblem::File { ref mut cause, .. } => cause,
            ImportProblem::Link { ref mut cause, .. } => cause,
            ImportProblem::Match { ref mut cause, .. } => cause,
        };
        *target = Some(error.to_string());
        self
    }
}

impl fmt::Display for ImportProblem {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            ImportProblem::File { ref file, ref message, .. } =>
                write!(fmt, "{}: {}", file, message),
            ImportProblem::Link { parent, child, ref message, .. } =>
                write!(fmt, "link {} -> {}: {}", parent, child, message),
            ImportProblem::Match { parent, ref reference, ref message, .. } =>
                write!(fmt, "reference {:?} in node {}: {}",
                    reference, parent, message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structural_equality() {
        let a = ImportProblem::file("a.txt", "unreadable");
        let b = ImportProblem::file("a.txt", "unreadable");
        let c = ImportProblem::file("a.txt", "unreadable").caused_by("EACCES");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, ImportProblem::unmatched(1, "a.txt", "unreadable"));
    }
}
