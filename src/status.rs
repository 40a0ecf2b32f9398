/// Outcome of a stage operation.
///
/// This is the closed result taxonomy used across the data plane. Rule
/// tables, enforcement objects, and the control-plane handlers all report
/// through it; crate-internal plumbing failures (socket IO, config parsing)
/// use dedicated error types instead.
///
/// The string form is fixed: `ok`, `not_found`, `not_supported`, `error`,
/// `enforced`, and `no_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The operation executed with success.
    Ok,
    /// The target object does not exist or was not found.
    NotFound,
    /// The requested method is not supported by the target.
    NotSupported,
    /// The operation was not successfully executed.
    Error,
    /// A rule or request was enforced.
    Enforced,
    /// Initialization state; no operation has reported yet.
    NoStatus,
}

impl Status {
    pub fn ok() -> Self {
        Status::Ok
    }

    pub fn not_found() -> Self {
        Status::NotFound
    }

    pub fn not_supported() -> Self {
        Status::NotSupported
    }

    pub fn error() -> Self {
        Status::Error
    }

    pub fn enforced() -> Self {
        Status::Enforced
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Status::Ok)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Status::NotFound)
    }

    pub fn is_not_supported(&self) -> bool {
        matches!(self, Status::NotSupported)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Status::Error)
    }

    pub fn is_enforced(&self) -> bool {
        matches!(self, Status::Enforced)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::NoStatus
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Ok => "ok",
            Status::NotFound => "not_found",
            Status::NotSupported => "not_supported",
            Status::Error => "error",
            Status::Enforced => "enforced",
            Status::NoStatus => "no_status",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_match_predicates() {
        assert!(Status::ok().is_ok());
        assert!(Status::not_found().is_not_found());
        assert!(Status::not_supported().is_not_supported());
        assert!(Status::error().is_error());
        assert!(Status::enforced().is_enforced());
        assert!(!Status::default().is_ok());
    }

    #[test]
    fn display_is_fixed() {
        assert_eq!(Status::Ok.to_string(), "ok");
        assert_eq!(Status::NotFound.to_string(), "not_found");
        assert_eq!(Status::NotSupported.to_string(), "not_supported");
        assert_eq!(Status::Error.to_string(), "error");
        assert_eq!(Status::Enforced.to_string(), "enforced");
        assert_eq!(Status::NoStatus.to_string(), "no_status");
    }
}
