use thiserror::Error;

/// One-line warning on stderr. Warnings never affect the exit code.
pub fn warn_user(message: &str) {
    eprintln!("! {}", message);
}

/// Structured failures surfaced to the user. Everything here exits with
/// code 1; anything else is plumbing and goes through `anyhow` context.
#[derive(Debug, Error)]
pub enum CorepackError {
    #[error("expected a semver version, got '{raw}'")]
    SpecSyntax { raw: String },
    #[error("This project is configured to use {expected}")]
    NameMismatch { expected: String },
    #[error("\"{field}\": {got} does not match the value defined in \"devEngines.packageManager\": {want}")]
    DevEnginesMismatch {
        field: String,
        got: String,
        want: String,
    },
    #[error("Illegal use of URL for known package manager")]
    UrlForKnownTool,
    #[error("Mismatch hashes. Expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },
    #[error("Signature does not match")]
    SignatureMismatch,
    #[error("No compatible signature found")]
    NoCompatibleSignature,
    #[error("Network access disabled by the environment")]
    NetworkDisabled,
    #[error("No version of {package} satisfies '{request}'")]
    NoMatchingVersion { package: String, request: String },
}
