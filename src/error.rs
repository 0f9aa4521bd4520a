use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CloneError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to run {program}")]
    #[diagnostic(help("is {program} installed and on PATH? tool paths can be set under [tools] in the config"))]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("VM {vm} failed to get cloned")]
    #[diagnostic(help("{detail}"))]
    CloneFailed { vm: String, detail: String },

    #[error("a clone is already in progress")]
    Busy,

    #[error("cancelled")]
    Cancelled,
}
