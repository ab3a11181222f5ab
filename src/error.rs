use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum VagabondError {
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

    #[error("you seem to have used all available addresses in the 192.168 block")]
    #[diagnostic(help("destroy some instances before creating a new one"))]
    AddressSpaceExhausted,

    #[error("image \"{name}\" not found")]
    #[diagnostic(help("add it with: vagrant box add --name \"{name}\" <image-url>"))]
    UnknownImage { name: String },

    #[error("failed to launch `{command}`")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {}", describe_exit(.code))]
    ProcessFailed { command: String, code: Option<i32> },

    #[error("{failed} of {total} operations failed")]
    OperationsFailed { failed: usize, total: usize },
}

impl VagabondError {
    /// Fatal errors stop the whole process; everything else only fails the
    /// operation it happened in.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VagabondError::AddressSpaceExhausted | VagabondError::UnknownImage { .. }
        )
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (terminated by signal)".into(),
    }
}
