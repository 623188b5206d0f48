use thiserror::Error;

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("could not spawn `{binary}`: {err}")]
    Spawn {
        binary: String,
        #[source]
        err: std::io::Error,
    },

    #[error("`{0}` not piped")]
    StreamPipeError(String),

    #[error("kill script `{script}` exited with {outcome}")]
    KillScript { script: String, outcome: String },

    #[cfg(target_family = "unix")]
    #[error("could not send signal: {0}")]
    Signal(#[from] nix::Error),

    #[error("signals are not supported on this platform")]
    Unsupported,

    #[error("io error")]
    IOError(#[from] std::io::Error),
}
