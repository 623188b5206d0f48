use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum SupervisorError {
    #[error("missing required inputs: {}", .0.join(", "))]
    Precondition(Vec<String>),
}

#[derive(Error, Debug)]
pub enum MarkerError {
    #[error("could not write marker `{path}`: {err}")]
    Write {
        path: String,
        #[source]
        err: std::io::Error,
    },
    #[error("could not read marker `{path}`: {err}")]
    Read {
        path: String,
        #[source]
        err: std::io::Error,
    },
    #[error("unknown owner `{0}`")]
    UnknownOwner(String),
}
