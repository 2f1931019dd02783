#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("Invalid user input: {0}")]
    UserInput(String),

    #[error("Json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("Parse duration: {source}")]
    ParseDuration {
        #[from]
        source: parse_duration::parse::Error,
    },

    #[error("Base64 decode error: {source}")]
    Base64 {
        #[from]
        source: base64::DecodeError,
    },

    #[error("Missing required field: {0}")]
    MissingField(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True when the underlying Kubernetes error is a CAS conflict
    /// (HTTP 409), which the caller should respond to by requeuing
    /// rather than surfacing (spec.md §4.3, §7).
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 409)
    }

    /// True when the underlying Kubernetes error is "not found" (HTTP 404),
    /// which callers treat as deletion (spec.md §7).
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube { source: kube::Error::Api(ae) } if ae.code == 404)
    }
}
