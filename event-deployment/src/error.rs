use event_common::kafka_producer::KafkaProduceError;
use reqwest::StatusCode;
use thiserror::Error;

/// Failure of a request to one of the collaborating services.
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected status {status}: {body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("unable to authenticate request: {0}")]
    Auth(#[source] Box<AuthError>),
}

impl RequestError {
    /// Status reported by the collaborator, transport failures count as internal errors.
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::UnexpectedStatus { status, .. } => *status,
            RequestError::Transport(error) => error
                .status()
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            RequestError::Url(_) | RequestError::Auth(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == StatusCode::NOT_FOUND
    }

    /// The referenced resource is gone or not visible to us. Retrying will not help.
    pub fn is_absent(&self) -> bool {
        matches!(
            self.status(),
            StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED
        )
    }

    pub fn is_internal(&self) -> bool {
        self.status() == StatusCode::INTERNAL_SERVER_ERROR
    }
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("user does not exist")]
    UserDoesNotExist,
    #[error("access denied ({status}): {body}")]
    AccessDenied { status: StatusCode, body: String },
    #[error(transparent)]
    Request(#[from] RequestError),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("failed to migrate database: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("invalid stored document: {0}")]
    Document(#[from] serde_json::Error),
}

/// Everything that can abort a deploy, remove or group update.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Request(#[from] RequestError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("expect flow to have exact one operator, found {0}")]
    FlowOperatorCount(usize),
    #[error("missing {0}")]
    MissingField(&'static str),
    #[error("failed to serialize {what}: {error}")]
    Serialization {
        what: &'static str,
        error: serde_json::Error,
    },
    #[error("failed to publish done notification: {0}")]
    Produce(#[from] KafkaProduceError),
    #[error("unknown command {0}")]
    UnknownCommand(String),
    #[error("invalid token: {0}")]
    InvalidToken(String),
}

impl From<AuthError> for RequestError {
    fn from(error: AuthError) -> Self {
        RequestError::Auth(Box::new(error))
    }
}

impl DeployError {
    pub fn is_user_missing(&self) -> bool {
        matches!(self, DeployError::Auth(AuthError::UserDoesNotExist))
    }

    /// Status code to answer an http caller with.
    pub fn status(&self) -> StatusCode {
        match self {
            DeployError::InvalidToken(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
