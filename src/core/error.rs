use std::error::Error as StdError;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    InvalidRequest,
    MalformedCursor,
    NotFound,
    BlockedActor,
    BlockedByActor,
    AccountTakedown,
    AuthRequired,
    Upstream,
    Internal,
}

impl ErrorKind {
    /// Machine-readable reason code carried in the wire error envelope.
    pub fn reason(self) -> &'static str {
        match self {
            ErrorKind::InvalidRequest | ErrorKind::NotFound => "InvalidRequest",
            ErrorKind::MalformedCursor => "MalformedCursor",
            ErrorKind::BlockedActor => "BlockedActor",
            ErrorKind::BlockedByActor => "BlockedByActor",
            ErrorKind::AccountTakedown => "AccountTakedown",
            ErrorKind::AuthRequired => "AuthRequired",
            ErrorKind::Upstream => "UpstreamFailure",
            ErrorKind::Internal => "InternalServerError",
        }
    }

    pub fn status(self) -> u16 {
        match self {
            ErrorKind::AuthRequired => 401,
            ErrorKind::Upstream => 502,
            ErrorKind::Internal => 500,
            _ => 400,
        }
    }

    pub fn from_reason(reason: &str) -> Option<ErrorKind> {
        let kind = match reason {
            "InvalidRequest" => ErrorKind::InvalidRequest,
            "MalformedCursor" => ErrorKind::MalformedCursor,
            "BlockedActor" => ErrorKind::BlockedActor,
            "BlockedByActor" => ErrorKind::BlockedByActor,
            "AccountTakedown" => ErrorKind::AccountTakedown,
            "AuthRequired" | "AuthenticationRequired" => ErrorKind::AuthRequired,
            "UpstreamFailure" => ErrorKind::Upstream,
            "InternalServerError" => ErrorKind::Internal,
            _ => return None,
        };
        Some(kind)
    }
}

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
    hint: Option<String>,
    actor: Option<String>,
    source: Option<Box<dyn StdError + Send + Sync>>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
            hint: None,
            actor: None,
            source: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    pub fn actor(&self) -> Option<&str> {
        self.actor.as_deref()
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_source(mut self, source: impl StdError + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(message) = &self.message {
            write!(f, ": {message}")?;
        }
        if let Some(actor) = &self.actor {
            write!(f, " (actor: {actor})")?;
        }
        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_ref()
            .map(|source| source.as_ref() as &(dyn StdError + 'static))
    }
}

pub fn to_exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::Internal => 1,
        ErrorKind::InvalidRequest => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::MalformedCursor => 4,
        ErrorKind::BlockedActor | ErrorKind::BlockedByActor => 5,
        ErrorKind::AccountTakedown => 6,
        ErrorKind::AuthRequired => 7,
        ErrorKind::Upstream => 8,
    }
}
