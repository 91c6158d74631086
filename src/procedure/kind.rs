use std::fmt;

use serde::Serialize;
use specta::Type;

/// The call shape of a procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Type)]
#[serde(rename_all = "camelCase")]
pub enum ProcedureKind {
    /// A cacheable read. Served on `GET`.
    Query,
    /// A mutation. Served on `POST`.
    Exec,
    /// A server push sequence. Served on `GET` as an event stream.
    Stream,
    /// A synced shared value. Served on `GET` as an event stream.
    Atom,
}

impl ProcedureKind {
    /// Whether the input is read from the query string instead of the body.
    pub fn is_read(&self) -> bool {
        !matches!(self, Self::Exec)
    }

    pub fn is_streaming(&self) -> bool {
        matches!(self, Self::Stream | Self::Atom)
    }

    pub(crate) fn http_method(&self) -> http::Method {
        match self {
            Self::Exec => http::Method::POST,
            Self::Query | Self::Stream | Self::Atom => http::Method::GET,
        }
    }
}

impl fmt::Display for ProcedureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Exec => write!(f, "exec"),
            Self::Stream => write!(f, "stream"),
            Self::Atom => write!(f, "atom"),
        }
    }
}
