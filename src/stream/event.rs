use futures::stream::BoxStream;
use serde_json::Value;

use crate::BoxError;

/// A lazy, encoded event sequence as seen by stream interceptors.
pub type EventStream = BoxStream<'static, Result<Event, BoxError>>;

/// One encoded push event.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: Option<String>,
    data: Value,
}

impl Event {
    pub fn new(data: Value) -> Self {
        Self { id: None, data }
    }

    pub(crate) fn from_parts(id: Option<String>, data: Value) -> Self {
        Self { id, data }
    }

    /// Attach a resume token the client will send back in `Last-Event-ID` if it reconnects.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut Value {
        &mut self.data
    }

    pub fn into_data(self) -> Value {
        self.data
    }
}
