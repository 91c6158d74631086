use std::{
    any::{type_name, Any},
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use crate::{BoxError, Error};

type Slot<T> = Mutex<Option<T>>;

/// The decoded input of a call as seen by interceptors.
///
/// Interceptors are not tied to a handler's input type so they receive it erased. Use
/// [`Payload::inspect`] to look at it or [`Payload::new`] to replace it before calling `next`.
/// Clones share one value which the handler takes exactly once, so an interceptor may keep a
/// clone around after `next` but will find it empty by then.
#[derive(Clone)]
pub struct Payload {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Payload {
    pub fn new<T: Any + Send>(value: T) -> Self {
        Self {
            value: Arc::new(Slot::new(Some(value))),
            type_name: type_name::<T>(),
        }
    }

    /// Run `f` against the value if it is a `T` and has not been taken by the handler yet.
    ///
    /// The value is locked while `f` runs.
    pub fn inspect<T: Any + Send, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let slot = self.value.downcast_ref::<Slot<T>>()?;
        let value = slot.lock().unwrap_or_else(PoisonError::into_inner);
        value.as_ref().map(f)
    }

    pub fn is<T: Any + Send>(&self) -> bool {
        self.value.is::<Slot<T>>()
    }

    /// The name of the type held, for diagnostics.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub(crate) fn take<T: Any + Send>(self) -> Result<T, BoxError> {
        let from = self.type_name;
        let slot = self.value.downcast_ref::<Slot<T>>().ok_or_else(|| {
            Error::internal(format!(
                "procedure expected input of type '{}' but got '{from}'",
                type_name::<T>()
            ))
        })?;

        let value = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
        value.ok_or_else(|| Error::internal("procedure input was already taken").into())
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Payload").field(&self.type_name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_returns_the_value() {
        let payload = Payload::new(String::from("hi"));
        assert_eq!(payload.inspect(|s: &String| s.clone()).unwrap(), "hi");
        assert_eq!(payload.take::<String>().unwrap(), "hi");
    }

    #[test]
    fn take_rejects_wrong_type() {
        let err = Payload::new(1u32).take::<String>().unwrap_err();
        assert!(err.to_string().contains("u32"));
    }

    #[test]
    fn retained_clones_do_not_block_the_handler() {
        let payload = Payload::new(1u32);
        let retained = payload.clone();

        assert_eq!(payload.take::<u32>().unwrap(), 1);
        assert_eq!(retained.inspect(|n: &u32| *n), None);
        assert!(retained.take::<u32>().is_err());
    }
}
