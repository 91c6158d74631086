use serde::de::DeserializeOwned;
use serde_json::Value;
use specta::Type;
use validator::{Validate, ValidationErrors};

use crate::{BoxError, DecodeError};

/// A type which can be taken as the input of a procedure.
///
/// This is implemented for every [`Validate`] type that is also [`DeserializeOwned`] and
/// [`Type`], so deriving `Validate` on your input struct is enough, even when it declares no
/// rules. Primitives, `()` and [`serde_json::Value`] are accepted without validation.
///
/// The marker `M` only exists so both families of implementations can coexist. It is always
/// inferred.
pub trait Input<M>: DeserializeOwned + Type + Send + Sync + 'static {
    fn validate_input(&self) -> Result<(), ValidationErrors>;
}

#[doc(hidden)]
pub enum Validated {}

impl<T> Input<Validated> for T
where
    T: Validate + DeserializeOwned + Type + Send + Sync + 'static,
{
    fn validate_input(&self) -> Result<(), ValidationErrors> {
        self.validate()
    }
}

#[doc(hidden)]
pub enum Unvalidated {}

macro_rules! impl_unvalidated {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Input<Unvalidated> for $ty {
                fn validate_input(&self) -> Result<(), ValidationErrors> {
                    Ok(())
                }
            }
        )*
    };
}

impl_unvalidated!(
    (),
    bool,
    char,
    String,
    i8,
    i16,
    i32,
    i64,
    isize,
    u8,
    u16,
    u32,
    u64,
    usize,
    f32,
    f64,
    Value,
);

/// Where the raw input of a call comes from.
#[derive(Debug, Clone, Copy)]
pub(crate) enum RawInput<'a> {
    /// The JSON encoded `input` query parameter of a read-style call.
    Query(Option<&'a str>),
    /// The body of a write-style call.
    Body(&'a [u8]),
}

impl<'a> RawInput<'a> {
    /// Pull the `input` parameter out of a query string.
    pub(crate) fn from_query(query: Option<&'a str>) -> Option<String> {
        query.and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "input")
                .map(|(_, value)| value.into_owned())
        })
    }
}

/// Deserialize and, unless `validate` is false, validate the input of a call.
pub(crate) fn decode<I, M>(input: RawInput<'_>, validate: bool) -> Result<I, BoxError>
where
    I: Input<M>,
{
    let value: I = match input {
        RawInput::Query(Some(raw)) => serde_json::from_str(raw).map_err(DecodeError::from)?,
        RawInput::Body(raw) if !raw.is_empty() => {
            serde_json::from_slice(raw).map_err(DecodeError::from)?
        }
        RawInput::Query(None) | RawInput::Body(_) => {
            serde_json::from_value(Value::Null).map_err(DecodeError::from)?
        }
    };

    if validate {
        value.validate_input()?;
    }

    Ok(value)
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, Validate, Type)]
    struct Greet {
        #[validate(length(min = 1, max = 8))]
        name: String,
    }

    #[test]
    fn reads_the_input_parameter() {
        assert_eq!(
            RawInput::from_query(Some("a=1&input=%7B%22name%22%3A%22bob%22%7D")).as_deref(),
            Some(r#"{"name":"bob"}"#)
        );
        assert_eq!(RawInput::from_query(Some("a=1")), None);
        assert_eq!(RawInput::from_query(None), None);
    }

    #[test]
    fn missing_input_decodes_as_null() {
        decode::<(), _>(RawInput::Query(None), true).unwrap();
        decode::<(), _>(RawInput::Body(b""), true).unwrap();
        assert!(decode::<Greet, _>(RawInput::Query(None), true).is_err());
    }

    #[test]
    fn validation_can_be_skipped() {
        let raw = RawInput::Body(br#"{"name":"much too long"}"#);

        let err = decode::<Greet, _>(raw, true).unwrap_err();
        assert!(err.downcast_ref::<ValidationErrors>().is_some());

        let greet = decode::<Greet, _>(raw, false).unwrap();
        assert_eq!(greet.name, "much too long");
    }

    #[test]
    fn malformed_input_is_a_decode_error() {
        let err = decode::<Greet, _>(RawInput::Body(b"{"), true).unwrap_err();
        assert!(err.downcast_ref::<DecodeError>().is_some());
    }
}
