//! Mapping arbitrary failures into [`Error`].

use std::{error, sync::Arc};

use serde_json::Value;
use validator::ValidationErrors;

use crate::{BoxError, DecodeError, Error, ErrorCode, StreamError};

/// A user supplied mapping from any failure to an [`Error`].
///
/// Returning `None` defers to the built-in mapping.
pub type ErrorTransformer =
    Arc<dyn Fn(&(dyn error::Error + Send + Sync + 'static)) -> Option<Error> + Send + Sync>;

/// Run the transformer chain: the user transformer first, then the built-in mapping.
pub(crate) fn transform(transformer: Option<&ErrorTransformer>, err: BoxError) -> Error {
    if let Some(err) = transformer.and_then(|transformer| transformer(&*err)) {
        return err;
    }

    default_transform(err)
}

/// The built-in mapping for errors the user transformer declined.
pub fn default_transform(err: BoxError) -> Error {
    let err = match err.downcast::<Error>() {
        Ok(err) => return *err,
        Err(err) => err,
    };

    if let Some(errors) = err.downcast_ref::<ValidationErrors>() {
        return validation_error(errors);
    }

    if let Some(decode) = err.downcast_ref::<DecodeError>() {
        return Error::invalid_argument(decode.to_string());
    }

    if let Some(stream) = err.downcast_ref::<StreamError>() {
        return match stream {
            StreamError::Encode(_) => Error::internal(stream.to_string()),
            StreamError::Closed | StreamError::WriteTimeout => {
                Error::unavailable(stream.to_string())
            }
        };
    }

    Error::internal(err.to_string()).with_boxed_cause(err)
}

fn validation_error(errors: &ValidationErrors) -> Error {
    let err = Error::new(
        ErrorCode::InvalidArgument,
        format!("validation failed: {errors}"),
    );

    match serde_json::to_value(errors.field_errors()) {
        Ok(fields @ Value::Object(_)) => err.with_detail("fields", fields),
        _ => err,
    }
}

/// Transform, log and mask an error on its way to the client.
pub(crate) fn report(
    transformer: Option<&ErrorTransformer>,
    mask: bool,
    path: &str,
    err: BoxError,
) -> Error {
    let err = transform(transformer, err);

    match err.code() {
        ErrorCode::Internal => tracing::error!(
            procedure = path,
            error = %err.message(),
            cause = ?err.cause().map(|cause| cause.to_string()),
            "procedure failed"
        ),
        code => tracing::debug!(procedure = path, %code, error = %err.message(), "procedure returned error"),
    }

    if mask {
        err.masked()
    } else {
        err
    }
}
