use std::{fmt, time::Duration};

use http::HeaderValue;

/// Response caching for successful queries.
///
/// Sent as `Cache-Control: {public|private}, max-age={seconds}`. Never attached to errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheControl {
    pub max_age: Duration,
    pub public: bool,
}

impl CacheControl {
    /// Cacheable by shared caches such as CDNs.
    pub fn public(max_age: Duration) -> Self {
        Self {
            max_age,
            public: true,
        }
    }

    /// Only cacheable by the client.
    pub fn private(max_age: Duration) -> Self {
        Self {
            max_age,
            public: false,
        }
    }

    pub(crate) fn header_value(&self) -> HeaderValue {
        // Only ASCII is ever formatted in.
        HeaderValue::from_str(&self.to_string()).unwrap_or(HeaderValue::from_static("no-store"))
    }
}

impl fmt::Display for CacheControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}, max-age={}",
            if self.public { "public" } else { "private" },
            self.max_age.as_secs()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_format() {
        assert_eq!(
            CacheControl::public(Duration::from_secs(60)).header_value(),
            "public, max-age=60"
        );
        assert_eq!(
            CacheControl::private(Duration::from_millis(1500)).header_value(),
            "private, max-age=1"
        );
    }
}
