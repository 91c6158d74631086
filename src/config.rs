use std::{fmt, sync::Arc, time::Duration};

use crate::{Error, ErrorTransformer};

/// Keepalive interval used when nothing else is configured.
pub const DEFAULT_KEEPALIVE: Duration = Duration::from_secs(30);

/// Request body limit used when nothing else is configured.
pub const DEFAULT_MAX_BODY_SIZE: usize = 1024 * 1024;

/// Registry level configuration for a [`Router`](crate::Router).
///
/// Every tunable here can be overridden per service and per procedure. The most specific setting
/// wins: procedure, then service, then this config.
#[derive(Clone)]
pub struct Config {
    pub(crate) overrides: Overrides,
    pub(crate) transformer: Option<ErrorTransformer>,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("overrides", &self.overrides)
            .field("transformer", &self.transformer.is_some())
            .finish()
    }
}

impl Config {
    /// Production defaults: internal error messages are masked.
    pub fn new() -> Self {
        Self {
            overrides: Overrides::default(),
            transformer: None,
        }
    }

    /// Same as [`Config::new`] but internal error messages reach the client.
    pub fn development() -> Self {
        Self::new().mask_internal_errors(false)
    }

    /// Install a transformer that is tried before the built-in error mapping.
    pub fn error_transformer(
        mut self,
        transformer: impl Fn(&(dyn std::error::Error + Send + Sync + 'static)) -> Option<Error>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.transformer = Some(Arc::new(transformer));
        self
    }

    pub fn mask_internal_errors(mut self, mask: bool) -> Self {
        self.overrides.mask_internal_errors = Some(mask);
        self
    }

    pub fn max_body_size(mut self, limit: usize) -> Self {
        self.overrides.max_body_size = Some(limit);
        self
    }

    /// Interval of the keepalive comment on idle streams. [`Duration::ZERO`] disables it.
    pub fn keepalive(mut self, interval: Duration) -> Self {
        self.overrides.keepalive = Some(interval);
        self
    }

    /// Deadline for writing a single stream event.
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.overrides.write_timeout = Some(timeout);
        self
    }
}

/// Optional tunables set at one level of the registry → service → procedure hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Overrides {
    pub(crate) mask_internal_errors: Option<bool>,
    pub(crate) max_body_size: Option<usize>,
    pub(crate) keepalive: Option<Duration>,
    pub(crate) write_timeout: Option<Duration>,
}

impl Overrides {
    /// Layer `other` on top of `self`. Values set in `other` win.
    pub(crate) fn merge(&self, other: &Overrides) -> Overrides {
        Overrides {
            mask_internal_errors: other.mask_internal_errors.or(self.mask_internal_errors),
            max_body_size: other.max_body_size.or(self.max_body_size),
            keepalive: other.keepalive.or(self.keepalive),
            write_timeout: other.write_timeout.or(self.write_timeout),
        }
    }
}

/// The settings a procedure runs with after resolving every level.
#[derive(Clone)]
pub struct Settings {
    mask_internal_errors: bool,
    max_body_size: usize,
    keepalive: Option<Duration>,
    write_timeout: Option<Duration>,
    pub(crate) transformer: Option<ErrorTransformer>,
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("mask_internal_errors", &self.mask_internal_errors)
            .field("max_body_size", &self.max_body_size)
            .field("keepalive", &self.keepalive)
            .field("write_timeout", &self.write_timeout)
            .finish()
    }
}

impl Settings {
    pub(crate) fn resolve(
        config: &Config,
        service: &Overrides,
        procedure: &Overrides,
    ) -> Settings {
        let o = config.overrides.merge(service).merge(procedure);

        Settings {
            mask_internal_errors: o.mask_internal_errors.unwrap_or(true),
            max_body_size: o.max_body_size.unwrap_or(DEFAULT_MAX_BODY_SIZE),
            keepalive: Some(o.keepalive.unwrap_or(DEFAULT_KEEPALIVE)).filter(|i| !i.is_zero()),
            write_timeout: o.write_timeout.filter(|t| !t.is_zero()),
            transformer: config.transformer.clone(),
        }
    }

    pub fn mask_internal_errors(&self) -> bool {
        self.mask_internal_errors
    }

    pub fn max_body_size(&self) -> usize {
        self.max_body_size
    }

    /// `None` when keepalives are disabled.
    pub fn keepalive(&self) -> Option<Duration> {
        self.keepalive
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        self.write_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = Settings::resolve(&Config::new(), &Overrides::default(), &Overrides::default());
        assert!(s.mask_internal_errors());
        assert_eq!(s.max_body_size(), DEFAULT_MAX_BODY_SIZE);
        assert_eq!(s.keepalive(), Some(DEFAULT_KEEPALIVE));
        assert_eq!(s.write_timeout(), None);
    }

    #[test]
    fn most_specific_level_wins() {
        let config = Config::new()
            .max_body_size(10)
            .keepalive(Duration::from_secs(5))
            .mask_internal_errors(false);
        let service = Overrides {
            max_body_size: Some(20),
            write_timeout: Some(Duration::from_secs(1)),
            ..Default::default()
        };
        let procedure = Overrides {
            max_body_size: Some(30),
            ..Default::default()
        };

        let s = Settings::resolve(&config, &service, &procedure);
        assert_eq!(s.max_body_size(), 30);
        assert_eq!(s.write_timeout(), Some(Duration::from_secs(1)));
        assert_eq!(s.keepalive(), Some(Duration::from_secs(5)));
        assert!(!s.mask_internal_errors());
    }

    #[test]
    fn zero_keepalive_disables() {
        let config = Config::new().keepalive(Duration::ZERO);
        let s = Settings::resolve(&config, &Overrides::default(), &Overrides::default());
        assert_eq!(s.keepalive(), None);
    }

    #[test]
    fn development_unmasks() {
        let s = Settings::resolve(
            &Config::development(),
            &Overrides::default(),
            &Overrides::default(),
        );
        assert!(!s.mask_internal_errors());
    }
}
