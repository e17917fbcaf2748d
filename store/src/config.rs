use std::str::FromStr;

use url::Url;

use crate::error::{Result, StoreError};

pub const DEFAULT_WATCH_BUFFER: usize = 64;
pub const DEFAULT_HISTORY: usize = 1024;

/// Tunables carried in the query string of a connection URL,
/// e.g. `mem:///?watch_buffer=16&history=256`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    /// Capacity of each watch subscription's event buffer.
    pub watch_buffer: usize,
    /// Number of committed events the in-process backend retains for replay.
    pub history: usize,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            watch_buffer: DEFAULT_WATCH_BUFFER,
            history: DEFAULT_HISTORY,
        }
    }
}

impl StoreOptions {
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut options = Self::default();
        for (name, value) in url.query_pairs() {
            match name.as_ref() {
                "watch_buffer" => {
                    options.watch_buffer = parse_option(&name, &value)?;
                    if options.watch_buffer == 0 {
                        return Err(StoreError::InvalidOption {
                            name: name.into_owned(),
                            value: value.into_owned(),
                        });
                    }
                }
                "history" => options.history = parse_option(&name, &value)?,
                // Backend-specific parameters are left to the backend.
                _ => {}
            }
        }
        Ok(options)
    }
}

fn parse_option<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| StoreError::InvalidOption {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_defaults_without_query() {
        let url = Url::parse("mem:///").unwrap();
        assert_eq!(StoreOptions::from_url(&url).unwrap(), StoreOptions::default());
    }

    #[test]
    fn test_parses_query_options() {
        let url = Url::parse("etcd://localhost:2379/?watch_buffer=8&history=32&other=1").unwrap();
        let options = StoreOptions::from_url(&url).unwrap();
        assert_eq!(options.watch_buffer, 8);
        assert_eq!(options.history, 32);
    }

    #[test]
    fn test_rejects_invalid_values() {
        let url = Url::parse("mem:///?watch_buffer=lots").unwrap();
        let err = StoreOptions::from_url(&url).unwrap_err();
        assert!(matches!(err, StoreError::InvalidOption { ref name, .. } if name == "watch_buffer"));

        let url = Url::parse("mem:///?watch_buffer=0").unwrap();
        assert!(StoreOptions::from_url(&url).is_err());

        let url = Url::parse("mem:///?history=-1").unwrap();
        assert!(StoreOptions::from_url(&url).is_err());
    }
}
