/*
 * vDIME dark internet mail environment client
 *
 * Copyright (C) 2003 - viridIT SAS
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

use crate::Error;
use std::path::PathBuf;
use vdime_dns::{DnsClient, ROOT_KEY_FILE};

/// Which recursive resolver the DNS layer queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverChoice {
    /// The system resolver configuration.
    #[default]
    System,
    Google,
    Cloudflare,
}

/// Client configuration. Defaults resolve everything under the user's
/// DIME directory (`~/.dime`).
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Override for the DIME user directory.
    #[serde(default)]
    pub base_dir: Option<PathBuf>,

    /// Override for the cache file location (stronger than the
    /// `DIME_CACHE_FILE` environment variable).
    #[serde(default)]
    pub cache_file: Option<PathBuf>,

    #[serde(default)]
    pub resolver: ResolverChoice,
}

impl Config {
    /// The trust anchor file location.
    pub fn anchor_path(&self) -> Result<PathBuf, Error> {
        self.base_dir.as_ref().map_or_else(
            || Ok(vdime_cache::dime_dir_location(Some(ROOT_KEY_FILE))?),
            |base| Ok(base.join(ROOT_KEY_FILE)),
        )
    }

    /// The cache file location.
    pub fn cache_path(&self) -> Result<PathBuf, Error> {
        if let Some(path) = &self.cache_file {
            return Ok(path.clone());
        }

        if let Some(base) = &self.base_dir {
            return Ok(base.join(".cache"));
        }

        Ok(vdime_cache::cache_location()?)
    }

    /// Build the DNS client for the configured resolver.
    pub fn dns_client(&self) -> Result<DnsClient, Error> {
        Ok(match self.resolver {
            ResolverChoice::System => DnsClient::from_system_conf()?,
            ResolverChoice::Google => DnsClient::google(),
            ResolverChoice::Cloudflare => DnsClient::cloudflare(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn explicit_paths_take_precedence() {
        let config = Config {
            base_dir: Some(PathBuf::from("/tmp/dime")),
            cache_file: Some(PathBuf::from("/tmp/elsewhere/.cache")),
            resolver: ResolverChoice::Google,
        };

        assert_eq!(
            config.anchor_path().unwrap(),
            PathBuf::from("/tmp/dime/root-anchor.key")
        );
        assert_eq!(
            config.cache_path().unwrap(),
            PathBuf::from("/tmp/elsewhere/.cache")
        );
    }

    #[test]
    fn base_dir_supplies_the_default_cache_location() {
        let config = Config {
            base_dir: Some(PathBuf::from("/tmp/dime")),
            ..Config::default()
        };

        assert_eq!(config.cache_path().unwrap(), PathBuf::from("/tmp/dime/.cache"));
    }
}
