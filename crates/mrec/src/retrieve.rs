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

use crate::record::{parse_dime_record, DimeRecord};
use crate::{Error, DIME_RECORD_DNS_PREFIX};
use vdime_cache::{cache_id, unix_now, Store};
use vdime_dns::DnsResolver;

const SECONDS_PER_DAY: u64 = 86_400;

/// Cached retrieval of DIME management records over DNS.
#[derive(Debug, Default)]
pub struct DimeRecordStore {
    /// Backing object cache store.
    pub store: Store<DimeRecord>,
}

impl DimeRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self { store: Store::new() }
    }

    /// Retrieve the management record for a domain.
    ///
    /// With `use_cache`, a cached record is returned directly; a cached
    /// record past its TTL (but not its absolute expiration) is refreshed
    /// live, and the refreshed copy keeps the *original* expiration so a
    /// compromised zone cannot extend its own trust window. When the
    /// refresh fails the cached record keeps being served.
    #[tracing::instrument(skip(self, dns), level = "debug")]
    pub async fn get(
        &self,
        dns: &DnsResolver,
        domain: &str,
        use_cache: bool,
    ) -> Result<DimeRecord, Error> {
        if use_cache {
            if let Some(cached) = self.store.find(domain) {
                if cached.refresh_due {
                    tracing::debug!(domain, "attempting to refresh DIME record that exceeded TTL");

                    match self.fetch_live(dns, domain).await {
                        Ok((record, ttl)) => {
                            // Attach the old expiration to the new record.
                            self.store.replace_id(
                                &cache_id(domain),
                                u64::from(ttl),
                                cached.expiration,
                                record.clone(),
                                true,
                                true,
                            );

                            tracing::debug!(domain, "refreshed DIME record, retaining old expiry");
                            return Ok(record);
                        }
                        Err(e) => {
                            tracing::warn!(domain, %e, "unable to refresh DIME record that exceeded TTL");
                        }
                    }
                }

                tracing::debug!(domain, "returning cached DIME record");
                return Ok(cached.payload);
            }
        }

        let (record, ttl) = self.fetch_live(dns, domain).await?;

        if use_cache {
            let expiration = record
                .expiry_days
                .map_or(0, |days| unix_now() + days * SECONDS_PER_DAY);

            self.store
                .add(domain, u64::from(ttl), expiration, record.clone(), true, true)?;
        }

        Ok(record)
    }

    async fn fetch_live(&self, dns: &DnsResolver, domain: &str) -> Result<(DimeRecord, u32), Error> {
        let qname = format!("{DIME_RECORD_DNS_PREFIX}.{domain}");
        let answer = dns.get_txt_record(&qname).await?;

        let mut record = parse_dime_record(&answer.text)?;
        record.validated = answer.state;

        Ok((record, answer.ttl))
    }

    /// Parse a management record from the first non-blank line of a local
    /// file and force it into the cache for the given domain, ephemeral
    /// and with unlimited TTL.
    pub fn get_from_file(
        &self,
        path: &std::path::Path,
        domain: &str,
    ) -> Result<DimeRecord, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::File {
            with_source: format!("{}: {e}", path.display()),
        })?;

        let line = contents
            .lines()
            .find(|line| line.chars().any(|c| c.is_ascii_graphic()))
            .ok_or_else(|| Error::File {
                with_source: format!("{} contained no record line", path.display()),
            })?;

        let record = parse_dime_record(line.trim_end())?;

        // Supplied locally, so it never reaches the persistent cache.
        self.store
            .add_forced(domain, 0, 0, record.clone(), false, false);

        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::tests::pok_b64;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn record_from_file_is_cached_ephemeral() {
        let store = DimeRecordStore::new();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file).unwrap();
        writeln!(file, "ver=1 pok={} dx=mx1.darkmail.example", pok_b64(4)).unwrap();

        let record = store
            .get_from_file(file.path(), "darkmail.example")
            .unwrap();
        assert_eq!(record.dx, vec!["mx1.darkmail.example".to_owned()]);

        let cached = store.store.find("darkmail.example").unwrap();
        assert_eq!(cached.payload, record);
        assert_eq!(cached.ttl, 0);

        // Ephemeral: nothing survives a save.
        let mut out = vec![];
        vdime_cache::PersistentStore::serialize_into(&store.store, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn file_without_record_line_is_an_error() {
        let store = DimeRecordStore::new();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "   ").unwrap();

        assert!(store.get_from_file(file.path(), "darkmail.example").is_err());
    }
}
