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

use crate::config::Config;
use crate::signet::{split_signet_name, CachedSignet, SignetCodec, SignetStrength};
use crate::Error;
use vdime_cache::{CacheFile, DataKind, PersistentStore, Store};
use vdime_dns::DnsResolver;
use vdime_mrec::{DimeRecord, DimeRecordStore};
use vdime_protocol::DmtpSession;
use vdime_tls::{verify_dx_certificate, DxConnector, OcspStore};

/// The top-level DIME client state: every cache store, the DNS validator
/// and the TLS machinery, wired together for signet resolution.
#[derive(Debug)]
pub struct DimeResolver {
    config: Config,
    pub dns: DnsResolver,
    pub records: DimeRecordStore,
    pub signets: Store<CachedSignet>,
    pub ocsp: OcspStore,
    connector: DxConnector,
}

impl DimeResolver {
    /// Assemble a resolver from its configuration. No I/O happens before
    /// [`DimeResolver::bootstrap`].
    pub fn new(config: Config) -> Result<Self, Error> {
        let dns = DnsResolver::new(config.dns_client()?);

        Ok(Self {
            config,
            dns,
            records: DimeRecordStore::new(),
            signets: Store::new(),
            ocsp: OcspStore::new(),
            connector: DxConnector::new(),
        })
    }

    /// Every persistent store, in the fixed save order of [`DataKind::ALL`].
    fn stores(&self) -> [&dyn PersistentStore; 5] {
        DataKind::ALL.map(|kind| -> &dyn PersistentStore {
            match kind {
                DataKind::DimeRecord => &self.records.store,
                DataKind::Dnskey => &self.dns.dnskeys,
                DataKind::Ds => &self.dns.ds,
                DataKind::Ocsp => &self.ocsp.store,
                DataKind::Signet => &self.signets,
            }
        })
    }

    /// Load the trust anchors and the persistent cache. Failure to load
    /// at least one root anchor is fatal; cache problems are not.
    pub fn bootstrap(&self) -> Result<(), Error> {
        let anchor = self.config.anchor_path()?;
        let loaded = self.dns.load_anchor_file(&anchor)?;
        tracing::debug!(count = loaded, path = %anchor.display(), "loaded trust anchors");

        let cache = CacheFile::at(self.config.cache_path()?);

        if let Err(e) = cache.load(&self.stores()) {
            tracing::warn!(%e, "could not load cache contents, starting fresh");
        }

        Ok(())
    }

    /// Persist every store to the cache file.
    pub fn save_cache(&self) -> Result<(), Error> {
        let cache = CacheFile::at(self.config.cache_path()?);
        cache.save(&self.stores())?;

        Ok(())
    }

    /// Retrieve the management record for a domain.
    pub async fn get_dime_record(&self, domain: &str, use_cache: bool) -> Result<DimeRecord, Error> {
        Ok(self.records.get(&self.dns, domain, use_cache).await?)
    }

    /// Fetch and validate a named signet.
    ///
    /// Organizational signets (bare domain) validate against the domain's
    /// POK list; user signets validate against the organizational signet,
    /// itself validated first. Only full validation strength is accepted.
    /// Successful lookups are cached persistently under the queried name.
    #[tracing::instrument(skip(self, codec), level = "debug")]
    pub async fn get_signet<C: SignetCodec>(
        &self,
        codec: &C,
        name: &str,
        fingerprint: Option<&str>,
        use_cache: bool,
    ) -> Result<C::Signet, Error> {
        let (domain, is_org) = split_signet_name(name)?;

        if use_cache {
            if let Some(cached) = self.signets.find(name) {
                tracing::debug!(name, "returning cached signet");
                return codec.deserialize_b64(&cached.payload.b64);
            }
        }

        let mut session =
            DmtpSession::connect(domain, &self.dns, &self.records, &self.connector).await?;

        let outcome = self
            .fetch_over_session(codec, &mut session, name, domain, is_org, fingerprint)
            .await;

        // The QUIT farewell is best-effort; the verdict stands either way.
        if let Err(e) = session.quit().await {
            tracing::debug!(%e, "session teardown reported an error");
        }

        let (signet, b64) = outcome?;

        if use_cache {
            if let Err(e) = self.signets.add(
                name,
                0,
                0,
                CachedSignet {
                    name: name.to_owned(),
                    b64,
                },
                true,
                false,
            ) {
                tracing::warn!(name, %e, "error adding signet to object cache");
            } else if let Err(e) = self.save_cache() {
                tracing::warn!(%e, "could not save cache contents");
            }
        }

        Ok(signet)
    }

    async fn fetch_over_session<C: SignetCodec>(
        &self,
        codec: &C,
        session: &mut DmtpSession,
        name: &str,
        domain: &str,
        is_org: bool,
        fingerprint: Option<&str>,
    ) -> Result<(C::Signet, String), Error> {
        // The TLS peer must pass the binding ladder before any command.
        let chain = session.peer_chain()?;

        if !verify_dx_certificate(&chain, session.dx(), session.record(), &self.ocsp).await? {
            return Err(Error::CertificateRejected);
        }

        session.ehlo().await?;

        let pok_list = session.record().pok.clone();

        // A user lookup first fetches and proves the org signet, then
        // verifies the user signet against it.
        let org_signet = if is_org {
            None
        } else {
            let org_b64 = session.get_signet(domain, None).await?;
            let org = codec.deserialize_b64(&org_b64)?;

            if codec.validate_all(&org, None, None, Some(&pok_list)) != SignetStrength::Full {
                return Err(Error::Validation {
                    with_source: format!(
                        "org signet could not be verified against DIME management record POK for {domain}"
                    ),
                });
            }

            tracing::debug!(domain, "org signet validation succeeded");
            Some(org)
        };

        let b64 = session.get_signet(name, fingerprint).await?;
        let signet = codec.deserialize_b64(&b64)?;

        let strength = if is_org {
            codec.validate_all(&signet, None, None, Some(&pok_list))
        } else {
            codec.validate_all(&signet, None, org_signet.as_ref(), None)
        };

        if strength != SignetStrength::Full {
            return Err(Error::Validation {
                with_source: format!(
                    "{} signet could not be verified for {name}",
                    if is_org { "org" } else { "user" }
                ),
            });
        }

        tracing::debug!(name, "signet validation succeeded");

        Ok((signet, b64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// A codec over opaque payloads that accepts everything, for cache
    /// plumbing tests.
    struct Passthrough;

    impl SignetCodec for Passthrough {
        type Signet = String;

        fn deserialize_b64(&self, b64: &str) -> Result<String, Error> {
            Ok(b64.to_owned())
        }

        fn validate_all(
            &self,
            _signet: &String,
            _previous: Option<&String>,
            _org: Option<&String>,
            _pok_list: Option<&[[u8; 32]]>,
        ) -> SignetStrength {
            SignetStrength::Full
        }
    }

    fn resolver_in(dir: &std::path::Path) -> DimeResolver {
        DimeResolver::new(Config {
            base_dir: Some(dir.to_path_buf()),
            cache_file: Some(dir.join(".cache")),
            resolver: crate::config::ResolverChoice::Google,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn cached_signet_short_circuits_the_network() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_in(dir.path());

        resolver
            .signets
            .add(
                "alice@darkmail.example",
                0,
                0,
                CachedSignet {
                    name: "alice@darkmail.example".into(),
                    b64: "cGF5bG9hZA".into(),
                },
                true,
                false,
            )
            .unwrap();

        let signet = resolver
            .get_signet(&Passthrough, "alice@darkmail.example", None, true)
            .await
            .unwrap();

        assert_eq!(signet, "cGF5bG9hZA");
    }

    #[test]
    fn signet_cache_persists_across_save_and_load() {
        let dir = tempfile::tempdir().unwrap();

        {
            let resolver = resolver_in(dir.path());
            resolver
                .signets
                .add(
                    "darkmail.example",
                    0,
                    0,
                    CachedSignet {
                        name: "darkmail.example".into(),
                        b64: "b3Jn".into(),
                    },
                    true,
                    false,
                )
                .unwrap();
            resolver.save_cache().unwrap();
        }

        let resolver = resolver_in(dir.path());
        CacheFile::at(dir.path().join(".cache"))
            .load(&resolver.stores())
            .unwrap();

        let cached = resolver.signets.find("darkmail.example").unwrap();
        assert_eq!(cached.payload.b64, "b3Jn");
    }
}
