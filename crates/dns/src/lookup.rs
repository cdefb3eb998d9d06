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

use crate::anchor;
use crate::client::{DnsClient, DnsReply, DnskeyAnswer, MxAnswer};
use crate::name::{is_root_label, normalize_label};
use crate::records::{
    compute_dnskey_digest, keytag, rsa_from_dnskey, DigestType, DnskeyRecord, DnssecAlgorithm,
    DsRecord, DNSKEY_PROTOCOL,
};
use crate::rrsig::{verify_rrsig, RrsigInfo};
use crate::{DnssecState, Error};
use std::collections::HashSet;
use trust_dns_proto::rr::RecordType;
use vdime_cache::{CacheId, Store};

/// A TXT lookup result: the concatenated fragments of the first matching
/// record, its TTL, and the DNSSEC outcome of the reply.
#[derive(Debug, Clone)]
pub struct TxtAnswer {
    pub text: String,
    pub ttl: u32,
    pub state: DnssecState,
}

/// An MX host in preference order.
pub type MxHost = MxAnswer;

/// DNS lookup front-end owning the DNSKEY and DS object cache stores and
/// proving record authenticity from the configured trust anchors.
#[derive(Debug)]
pub struct DnsResolver {
    client: DnsClient,
    /// Internal store: entries are shared, not deep-copied.
    pub dnskeys: Store<DnskeyRecord>,
    /// Internal store: entries are shared, not deep-copied.
    pub ds: Store<DsRecord>,
}

impl DnsResolver {
    #[must_use]
    pub fn new(client: DnsClient) -> Self {
        Self {
            client,
            dnskeys: Store::new(),
            ds: Store::new(),
        }
    }

    /// Load the trust anchor file. Every entry is added to the DNSKEY
    /// store already validated; at least one root entry must be present.
    pub fn load_anchor_file(&self, path: &std::path::Path) -> Result<usize, Error> {
        let contents = std::fs::read_to_string(path).map_err(|e| Error::Anchor {
            with_source: format!("could not load root key config file {}: {e}", path.display()),
        })?;

        let entries = anchor::parse_anchor_file(&contents)?;
        let mut loaded = 0;

        for entry in entries {
            let mut rdata = vec![];
            rdata.extend_from_slice(&entry.flags.to_be_bytes());
            rdata.push(DNSKEY_PROTOCOL);
            rdata.push(entry.algorithm);
            rdata.extend_from_slice(&entry.keydata);

            let record = DnskeyRecord {
                label: normalize_label(&entry.label),
                algorithm: DnssecAlgorithm::from_wire(entry.algorithm)?,
                zone_key: entry.flags & crate::records::DNSKEY_FLAG_ZONE != 0,
                sep: entry.flags & crate::records::DNSKEY_FLAG_SEP != 0,
                pubkey: rsa_from_dnskey(&entry.keydata).map_err(|e| Error::Anchor {
                    with_source: format!("failed to extract public key from DNSKEY RR: {e}"),
                })?,
                keytag: keytag(&rdata),
                rdata,
                signkeys: vec![],
                ds: vec![],
                validated: true,
                do_cache: false,
            };

            if !record.zone_key {
                return Err(Error::Anchor {
                    with_source: "DNSKEY without zone bit cannot be used to verify RRSIGs".into(),
                });
            }

            let name = DnskeyRecord::cache_name(&record.label, record.keytag);
            let key = (record.label.clone(), record.keytag);
            // Anchors have unlimited TTL and never persist to the cache
            // file; a clashing cached key is overshadowed.
            self.dnskeys.add_by_forced(
                &name,
                &key,
                |k, (label, tag)| k.matches(label, *tag),
                0,
                0,
                record,
                false,
                false,
            );
            loaded += 1;
        }

        if !self.dnskeys.exists_by(".", |k, label| k.label == *label) {
            return Err(Error::Anchor {
                with_source: "config file did not contain any root DNSKEY entries".into(),
            });
        }

        Ok(loaded)
    }

    /// Insert a DNSKEY answer into the store, returning its id. A key that
    /// is already cached (same owner + keytag) is returned as-is.
    fn add_dnskey_answer(&self, answer: &DnskeyAnswer) -> Result<CacheId, Error> {
        // A key without the zone bit cannot verify RRSIGs over RRSETs.
        if !answer.zone_key {
            return Err(Error::Verification {
                with_source: "DNSKEY without zone bit cannot be used to verify RRSIGs".into(),
            });
        }

        let record = DnskeyRecord {
            label: answer.owner.clone(),
            algorithm: DnssecAlgorithm::from_wire(answer.algorithm)?,
            zone_key: answer.zone_key,
            sep: answer.sep,
            pubkey: rsa_from_dnskey(&answer.public_key)?,
            keytag: keytag(&answer.rdata),
            rdata: answer.rdata.clone(),
            signkeys: vec![],
            ds: vec![],
            validated: false,
            do_cache: true,
        };

        let name = DnskeyRecord::cache_name(&record.label, record.keytag);
        let key = (record.label.clone(), record.keytag);

        match self.dnskeys.add_by(
            &name,
            &key,
            |k, (label, tag)| k.matches(label, *tag),
            u64::from(answer.ttl),
            0,
            record,
            false,
            false,
        ) {
            Ok(id) => Ok(id),
            Err(vdime_cache::Error::AlreadyCached) => self
                .dnskeys
                .find_id_by(&key, |k, (label, tag)| k.matches(label, *tag))
                .ok_or_else(|| Error::Verification {
                    with_source: "clashing DNSKEY entry disappeared from the cache".into(),
                }),
            Err(e) => Err(e.into()),
        }
    }

    /// Find a DNSKEY id by keytag and signer name, optionally performing a
    /// live DNSKEY + DS lookup toward the root when it is not cached.
    pub async fn get_dnskey_id(
        &self,
        tag: u16,
        signer: &str,
        force_lookup: bool,
    ) -> Option<CacheId> {
        let key = (normalize_label(signer), tag);

        if let Some(id) = self
            .dnskeys
            .find_id_by(&key, |k, (label, tag)| k.matches(label, *tag))
        {
            return Some(id);
        }

        if force_lookup {
            if is_root_label(signer) {
                tracing::debug!("stopped lookup chain; hit root");
                return None;
            }

            tracing::debug!(signer, "could not find key for signer, looking it up");

            // Boxed: the lookups recurse back into this function while
            // walking toward the root.
            if let Err(e) = Box::pin(self.lookup_dnskey(signer)).await {
                tracing::warn!(signer, %e, "DNSKEY lookup failed");
            }

            if let Err(e) = Box::pin(self.lookup_ds(signer)).await {
                tracing::warn!(signer, %e, "DS lookup failed");
            }

            return Box::pin(self.get_dnskey_id(tag, signer, false)).await;
        }

        None
    }

    /// Verify one RRSIG over the matching RRSET of a reply, locating (and
    /// if necessary fetching) the signing key. Returns the signing key id.
    pub async fn validate_rrsig(
        &self,
        owner: &str,
        reply: &DnsReply,
        covered: u16,
        rrsig: &RrsigInfo,
    ) -> Result<CacheId, Error> {
        if rrsig.covered != covered {
            return Err(Error::Verification {
                with_source: format!(
                    "RRSIG record did not cover the right resource type {{got {}, expected {covered}}}",
                    rrsig.covered
                ),
            });
        }

        let signing_id = self
            .get_dnskey_id(rrsig.keytag, &rrsig.signer, true)
            .await
            .ok_or_else(|| Error::Verification {
                with_source: format!(
                    "could not locate signing key {} for signing name: {}",
                    rrsig.keytag, rrsig.signer
                ),
            })?;

        let signing_key = self
            .dnskeys
            .with(&signing_id, DnskeyRecord::clone)
            .ok_or_else(|| Error::Verification {
                with_source: "signing key disappeared from the cache".into(),
            })?;

        if verify_rrsig(owner, rrsig, &reply.answers, &signing_key)? {
            Ok(signing_id)
        } else {
            Err(Error::Verification {
                with_source: format!(
                    "signature did not verify (signed = {owner}, keytag = {}, covered = {covered})",
                    rrsig.keytag
                ),
            })
        }
    }

    /// Query and cache the DNSKEY RRSET of a zone, verifying the RRSIGs in
    /// the same reply and linking every key to its verified signer.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn lookup_dnskey(&self, label: &str) -> Result<(), Error> {
        let reply = self.client.query(label, RecordType::DNSKEY).await?;

        let mut added = vec![];

        for answer in &reply.dnskeys {
            match self.add_dnskey_answer(answer) {
                Ok(id) => added.push(id),
                Err(e) => tracing::warn!(%e, "error adding DNSKEY entry for RRSIG verification"),
            }
        }

        if added.is_empty() {
            return Err(Error::NoRecords);
        }

        // The RRSIG covers the whole RRSET, so a single verified signature
        // vouches for every key collected above.
        for (owner, rrsig) in &reply.rrsigs {
            if rrsig.covered != u16::from(RecordType::DNSKEY) {
                continue;
            }

            match self
                .validate_rrsig(owner, &reply, u16::from(RecordType::DNSKEY), rrsig)
                .await
            {
                Ok(signing_id) => {
                    for id in &added {
                        self.dnskeys.update(id, |k| {
                            if !k.signkeys.contains(&signing_id) {
                                k.signkeys.push(signing_id);
                            }
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(%e, "could not validate RRSIG over DNSKEY record");
                }
            }
        }

        self.fixup_validation();

        Ok(())
    }

    /// Query and cache the DS RRSET of a zone, linking each DS to the
    /// DNSKEY it covers (after comparing digests) and to its RRSIG signer.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn lookup_ds(&self, label: &str) -> Result<(), Error> {
        let reply = self.client.query(label, RecordType::DS).await?;

        let mut added = vec![];

        for answer in &reply.ds {
            let algorithm = match DnssecAlgorithm::from_wire(answer.algorithm) {
                Ok(algorithm) => algorithm,
                Err(e) => {
                    tracing::debug!(%e, "skipped over DS record with unsupported algorithm");
                    continue;
                }
            };

            let digest_type = match DigestType::from_wire(answer.digest_type) {
                Ok(digest_type) => digest_type,
                Err(e) => {
                    tracing::debug!(%e, "skipped over DS record with unsupported digest type");
                    continue;
                }
            };

            // The digest must be exactly as long as its type demands.
            if answer.digest.len() != digest_type.digest_len() {
                tracing::warn!(
                    owner = answer.owner,
                    "DS record contained a digest of unexpected length"
                );
                continue;
            }

            let record = DsRecord {
                label: answer.owner.clone(),
                keytag: answer.keytag,
                algorithm,
                digest_type,
                digest: answer.digest.clone(),
                signkeys: vec![],
            };

            let name = DsRecord::cache_name(
                &record.label,
                record.keytag,
                algorithm.to_wire(),
                digest_type.to_wire(),
            );

            let ds_id = match self.ds.add_by(
                &name,
                &record.clone(),
                |existing, key| existing.matches(key),
                u64::from(answer.ttl),
                0,
                record,
                true,
                false,
            ) {
                Ok(id) => id,
                Err(vdime_cache::Error::AlreadyCached) => {
                    tracing::debug!(owner = answer.owner, "DS record was already cached");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            added.push(ds_id);

            // Link the DS to the DNSKEY it covers, if that key is cached.
            if let Some(key_id) = self.get_dnskey_id(answer.keytag, &answer.owner, false).await {
                let digest = self
                    .dnskeys
                    .with(&key_id, |k| compute_dnskey_digest(k, digest_type))
                    .transpose()?;

                if digest.as_deref() == Some(&answer.digest[..]) {
                    self.dnskeys.update(&key_id, |k| {
                        if !k.ds.contains(&ds_id) {
                            k.ds.push(ds_id);
                        }
                    });
                } else {
                    tracing::warn!(
                        owner = answer.owner,
                        keytag = answer.keytag,
                        "DNSKEY hash provided by this DS record did not match"
                    );
                }
            }
        }

        if added.is_empty() {
            return Err(Error::NoRecords);
        }

        for (owner, rrsig) in &reply.rrsigs {
            if rrsig.covered != u16::from(RecordType::DS) {
                continue;
            }

            match self
                .validate_rrsig(owner, &reply, u16::from(RecordType::DS), rrsig)
                .await
            {
                Ok(signing_id) => {
                    for id in &added {
                        self.ds.update(id, |ds| {
                            if !ds.signkeys.contains(&signing_id) {
                                ds.signkeys.push(signing_id);
                            }
                        });
                    }
                }
                Err(e) => {
                    tracing::warn!(%e, "could not validate RRSIG over DS record");
                }
            }
        }

        self.fixup_validation();

        Ok(())
    }

    fn key_facts(&self, id: &CacheId) -> Option<(bool, String, Vec<CacheId>, Vec<CacheId>)> {
        self.dnskeys.with(id, |k| {
            (k.validated, k.label.clone(), k.signkeys.clone(), k.ds.clone())
        })
    }

    fn ds_signers(&self, id: &CacheId) -> Vec<CacheId> {
        self.ds.with(id, |ds| ds.signkeys.clone()).unwrap_or_default()
    }

    fn validated_inner(&self, id: &CacheId, visited: &mut HashSet<CacheId>) -> bool {
        if !visited.insert(*id) {
            return false;
        }

        let Some((validated, label, signkeys, ds_ids)) = self.key_facts(id) else {
            return false;
        };

        if validated {
            return true;
        }

        // Root keys are the end of the line for the recursion.
        if is_root_label(&label) {
            return false;
        }

        // A DS covering this key, or covering one of its signers, must
        // itself be signed by a transitively validated key.
        let candidate_ds = ds_ids.into_iter().chain(
            signkeys
                .iter()
                .flat_map(|sk| self.key_facts(sk).map(|(_, _, _, ds)| ds).unwrap_or_default()),
        );

        for ds_id in candidate_ds {
            for signer in self.ds_signers(&ds_id) {
                if self.validated_inner(&signer, visited) {
                    self.dnskeys.update(id, |k| k.validated = true);
                    return true;
                }
            }
        }

        false
    }

    /// Trace a DNSKEY through its DS entries back to a trust anchor.
    #[must_use]
    pub fn is_validated_key(&self, id: &CacheId) -> bool {
        self.validated_inner(id, &mut HashSet::new())
    }

    /// Re-evaluate transitive validation for every cached DNSKEY: a newly
    /// retrieved key can validate older cache entries by transitivity.
    /// Validated cacheable keys become persistent; unvalidated keys never
    /// persist.
    pub fn fixup_validation(&self) {
        let decisions: Vec<(CacheId, bool)> = self
            .dnskeys
            .ids()
            .into_iter()
            .map(|id| {
                let valid = self.is_validated_key(&id);
                (id, valid)
            })
            .collect();

        self.dnskeys.update_each(|id, key, persists| {
            let Some((_, valid)) = decisions.iter().find(|(did, _)| did == id) else {
                return;
            };

            if *valid {
                key.validated = true;

                if key.do_cache {
                    *persists = true;
                }
            } else {
                *persists = false;
            }
        });
    }

    /// Retrieve a TXT record with its DNSSEC outcome. The reply is only
    /// considered DNSSEC-protected when the OPT RR carried the DNSSEC-OK
    /// flag and at least one RRSIG covering TXT was present and verified.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn get_txt_record(&self, qname: &str) -> Result<TxtAnswer, Error> {
        let reply = self.client.query(qname, RecordType::TXT).await?;

        if reply.answers.is_empty() {
            return Err(Error::NoRecords);
        }

        let mut state = DnssecState::Unsigned;

        for (owner, rrsig) in &reply.rrsigs {
            if rrsig.covered != u16::from(RecordType::TXT) {
                continue;
            }

            match self
                .validate_rrsig(owner, &reply, u16::from(RecordType::TXT), rrsig)
                .await
            {
                Ok(signing_id) => {
                    // The key that verified may still lack a chain of
                    // custody to the root.
                    state = if self.is_validated_key(&signing_id) {
                        DnssecState::Validated
                    } else {
                        DnssecState::SignatureFailed
                    };

                    self.fixup_validation();
                }
                Err(e) => {
                    tracing::warn!(%e, "could not validate RRSIG over TXT record");
                    state = DnssecState::SignatureFailed;
                }
            }
        }

        // An RRSIG without the DNSSEC-OK flag in the reply is not proof of
        // anything; the outcome downgrades to unsigned.
        if !reply.dnssec_ok && state != DnssecState::Unsigned {
            tracing::debug!("received RRSIG response without DNSSEC flag, discarding validation");
            state = DnssecState::Unsigned;
        }

        let wanted = normalize_label(qname);

        reply
            .txts
            .iter()
            .find(|txt| txt.owner == wanted)
            .map(|txt| TxtAnswer {
                text: txt.text.clone(),
                ttl: txt.ttl,
                state,
            })
            .ok_or(Error::NoRecords)
    }

    /// Retrieve the MX records of a domain in preference order.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn get_mx_records(&self, domain: &str) -> Result<Vec<MxHost>, Error> {
        let reply = self.client.query(domain, RecordType::MX).await?;

        let mut hosts = reply.mx;

        if hosts.is_empty() {
            return Err(Error::NoRecords);
        }

        hosts.sort_by_key(|mx| mx.preference);

        Ok(hosts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::tests::{dnskey_rdata, small_keydata};
    use crate::records::{DNSKEY_FLAG_SEP, DNSKEY_FLAG_ZONE};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn resolver() -> DnsResolver {
        DnsResolver::new(DnsClient::google())
    }

    fn anchor_file(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
        file
    }

    fn root_anchor_line() -> String {
        format!(
            ". initial-key 257 3 8 \"{}\" ;",
            STANDARD.encode(small_keydata())
        )
    }

    #[test]
    fn anchor_entries_load_validated() {
        let resolver = resolver();
        let file = anchor_file(&["# root key".to_owned(), root_anchor_line()]);

        assert_eq!(resolver.load_anchor_file(file.path()).unwrap(), 1);

        let id = resolver
            .dnskeys
            .find_id_by(".", |k, label| k.label == *label)
            .unwrap();
        assert!(resolver.dnskeys.with(&id, |k| k.validated).unwrap());
        assert!(resolver.is_validated_key(&id));
    }

    #[test]
    fn anchor_file_without_root_entry_is_fatal() {
        let resolver = resolver();
        let file = anchor_file(&[format!(
            "example.com initial-key 256 3 8 \"{}\" ;",
            STANDARD.encode(small_keydata())
        )]);

        assert!(resolver.load_anchor_file(file.path()).is_err());
    }

    fn insert_key(resolver: &DnsResolver, label: &str, validated: bool) -> CacheId {
        let rdata = dnskey_rdata(DNSKEY_FLAG_ZONE | DNSKEY_FLAG_SEP, 8, &small_keydata());
        let record = DnskeyRecord {
            label: label.to_owned(),
            algorithm: DnssecAlgorithm::RsaSha256,
            zone_key: true,
            sep: true,
            pubkey: rsa_from_dnskey(&small_keydata()).unwrap(),
            keytag: keytag(&rdata),
            rdata,
            signkeys: vec![],
            ds: vec![],
            validated,
            do_cache: true,
        };

        let name = format!("{label}-{}", record.keytag);
        resolver
            .dnskeys
            .add_forced(&name, 0, 0, record, false, false)
    }

    fn insert_ds(resolver: &DnsResolver, label: &str, signer: CacheId) -> CacheId {
        let record = DsRecord {
            label: label.to_owned(),
            keytag: 7,
            algorithm: DnssecAlgorithm::RsaSha256,
            digest_type: DigestType::Sha256,
            digest: vec![1; 32],
            signkeys: vec![signer],
        };

        resolver
            .ds
            .add_forced(&format!("{label}-ds"), 0, 0, record, true, false)
    }

    #[test]
    fn transitive_validation_walks_ds_links() {
        let resolver = resolver();

        // root key (anchor) -> DS for example.com -> zone key.
        let root = insert_key(&resolver, ".", true);
        let ds = insert_ds(&resolver, "example.com", root);
        let zone = insert_key(&resolver, "example.com", false);

        // Not yet linked: no chain of custody.
        assert!(!resolver.is_validated_key(&zone));

        resolver.dnskeys.update(&zone, |k| k.ds.push(ds));
        assert!(resolver.is_validated_key(&zone));

        // The walk memoizes its success into the validated flag.
        assert!(resolver.dnskeys.with(&zone, |k| k.validated).unwrap());
    }

    #[test]
    fn validation_walk_survives_reference_cycles() {
        let resolver = resolver();

        let a = insert_key(&resolver, "a.example", false);
        let b = insert_key(&resolver, "b.example", false);
        let ds_a = insert_ds(&resolver, "a.example", b);
        let ds_b = insert_ds(&resolver, "b.example", a);

        resolver.dnskeys.update(&a, |k| k.ds.push(ds_a));
        resolver.dnskeys.update(&b, |k| k.ds.push(ds_b));

        // A cycle with no anchor anywhere terminates and fails closed.
        assert!(!resolver.is_validated_key(&a));
        assert!(!resolver.is_validated_key(&b));
    }

    #[test]
    fn fixup_marks_validated_cacheable_keys_persistent() {
        let resolver = resolver();

        let root = insert_key(&resolver, ".", true);
        let ds = insert_ds(&resolver, "example.com", root);
        let zone = insert_key(&resolver, "example.com", false);
        resolver.dnskeys.update(&zone, |k| k.ds.push(ds));

        resolver.fixup_validation();

        let mut persists_of_zone = None;
        resolver.dnskeys.update_each(|id, _, persists| {
            if *id == zone {
                persists_of_zone = Some(*persists);
            }
        });
        assert_eq!(persists_of_zone, Some(true));
    }
}
