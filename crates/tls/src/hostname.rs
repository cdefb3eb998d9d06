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

use crate::cert::ParsedCert;
use crate::Error;

/// Match a domain name against a certificate name pattern.
///
/// The comparison is case-insensitive. A leading `*.` wildcard covers
/// exactly one additional left label: `*.example.com` matches
/// `a.example.com` but neither `example.com` nor `a.b.example.com`.
#[must_use]
pub fn domain_wildcard_check(pattern: &str, domain: &str) -> bool {
    if pattern.is_empty() || domain.is_empty() {
        return false;
    }

    let pattern = pattern.to_ascii_lowercase();
    let domain = domain.to_ascii_lowercase();

    if pattern == domain {
        return true;
    }

    let Some(suffix) = pattern.strip_prefix("*.") else {
        return false;
    };

    domain
        .split_once('.')
        .map_or(false, |(left, rest)| !left.is_empty() && rest == suffix)
}

/// Check whether the peer certificate was issued for the expected DX
/// hostname: SAN dnsName entries first (delegated to webpki, which also
/// guards against embedded-NUL name poisoning), then the subject CN as a
/// fallback. The CN only applies to certificates carrying no SAN
/// extension at all; a present-but-mismatching SAN is a failure.
pub fn check_hostname(cert: &ParsedCert, host: &str) -> Result<bool, Error> {
    let Ok(dns_name) = webpki::DnsNameRef::try_from_ascii_str(host) else {
        return Err(Error::Certificate {
            with_source: format!("{host:?} is not a valid DNS name"),
        });
    };

    if let Ok(end_entity) = webpki::EndEntityCert::try_from(cert.der()) {
        match end_entity.verify_is_valid_for_dns_name(dns_name) {
            Ok(()) => return Ok(true),
            Err(e) => {
                tracing::debug!(host, %e, "SAN hostname check failed");
            }
        }
    }

    if cert.has_subject_alt_name() {
        return Ok(false);
    }

    Ok(cert
        .common_name()
        .map_or(false, |cn| domain_wildcard_check(&cn, host)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rstest::rstest]
    // exact matches, case-insensitive
    #[case("example.com", "example.com", true)]
    #[case("EXAMPLE.com", "example.COM", true)]
    // wildcard covers exactly one left label
    #[case("*.example.com", "a.example.com", true)]
    #[case("*.example.com", "FOO.example.com", true)]
    #[case("*.example.com", "example.com", false)]
    #[case("*.example.com", "a.b.example.com", false)]
    // wildcard only applies as the leading label
    #[case("a.*.example.com", "a.b.example.com", false)]
    // unrelated names
    #[case("example.com", "example.org", false)]
    #[case("", "example.com", false)]
    #[case("example.com", "", false)]
    fn wildcard_rules(#[case] pattern: &str, #[case] domain: &str, #[case] expected: bool) {
        assert_eq!(domain_wildcard_check(pattern, domain), expected);
    }
}
