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

use crate::name::normalize_label;
use crate::records::DnssecAlgorithm;
use crate::rrsig::{RrsigInfo, CLASS_IN};
use crate::Error;
use std::net::SocketAddr;
use trust_dns_proto::op::{Edns, Message, MessageType, OpCode, Query, ResponseCode};
use trust_dns_proto::rr::dnssec::rdata::DNSSECRData;
use trust_dns_proto::rr::{DNSClass, Name, RData, Record, RecordType};
use trust_dns_proto::serialize::binary::{BinEncodable, BinEncoder};

/// How long to wait for the resolver before giving up.
const QUERY_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// EDNS0 advertised payload size.
const EDNS_PAYLOAD: u16 = 4096;

/// One answer RR reduced to the fields signature reconstruction needs.
#[derive(Debug, Clone)]
pub struct AnswerRecord {
    /// Owner name, normalized.
    pub name: String,
    /// Record type on the wire.
    pub rtype: u16,
    /// Record class on the wire.
    pub class: u16,
    pub ttl: u32,
    /// Raw rdata bytes.
    pub rdata: Vec<u8>,
}

/// A DNSKEY answer in both parsed and raw form.
#[derive(Debug, Clone)]
pub struct DnskeyAnswer {
    pub owner: String,
    pub ttl: u32,
    pub zone_key: bool,
    pub sep: bool,
    pub algorithm: u8,
    pub public_key: Vec<u8>,
    pub rdata: Vec<u8>,
}

/// A DS answer in parsed form.
#[derive(Debug, Clone)]
pub struct DsAnswer {
    pub owner: String,
    pub ttl: u32,
    pub keytag: u16,
    pub algorithm: u8,
    pub digest_type: u8,
    pub digest: Vec<u8>,
}

/// A TXT answer with its fragments concatenated.
#[derive(Debug, Clone)]
pub struct TxtRecord {
    pub owner: String,
    pub ttl: u32,
    pub text: String,
}

/// An MX answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MxAnswer {
    pub preference: u16,
    pub exchange: String,
}

/// A parsed DNS reply with typed views over the answer section.
#[derive(Debug, Clone, Default)]
pub struct DnsReply {
    /// Raw view of every IN-class answer.
    pub answers: Vec<AnswerRecord>,
    /// RRSIG answers as (owner, parsed rdata).
    pub rrsigs: Vec<(String, RrsigInfo)>,
    pub dnskeys: Vec<DnskeyAnswer>,
    pub ds: Vec<DsAnswer>,
    pub txts: Vec<TxtRecord>,
    pub mx: Vec<MxAnswer>,
    /// Whether the reply carried an EDNS0 OPT RR with the DNSSEC-OK flag.
    pub dnssec_ok: bool,
}

fn raw_rdata(rdata: &RData) -> Result<Vec<u8>, Error> {
    let mut buf = vec![];
    {
        let mut encoder = BinEncoder::new(&mut buf);
        encoder.set_canonical_names(true);
        rdata.emit(&mut encoder)?;
    }

    Ok(buf)
}

impl DnsReply {
    /// Build the typed views from a decoded message.
    pub(crate) fn from_message(message: &Message) -> Result<Self, Error> {
        let mut reply = Self {
            dnssec_ok: message.edns().map_or(false, Edns::dnssec_ok),
            ..Self::default()
        };

        for rr in message.answers() {
            if rr.dns_class() != DNSClass::IN {
                tracing::trace!("skipped over answer with class != IN");
                continue;
            }

            let Some(rdata) = rr.data() else { continue };
            let owner = normalize_label(&rr.name().to_string());

            reply.answers.push(AnswerRecord {
                name: owner.clone(),
                rtype: u16::from(rr.record_type()),
                class: CLASS_IN,
                ttl: rr.ttl(),
                rdata: raw_rdata(rdata)?,
            });

            Self::collect_typed(&mut reply, rr, rdata, owner)?;
        }

        Ok(reply)
    }

    fn collect_typed(
        reply: &mut Self,
        rr: &Record,
        rdata: &RData,
        owner: String,
    ) -> Result<(), Error> {
        match rdata {
            RData::DNSSEC(DNSSECRData::DNSKEY(dnskey)) => {
                reply.dnskeys.push(DnskeyAnswer {
                    owner,
                    ttl: rr.ttl(),
                    zone_key: dnskey.zone_key(),
                    sep: dnskey.secure_entry_point(),
                    algorithm: dnskey.algorithm().into(),
                    public_key: dnskey.public_key().to_vec(),
                    rdata: raw_rdata(rdata)?,
                });
            }
            RData::DNSSEC(DNSSECRData::DS(ds)) => {
                reply.ds.push(DsAnswer {
                    owner,
                    ttl: rr.ttl(),
                    keytag: ds.key_tag(),
                    algorithm: ds.algorithm().into(),
                    digest_type: ds.digest_type().into(),
                    digest: ds.digest().to_vec(),
                });
            }
            RData::DNSSEC(DNSSECRData::RRSIG(sig)) => {
                let algorithm = match DnssecAlgorithm::from_wire(sig.algorithm().into()) {
                    Ok(algorithm) => algorithm,
                    Err(e) => {
                        tracing::debug!(%e, "skipped RRSIG with unsupported algorithm");
                        return Ok(());
                    }
                };

                reply.rrsigs.push((
                    owner,
                    RrsigInfo {
                        covered: u16::from(sig.type_covered()),
                        algorithm,
                        labels: sig.num_labels(),
                        original_ttl: sig.original_ttl(),
                        expiration: sig.sig_expiration(),
                        inception: sig.sig_inception(),
                        keytag: sig.key_tag(),
                        signer: normalize_label(&sig.signer_name().to_string()),
                        signature: sig.sig().to_vec(),
                    },
                ));
            }
            RData::TXT(txt) => {
                let mut text = String::new();

                for fragment in txt.txt_data() {
                    text.push_str(&String::from_utf8_lossy(fragment));
                }

                reply.txts.push(TxtRecord {
                    owner,
                    ttl: rr.ttl(),
                    text,
                });
            }
            RData::MX(mx) => {
                reply.mx.push(MxAnswer {
                    preference: mx.preference(),
                    exchange: normalize_label(&mx.exchange().to_string()),
                });
            }
            _ => {
                tracing::trace!(rtype = ?rr.record_type(), "skipped over answer of uninteresting type");
            }
        }

        Ok(())
    }
}

/// Thin UDP client speaking to one recursive resolver with DNSSEC-OK set
/// on every query.
#[derive(Debug, Clone)]
pub struct DnsClient {
    server: SocketAddr,
}

impl DnsClient {
    /// Use the system resolver configuration.
    pub fn from_system_conf() -> Result<Self, Error> {
        let (config, _) =
            trust_dns_resolver::system_conf::read_system_conf().map_err(|e| Error::Resolver {
                with_source: format!("could not read system resolver configuration: {e}"),
            })?;

        config
            .name_servers()
            .iter()
            .map(|ns| ns.socket_addr)
            .next()
            .map(|server| Self { server })
            .ok_or_else(|| Error::Resolver {
                with_source: "system configuration listed no nameservers".into(),
            })
    }

    /// Google public DNS.
    #[must_use]
    pub fn google() -> Self {
        Self {
            server: SocketAddr::from(([8, 8, 8, 8], 53)),
        }
    }

    /// Cloudflare public DNS.
    #[must_use]
    pub fn cloudflare() -> Self {
        Self {
            server: SocketAddr::from(([1, 1, 1, 1], 53)),
        }
    }

    /// Address this client queries.
    #[must_use]
    pub const fn server(&self) -> SocketAddr {
        self.server
    }

    /// Issue one query and parse the reply into its typed views.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn query(&self, qname: &str, rtype: RecordType) -> Result<DnsReply, Error> {
        let name = Name::from_utf8(qname).map_err(|e| Error::BadName {
            with_source: format!("{qname:?}: {e}"),
        })?;

        let id: u16 = rand::random();

        let mut edns = Edns::new();
        edns.set_max_payload(EDNS_PAYLOAD);
        edns.set_dnssec_ok(true);

        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(Query::query(name, rtype))
            .set_edns(edns);

        let request = message.to_vec()?;

        let socket = tokio::net::UdpSocket::bind(if self.server.is_ipv4() {
            "0.0.0.0:0"
        } else {
            "[::]:0"
        })
        .await?;
        socket.connect(self.server).await?;
        socket.send(&request).await?;

        let mut buf = vec![0u8; usize::from(EDNS_PAYLOAD)];
        let nread = tokio::time::timeout(QUERY_TIMEOUT, socket.recv(&mut buf))
            .await
            .map_err(|_| Error::TimedOut)??;

        let response = Message::from_vec(&buf[..nread])?;

        if response.id() != id {
            return Err(Error::BadReply {
                with_source: "response id did not match the query".into(),
            });
        }

        if response.message_type() != MessageType::Response {
            return Err(Error::BadReply {
                with_source: "received a query instead of a DNS response".into(),
            });
        }

        if response.op_code() != OpCode::Query {
            return Err(Error::BadReply {
                with_source: "DNS response contained unexpected opcode".into(),
            });
        }

        if response.response_code() != ResponseCode::NoError {
            return Err(Error::Resolver {
                with_source: format!(
                    "DNS response rcode indicates an error: {}",
                    response.response_code()
                ),
            });
        }

        DnsReply::from_message(&response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use trust_dns_proto::rr::rdata::{MX, TXT};

    fn answer(name: &str, rtype: RecordType, rdata: RData, ttl: u32) -> Record {
        let mut rr = Record::new();
        rr.set_name(Name::from_utf8(name).unwrap())
            .set_dns_class(DNSClass::IN)
            .set_record_type(rtype)
            .set_ttl(ttl)
            .set_data(Some(rdata));
        rr
    }

    #[test]
    fn txt_fragments_are_concatenated() {
        let mut message = Message::new();
        message.add_answer(answer(
            "_dx.darkmail.example.",
            RecordType::TXT,
            RData::TXT(TXT::new(vec!["ver=1 ".to_owned(), "pol=strict".to_owned()])),
            600,
        ));

        let reply = DnsReply::from_message(&message).unwrap();
        assert_eq!(reply.txts.len(), 1);
        assert_eq!(reply.txts[0].owner, "_dx.darkmail.example");
        assert_eq!(reply.txts[0].text, "ver=1 pol=strict");
        assert_eq!(reply.txts[0].ttl, 600);
        assert!(!reply.dnssec_ok);
    }

    #[test]
    fn mx_answers_are_collected() {
        let mut message = Message::new();
        message.add_answer(answer(
            "darkmail.example.",
            RecordType::MX,
            RData::MX(MX::new(20, Name::from_utf8("mx2.darkmail.example.").unwrap())),
            600,
        ));
        message.add_answer(answer(
            "darkmail.example.",
            RecordType::MX,
            RData::MX(MX::new(10, Name::from_utf8("MX1.darkmail.example.").unwrap())),
            600,
        ));

        let reply = DnsReply::from_message(&message).unwrap();
        assert_eq!(
            reply.mx,
            vec![
                MxAnswer {
                    preference: 20,
                    exchange: "mx2.darkmail.example".into()
                },
                MxAnswer {
                    preference: 10,
                    exchange: "mx1.darkmail.example".into()
                },
            ]
        );
    }

    #[test]
    fn dnssec_ok_reflects_the_opt_do_flag() {
        let mut message = Message::new();
        let mut edns = Edns::new();
        edns.set_dnssec_ok(true);
        message.set_edns(edns);

        assert!(DnsReply::from_message(&message).unwrap().dnssec_ok);
    }

    #[test]
    fn non_in_class_answers_are_dropped() {
        let mut rr = answer(
            "x.example.",
            RecordType::TXT,
            RData::TXT(TXT::new(vec!["t".to_owned()])),
            1,
        );
        rr.set_dns_class(DNSClass::CH);

        let mut message = Message::new();
        message.add_answer(rr);

        let reply = DnsReply::from_message(&message).unwrap();
        assert!(reply.answers.is_empty());
        assert!(reply.txts.is_empty());
    }
}
