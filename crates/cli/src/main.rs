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

//! `vdime`: command-line front-end over the signet resolver for
//! inspecting DIME management records, delivery routing and the object
//! cache.

use clap::{Parser, Subcommand};
use vdime_resolver::{Config, DimeResolver, ResolverChoice};

#[derive(Debug, Parser)]
#[command(name = "vdime", about = "DIME trust and resolution client", version)]
struct Cli {
    /// Override the DIME user directory (default ~/.dime).
    #[arg(long, global = true)]
    base_dir: Option<std::path::PathBuf>,

    /// Recursive resolver to query (system, google, cloudflare).
    #[arg(long, global = true, default_value = "system")]
    resolver: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch and display a domain's DIME management record.
    Record {
        /// The dark domain to query.
        domain: String,

        /// Bypass the object cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Show the MX hosts a domain's mail routes through.
    Mx {
        domain: String,
    },

    /// Fetch a raw TXT record with its DNSSEC outcome.
    Txt {
        qname: String,
    },

    /// List the live contents of every cache store.
    DumpCache,

    /// Persist the current cache contents to disk.
    SaveCache,
}

fn resolver_choice(name: &str) -> ResolverChoice {
    match name {
        "google" => ResolverChoice::Google,
        "cloudflare" => ResolverChoice::Cloudflare,
        _ => ResolverChoice::System,
    }
}

fn print_record(record: &vdime_mrec::DimeRecord) {
    println!("version   : {}", record.version);

    for (i, pok) in record.pok.iter().enumerate() {
        let hex: String = pok.iter().map(|b| format!("{b:02x}")).collect();
        println!("pok       : {hex} [{}]", i + 1);
    }

    println!("tls sigs  : {}", record.tls_sigs.len());
    println!("policy    : {}", record.policy);

    match &record.syndicates {
        Some(syndicates) => println!("syndicates: {syndicates}"),
        None => println!("syndicates: [not present]"),
    }

    for (i, dx) in record.dx.iter().enumerate() {
        println!("dx        : {dx} [{}]", i + 1);
    }

    match record.expiry_days {
        Some(days) => println!("expiry    : {days} days"),
        None => println!("expiry    : [not present]"),
    }

    println!("subdomain : {}", record.subdomain);

    match record.validated {
        vdime_dns::DnssecState::Validated => {
            println!("dnssec    : record WAS retrieved with a valid DNSSEC signature");
        }
        vdime_dns::DnssecState::Unsigned => {
            println!("dnssec    : record was NOT retrieved in a DNSSEC-protected response");
        }
        vdime_dns::DnssecState::SignatureFailed => {
            println!("dnssec    : record was retrieved with an INVALID DNSSEC signature");
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config {
        base_dir: cli.base_dir,
        cache_file: None,
        resolver: resolver_choice(&cli.resolver),
    };

    let resolver = DimeResolver::new(config)?;
    resolver.bootstrap()?;

    match cli.command {
        Command::Record { domain, no_cache } => {
            let record = resolver.get_dime_record(&domain, !no_cache).await?;
            print_record(&record);
            resolver.save_cache()?;
        }
        Command::Mx { domain } => {
            for mx in resolver.dns.get_mx_records(&domain).await? {
                println!("{:>5} {}", mx.preference, mx.exchange);
            }
        }
        Command::Txt { qname } => {
            let answer = resolver.dns.get_txt_record(&qname).await?;
            println!("{}", answer.text);
            eprintln!("ttl = {}, dnssec = {:?}", answer.ttl, answer.state);
        }
        Command::DumpCache => {
            for kind in vdime_cache::DataKind::ALL {
                let (name, entries) = match kind {
                    vdime_cache::DataKind::DimeRecord => {
                        (resolver.records.store.description(), resolver.records.store.dump())
                    }
                    vdime_cache::DataKind::Dnskey => {
                        (resolver.dns.dnskeys.description(), resolver.dns.dnskeys.dump())
                    }
                    vdime_cache::DataKind::Ds => {
                        (resolver.dns.ds.description(), resolver.dns.ds.dump())
                    }
                    vdime_cache::DataKind::Ocsp => {
                        (resolver.ocsp.store.description(), resolver.ocsp.store.dump())
                    }
                    vdime_cache::DataKind::Signet => {
                        (resolver.signets.description(), resolver.signets.dump())
                    }
                };

                println!("--- {name}: {} entries", entries.len());

                for entry in entries {
                    println!("    {entry}");
                }
            }
        }
        Command::SaveCache => {
            resolver.save_cache()?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        // Print the whole error chain, outermost first.
        eprintln!("Error: {e}");

        let mut source = e.source();
        while let Some(cause) = source {
            eprintln!("  caused by: {cause}");
            source = cause.source();
        }

        std::process::exit(1);
    }
}
