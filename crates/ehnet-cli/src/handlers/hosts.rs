//! Hosts command handler

use crate::cli::HostsArgs;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::output::OutputWriter;
use ehnet_core::{DohResolver, HostSource};
use serde::Serialize;
use std::net::IpAddr;
use tracing::instrument;

#[derive(Debug, Serialize)]
struct HostEntry {
    host: String,
    source: String,
    addresses: Vec<IpAddr>,
}

impl HostEntry {
    fn new(host: String, source: HostSource, addresses: Vec<IpAddr>) -> Self {
        let source = match source {
            HostSource::User => "user",
            HostSource::BuiltIn => "built-in",
        };
        Self {
            host,
            source: source.to_string(),
            addresses,
        }
    }
}

/// Handle the hosts command
#[instrument(skip_all, fields(host = ?args.host))]
pub async fn handle_hosts(args: HostsArgs, config: &Config, output: &mut OutputWriter) -> Result<()> {
    if let (Some(choice), Some(host)) = (args.doh, &args.host) {
        let provider = choice.to_provider();
        let resolver = DohResolver::new(provider)?;
        let spinner = output.spinner(&format!("Resolving {host} via {provider}"));
        let resolved = resolver.resolve(host).await;
        if let Some(pb) = spinner {
            pb.finish_and_clear();
        }
        let addresses = resolved?;
        if addresses.is_empty() {
            return Err(Error::other(format!("{provider} returned no addresses for {host}")));
        }
        let entry = HostEntry {
            host: host.to_ascii_lowercase(),
            source: format!("doh:{provider}"),
            addresses,
        };
        return write_entries(vec![entry], output);
    }

    let table = config.transport.fronting_table();
    if !config.transport.fronting.enabled {
        output.warning("Domain fronting is disabled; these addresses are not used")?;
    }

    let entries: Vec<HostEntry> = match &args.host {
        Some(host) => {
            let (source, addresses) = table
                .candidates(host)
                .ok_or_else(|| Error::other(format!("No fronting addresses for {host}")))?;
            vec![HostEntry::new(host.to_ascii_lowercase(), source, addresses)]
        }
        None => table
            .entries()
            .into_iter()
            .map(|(host, (source, addresses))| HostEntry::new(host, source, addresses))
            .collect(),
    };

    write_entries(entries, output)
}

fn write_entries(entries: Vec<HostEntry>, output: &mut OutputWriter) -> Result<()> {
    if !output.is_human() {
        return output.data(&entries);
    }
    if entries.is_empty() {
        output.info("The fronting table is empty")?;
        return Ok(());
    }
    let rows = entries
        .iter()
        .map(|entry| {
            let addresses = entry
                .addresses
                .iter()
                .map(IpAddr::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            vec![entry.host.clone(), entry.source.clone(), addresses]
        })
        .collect();
    output.table(&["HOST", "SOURCE", "ADDRESSES"], rows)
}
