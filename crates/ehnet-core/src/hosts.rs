//! Fronting table: hostname to literal IP
//!
//! The fallback path connects to a known IP of the origin instead of
//! resolving its name. [`StaticFrontingTable`] ships the known addresses of
//! the E-Hentai hosts and accepts user entries, which take precedence.
//! Lookups pick one candidate at random to spread load.

use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::{BTreeMap, HashMap};
use std::net::IpAddr;

/// Hostname to literal-IP lookup used by the fallback selector
pub trait FrontingTable: Send + Sync {
    /// An IP to connect to instead of resolving `host`, if one is known
    fn literal_ip_for(&self, host: &str) -> Option<IpAddr>;
}

const EHGT_IPS: &[&str] = &["37.48.89.44", "81.171.10.48", "178.162.139.24"];
const UPLOAD_IPS: &[&str] = &["94.100.28.57", "94.100.29.73"];

/// Known addresses of the origin family
pub const BUILT_IN_HOSTS: &[(&str, &[&str])] = &[
    ("e-hentai.org", &["104.20.18.168", "104.20.19.168", "172.67.2.238"]),
    ("api.e-hentai.org", EHGT_IPS),
    ("upload.e-hentai.org", UPLOAD_IPS),
    ("forums.e-hentai.org", &["94.100.18.243", "104.20.18.168"]),
    (
        "exhentai.org",
        &[
            "178.175.128.251",
            "178.175.128.252",
            "178.175.128.253",
            "178.175.128.254",
            "178.175.129.251",
            "178.175.129.252",
            "178.175.129.253",
            "178.175.129.254",
            "178.175.132.19",
            "178.175.132.20",
            "178.175.132.21",
            "178.175.132.22",
        ],
    ),
    (
        "s.exhentai.org",
        &[
            "178.175.129.253",
            "178.175.129.254",
            "178.175.128.253",
            "178.175.128.254",
            "178.175.132.21",
            "178.175.132.22",
        ],
    ),
    ("ehgt.org", EHGT_IPS),
    ("gt0.ehgt.org", EHGT_IPS),
    ("gt1.ehgt.org", EHGT_IPS),
    ("gt2.ehgt.org", EHGT_IPS),
    ("gt3.ehgt.org", EHGT_IPS),
    ("upld.e-hentai.org", UPLOAD_IPS),
    ("upld.exhentai.org", &["178.175.132.22", "178.175.128.254"]),
    ("repo.e-hentai.org", UPLOAD_IPS),
    (
        "raw.githubusercontent.com",
        &[
            "185.199.108.133",
            "185.199.109.133",
            "185.199.110.133",
            "185.199.111.133",
        ],
    ),
];

/// Where a host's candidates come from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSource {
    User,
    BuiltIn,
}

/// Built-in hosts plus user overrides
#[derive(Debug, Default)]
pub struct StaticFrontingTable {
    built_in: HashMap<String, Vec<IpAddr>>,
    user: RwLock<HashMap<String, Vec<IpAddr>>>,
}

impl StaticFrontingTable {
    /// A table with the built-in hosts
    pub fn with_builtin() -> Self {
        let built_in = BUILT_IN_HOSTS
            .iter()
            .map(|(host, ips)| {
                let ips = ips.iter().filter_map(|ip| ip.parse().ok()).collect();
                (host.to_string(), ips)
            })
            .collect();
        Self {
            built_in,
            user: RwLock::new(HashMap::new()),
        }
    }

    /// A table with no entries
    pub fn empty() -> Self {
        Self::default()
    }

    /// Add user entries, replacing any previous entry per host
    pub fn with_user_hosts(self, hosts: &BTreeMap<String, Vec<IpAddr>>) -> Self {
        for (host, ips) in hosts {
            self.set_user_host(host, ips.clone());
        }
        self
    }

    pub fn set_user_host(&self, host: &str, ips: Vec<IpAddr>) {
        self.user.write().insert(host.to_ascii_lowercase(), ips);
    }

    pub fn remove_user_host(&self, host: &str) {
        self.user.write().remove(&host.to_ascii_lowercase());
    }

    pub fn clear_user_hosts(&self) {
        self.user.write().clear();
    }

    /// All candidates for a host and where they come from
    pub fn candidates(&self, host: &str) -> Option<(HostSource, Vec<IpAddr>)> {
        let host = host.to_ascii_lowercase();
        if let Some(ips) = self.user.read().get(&host).filter(|ips| !ips.is_empty()) {
            return Some((HostSource::User, ips.clone()));
        }
        self.built_in
            .get(&host)
            .filter(|ips| !ips.is_empty())
            .map(|ips| (HostSource::BuiltIn, ips.clone()))
    }

    /// Every host with candidates, user entries shadowing built-in ones
    pub fn entries(&self) -> BTreeMap<String, (HostSource, Vec<IpAddr>)> {
        let mut entries: BTreeMap<_, _> = self
            .built_in
            .iter()
            .map(|(host, ips)| (host.clone(), (HostSource::BuiltIn, ips.clone())))
            .collect();
        for (host, ips) in self.user.read().iter().filter(|(_, ips)| !ips.is_empty()) {
            entries.insert(host.clone(), (HostSource::User, ips.clone()));
        }
        entries
    }
}

impl FrontingTable for StaticFrontingTable {
    fn literal_ip_for(&self, host: &str) -> Option<IpAddr> {
        let (_, ips) = self.candidates(host)?;
        ips.choose(&mut rand::thread_rng()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_lookup() {
        let table = StaticFrontingTable::with_builtin();
        let ip = table.literal_ip_for("exhentai.org").unwrap();
        assert!(ip.to_string().starts_with("178.175."));
        let (source, ips) = table.candidates("e-hentai.org").unwrap();
        assert_eq!(source, HostSource::BuiltIn);
        assert_eq!(ips.len(), 3);
    }

    #[test]
    fn test_every_builtin_address_parses() {
        let table = StaticFrontingTable::with_builtin();
        for (host, ips) in BUILT_IN_HOSTS {
            let (_, parsed) = table.candidates(host).unwrap();
            assert_eq!(parsed.len(), ips.len(), "{host}");
        }
    }

    #[test]
    fn test_unknown_host() {
        let table = StaticFrontingTable::with_builtin();
        assert_eq!(table.literal_ip_for("example.com"), None);
        assert_eq!(StaticFrontingTable::empty().literal_ip_for("e-hentai.org"), None);
    }

    #[test]
    fn test_user_entries_win() {
        let table = StaticFrontingTable::with_builtin();
        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        table.set_user_host("E-Hentai.org", vec![ip]);
        assert_eq!(table.literal_ip_for("e-hentai.org"), Some(ip));
        assert_eq!(table.entries()["e-hentai.org"].0, HostSource::User);

        table.remove_user_host("e-hentai.org");
        assert_ne!(table.literal_ip_for("e-hentai.org"), Some(ip));
    }

    #[test]
    fn test_empty_user_entry_falls_back_to_builtin() {
        let table = StaticFrontingTable::with_builtin();
        table.set_user_host("ehgt.org", Vec::new());
        let (source, _) = table.candidates("ehgt.org").unwrap();
        assert_eq!(source, HostSource::BuiltIn);
    }

    #[test]
    fn test_with_user_hosts() {
        let mut hosts = BTreeMap::new();
        hosts.insert("example-origin".to_string(), vec!["203.0.113.5".parse().unwrap()]);
        let table = StaticFrontingTable::empty().with_user_hosts(&hosts);
        assert_eq!(
            table.literal_ip_for("example-origin"),
            Some("203.0.113.5".parse().unwrap())
        );
        table.clear_user_hosts();
        assert_eq!(table.literal_ip_for("example-origin"), None);
    }
}
