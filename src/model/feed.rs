use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::IpAddr;

/// A named threat feed. `attack_type` is written into every record the feed produces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feed {
    pub attack_type: String,
    pub url: String,
}

impl Feed {
    pub fn new(attack_type: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            attack_type: attack_type.into(),
            url: url.into(),
        }
    }
}

/// blocklist.de category lists. `all.txt` is left out since it overlaps every other list.
pub fn default_feeds() -> Vec<Feed> {
    [
        ("ssh", "https://lists.blocklist.de/lists/ssh.txt"),
        ("ftp", "https://lists.blocklist.de/lists/ftp.txt"),
        ("apache", "https://lists.blocklist.de/lists/apache.txt"),
        ("imap", "https://lists.blocklist.de/lists/imap.txt"),
        ("sip", "https://lists.blocklist.de/lists/sip.txt"),
        ("bots", "https://lists.blocklist.de/lists/bots.txt"),
        ("strongips", "https://lists.blocklist.de/lists/strongips.txt"),
    ]
    .into_iter()
    .map(|(attack_type, url)| Feed::new(attack_type, url))
    .collect()
}

/// Result of parsing one feed body.
#[derive(Debug, Default, Clone)]
pub struct ParsedFeed {
    pub ips: HashSet<String>,
    /// Non-comment lines that were not IP addresses
    pub rejected: usize,
}

/// Canonical text form of an IP address. Anything that does not parse is
/// returned unchanged.
pub fn canonical_ip(raw: &str) -> String {
    match raw.trim().parse::<IpAddr>() {
        Ok(addr) => addr.to_string(),
        Err(_) => raw.to_string(),
    }
}

/// Parses a newline-delimited IP list.
///
/// Lines are trimmed; blank lines and `#` comments are skipped. Every remaining
/// line must parse as an IP address and is stored in canonical form, so
/// `010.0.0.1`-style or otherwise malformed entries are dropped.
pub fn parse_feed_body(body: &str) -> ParsedFeed {
    let mut parsed = ParsedFeed::default();

    for line in body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match line.parse::<IpAddr>() {
            Ok(addr) => {
                parsed.ips.insert(addr.to_string());
            }
            Err(_) => parsed.rejected += 1,
        }
    }

    parsed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blanks() {
        let body = "# blocklist.de ssh\n\n1.2.3.4\n   \n  5.6.7.8  \n#9.9.9.9\n";
        let parsed = parse_feed_body(body);
        assert_eq!(parsed.ips.len(), 2);
        assert!(parsed.ips.contains("1.2.3.4"));
        assert!(parsed.ips.contains("5.6.7.8"));
        assert_eq!(parsed.rejected, 0);
    }

    #[test]
    fn test_parse_dedups_within_feed() {
        let parsed = parse_feed_body("1.1.1.1\n1.1.1.1\r\n 1.1.1.1\n");
        assert_eq!(parsed.ips.len(), 1);
    }

    #[test]
    fn test_parse_canonicalizes_ipv6() {
        let parsed = parse_feed_body("2001:0db8:0000:0000:0000:0000:0000:0001\n2001:db8::1\n");
        assert_eq!(parsed.ips.len(), 1);
        assert!(parsed.ips.contains("2001:db8::1"));
    }

    #[test]
    fn test_parse_rejects_malformed_lines() {
        let parsed = parse_feed_body("1.2.3.4\nnot-an-ip\n256.1.1.1\n1.2.3\n<html>\n");
        assert_eq!(parsed.ips.len(), 1);
        assert_eq!(parsed.rejected, 4);
    }

    #[test]
    fn test_canonical_ip() {
        assert_eq!(canonical_ip("2001:DB8::1"), "2001:db8::1");
        assert_eq!(canonical_ip("2001:0db8:0000:0000:0000:0000:0000:0001"), "2001:db8::1");
        assert_eq!(canonical_ip("1.2.3.4"), "1.2.3.4");
        assert_eq!(canonical_ip("legacy-key"), "legacy-key");
    }

    #[test]
    fn test_default_feeds() {
        let feeds = default_feeds();
        assert_eq!(feeds.len(), 7);
        assert_eq!(feeds[0].attack_type, "ssh");
        assert!(feeds.iter().all(|f| f.url.starts_with("https://lists.blocklist.de/")));
    }
}
