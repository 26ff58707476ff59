// file: src/kubeconfig.rs
// version: 1.0.1
// guid: c0a83f5e-6d21-47b9-9f4e-8e1b2d7a3c60

//! Access-credential rewriting

use regex::Regex;
use std::sync::OnceLock;

fn loopback_server() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(\s*server:\s*https?://)(?:127\.0\.0\.1|localhost|\[::1\])(:\d+)?(/|\s|$)")
            .expect("static regex is valid")
    })
}

/// Point every loopback `server:` entry at `address`, keeping scheme and port.
///
/// Node-issued client configs address the API server as `127.0.0.1`, which only
/// works on the node itself.
pub fn rewrite_loopback(raw: &str, address: &str) -> String {
    let host = if address.contains(':') && !address.starts_with('[') {
        format!("[{}]", address)
    } else {
        address.to_string()
    };
    loopback_server()
        .replace_all(raw, |caps: &regex::Captures| {
            format!(
                "{}{}{}{}",
                &caps[1],
                host,
                caps.get(2).map_or("", |m| m.as_str()),
                &caps[3]
            )
        })
        .into_owned()
}
