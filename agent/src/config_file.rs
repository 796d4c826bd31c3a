//! Parses and renders `wg-quick`-style config files. `PUT /config` must
//! replace only the `[Interface]` section and leave existing `[Peer]`
//! blocks byte-identical, so peers are kept as opaque text rather than
//! being modeled and re-serialized.

use wgfleet_proto::wire::InterfaceConfig;

pub struct ParsedConfig {
    pub interface: InterfaceConfig,
    /// Each `[Peer]` section's raw text, including the `[Peer]` header line.
    pub peer_blocks: Vec<String>,
}

pub fn parse(raw: &str) -> ParsedConfig {
    let mut private_key = String::new();
    let mut listen_port = None;
    let mut address = None;
    let mut post_up = None;
    let mut pre_down = None;
    let mut mtu = None;
    let mut dns = None;
    let mut table = None;

    let mut peer_blocks = Vec::new();
    let mut current_peer: Option<Vec<&str>> = None;
    let mut in_interface = false;

    for line in raw.lines() {
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("[Interface]") {
            in_interface = true;
            if let Some(block) = current_peer.take() {
                peer_blocks.push(block.join("\n"));
            }
            continue;
        }
        if trimmed.eq_ignore_ascii_case("[Peer]") {
            in_interface = false;
            if let Some(block) = current_peer.take() {
                peer_blocks.push(block.join("\n"));
            }
            current_peer = Some(vec![line]);
            continue;
        }

        if let Some(block) = current_peer.as_mut() {
            block.push(line);
            continue;
        }

        if in_interface {
            if let Some((key, value)) = split_kv(trimmed) {
                match key.to_ascii_lowercase().as_str() {
                    "privatekey" => private_key = value.to_string(),
                    "listenport" => listen_port = value.parse().ok(),
                    "address" => address = Some(value.to_string()),
                    "postup" => post_up = Some(value.to_string()),
                    "predown" => pre_down = Some(value.to_string()),
                    "mtu" => mtu = value.parse().ok(),
                    "dns" => dns = Some(value.to_string()),
                    "table" => table = Some(value.to_string()),
                    _ => {}
                }
            }
        }
    }

    if let Some(block) = current_peer.take() {
        peer_blocks.push(block.join("\n"));
    }

    ParsedConfig {
        interface: InterfaceConfig {
            private_key,
            listen_port,
            address,
            post_up,
            pre_down,
            mtu,
            dns,
            table,
        },
        peer_blocks,
    }
}

pub fn render(interface: &InterfaceConfig, peer_blocks: &[String]) -> String {
    let mut lines = vec!["[Interface]".to_string()];
    lines.push(format!("PrivateKey = {}", interface.private_key));
    if let Some(port) = interface.listen_port {
        lines.push(format!("ListenPort = {port}"));
    }
    if let Some(address) = &interface.address {
        lines.push(format!("Address = {address}"));
    }
    if let Some(post_up) = &interface.post_up {
        lines.push(format!("PostUp = {post_up}"));
    }
    if let Some(pre_down) = &interface.pre_down {
        lines.push(format!("PreDown = {pre_down}"));
    }
    if let Some(mtu) = interface.mtu {
        lines.push(format!("MTU = {mtu}"));
    }
    if let Some(dns) = &interface.dns {
        lines.push(format!("DNS = {dns}"));
    }
    if let Some(table) = &interface.table {
        lines.push(format!("Table = {table}"));
    }

    let mut out = lines.join("\n");
    out.push('\n');
    for block in peer_blocks {
        out.push('\n');
        out.push_str(block);
        out.push('\n');
    }
    out
}

fn split_kv(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let (k, v) = line.split_once('=')?;
    Some((k.trim(), v.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "[Interface]\nPrivateKey = abc123\nListenPort = 51820\nAddress = 10.0.0.1/24\n\n[Peer]\nPublicKey = peerkey1\nAllowedIPs = 10.0.0.2/32\n\n[Peer]\nPublicKey = peerkey2\nAllowedIPs = 10.0.0.3/32\nPersistentKeepalive = 25\n";

    #[test]
    fn parses_interface_fields() {
        let parsed = parse(SAMPLE);
        assert_eq!(parsed.interface.private_key, "abc123");
        assert_eq!(parsed.interface.listen_port, Some(51820));
        assert_eq!(parsed.interface.address.as_deref(), Some("10.0.0.1/24"));
        assert_eq!(parsed.peer_blocks.len(), 2);
    }

    #[test]
    fn peer_blocks_preserved_verbatim_on_render() {
        let parsed = parse(SAMPLE);
        let mut new_iface = parsed.interface.clone();
        new_iface.listen_port = Some(51821);
        let rendered = render(&new_iface, &parsed.peer_blocks);
        assert!(rendered.contains("ListenPort = 51821"));
        assert!(rendered.contains("PublicKey = peerkey1"));
        assert!(rendered.contains("PublicKey = peerkey2"));
        assert!(rendered.contains("PersistentKeepalive = 25"));
    }

    #[test]
    fn round_trip_preserves_peer_count() {
        let parsed = parse(SAMPLE);
        let rendered = render(&parsed.interface, &parsed.peer_blocks);
        let reparsed = parse(&rendered);
        assert_eq!(reparsed.peer_blocks.len(), 2);
        assert_eq!(reparsed.interface.private_key, "abc123");
    }
}
