/// Normalize a user supplied port: `3333` and `:3333` become `:3333`,
/// a full `host:port` is kept as is.
pub fn normalize_port(port: &str) -> String {
    let port = port.trim();
    if port.is_empty() || port.starts_with(':') {
        port.to_string()
    } else if port.chars().all(|c| c.is_ascii_digit()) {
        format!(":{}", port)
    } else {
        port.to_string()
    }
}

/// Socket address to bind for a normalized port. Bare ports bind on all IPv4 interfaces.
pub fn bind_addr_from_port(port: &str) -> String {
    let port = normalize_port(port);
    if port.starts_with(':') { format!("0.0.0.0{}", port) } else { port }
}
