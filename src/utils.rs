/// Adds a scheme when the user typed a bare host. Local hosts get `http`.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else if is_local(trimmed) {
        format!("http://{}", trimmed)
    } else {
        format!("https://{}", trimmed)
    }
}

fn is_local(host: &str) -> bool {
    host.starts_with("localhost") || host.starts_with("127.") || host.starts_with("[::1]")
}

/// First few characters of a token, for logs.
pub fn token_hint(token: &str) -> String {
    let prefix: String = token.chars().take(6).collect();
    format!("{}…", prefix)
}
