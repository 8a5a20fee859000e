use uuid::Uuid;

/// Fresh per-launch API key handed to the daemon.
pub fn generate_api_key() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Base URL for a `host:port` GUI address; addresses that already carry a scheme are kept.
pub fn base_url_for(address: &str) -> String {
    let trimmed = address.trim().trim_end_matches('/');
    if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_keys_are_unique_and_url_safe() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[test]
    fn base_url_adds_scheme() {
        assert_eq!(base_url_for("127.0.0.1:8384"), "http://127.0.0.1:8384");
        assert_eq!(base_url_for("https://127.0.0.1:8384/"), "https://127.0.0.1:8384");
    }
}
