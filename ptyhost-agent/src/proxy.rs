//! Proxy settings forwarded to spawned processes.

const PROXY_VARIABLES: &[&str] = &[
    "http_proxy",
    "https_proxy",
    "ftp_proxy",
    "no_proxy",
    "all_proxy",
];

/// `KEY=VALUE` entries for every proxy variable set in the helper's
/// environment, in lower and upper case.
pub fn discover() -> Vec<String> {
    collect(|key| std::env::var(key).ok())
}

fn collect(lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
    let mut env = Vec::new();
    for name in PROXY_VARIABLES {
        for key in [name.to_string(), name.to_ascii_uppercase()] {
            if let Some(value) = lookup(&key).filter(|v| !v.is_empty()) {
                env.push(format!("{key}={value}"));
            }
        }
    }
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_both_cases() {
        let env = collect(|key| match key {
            "http_proxy" => Some("http://proxy:3128".to_string()),
            "NO_PROXY" => Some("localhost".to_string()),
            "https_proxy" => Some(String::new()),
            _ => None,
        });
        assert_eq!(
            env,
            vec![
                "http_proxy=http://proxy:3128".to_string(),
                "NO_PROXY=localhost".to_string(),
            ]
        );
    }
}
