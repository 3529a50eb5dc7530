use std::env;
use std::sync::OnceLock;

static AXLE_HOST_EXEC: OnceLock<bool> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn host_exec_enabled() -> bool {
    *AXLE_HOST_EXEC.get_or_init(|| match env::var("AXLE_HOST_EXEC") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}
