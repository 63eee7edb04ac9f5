use std::net::SocketAddr;

/// Overrides `-f` when set
const LIVENESS_CONFIG: &str = "LIVENESS_CONFIG";

pub fn get_config_path() -> Option<String> {
    std::env::var(LIVENESS_CONFIG).ok().filter(|path| !path.is_empty())
}

/// Overrides `api.bind` from the config file
const LIVENESS_API_ADDR: &str = "LIVENESS_API_ADDR";

pub fn get_api_addr() -> Option<SocketAddr> {
    let addr_from_env = std::env::var(LIVENESS_API_ADDR).ok()?;
    addr_from_env.parse().ok()
}

