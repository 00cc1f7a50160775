use std::env;

pub const BIND_ADDR_VAR: &str = "CODEROOM_BIND_ADDR";
pub const ENFORCE_RULES_VAR: &str = "CODEROOM_ENFORCE_RULES";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// Whether the store checks writes against workspace permissions. On unless turned off.
    pub enforce_rules: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8080".into(),
            enforce_rules: true,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_vars(|name| env::var(name).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(addr) = var(BIND_ADDR_VAR).filter(|a| !a.trim().is_empty()) {
            config.bind_addr = addr.trim().to_owned();
        }
        if let Some(flag) = var(ENFORCE_RULES_VAR) {
            match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" | "" => config.enforce_rules = true,
                "0" | "false" | "no" | "off" => {
                    log::warn!("Store access rules are off; any client may write anything");
                    config.enforce_rules = false
                }
                other => log::warn!("Ignoring {}={:?}", ENFORCE_RULES_VAR, other),
            }
        }
        config
    }
}
