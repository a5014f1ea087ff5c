use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // Application-list config file
    pub apps_path: String,

    // Page pool sizing
    pub page_count: usize,
    pub page_bytes: usize,

    // Fleet refresh
    pub fleet_refresh_secs: u64,
    pub hosts: Vec<String>,

    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            apps_path: "applications.conf".to_string(),
            page_count: 32_768,
            page_bytes: 1024,
            fleet_refresh_secs: 60,
            hosts: Vec::new(),
            debug: false,
        }
    }
}

pub fn load_config() -> anyhow::Result<Config> {
    let apps_path = std::env::var("FLEETMON_APPS_PATH")
        .unwrap_or_else(|_| "applications.conf".to_string());

    let page_count = std::env::var("FLEETMON_PAGE_COUNT")
        .unwrap_or_else(|_| "32768".to_string())
        .parse()
        .unwrap_or(32_768);

    let page_bytes = std::env::var("FLEETMON_PAGE_BYTES")
        .unwrap_or_else(|_| "1024".to_string())
        .parse()
        .unwrap_or(1024);

    let fleet_refresh_secs = std::env::var("FLEETMON_FLEET_REFRESH_SECS")
        .unwrap_or_else(|_| "60".to_string())
        .parse()
        .unwrap_or(60);

    let hosts = std::env::var("FLEETMON_HOSTS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default();

    let debug = std::env::var("DEBUG").is_ok();

    anyhow::ensure!(page_count > 0, "FLEETMON_PAGE_COUNT must be positive");
    anyhow::ensure!(page_bytes > 0, "FLEETMON_PAGE_BYTES must be positive");

    Ok(Config {
        apps_path,
        page_count,
        page_bytes,
        fleet_refresh_secs,
        hosts,
        debug,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.apps_path, "applications.conf");
        assert_eq!(cfg.page_count, 32_768);
        assert_eq!(cfg.page_bytes, 1024);
        assert_eq!(cfg.fleet_refresh_secs, 60);
        assert!(cfg.hosts.is_empty());
        assert!(!cfg.debug);
    }

    #[test]
    fn test_load_config_defaults() {
        std::env::remove_var("FLEETMON_FLEET_REFRESH_SECS");

        let cfg = load_config().unwrap();
        assert_eq!(cfg.fleet_refresh_secs, 60);
        assert!(cfg.page_count > 0);
        assert!(cfg.page_bytes > 0);
    }

    #[test]
    fn test_load_config_with_custom_apps_path() {
        std::env::set_var("FLEETMON_APPS_PATH", "/etc/fleetmon/apps.conf");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.apps_path, "/etc/fleetmon/apps.conf");
        std::env::remove_var("FLEETMON_APPS_PATH");
    }

    #[test]
    fn test_load_config_with_pool_sizing() {
        std::env::set_var("FLEETMON_PAGE_COUNT", "128");
        std::env::set_var("FLEETMON_PAGE_BYTES", "4096");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.page_count, 128);
        assert_eq!(cfg.page_bytes, 4096);
        std::env::remove_var("FLEETMON_PAGE_COUNT");
        std::env::remove_var("FLEETMON_PAGE_BYTES");
    }

    #[test]
    fn test_load_config_with_hosts() {
        std::env::set_var("FLEETMON_HOSTS", "h1, h2 ,h3,");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.hosts, vec!["h1", "h2", "h3"]);
        std::env::remove_var("FLEETMON_HOSTS");
    }

    #[test]
    fn test_load_config_with_debug() {
        std::env::set_var("DEBUG", "1");
        let cfg = load_config().unwrap();
        assert!(cfg.debug);
        std::env::remove_var("DEBUG");
    }

    #[test]
    fn test_load_config_parse_error_uses_default() {
        std::env::set_var("FLEETMON_FLEET_REFRESH_SECS", "not_a_number");
        let cfg = load_config().unwrap();
        assert_eq!(cfg.fleet_refresh_secs, 60); // default
        std::env::remove_var("FLEETMON_FLEET_REFRESH_SECS");
    }

    #[test]
    fn test_config_clone_and_debug() {
        let cfg = Config::default();
        let cloned = cfg.clone();
        assert_eq!(cfg.apps_path, cloned.apps_path);
        let debug_str = format!("{:?}", cfg);
        assert!(debug_str.contains("page_count"));
    }
}
