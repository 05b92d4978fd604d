// ABOUTME: CLI library components for the imlink binary.
// ABOUTME: Address parsing and session construction shared by the subcommands.

//! # imlink-cli
//!
//! ```text
//! imlink
//! ├── chat                # Interactive text session in a room
//! ├── join <room>         # Join a room
//! ├── leave <room>        # Leave a room
//! ├── room-info <room>    # Show room details
//! └── health              # Ask the connected instance for its serving status
//! ```
//!
//! Endpoints come from `--server host:port` or the `[[endpoints]]` list of
//! the config file (`~/.config/imlink/client.toml` by default).

use std::path::Path;

use anyhow::{bail, Context, Result};
use imlink_client::{BalancerKind, Endpoint, FileConfig, Session, SessionConfig, SessionHandler};

/// Parse `host:port` into a single direct-mode endpoint.
pub fn parse_server(server: &str, service_name: &str) -> Result<Endpoint> {
    let trimmed = server
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let (host, port) = trimmed
        .rsplit_once(':')
        .with_context(|| format!("server '{}' must be host:port", server))?;
    if host.is_empty() {
        bail!("server '{}' has no host", server);
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("invalid port in '{}'", server))?;
    Ok(Endpoint::new(trimmed, service_name, host, port))
}

/// Options shared by every subcommand.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub config_path: Option<std::path::PathBuf>,
    pub server: Option<String>,
    pub user_id: Option<String>,
    pub room: Option<String>,
    pub balancer: Option<BalancerKind>,
}

/// Merge the config file (when present) with command-line overrides.
pub fn load_config(opts: &ConnectOptions) -> Result<(SessionConfig, BalancerKind, Vec<Endpoint>)> {
    let file = match &opts.config_path {
        Some(path) => Some(FileConfig::read(Some(path.as_path()))?),
        None => match FileConfig::default_path() {
            Some(path) if Path::new(&path).exists() => Some(FileConfig::read(Some(&path))?),
            _ => None,
        },
    };

    let (mut config, mut balancer, mut endpoints) = match &file {
        Some(file) => (
            file.to_session_config(),
            file.balancer(),
            file.endpoints.clone(),
        ),
        None => (
            SessionConfig::new(opts.user_id.clone().unwrap_or_default()),
            BalancerKind::default(),
            Vec::new(),
        ),
    };

    if let Some(user) = &opts.user_id {
        config.user_id = user.clone();
    }
    if let Some(room) = &opts.room {
        config = config.with_default_room(room.clone());
    }
    if let Some(kind) = opts.balancer {
        balancer = kind;
    }
    if let Some(server) = &opts.server {
        endpoints = vec![parse_server(server, &config.service_name)?];
    }
    if endpoints.is_empty() {
        bail!("no endpoints: pass --server host:port or add [[endpoints]] to the config file");
    }
    config.validate().context("invalid session configuration")?;
    Ok((config, balancer, endpoints))
}

/// Build an unconnected session for `opts`.
pub fn build_session(opts: &ConnectOptions, handler: impl SessionHandler + 'static) -> Result<Session> {
    let (config, balancer, endpoints) = load_config(opts)?;
    tracing::debug!(endpoints = endpoints.len(), balancer = %balancer, "building session");
    let session = Session::builder(config.with_handler(handler))
        .balancer(balancer.build())
        .endpoints(endpoints)
        .build()?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_server() {
        let ep = parse_server("127.0.0.1:9000", "im-service").unwrap();
        assert_eq!(ep.authority(), "127.0.0.1:9000");
        assert_eq!(ep.name, "im-service");

        let ep = parse_server("http://im.local:443", "im-service").unwrap();
        assert_eq!(ep.address, "im.local");
        assert_eq!(ep.port, 443);
    }

    #[test]
    fn test_parse_server_rejects_garbage() {
        assert!(parse_server("no-port", "s").is_err());
        assert!(parse_server(":9000", "s").is_err());
        assert!(parse_server("host:notaport", "s").is_err());
    }

    #[test]
    fn test_load_config_from_flags() {
        let opts = ConnectOptions {
            server: Some("127.0.0.1:9000".to_string()),
            user_id: Some("alice".to_string()),
            room: Some("lobby".to_string()),
            balancer: Some(BalancerKind::Random),
            config_path: Some(std::path::PathBuf::from("/nonexistent/imlink.toml")),
        };
        assert!(load_config(&opts).is_err());

        let opts = ConnectOptions {
            config_path: None,
            ..opts
        };
        // A config file in the real config dir may exist; flags still win.
        if let Ok((config, balancer, endpoints)) = load_config(&opts) {
            assert_eq!(config.user_id, "alice");
            assert_eq!(config.room(), "lobby");
            assert_eq!(balancer, BalancerKind::Random);
            assert_eq!(endpoints.len(), 1);
        }
    }

    #[test]
    fn test_load_config_file_with_user_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[session]\nuser_id = \"from-file\"\n\n[[endpoints]]\nid = \"a\"\naddress = \"10.0.0.1\"\nport = 9000"
        )
        .unwrap();

        let opts = ConnectOptions {
            config_path: Some(file.path().to_path_buf()),
            user_id: Some("from-flag".to_string()),
            ..Default::default()
        };
        let (config, balancer, endpoints) = load_config(&opts).unwrap();
        assert_eq!(config.user_id, "from-flag");
        assert_eq!(balancer, BalancerKind::RoundRobin);
        assert_eq!(endpoints[0].authority(), "10.0.0.1:9000");
    }

    #[test]
    fn test_load_config_requires_user() {
        let opts = ConnectOptions {
            config_path: None,
            server: Some("127.0.0.1:9000".to_string()),
            ..Default::default()
        };
        if FileConfig::default_path().map_or(true, |p| !p.exists()) {
            assert!(load_config(&opts).is_err());
        }
    }
}
