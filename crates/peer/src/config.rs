use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use tether::SessionConfig;

/// Settings file layout: the session table plus the peer's own knobs.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PeerConfig {
    pub session: SessionConfig,
    pub peer: PeerSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PeerSettings {
    /// Seconds between chat broadcasts. Zero disables them.
    pub chat_interval_secs: f32,
    /// Seconds between connection statistics reports.
    pub stats_interval_secs: f32,
    /// Milliseconds to sleep between session updates.
    pub tick_ms: u64,
}

impl Default for PeerSettings {
    fn default() -> Self {
        Self {
            chat_interval_secs: 2.0,
            stats_interval_secs: 5.0,
            tick_ms: 5,
        }
    }
}

impl PeerConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let config: PeerConfig =
            toml::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let mut errors = self.session.validate();
        if !(self.peer.chat_interval_secs.is_finite() && self.peer.chat_interval_secs >= 0.0) {
            errors.push("Chat interval must be a non-negative number of seconds".to_string());
        }
        if !(self.peer.stats_interval_secs.is_finite() && self.peer.stats_interval_secs > 0.0) {
            errors.push("Stats interval must be a positive number of seconds".to_string());
        }
        if errors.is_empty() {
            Ok(())
        } else {
            bail!("invalid configuration:\n  {}", errors.join("\n  "))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: PeerConfig = toml::from_str(
            r#"
            [session]
            network_id = "alice"
            port = 30000

            [session.simulation]
            loss_fraction = 0.1
            max_latency_ms = 80

            [peer]
            chat_interval_secs = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.session.network_id, "alice");
        assert_eq!(config.session.port, 30000);
        assert_eq!(config.session.port_range, SessionConfig::default().port_range);
        assert_eq!(config.session.simulation.loss_fraction, 0.1);
        assert_eq!(config.session.simulation.max_latency_ms, 80);
        assert_eq!(config.peer.chat_interval_secs, 0.5);
        assert_eq!(config.peer.tick_ms, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_wire_endianness_by_name() {
        let config: PeerConfig = toml::from_str("[session]\nwire_endianness = \"big\"\n").unwrap();
        assert_eq!(config.session.wire_endianness, tether::Endianness::Big);
    }

    #[test]
    fn test_validation_collects_errors() {
        let mut config = PeerConfig::default();
        config.session.simulation.loss_fraction = 2.0;
        config.peer.stats_interval_secs = 0.0;
        let message = config.validate().unwrap_err().to_string();
        assert!(message.contains("loss fraction"));
        assert!(message.contains("Stats interval"));
    }
}
