use anyhow::{bail, Context, Result};
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::generate_ca::DistinguishedName;

/// Documented fallback value for every provisioning secret. Production runs
/// must override it through the environment.
pub const DEFAULT_SECRET: &str = "changeit";

pub const KEYSTORE_PASSWORD_VAR: &str = "KEYSTORE_PASSWORD";
pub const TRUSTSTORE_PASSWORD_VAR: &str = "TRUSTSTORE_PASSWORD";
pub const ADMIN_PASSWORD_VAR: &str = "ADMIN_BUNDLE_PASSWORD";

#[derive(Debug, Deserialize, Clone)]
pub struct ProvisionConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub ca: CaConfig,
    #[serde(default)]
    pub validity: ValidityConfig,
    #[serde(default)]
    pub subjects: Vec<SubjectEntry>,
    /// Administrator browser bundle; omit the section to provision hosts
    /// without an admin identity.
    #[serde(default)]
    pub admin: Option<AdminConfig>,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("tls")
}

/// One server host that receives a keystore/truststore bundle.
#[derive(Debug, Deserialize, Clone)]
pub struct SubjectEntry {
    pub name: String,
    pub ip: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CaConfig {
    #[serde(default = "default_ca_cn")]
    pub common_name: String,
    #[serde(default = "default_org")]
    pub organization: String,
    #[serde(default = "default_ou")]
    pub organizational_unit: String,
    #[serde(default = "default_locality")]
    pub locality: String,
    #[serde(default = "default_state")]
    pub state: String,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_ca_validity")]
    pub validity_days: u32,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            common_name: default_ca_cn(),
            organization: default_org(),
            organizational_unit: default_ou(),
            locality: default_locality(),
            state: default_state(),
            country: default_country(),
            validity_days: default_ca_validity(),
        }
    }
}

fn default_ca_cn() -> String {
    "Cluster Root CA".to_string()
}

fn default_org() -> String {
    "NiFi Cluster".to_string()
}

fn default_ou() -> String {
    "Operations".to_string()
}

fn default_locality() -> String {
    "Santa Monica".to_string()
}

fn default_state() -> String {
    "CA".to_string()
}

fn default_country() -> String {
    "US".to_string()
}

fn default_ca_validity() -> u32 {
    3650 // 10 years
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidityConfig {
    #[serde(default = "default_server_validity")]
    pub server_days: u32,
    #[serde(default = "default_admin_validity")]
    pub admin_days: u32,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            server_days: default_server_validity(),
            admin_days: default_admin_validity(),
        }
    }
}

fn default_server_validity() -> u32 {
    1095 // 3 years
}

fn default_admin_validity() -> u32 {
    730 // 2 years
}

#[derive(Debug, Deserialize, Clone)]
pub struct AdminConfig {
    #[serde(default = "default_admin_cn")]
    pub common_name: String,
}

fn default_admin_cn() -> String {
    "admin".to_string()
}

impl ProvisionConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: ProvisionConfig =
            toml::from_str(&config_str).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Distinguished name of the certificate authority.
    pub fn ca_dn(&self) -> DistinguishedName {
        DistinguishedName {
            common_name: self.ca.common_name.clone(),
            organization: self.ca.organization.clone(),
            organizational_unit: self.ca.organizational_unit.clone(),
            locality: self.ca.locality.clone(),
            state: self.ca.state.clone(),
            country: self.ca.country.clone(),
        }
    }

    /// Distinguished name for an issued entity: the entity's common name with
    /// the organization fields shared with the CA.
    pub fn entity_dn(&self, common_name: &str) -> DistinguishedName {
        DistinguishedName {
            common_name: common_name.to_string(),
            ..self.ca_dn()
        }
    }
}

/// The three provisioning passwords, sourced from the environment with a
/// documented fallback. Wrapped in [`Secret`] so the values never show up in
/// debug output.
pub struct Secrets {
    pub keystore_password: Secret<String>,
    pub truststore_password: Secret<String>,
    pub admin_password: Secret<String>,
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Source secrets through `lookup`, falling back to [`DEFAULT_SECRET`]
    /// for unset variables.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let fetch =
            |var: &str| Secret::new(lookup(var).unwrap_or_else(|| DEFAULT_SECRET.to_string()));

        Self {
            keystore_password: fetch(KEYSTORE_PASSWORD_VAR),
            truststore_password: fetch(TRUSTSTORE_PASSWORD_VAR),
            admin_password: fetch(ADMIN_PASSWORD_VAR),
        }
    }

    /// Environment variables whose secret still equals the documented default.
    pub fn defaulted_vars(&self) -> Vec<&'static str> {
        let mut vars = Vec::new();
        if self.keystore_password.expose_secret() == DEFAULT_SECRET {
            vars.push(KEYSTORE_PASSWORD_VAR);
        }
        if self.truststore_password.expose_secret() == DEFAULT_SECRET {
            vars.push(TRUSTSTORE_PASSWORD_VAR);
        }
        if self.admin_password.expose_secret() == DEFAULT_SECRET {
            vars.push(ADMIN_PASSWORD_VAR);
        }
        vars
    }

    /// Refuse to run with default passwords unless the caller explicitly
    /// allowed them (development mode).
    pub fn enforce_overridden(&self, allow_defaults: bool) -> Result<()> {
        let defaulted = self.defaulted_vars();
        if defaulted.is_empty() {
            return Ok(());
        }

        if allow_defaults {
            println!(
                "⚠ Using default password(s) for {}; do not deploy these bundles",
                defaulted.join(", ")
            );
            return Ok(());
        }

        bail!(
            "Refusing to provision with default password(s); set {} or pass --allow-default-passwords",
            defaulted.join(", ")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: ProvisionConfig = toml::from_str("").unwrap();

        assert_eq!(config.output_dir, PathBuf::from("tls"));
        assert_eq!(config.ca.validity_days, 3650);
        assert_eq!(config.validity.server_days, 1095);
        assert_eq!(config.validity.admin_days, 730);
        assert!(config.subjects.is_empty());
        assert!(config.admin.is_none());
    }

    #[test]
    fn test_empty_admin_section_defaults_the_common_name() {
        let config: ProvisionConfig = toml::from_str("[admin]\n").unwrap();
        assert_eq!(config.admin.unwrap().common_name, "admin");
    }

    #[test]
    fn test_from_file_parses_subjects() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
output_dir = "out/tls"

[ca]
common_name = "Test Root CA"
validity_days = 30

[validity]
server_days = 7

[[subjects]]
name = "node-a"
ip = "10.0.0.5"

[[subjects]]
name = "node-b"
ip = "10.0.0.6"
"#
        )
        .unwrap();

        let config = ProvisionConfig::from_file(file.path()).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("out/tls"));
        assert_eq!(config.ca.common_name, "Test Root CA");
        assert_eq!(config.ca.validity_days, 30);
        assert_eq!(config.validity.server_days, 7);
        assert_eq!(config.validity.admin_days, 730);
        assert_eq!(config.subjects.len(), 2);
        assert_eq!(config.subjects[1].name, "node-b");
        assert_eq!(config.subjects[1].ip, "10.0.0.6");
    }

    #[test]
    fn test_entity_dn_shares_org_fields() {
        let config: ProvisionConfig = toml::from_str("").unwrap();
        let dn = config.entity_dn("node-a");

        assert_eq!(dn.common_name, "node-a");
        assert_eq!(dn.organization, config.ca.organization);
        assert_eq!(dn.country, config.ca.country);
    }

    #[test]
    fn test_secrets_fall_back_to_default() {
        let secrets = Secrets::from_lookup(|_| None);

        assert_eq!(
            secrets.defaulted_vars(),
            vec![
                KEYSTORE_PASSWORD_VAR,
                TRUSTSTORE_PASSWORD_VAR,
                ADMIN_PASSWORD_VAR
            ]
        );
        assert!(secrets.enforce_overridden(false).is_err());
        assert!(secrets.enforce_overridden(true).is_ok());
    }

    #[test]
    fn test_secrets_overridden_pass_enforcement() {
        let secrets = Secrets::from_lookup(|var| match var {
            KEYSTORE_PASSWORD_VAR => Some("ks-secret".to_string()),
            TRUSTSTORE_PASSWORD_VAR => Some("ts-secret".to_string()),
            ADMIN_PASSWORD_VAR => Some("admin-secret".to_string()),
            _ => None,
        });

        assert!(secrets.defaulted_vars().is_empty());
        assert!(secrets.enforce_overridden(false).is_ok());
    }

    #[test]
    fn test_partially_defaulted_secrets_name_the_variable() {
        let secrets = Secrets::from_lookup(|var| {
            (var == KEYSTORE_PASSWORD_VAR).then(|| "ks-secret".to_string())
        });

        let err = secrets.enforce_overridden(false).unwrap_err().to_string();
        assert!(err.contains(TRUSTSTORE_PASSWORD_VAR));
        assert!(err.contains(ADMIN_PASSWORD_VAR));
        assert!(!err.contains(&format!("{},", KEYSTORE_PASSWORD_VAR)));
    }
}
