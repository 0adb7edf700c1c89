use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::{Credential, ProviderKind};

const CONFIG_DIR: &str = "adextract";
const CONFIG_FILE: &str = "config.toml";

/// Optional credentials file. Environment variables win over its values.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub amazon: AmazonSection,
    #[serde(default)]
    pub bing: BingSection,
}

#[derive(Debug, Default, Deserialize)]
pub struct AmazonSection {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub region: Option<String>,
    pub token_url: Option<String>,
    pub api_base: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct BingSection {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
    pub developer_token: Option<String>,
    pub token_url: Option<String>,
    pub api_base: Option<String>,
}

/// Alternative endpoints, e.g. a sandbox environment.
#[derive(Debug, Default, Clone)]
pub struct EndpointOverrides {
    pub token_url: Option<String>,
    pub api_base: Option<String>,
}

impl ConfigFile {
    pub fn overrides(&self, kind: ProviderKind) -> EndpointOverrides {
        let (token_url, api_base) = match kind {
            ProviderKind::Amazon => (&self.amazon.token_url, &self.amazon.api_base),
            ProviderKind::Bing => (&self.bing.token_url, &self.bing.api_base),
        };
        EndpointOverrides {
            token_url: token_url.clone(),
            api_base: api_base.clone(),
        }
    }
}

pub struct EnvVar {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

pub const AMAZON_VARS: &[EnvVar] = &[
    EnvVar {
        name: "AMAZON_ADS_CLIENT_ID",
        description: "Amazon Ads API client id",
        required: true,
    },
    EnvVar {
        name: "AMAZON_ADS_CLIENT_SECRET",
        description: "Amazon Ads API client secret",
        required: true,
    },
    EnvVar {
        name: "AMAZON_ADS_REFRESH_TOKEN",
        description: "OAuth refresh token",
        required: true,
    },
    EnvVar {
        name: "AMAZON_ADS_REGION",
        description: "API region (NA/EU/FE), defaults to NA",
        required: false,
    },
];

pub const BING_VARS: &[EnvVar] = &[
    EnvVar {
        name: "BING_ADS_TENANT_ID",
        description: "Azure AD tenant id",
        required: true,
    },
    EnvVar {
        name: "BING_ADS_CLIENT_ID",
        description: "Azure app client id",
        required: true,
    },
    EnvVar {
        name: "BING_ADS_CLIENT_SECRET",
        description: "Azure app client secret",
        required: true,
    },
    EnvVar {
        name: "BING_ADS_REFRESH_TOKEN",
        description: "OAuth refresh token",
        required: true,
    },
    EnvVar {
        name: "BING_ADS_DEVELOPER_TOKEN",
        description: "Microsoft Advertising developer token",
        required: true,
    },
];

pub fn variables_for(kind: ProviderKind) -> &'static [EnvVar] {
    match kind {
        ProviderKind::Amazon => AMAZON_VARS,
        ProviderKind::Bing => BING_VARS,
    }
}

#[derive(Debug, Error)]
#[error("missing required credentials: {}", .0.join(", "))]
pub struct MissingCredentials(pub Vec<&'static str>);

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Loads the credentials file. An explicitly named file must exist; the
/// default location is optional.
pub fn load_config(explicit: Option<&Path>) -> Result<ConfigFile> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(ConfigFile::default()),
        },
    };

    let contents = fs::read_to_string(&path)
        .with_context(|| format!("Could not read config file {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    Ok(config)
}

/// Reads a process environment variable, treating empty values as unset.
pub fn env_lookup(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Boolean run options: only a case-insensitive "true" enables.
pub fn env_flag(lookup: impl Fn(&str) -> Option<String>, name: &str, default: bool) -> bool {
    lookup(name)
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(default)
}

/// Builds a provider's credential from the environment and the config
/// file, reporting every missing value at once.
pub fn resolve_credential(
    kind: ProviderKind,
    file: &ConfigFile,
    lookup: impl Fn(&str) -> Option<String>,
) -> std::result::Result<Credential, MissingCredentials> {
    let mut missing = Vec::new();
    let mut take = |name: &'static str, fallback: &Option<String>| -> String {
        match lookup(name).or_else(|| fallback.clone().filter(|v| !v.is_empty())) {
            Some(value) => value,
            None => {
                missing.push(name);
                String::new()
            }
        }
    };

    let credential = match kind {
        ProviderKind::Amazon => {
            let section = &file.amazon;
            let client_id = take("AMAZON_ADS_CLIENT_ID", &section.client_id);
            let client_secret = take("AMAZON_ADS_CLIENT_SECRET", &section.client_secret);
            let refresh_token = take("AMAZON_ADS_REFRESH_TOKEN", &section.refresh_token);
            Credential {
                provider: kind,
                client_id,
                client_secret,
                refresh_token,
                tenant_id: None,
                developer_token: None,
                region: lookup("AMAZON_ADS_REGION").or_else(|| section.region.clone()),
            }
        }
        ProviderKind::Bing => {
            let section = &file.bing;
            let tenant_id = take("BING_ADS_TENANT_ID", &section.tenant_id);
            let client_id = take("BING_ADS_CLIENT_ID", &section.client_id);
            let client_secret = take("BING_ADS_CLIENT_SECRET", &section.client_secret);
            let refresh_token = take("BING_ADS_REFRESH_TOKEN", &section.refresh_token);
            let developer_token = take("BING_ADS_DEVELOPER_TOKEN", &section.developer_token);
            Credential {
                provider: kind,
                client_id,
                client_secret,
                refresh_token,
                tenant_id: Some(tenant_id),
                developer_token: Some(developer_token),
                region: None,
            }
        }
    };

    if missing.is_empty() {
        Ok(credential)
    } else {
        Err(MissingCredentials(missing))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned().filter(|v| !v.is_empty())
    }

    #[test]
    fn every_missing_variable_is_reported() {
        let err = resolve_credential(
            ProviderKind::Bing,
            &ConfigFile::default(),
            env(&[("BING_ADS_CLIENT_ID", "abc"), ("BING_ADS_REFRESH_TOKEN", "")]),
        )
        .unwrap_err();

        assert_eq!(
            err.0,
            vec![
                "BING_ADS_TENANT_ID",
                "BING_ADS_CLIENT_SECRET",
                "BING_ADS_REFRESH_TOKEN",
                "BING_ADS_DEVELOPER_TOKEN",
            ]
        );
        assert!(err.to_string().contains("BING_ADS_TENANT_ID, BING_ADS_CLIENT_SECRET"));
    }

    #[test]
    fn environment_overrides_config_file() {
        let file: ConfigFile = toml::from_str(
            r#"
            [amazon]
            client_id = "from-file"
            client_secret = "file-secret"
            refresh_token = "file-refresh"
            region = "FE"
            "#,
        )
        .unwrap();

        let credential = resolve_credential(
            ProviderKind::Amazon,
            &file,
            env(&[("AMAZON_ADS_CLIENT_ID", "from-env")]),
        )
        .unwrap();

        assert_eq!(credential.client_id, "from-env");
        assert_eq!(credential.client_secret, "file-secret");
        assert_eq!(credential.region.as_deref(), Some("FE"));
    }

    #[test]
    fn region_is_optional() {
        let credential = resolve_credential(
            ProviderKind::Amazon,
            &ConfigFile::default(),
            env(&[
                ("AMAZON_ADS_CLIENT_ID", "id"),
                ("AMAZON_ADS_CLIENT_SECRET", "secret"),
                ("AMAZON_ADS_REFRESH_TOKEN", "refresh"),
            ]),
        )
        .unwrap();
        assert_eq!(credential.region, None);
    }

    #[test]
    fn flags_default_when_unset() {
        assert!(env_flag(env(&[]), "INCLUDE_PERFORMANCE_REPORTS", true));
        assert!(!env_flag(
            env(&[("INCLUDE_PERFORMANCE_REPORTS", "no")]),
            "INCLUDE_PERFORMANCE_REPORTS",
            true
        ));
        assert!(env_flag(
            env(&[("INCLUDE_PERFORMANCE_REPORTS", "TRUE")]),
            "INCLUDE_PERFORMANCE_REPORTS",
            false
        ));
    }

    #[test]
    fn endpoint_overrides_come_from_the_provider_section() {
        let file: ConfigFile = toml::from_str(
            r#"
            [bing]
            api_base = "http://localhost:9000"
            "#,
        )
        .unwrap();

        let bing = file.overrides(ProviderKind::Bing);
        assert_eq!(bing.api_base.as_deref(), Some("http://localhost:9000"));
        assert_eq!(bing.token_url, None);
        assert!(file.overrides(ProviderKind::Amazon).api_base.is_none());
    }

    #[test]
    fn explicit_config_path_must_exist() {
        let missing = Path::new("/nonexistent/adextract/config.toml");
        assert!(load_config(Some(missing)).is_err());
    }
}
