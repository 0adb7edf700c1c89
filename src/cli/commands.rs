use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use tracing::info;

use crate::auth::{ProviderKind, TokenManager};
use crate::config::{self, MissingCredentials};
use crate::extract::ExtractOptions;
use crate::provider;
use crate::report::ReportKind;

const HTTP_TIMEOUT: Duration = Duration::from_secs(120);

/// Options shared by every extraction command.
pub struct RunSettings<'a> {
    pub config_path: Option<&'a Path>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub no_performance: bool,
    pub report_kinds: &'a [ReportKind],
    pub max_wait: Duration,
}

pub fn cmd_extract(provider_name: &str, settings: &RunSettings) -> Result<()> {
    let kind = provider::provider_kind(provider_name)?;
    let file = config::load_config(settings.config_path)?;

    let credential = match config::resolve_credential(kind, &file, config::env_lookup) {
        Ok(credential) => credential,
        Err(MissingCredentials(names)) => {
            eprintln!("error: missing required environment variables:");
            for name in names {
                eprintln!("  {}", name);
            }
            eprintln!("Run `adextract setup {}` for instructions.", provider_name);
            std::process::exit(1);
        }
    };

    let options = build_options(settings);

    let client = Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .context("Could not build HTTP client")?;
    let overrides = file.overrides(kind);
    let prov = provider::get_provider(credential, client.clone(), overrides.api_base.as_deref())?;
    let mut tokens = TokenManager::new(client);
    if let Some(url) = overrides.token_url {
        tokens = tokens.with_token_url(kind, url);
    }

    info!(provider = prov.name(), "fetching {} data", prov.display_name());
    let result = prov.extract(&mut tokens, &options)?;

    if result.errors.is_empty() {
        info!("extraction complete");
    } else {
        info!(
            "extraction complete with {} contained failure(s)",
            result.errors.len()
        );
    }

    let json = serde_json::to_string_pretty(&result)?;
    println!("{}", json);
    Ok(())
}

fn build_options(settings: &RunSettings) -> ExtractOptions {
    let include_performance = !settings.no_performance
        && config::env_flag(config::env_lookup, "INCLUDE_PERFORMANCE_REPORTS", true);

    // one job per kind per account
    let mut report_kinds = Vec::new();
    for kind in settings.report_kinds {
        if !report_kinds.contains(kind) {
            report_kinds.push(*kind);
        }
    }
    if report_kinds.is_empty() {
        report_kinds.push(ReportKind::CampaignPerformance);
    }

    ExtractOptions {
        start_date: settings.start_date,
        end_date: settings.end_date,
        include_performance,
        report_kinds,
        max_wait: settings.max_wait,
    }
}

pub fn cmd_setup(provider_name: &str) -> Result<()> {
    let kind = provider::provider_kind(provider_name)?;
    let vars = config::variables_for(kind);

    eprintln!("Setting up {} credentials", provider_name);
    eprintln!();
    eprintln!("Set the following environment variables:");
    for var in vars {
        let marker = if var.required { "" } else { " (optional)" };
        eprintln!("  {:<28} {}{}", var.name, var.description, marker);
    }
    eprintln!();

    match kind {
        ProviderKind::Amazon => {
            eprintln!("How to get these credentials:");
            eprintln!("  1. Go to https://advertising.amazon.com/API/ and register for API access");
            eprintln!("  2. Create a Login with Amazon security profile (client id and secret)");
            eprintln!("  3. Complete the OAuth authorization code flow to obtain a refresh token");
        }
        ProviderKind::Bing => {
            eprintln!("How to get these credentials:");
            eprintln!("  1. Register an application in Azure AD (tenant id, client id, secret)");
            eprintln!("  2. Request a developer token in the Microsoft Advertising developer portal");
            eprintln!("  3. Complete the OAuth flow with scope msads.manage to obtain a refresh token");
        }
    }
    eprintln!();

    if let Some(path) = config::default_config_path() {
        eprintln!("Values can also go in the [{}] section of {}", provider_name, path.display());
        eprintln!();
    }

    let file = config::load_config(None)?;
    match config::resolve_credential(kind, &file, config::env_lookup) {
        Ok(_) => {
            eprintln!("All required credentials detected. Run:");
            eprintln!("  adextract {}", provider_name);
        }
        Err(MissingCredentials(names)) => {
            eprintln!("Still missing:");
            for name in names {
                eprintln!("  {}", name);
            }
        }
    }

    Ok(())
}
