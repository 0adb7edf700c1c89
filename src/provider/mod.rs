pub mod amazon;
pub mod bing;

use anyhow::Result;
use reqwest::blocking::Client;

use crate::auth::{Credential, ProviderKind, TokenManager};
use crate::error::ExtractResult;
use crate::extract::{ExtractOptions, ExtractionResult};

/// Who a call is made on behalf of. Each provider sends the parts it
/// understands as headers and ignores the rest.
#[derive(Debug, Clone, Copy)]
pub enum Scope<'a> {
    None,
    Profile(&'a str),
    Account {
        account_id: &'a str,
        customer_id: Option<&'a str>,
    },
}

pub trait Provider {
    fn name(&self) -> &str;
    fn display_name(&self) -> &str;

    /// Walks every entity the credential can see. Only a token failure is
    /// returned as an error; everything else is recorded in the result.
    fn extract(
        &self,
        tokens: &mut TokenManager,
        options: &ExtractOptions,
    ) -> ExtractResult<ExtractionResult>;
}

/// Builds a provider. `api_base` replaces the production hosts.
pub fn get_provider(
    credential: Credential,
    client: Client,
    api_base: Option<&str>,
) -> Result<Box<dyn Provider>> {
    match credential.provider {
        ProviderKind::Amazon => {
            let provider = amazon::AmazonProvider::new(client, credential);
            Ok(Box::new(match api_base {
                Some(base) => provider.with_base_url(base),
                None => provider,
            }))
        }
        ProviderKind::Bing => {
            if credential.developer_token.is_none() {
                anyhow::bail!("Bing credentials need a developer token");
            }
            let provider = bing::BingProvider::new(client, credential);
            Ok(Box::new(match api_base {
                Some(base) => provider.with_endpoints(bing::BingEndpoints::under(base)),
                None => provider,
            }))
        }
    }
}

pub fn all_provider_names() -> &'static [&'static str] {
    &["amazon", "bing"]
}

pub fn provider_kind(name: &str) -> Result<ProviderKind> {
    match name {
        "amazon" => Ok(ProviderKind::Amazon),
        "bing" => Ok(ProviderKind::Bing),
        _ => anyhow::bail!(
            "Unknown provider: '{}'. Available: {}",
            name,
            all_provider_names().join(", ")
        ),
    }
}
