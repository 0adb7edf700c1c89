use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::{info, warn};
use url::Url;

use crate::auth::{AccessToken, Credential, TokenManager};
use crate::error::{ExtractError, ExtractResult};
use crate::extract::{DateRange, ExtractOptions, ExtractionResult};
use crate::fetch::{fetch_all_pages, PageOutcome, Paged, Pagination, DEFAULT_PAGE_SIZE};
use crate::http::{self, id_string, items_under, next_marker};

use super::{Provider, Scope};

const REGION_URLS: &[(&str, &str)] = &[
    ("NA", "https://advertising-api.amazon.com"),
    ("EU", "https://advertising-api-eu.amazon.com"),
    ("FE", "https://advertising-api-fe.amazon.com"),
];

const STATES: &str = "enabled,paused,archived";
const SB_MEDIA_TYPE: &str = "application/vnd.sbcampaignresource.v4+json";
const SP_MEDIA_TYPE: &str = "application/vnd.spCampaign.v3+json";

const ATTRIBUTION_METRICS: &str = "Click-throughs,attributedDetailPageViewsClicks14d,attributedAddToCartClicks14d,attributedPurchases14d,unitsSold14d,attributedSales14d";
const ATTRIBUTION_PAGE_SIZE: u32 = 300;
const ATTRIBUTION_DEFAULT_DAYS: i64 = 90;

/// Unknown region codes fall back to North America.
pub fn base_url_for_region(region: Option<&str>) -> &'static str {
    let code = region.unwrap_or("NA").to_ascii_uppercase();
    match REGION_URLS.iter().find(|(r, _)| *r == code) {
        Some((_, url)) => url,
        None => {
            warn!(region = %code, "unknown Amazon Ads region, using NA");
            REGION_URLS[0].1
        }
    }
}

pub struct AmazonProvider {
    client: Client,
    credential: Credential,
    base_url: String,
}

impl AmazonProvider {
    pub fn new(client: Client, credential: Credential) -> Self {
        let base_url = base_url_for_region(credential.region.as_deref()).to_string();
        Self {
            client,
            credential,
            base_url,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

impl Provider for AmazonProvider {
    fn name(&self) -> &str {
        "amazon"
    }

    fn display_name(&self) -> &str {
        "Amazon Ads"
    }

    fn extract(
        &self,
        tokens: &mut TokenManager,
        options: &ExtractOptions,
    ) -> ExtractResult<ExtractionResult> {
        let token = tokens.acquire(&self.credential)?;
        let api = AmazonApi {
            client: &self.client,
            base_url: &self.base_url,
            client_id: &self.credential.client_id,
            token: &token,
        };
        let range = options.date_range(ATTRIBUTION_DEFAULT_DAYS);

        let mut result = ExtractionResult::new("amazon");

        let profiles = match api.profiles() {
            Ok(profiles) => profiles,
            Err(e) => {
                result.note_failure("*", "profiles", &e);
                Vec::new()
            }
        };
        info!("found {} profile(s)", profiles.len());

        for profile in &profiles {
            let Some(profile_id) = id_string(profile, "profileId") else {
                warn!("skipping profile without a profileId");
                continue;
            };
            let name = profile
                .pointer("/accountInfo/name")
                .and_then(Value::as_str)
                .unwrap_or(&profile_id);
            info!(profile = %profile_id, "fetching data for profile {}", name);

            result.add_campaigns(
                &profile_id,
                "sponsored_display",
                api.display_campaigns(&profile_id),
            );
            result.add_campaigns(
                &profile_id,
                "sponsored_brands",
                api.campaign_list(
                    &profile_id,
                    "/sb/v4/campaigns/list",
                    SB_MEDIA_TYPE,
                    "sponsored_brands",
                ),
            );
            result.add_campaigns(
                &profile_id,
                "sponsored_products",
                api.campaign_list(
                    &profile_id,
                    "/sp/campaigns/list",
                    SP_MEDIA_TYPE,
                    "sponsored_products",
                ),
            );

            if options.include_performance {
                result.add_performance(
                    &profile_id,
                    "attribution_campaign",
                    api.attribution_report(&profile_id, &range),
                );
            }
        }

        result.entities = profiles;
        Ok(result)
    }
}

/// Calls made with one access token.
struct AmazonApi<'a> {
    client: &'a Client,
    base_url: &'a str,
    client_id: &'a str,
    token: &'a AccessToken,
}

impl AmazonApi<'_> {
    fn url(&self, path: &str, query: &[(&str, String)], operation: &str) -> ExtractResult<Url> {
        let mut url = Url::parse(&format!("{}{}", self.base_url.trim_end_matches('/'), path))
            .map_err(|e| ExtractError::Transport {
                operation: operation.to_string(),
                status: None,
                message: e.to_string(),
            })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    fn authed(
        &self,
        request: RequestBuilder,
        scope: Scope<'_>,
        media_type: &str,
    ) -> RequestBuilder {
        let request = request
            .bearer_auth(&self.token.bearer)
            .header("Amazon-Advertising-API-ClientId", self.client_id)
            .header("Content-Type", media_type);
        match scope {
            Scope::Profile(profile_id) => {
                request.header("Amazon-Advertising-API-Scope", profile_id)
            }
            Scope::None | Scope::Account { .. } => request,
        }
    }

    fn profiles(&self) -> ExtractResult<Vec<Value>> {
        let url = self.url(
            "/v2/profiles",
            &[("profileTypeFilter", "seller,vendor".to_string())],
            "profiles",
        )?;
        let request = self.authed(self.client.get(url), Scope::None, "application/json");
        let body = http::send_json(request, "profiles")?;
        Ok(body.as_array().cloned().unwrap_or_default())
    }

    /// Sponsored Display pages by `startIndex`/`count` and answers with a bare array.
    fn display_campaigns(&self, profile_id: &str) -> Paged<Value> {
        fetch_all_pages(Pagination::offset(), "sponsored_display", |state| {
            let (start, size) = state.offset().unwrap_or((0, DEFAULT_PAGE_SIZE));
            let url = self.url(
                "/sd/campaigns",
                &[
                    ("stateFilter", STATES.to_string()),
                    ("count", size.to_string()),
                    ("startIndex", start.to_string()),
                ],
                "sponsored_display",
            )?;
            let request = self.authed(
                self.client.get(url),
                Scope::Profile(profile_id),
                "application/json",
            );
            let body = http::send_json(request, "sponsored_display")?;
            Ok(PageOutcome::page(body.as_array().cloned().unwrap_or_default(), None))
        })
    }

    /// Sponsored Brands and Sponsored Products list endpoints page with `nextToken`.
    fn campaign_list(
        &self,
        profile_id: &str,
        path: &str,
        media_type: &str,
        operation: &str,
    ) -> Paged<Value> {
        fetch_all_pages(Pagination::ContinuationToken, operation, |state| {
            let mut payload = json!({
                "stateFilter": {"include": STATES},
                "maxResults": DEFAULT_PAGE_SIZE,
            });
            if let Some(token) = state.marker() {
                payload["nextToken"] = json!(token);
            }

            let url = self.url(path, &[], operation)?;
            let request = self
                .authed(self.client.post(url), Scope::Profile(profile_id), media_type)
                .header("Accept", media_type)
                .json(&payload);
            let body = http::send_json(request, operation)?;
            Ok(PageOutcome::page(
                items_under(&body, "campaigns"),
                next_marker(&body, "nextToken"),
            ))
        })
    }

    /// Attribution reports page with `cursorId`. A 400 means the cursor has
    /// run dry, not that the request was wrong.
    fn attribution_report(&self, profile_id: &str, range: &DateRange) -> Paged<Value> {
        let (start, end) = range.compact();
        fetch_all_pages(Pagination::Cursor, "attribution_campaign", |state| {
            let mut payload = json!({
                "reportType": "PERFORMANCE",
                "groupBy": "CAMPAIGN",
                "metrics": ATTRIBUTION_METRICS,
                "startDate": start,
                "endDate": end,
                "count": ATTRIBUTION_PAGE_SIZE,
            });
            if let Some(cursor) = state.marker() {
                payload["cursorId"] = json!(cursor);
            }

            let url = self.url("/attribution/report", &[], "attribution_campaign")?;
            let request = self
                .authed(self.client.post(url), Scope::Profile(profile_id), "application/json")
                .json(&payload);
            let response = http::send(request, "attribution_campaign")?;
            if response.status() == StatusCode::BAD_REQUEST {
                return Ok(PageOutcome::Exhausted);
            }
            let response = http::ensure_success(response, "attribution_campaign")?;
            let body = http::read_json(response, "attribution_campaign")?;
            Ok(PageOutcome::page(
                items_under(&body, "reports"),
                next_marker(&body, "cursorId"),
            ))
        })
    }
}
