use chrono::{Datelike, NaiveDate, Utc};
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::auth::{AccessToken, Credential, TokenManager};
use crate::error::{ExtractError, ExtractResult};
use crate::extract::{ExtractOptions, ExtractionResult};
use crate::fetch::{fetch_all_pages, PageOutcome, Paged, Pagination};
use crate::http::{self, id_string, items_under};
use crate::report::{PollResponse, ReportRequest, ReportRunner, ReportService};

use super::{Provider, Scope};

const CUSTOMER_MANAGEMENT: &str =
    "https://clientcenter.api.bingads.microsoft.com/CustomerManagement/v13";
const CAMPAIGN_MANAGEMENT: &str =
    "https://campaign.api.bingads.microsoft.com/CampaignManagement/v13";
const REPORTING: &str =
    "https://reporting.api.bingads.microsoft.com/Api/Advertiser/Reporting/v13";

const ACCOUNT_PAGE_SIZE: usize = 1000;
const REPORT_DEFAULT_DAYS: i64 = 30;
const REPORT_TIME_ZONE: &str = "GreenwichMeanTimeDublinEdinburghLisbonLondon";

const CAMPAIGN_TYPES: &str = "Audience,DynamicSearchAds,Search,Shopping,PerformanceMax";
const CAMPAIGN_FIELDS: &str = "AdScheduleUseSearcherTimeZone,BidStrategyId,CpvCpmBiddingScheme,DynamicDescriptionSetting,DynamicFeedSetting,MaxConversionValueBiddingScheme,MultimediaAdsBidAdjustment,TargetImpressionShareBiddingScheme,TargetSetting,VerifiedTrackingSetting";

#[derive(Debug, Clone)]
pub struct BingEndpoints {
    pub customer_management: String,
    pub campaign_management: String,
    pub reporting: String,
}

impl Default for BingEndpoints {
    fn default() -> Self {
        Self {
            customer_management: CUSTOMER_MANAGEMENT.to_string(),
            campaign_management: CAMPAIGN_MANAGEMENT.to_string(),
            reporting: REPORTING.to_string(),
        }
    }
}

impl BingEndpoints {
    /// All three services mounted under one host.
    pub fn under(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            customer_management: format!("{}/CustomerManagement/v13", base),
            campaign_management: format!("{}/CampaignManagement/v13", base),
            reporting: format!("{}/Reporting/v13", base),
        }
    }
}

pub struct BingProvider {
    client: Client,
    credential: Credential,
    endpoints: BingEndpoints,
}

impl BingProvider {
    pub fn new(client: Client, credential: Credential) -> Self {
        Self {
            client,
            credential,
            endpoints: BingEndpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: BingEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }
}

impl Provider for BingProvider {
    fn name(&self) -> &str {
        "bing"
    }

    fn display_name(&self) -> &str {
        "Microsoft Advertising"
    }

    fn extract(
        &self,
        tokens: &mut TokenManager,
        options: &ExtractOptions,
    ) -> ExtractResult<ExtractionResult> {
        let token = tokens.acquire(&self.credential)?;
        let api = BingApi {
            client: &self.client,
            endpoints: &self.endpoints,
            developer_token: self.credential.developer_token.as_deref().unwrap_or_default(),
            token: &token,
        };
        let range = options.date_range(REPORT_DEFAULT_DAYS);
        let runner = ReportRunner::new(&api, options.max_wait);

        let mut result = ExtractionResult::new("bing");

        info!("fetching users");
        let users = match api.users() {
            Ok(users) => users,
            Err(e) => {
                result.note_failure("*", "users", &e);
                Vec::new()
            }
        };
        info!("found {} user(s)", users.len());

        for user in &users {
            let Some(user_id) = id_string(user, "Id") else {
                continue;
            };

            info!(user = %user_id, "fetching accounts");
            let Paged {
                items: accounts,
                failure,
                ..
            } = api.accounts(&user_id);
            if let Some(e) = failure {
                result.note_failure(&user_id, "accounts", &e);
            }
            info!(user = %user_id, "found {} account(s)", accounts.len());

            for account in &accounts {
                let (Some(account_id), Some(customer_id)) =
                    (id_string(account, "Id"), id_string(account, "ParentCustomerId"))
                else {
                    continue;
                };
                let account_name = account.get("Name").cloned().unwrap_or(Value::Null);

                info!(account = %account_id, name = %account_name, "fetching campaigns");
                match api.campaigns(account, &account_id, &customer_id) {
                    Ok(campaigns) => {
                        info!(account = %account_id, "found {} campaign(s)", campaigns.len());
                        result.set_campaigns(&account_id, "campaigns", campaigns);
                    }
                    Err(e) => result.note_failure(&account_id, "campaigns", &e),
                }

                if !options.include_performance {
                    continue;
                }

                for kind in &options.report_kinds {
                    let request = ReportRequest {
                        account_id: account_id.clone(),
                        kind: *kind,
                        range,
                    };
                    match runner.run(&request) {
                        Ok(records) => {
                            info!(
                                account = %account_id,
                                "retrieved {} {} record(s)",
                                records.len(),
                                kind.label()
                            );
                            result.set_performance(
                                &account_id,
                                "account_name",
                                account_name.clone(),
                            );
                            result.set_performance(
                                &account_id,
                                kind.label(),
                                Value::Array(records.into_iter().map(Value::Object).collect()),
                            );
                        }
                        Err(e) => result.note_failure(&account_id, kind.label(), &e),
                    }
                }
            }

            result.accounts.extend(accounts);
        }

        result.entities = users;
        Ok(result)
    }
}

/// Calls made with one access token.
struct BingApi<'a> {
    client: &'a Client,
    endpoints: &'a BingEndpoints,
    developer_token: &'a str,
    token: &'a AccessToken,
}

impl BingApi<'_> {
    fn authed(&self, request: RequestBuilder, scope: Scope<'_>) -> RequestBuilder {
        let request = request
            .bearer_auth(&self.token.bearer)
            .header("DeveloperToken", self.developer_token)
            .header("Content-Type", "application/json");
        match scope {
            Scope::Account {
                account_id,
                customer_id,
            } => {
                let request = request.header("CustomerAccountId", account_id);
                match customer_id {
                    Some(customer_id) => request.header("CustomerId", customer_id),
                    None => request,
                }
            }
            Scope::None | Scope::Profile(_) => request,
        }
    }

    /// `User` comes back as a single object or a list depending on how many
    /// users the token can see.
    fn users(&self) -> ExtractResult<Vec<Value>> {
        let url = format!("{}/User/Query", self.endpoints.customer_management);
        let request = self
            .authed(self.client.post(url), Scope::None)
            .json(&json!({"UserId": null}));
        let body = http::send_json(request, "users")?;
        Ok(match body.get("User") {
            Some(Value::Array(users)) => users.clone(),
            Some(Value::Null) | None => Vec::new(),
            Some(user) => vec![user.clone()],
        })
    }

    /// Accounts/Search counts pages, not rows, in `PageInfo.Index`.
    fn accounts(&self, user_id: &str) -> Paged<Value> {
        let url = format!("{}/Accounts/Search", self.endpoints.customer_management);
        fetch_all_pages(
            Pagination::Offset {
                size: ACCOUNT_PAGE_SIZE,
            },
            "accounts",
            |state| {
                let (start, size) = state.offset().unwrap_or((0, ACCOUNT_PAGE_SIZE));
                let payload = json!({
                    "PageInfo": {"Index": start / size, "Size": size},
                    "Predicates": [
                        {"Field": "UserId", "Operator": "Equals", "Value": user_id}
                    ],
                    "ReturnAdditionalFields": "TaxCertificate,AccountMode",
                });
                let request = self
                    .authed(self.client.post(&url), Scope::None)
                    .json(&payload);
                let body = http::send_json(request, "accounts")?;
                Ok(PageOutcome::page(items_under(&body, "Accounts"), None))
            },
        )
    }

    /// Every campaign is stamped with the account and customer it came from.
    fn campaigns(
        &self,
        account: &Value,
        account_id: &str,
        customer_id: &str,
    ) -> ExtractResult<Vec<Value>> {
        let url = format!(
            "{}/Campaigns/QueryByAccountId",
            self.endpoints.campaign_management
        );
        let payload = json!({
            "AccountId": account_id,
            "CampaignType": CAMPAIGN_TYPES,
            "ReturnAdditionalFields": CAMPAIGN_FIELDS,
        });
        let scope = Scope::Account {
            account_id,
            customer_id: Some(customer_id),
        };
        let request = self.authed(self.client.post(url), scope).json(&payload);
        let body = http::send_json(request, "campaigns")?;

        let stamp_account = account.get("Id").cloned().unwrap_or(Value::Null);
        let stamp_customer = account.get("ParentCustomerId").cloned().unwrap_or(Value::Null);
        Ok(items_under(&body, "Campaigns")
            .into_iter()
            .map(|mut campaign| {
                if let Value::Object(fields) = &mut campaign {
                    fields.insert("AccountId".to_string(), stamp_account.clone());
                    fields.insert("CustomerId".to_string(), stamp_customer.clone());
                }
                campaign
            })
            .collect())
    }
}

fn calendar_date(date: NaiveDate) -> Value {
    json!({"Day": date.day(), "Month": date.month(), "Year": date.year()})
}

fn report_definition(request: &ReportRequest, today: NaiveDate) -> Value {
    let kind = request.kind.request_type();
    json!({
        "ReportRequest": {
            "ExcludeColumnHeaders": false,
            "ExcludeReportFooter": true,
            "ExcludeReportHeader": true,
            "Format": "Csv",
            "FormatVersion": "2.0",
            "ReportName": format!("{}_{}", kind, today.format("%Y%m%d")),
            "ReturnOnlyCompleteData": false,
            "Type": kind,
            "Aggregation": "Daily",
            "Columns": request.kind.columns(),
            "Scope": {"AccountIds": [request.account_id]},
            "Time": {
                "CustomDateRangeStart": calendar_date(request.range.start),
                "CustomDateRangeEnd": calendar_date(request.range.end),
                "ReportTimeZone": REPORT_TIME_ZONE,
            }
        }
    })
}

impl ReportService for BingApi<'_> {
    fn submit(&self, request: &ReportRequest) -> ExtractResult<String> {
        let url = format!(
            "{}/ReportingService.svc/SubmitGenerateReport",
            self.endpoints.reporting
        );
        let scope = Scope::Account {
            account_id: &request.account_id,
            customer_id: None,
        };
        let payload = report_definition(request, Utc::now().date_naive());
        let http_request = self.authed(self.client.post(url), scope).json(&payload);

        let body = http::send_json(http_request, "submit report")
            .map_err(|e| ExtractError::Submission(e.to_string()))?;
        id_string(&body, "ReportRequestId")
            .ok_or_else(|| ExtractError::Submission(format!("no ReportRequestId in {}", body)))
    }

    fn poll(&self, job_id: &str) -> ExtractResult<PollResponse> {
        let url = format!(
            "{}/ReportingService.svc/PollGenerateReport",
            self.endpoints.reporting
        );
        let request = self
            .authed(self.client.post(url), Scope::None)
            .json(&json!({"ReportRequestId": job_id}));
        let raw = http::send_json(request, "poll report")?;

        let status = raw
            .pointer("/ReportRequestStatus/Status")
            .and_then(Value::as_str)
            .map(str::to_string);
        let download_url = raw
            .pointer("/ReportRequestStatus/ReportDownloadUrl")
            .and_then(Value::as_str)
            .map(str::to_string);
        if status.is_none() {
            warn!(job = job_id, "poll response carried no status");
        }
        Ok(PollResponse {
            status,
            download_url,
            raw,
        })
    }

    fn download(&self, url: &str) -> ExtractResult<Vec<u8>> {
        http::send_bytes(self.client.get(url), "download report")
    }
}
