//! Live prices from the AWS Pricing API.
//!
//! Calls `AWSPriceListService.GetProducts` directly over HTTPS with AWS
//! SigV4 signing. No AWS SDK dependency.
//!
//! # Configuration
//!
//! ```toml
//! [pricing]
//! live = true
//! region = "eu-west-1"                                   # optional, default us-west-2
//! endpoint = "https://api.pricing.us-east-1.amazonaws.com"
//! ```
//!
//! # Authentication
//!
//! | Variable | Required |
//! |----------|----------|
//! | `AWS_ACCESS_KEY_ID` | yes |
//! | `AWS_SECRET_ACCESS_KEY` | yes |
//! | `AWS_SESSION_TOKEN` | no (temporary credentials) |
//!
//! # Supported resources
//!
//! | Resource type | Service code | Filters |
//! |---------------|--------------|---------|
//! | `aws_instance` | `AmazonEC2` | `instanceType` (default `t3.micro`), Linux, Shared tenancy |
//! | `aws_s3_bucket` | `AmazonS3` | Standard storage |
//! | `aws_db_instance` | `AmazonRDS` | `instanceType` (`instance_class`), Single-AZ |
//!
//! Other types return no price and the estimator falls back to its static
//! table. Hourly prices are scaled by 730 hours to a monthly figure.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::config::PricingConfig;
use crate::cost::{region_to_location, PriceSource};
use crate::models::ResourceChange;

type HmacSha256 = Hmac<Sha256>;

/// The Pricing API is only served from a few regions; requests sign for this one.
const SIGNING_REGION: &str = "us-east-1";
const SERVICE: &str = "pricing";
const TARGET: &str = "AWSPriceListService.GetProducts";
const CONTENT_TYPE: &str = "application/x-amz-json-1.1";

pub const HOURS_PER_MONTH: f64 = 730.0;

/// AWS credentials read from environment variables.
#[derive(Debug, Clone)]
pub struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    pub fn new(access_key_id: &str, secret_access_key: &str, session_token: Option<&str>) -> Self {
        Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: session_token.map(str::to_string),
        }
    }

    pub fn from_env() -> Result<Self> {
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
            .context("AWS_ACCESS_KEY_ID environment variable not set")?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
            .context("AWS_SECRET_ACCESS_KEY environment variable not set")?;
        let session_token = std::env::var("AWS_SESSION_TOKEN").ok();

        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token,
        })
    }
}

/// `GetProducts` client used as the estimator's live [`PriceSource`].
pub struct AwsPricingClient {
    endpoint: String,
    host: String,
    credentials: AwsCredentials,
    client: reqwest::Client,
}

impl AwsPricingClient {
    pub fn new(config: &PricingConfig, credentials: AwsCredentials) -> Result<Self> {
        let url = reqwest::Url::parse(&config.endpoint)
            .with_context(|| format!("Invalid pricing endpoint: {}", config.endpoint))?;
        let host = match (url.host_str(), url.port()) {
            (Some(h), Some(p)) => format!("{}:{}", h, p),
            (Some(h), None) => h.to_string(),
            (None, _) => bail!("Pricing endpoint has no host: {}", config.endpoint),
        };
        let client = crate::http::client(config.timeout_secs)?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            host,
            credentials,
            client,
        })
    }

    /// Credentials from the environment.
    pub fn from_env(config: &PricingConfig) -> Result<Self> {
        Self::new(config, AwsCredentials::from_env()?)
    }

    async fn get_products(&self, body: &Value) -> Result<Value> {
        let payload = serde_json::to_vec(body)?;
        let signed = sign_request(&self.host, &payload, &self.credentials, Utc::now())?;

        let mut request = self
            .client
            .post(format!("{}/", self.endpoint))
            .header("content-type", CONTENT_TYPE)
            .header("x-amz-date", &signed.amz_date)
            .header("x-amz-target", TARGET)
            .header("authorization", &signed.authorization)
            .body(payload);
        if let Some(token) = &self.credentials.session_token {
            request = request.header("x-amz-security-token", token);
        }

        let response = request.send().await.context("Pricing API request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Pricing API error ({}): {}", status, body);
        }
        response
            .json()
            .await
            .context("Failed to parse Pricing API response")
    }
}

#[async_trait]
impl PriceSource for AwsPricingClient {
    async fn monthly_price(&self, change: &ResourceChange, region: &str) -> Result<Option<f64>> {
        let Some(body) = products_request(change, region) else {
            return Ok(None);
        };
        debug!(resource_type = %change.type_or_unknown(), %region, "querying pricing API");
        let response = self.get_products(&body).await?;
        first_monthly_price(&response)
    }
}

// ============ Request construction ============

fn term(field: &str, value: &str) -> Value {
    json!({ "Type": "TERM_MATCH", "Field": field, "Value": value })
}

/// `GetProducts` body for a resource, or `None` for unsupported types.
pub fn products_request(change: &ResourceChange, region: &str) -> Option<Value> {
    let values = change.after_values();
    let attr = |key: &str, default: &str| -> String {
        values
            .and_then(|v| v.get(key))
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .unwrap_or(default)
            .to_string()
    };
    let location = term("location", region_to_location(region));

    let (service, filters) = match change.resource_type.as_deref()? {
        "aws_instance" => (
            "AmazonEC2",
            vec![
                location,
                term("instanceType", &attr("instance_type", "t3.micro")),
                term("operatingSystem", "Linux"),
                term("preInstalledSw", "NA"),
                term("tenancy", "Shared"),
                term("capacitystatus", "Used"),
            ],
        ),
        "aws_s3_bucket" => (
            "AmazonS3",
            vec![
                location,
                term("storageClass", "General Purpose"),
                term("volumeType", "Standard"),
                term("productFamily", "Storage"),
            ],
        ),
        "aws_db_instance" => (
            "AmazonRDS",
            vec![
                location,
                term("instanceType", &attr("instance_class", "db.t3.micro")),
                term("deploymentOption", "Single-AZ"),
            ],
        ),
        _ => return None,
    };

    Some(json!({
        "ServiceCode": service,
        "Filters": filters,
        "FormatVersion": "aws_v1",
        "MaxResults": 1,
    }))
}

// ============ Response parsing ============

/// Monthly USD price from the first `PriceList` entry.
///
/// Each entry is a JSON document encoded as a string. The first on-demand
/// price dimension with a USD price is used; `Hrs` units are scaled by
/// [`HOURS_PER_MONTH`].
pub fn first_monthly_price(response: &Value) -> Result<Option<f64>> {
    let Some(first) = response
        .get("PriceList")
        .and_then(|l| l.as_array())
        .and_then(|l| l.first())
    else {
        return Ok(None);
    };

    let product: Value = match first {
        Value::String(s) => serde_json::from_str(s).context("Invalid PriceList entry")?,
        other => other.clone(),
    };

    let Some(on_demand) = product.pointer("/terms/OnDemand").and_then(|v| v.as_object()) else {
        return Ok(None);
    };

    for offer in on_demand.values() {
        let Some(dimensions) = offer.get("priceDimensions").and_then(|v| v.as_object()) else {
            continue;
        };
        for dimension in dimensions.values() {
            let Some(usd) = dimension.pointer("/pricePerUnit/USD").and_then(|v| v.as_str()) else {
                continue;
            };
            let price: f64 = usd
                .parse()
                .map_err(|_| anyhow!("Invalid USD price: {}", usd))?;
            let unit = dimension.get("unit").and_then(|u| u.as_str()).unwrap_or("");
            let monthly = if unit.eq_ignore_ascii_case("hrs") {
                price * HOURS_PER_MONTH
            } else {
                price
            };
            return Ok(Some(monthly));
        }
    }

    Ok(None)
}

// ============ AWS SigV4 Signing ============

#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub amz_date: String,
    pub authorization: String,
}

/// Sign a `GetProducts` POST for `host` at time `now`.
pub fn sign_request(
    host: &str,
    payload: &[u8],
    credentials: &AwsCredentials,
    now: DateTime<Utc>,
) -> Result<SignedHeaders> {
    let date_stamp = now.format("%Y%m%d").to_string();
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let payload_hash = hex_sha256(payload);

    let mut headers: Vec<(&str, String)> = vec![
        ("content-type", CONTENT_TYPE.to_string()),
        ("host", host.to_string()),
        ("x-amz-date", amz_date.clone()),
        ("x-amz-target", TARGET.to_string()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token", token.clone()));
    }
    headers.sort_by(|a, b| a.0.cmp(b.0));

    let canonical_headers: String = headers
        .iter()
        .map(|(k, v)| format!("{}:{}\n", k, v.trim()))
        .collect();
    let signed_headers: String = headers
        .iter()
        .map(|(k, _)| *k)
        .collect::<Vec<_>>()
        .join(";");

    let canonical_request = format!(
        "POST\n/\n\n{}\n{}\n{}",
        canonical_headers, signed_headers, payload_hash
    );

    let credential_scope = format!("{}/{}/{}/aws4_request", date_stamp, SIGNING_REGION, SERVICE);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        credential_scope,
        hex_sha256(canonical_request.as_bytes())
    );

    let signing_key = derive_signing_key(
        &credentials.secret_access_key,
        &date_stamp,
        SIGNING_REGION,
        SERVICE,
    )?;
    let signature = hex::encode(hmac_sha256(&signing_key, string_to_sign.as_bytes())?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        credentials.access_key_id, credential_scope, signed_headers, signature
    );

    Ok(SignedHeaders {
        amz_date,
        authorization,
    })
}

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
    let mut mac =
        HmacSha256::new_from_slice(key).map_err(|e| anyhow!("Invalid HMAC key: {}", e))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Derive the AWS SigV4 signing key for a given date, region, and service.
///
/// ```text
/// kDate    = HMAC("AWS4" + secret, dateStamp)
/// kRegion  = HMAC(kDate, region)
/// kService = HMAC(kRegion, service)
/// kSigning = HMAC(kService, "aws4_request")
/// ```
pub fn derive_signing_key(
    secret_key: &str,
    date_stamp: &str,
    region: &str,
    service: &str,
) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(
        format!("AWS4{}", secret_key).as_bytes(),
        date_stamp.as_bytes(),
    )?;
    let k_region = hmac_sha256(&k_date, region.as_bytes())?;
    let k_service = hmac_sha256(&k_region, service.as_bytes())?;
    hmac_sha256(&k_service, b"aws4_request")
}
