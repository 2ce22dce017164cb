//! Google Sheets v4 backend.
//!
//! Talks REST directly with `reqwest`. Authentication is either a static
//! OAuth access token or a service-account key, in which case an RS256
//! assertion is exchanged at the key's `token_uri` and the access token is
//! cached until a minute before it expires.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::{column_letter, Ledger, Sheet};
use crate::config::{ServiceAccountKey, SheetsConfig, SheetsCredentials};

const API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const READ_LIMIT_ROW: usize = 1000;

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

enum TokenSource {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

pub struct SheetsLedger {
    http: reqwest::Client,
    spreadsheet_id: String,
    tokens: TokenSource,
    base: String,
}

impl SheetsLedger {
    pub fn new(config: &SheetsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let tokens = match &config.credentials {
            SheetsCredentials::AccessToken(t) => TokenSource::Static(t.clone()),
            SheetsCredentials::ServiceAccount(key) => TokenSource::ServiceAccount {
                key: key.clone(),
                cached: Mutex::new(None),
            },
        };
        Ok(SheetsLedger {
            http,
            spreadsheet_id: config.spreadsheet_id.clone(),
            tokens,
            base: API_BASE.to_string(),
        })
    }

    /// Point at another API root (a local fake in tests).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn access_token(&self) -> Result<String> {
        let (key, cached) = match &self.tokens {
            TokenSource::Static(t) => return Ok(t.clone()),
            TokenSource::ServiceAccount { key, cached } => (key, cached),
        };
        let mut guard = cached.lock().await;
        if let Some((token, expires)) = guard.as_ref() {
            if Instant::now() < *expires {
                return Ok(token.clone());
            }
        }
        let now = chrono::Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &key.client_email,
            scope: SCOPE,
            aud: &key.token_uri,
            iat: now,
            exp: now + 3600,
        };
        let signing = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .context("service account private_key is not a valid RSA PEM")?;
        let assertion = encode(&Header::new(Algorithm::RS256), &claims, &signing)?;
        let resp: TokenResponse = self
            .http
            .post(&key.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let ttl = Duration::from_secs(resp.expires_in.saturating_sub(60));
        *guard = Some((resp.access_token.clone(), Instant::now() + ttl));
        Ok(resp.access_token)
    }

    fn range_url(&self, range: &str) -> String {
        format!(
            "{}/{}/values/{}",
            self.base,
            self.spreadsheet_id,
            urlencoding::encode(range)
        )
    }

    async fn batch_update(&self, requests: Value) -> Result<()> {
        let token = self.access_token().await?;
        self.http
            .post(format!("{}/{}:batchUpdate", self.base, self.spreadsheet_id))
            .bearer_auth(token)
            .json(&json!({ "requests": requests }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn write_values(&self, range: &str, values: Vec<Vec<String>>) -> Result<()> {
        let token = self.access_token().await?;
        self.http
            .put(self.range_url(range))
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(token)
            .json(&json!({ "majorDimension": "ROWS", "values": values }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    async fn find_sheet_id(&self, title: &str) -> Result<Option<i64>> {
        let token = self.access_token().await?;
        let meta: SpreadsheetMeta = self
            .http
            .get(format!("{}/{}", self.base, self.spreadsheet_id))
            .query(&[("fields", "sheets.properties")])
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(meta
            .sheets
            .into_iter()
            .find(|s| s.properties.title == title)
            .map(|s| s.properties.sheet_id))
    }

    /// The sheet's numeric id, creating the tab (with header) if missing.
    async fn sheet_id(&self, sheet: Sheet) -> Result<i64> {
        if let Some(id) = self.find_sheet_id(sheet.title()).await? {
            return Ok(id);
        }
        self.batch_update(json!([{ "addSheet": { "properties": { "title": sheet.title() } } }]))
            .await?;
        self.write_header_row(sheet).await?;
        self.find_sheet_id(sheet.title())
            .await?
            .ok_or_else(|| anyhow!("sheet {} missing after addSheet", sheet.title()))
    }

    async fn write_header_row(&self, sheet: Sheet) -> Result<()> {
        let last = column_letter(sheet.width() - 1);
        let header = sheet.header().iter().map(|h| h.to_string()).collect();
        self.write_values(&a1(sheet, &format!("A1:{}1", last)), vec![header])
            .await
    }
}

/// `'SALT 상담신청'!A2:N1000`
fn a1(sheet: Sheet, cells: &str) -> String {
    format!("'{}'!{}", sheet.title(), cells)
}

fn cell_text(v: Value) -> String {
    match v {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Ledger for SheetsLedger {
    async fn read_rows(&self, sheet: Sheet) -> Result<Vec<Vec<String>>> {
        let token = self.access_token().await?;
        let last = column_letter(sheet.width() - 1);
        let range = a1(sheet, &format!("A2:{}{}", last, READ_LIMIT_ROW));
        let body: ValueRange = self
            .http
            .get(self.range_url(&range))
            .bearer_auth(token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn insert_top(&self, sheet: Sheet, row: Vec<String>) -> Result<()> {
        let sheet_id = self.sheet_id(sheet).await?;
        self.batch_update(json!([{
            "insertDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": 1,
                    "endIndex": 2
                },
                "inheritFromBefore": false
            }
        }]))
        .await?;
        self.write_values(&a1(sheet, "A2"), vec![row]).await
    }

    async fn update_cell(
        &self,
        sheet: Sheet,
        index: usize,
        column: usize,
        value: String,
    ) -> Result<()> {
        let cell = format!("{}{}", column_letter(column), index + 2);
        self.write_values(&a1(sheet, &cell), vec![vec![value]]).await
    }

    async fn delete_row(&self, sheet: Sheet, index: usize) -> Result<()> {
        let sheet_id = self
            .find_sheet_id(sheet.title())
            .await?
            .ok_or_else(|| anyhow!("sheet {} not found", sheet.title()))?;
        self.batch_update(json!([{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": index + 1,
                    "endIndex": index + 2
                }
            }
        }]))
        .await
    }

    async fn write_header(&self, sheet: Sheet) -> Result<()> {
        if self.find_sheet_id(sheet.title()).await?.is_none() {
            // sheet_id() creates the tab and writes the header.
            self.sheet_id(sheet).await?;
            return Ok(());
        }
        self.write_header_row(sheet).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_ranges_quote_titles() {
        assert_eq!(a1(Sheet::Salt, "A2"), "'SALT 상담신청'!A2");
        assert_eq!(a1(Sheet::Questions, "E5"), "'고객 질문'!E5");
    }

    #[test]
    fn cells_render_as_text() {
        assert_eq!(cell_text(json!("x")), "x");
        assert_eq!(cell_text(json!(4)), "4");
        assert_eq!(cell_text(Value::Null), "");
    }

    #[tokio::test]
    async fn static_token_is_used_verbatim() {
        let ledger = SheetsLedger::new(&SheetsConfig {
            spreadsheet_id: "sheet".into(),
            credentials: SheetsCredentials::AccessToken("ya29.token".into()),
        })
        .unwrap();
        assert_eq!(ledger.access_token().await.unwrap(), "ya29.token");
        assert!(ledger
            .range_url("'간편견적'!A2:O1000")
            .starts_with("https://sheets.googleapis.com/v4/spreadsheets/sheet/values/"));
    }
}
