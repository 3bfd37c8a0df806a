// Google Sheets store adapter.
//
// The pool is a worksheet with a header row and one row per card:
// `Card Name`, `Color`, `Status`, `Reserved By`. A non-empty Status (or a
// non-empty Reserved By) marks the row as reserved. Reads are served from a
// TTL cache; every mutation re-reads the sheet fresh under a process-wide
// write lock, which is the conditional-update strategy here since the Sheets
// API has no native compare-and-swap.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::draft::card::{normalize_user, CardRecord, CardStatus, Color};
use crate::store::{CardStore, ReserveOutcome, ResetReport, StoreError};

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/v4/spreadsheets";

const COL_CARD_NAME: &str = "Card Name";
const COL_COLOR: &str = "Color";
const COL_STATUS: &str = "Status";
const COL_RESERVED_BY: &str = "Reserved By";
const REQUIRED_COLS: [&str; 4] = [COL_CARD_NAME, COL_COLOR, COL_STATUS, COL_RESERVED_BY];

/// Marker written to the Status column when a card is reserved.
const RESERVED_MARKER: &str = "reserved";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Subset of the Sheets API `ValueRange` response.
#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

// ---------------------------------------------------------------------------
// Parsed sheet data
// ---------------------------------------------------------------------------

/// One data row of the pool worksheet, with its 1-based sheet row index so
/// writes can address the exact cells.
#[derive(Debug, Clone, PartialEq)]
struct PoolRow {
    row_index: usize,
    record: CardRecord,
}

/// The parsed worksheet: header positions plus all well-formed card rows.
#[derive(Debug, Clone)]
struct SheetTable {
    /// Header name -> 0-based column index.
    col_map: HashMap<String, usize>,
    rows: Vec<PoolRow>,
}

impl SheetTable {
    fn find(&self, name: &str, color: Color) -> Option<&PoolRow> {
        self.rows
            .iter()
            .find(|r| r.record.name == name && r.record.color == color)
    }

    fn col(&self, header: &str) -> usize {
        // Header presence is validated in parse_table.
        self.col_map[header]
    }
}

/// Parse the raw cell grid into a [`SheetTable`].
///
/// The first row must contain all required headers. Data rows with a blank
/// name are skipped silently (spacer rows); rows with an unparseable color
/// are skipped with a warning so one bad row cannot take the pool down.
fn parse_table(values: &[Vec<serde_json::Value>]) -> Result<SheetTable, StoreError> {
    let Some(header_row) = values.first() else {
        return Err(StoreError::Data("sheet is empty, no header row".into()));
    };

    let col_map: HashMap<String, usize> = header_row
        .iter()
        .enumerate()
        .map(|(i, cell)| (cell_text(cell), i))
        .collect();

    let missing: Vec<&str> = REQUIRED_COLS
        .iter()
        .filter(|col| !col_map.contains_key(**col))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(StoreError::Data(format!(
            "missing required columns: {}",
            missing.join(", ")
        )));
    }

    let name_col = col_map[COL_CARD_NAME];
    let color_col = col_map[COL_COLOR];
    let status_col = col_map[COL_STATUS];
    let reserved_col = col_map[COL_RESERVED_BY];

    let mut rows = Vec::new();
    for (i, cells) in values.iter().enumerate().skip(1) {
        let name = cell_at(cells, name_col);
        if name.is_empty() {
            continue;
        }

        let color_text = cell_at(cells, color_col);
        let Ok(color) = color_text.parse::<Color>() else {
            warn!(row = i + 1, name, color = color_text, "skipping row with unknown color");
            continue;
        };

        let status_text = cell_at(cells, status_col);
        let reserved_text = cell_at(cells, reserved_col);
        // Either a Status marker or an owner marks the row reserved; the two
        // are written together but a half-cleared row still counts.
        let reserved = !status_text.is_empty() || !reserved_text.is_empty();

        rows.push(PoolRow {
            row_index: i + 1,
            record: CardRecord {
                name,
                color,
                status: if reserved {
                    CardStatus::Reserved
                } else {
                    CardStatus::Available
                },
                reserved_by: if reserved_text.is_empty() {
                    None
                } else {
                    Some(reserved_text)
                },
            },
        });
    }

    Ok(SheetTable { col_map, rows })
}

fn cell_text(cell: &serde_json::Value) -> String {
    match cell.as_str() {
        Some(s) => s.trim().to_string(),
        None if cell.is_null() => String::new(),
        None => cell.to_string(),
    }
}

fn cell_at(cells: &[serde_json::Value], index: usize) -> String {
    // The API omits trailing empty cells, so short rows are normal.
    cells.get(index).map(cell_text).unwrap_or_default()
}

/// 0-based column index to its A1 letter(s): 0 -> A, 25 -> Z, 26 -> AA.
fn col_letter(mut index: usize) -> String {
    let mut letters = Vec::new();
    loop {
        letters.push(b'A' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    letters.reverse();
    String::from_utf8(letters).expect("A1 letters are ASCII")
}

/// A1 reference for a single cell, worksheet-qualified.
fn cell_ref(worksheet: &str, row_index: usize, col_index: usize) -> String {
    format!("'{worksheet}'!{}{row_index}", col_letter(col_index))
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct Cached {
    table: SheetTable,
    fetched_at: Instant,
}

pub struct SheetsStore {
    http: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    worksheet: String,
    access_token: Option<String>,
    cache_ttl: Duration,
    cache: Mutex<Option<Cached>>,
    /// Serializes all mutations so the re-read and the write of a
    /// reservation form one critical section. Reads never take this.
    write_lock: Mutex<()>,
}

impl SheetsStore {
    /// Build a store from config and verify the sheet is reachable and
    /// well-formed, so a misconfigured deployment fails at startup instead
    /// of on the first player request.
    pub async fn connect(config: &Config) -> Result<Self, StoreError> {
        let store = Self::with_base_url(config, SHEETS_API_BASE)?;
        let table = store.fetch_table().await?;
        info!(
            rows = table.rows.len(),
            worksheet = %store.worksheet,
            "connected to card pool sheet"
        );
        *store.cache.lock().await = Some(Cached {
            table,
            fetched_at: Instant::now(),
        });
        Ok(store)
    }

    /// Constructor with an overridable API base URL; tests point this at a
    /// local stub server.
    pub(crate) fn with_base_url(config: &Config, base_url: &str) -> Result<Self, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.sheet.timeout_secs))
            .build()
            .map_err(|e| StoreError::Unavailable(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: config.sheet.spreadsheet_id.clone(),
            worksheet: config.sheet.worksheet.clone(),
            access_token: config.credentials.sheets_access_token.clone(),
            cache_ttl: Duration::from_secs(config.sheet.cache_ttl_secs),
            cache: Mutex::new(None),
            write_lock: Mutex::new(()),
        })
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/{}/values/{range}", self.base_url, self.spreadsheet_id)
    }

    fn batch_update_url(&self) -> String {
        format!(
            "{}/{}/values:batchUpdate",
            self.base_url, self.spreadsheet_id
        )
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Fetch and parse the whole worksheet, bypassing the cache.
    async fn fetch_table(&self) -> Result<SheetTable, StoreError> {
        let url = self.values_url(&self.worksheet);
        let response = self
            .authorize(self.http.get(&url))
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await
            .map_err(request_error)?;

        let response = check_status(response)?;
        let value_range: ValueRange = response
            .json()
            .await
            .map_err(|e| StoreError::Data(format!("malformed values response: {e}")))?;

        parse_table(&value_range.values)
    }

    /// Serve reads from the cache when it is fresh enough, refetching
    /// otherwise. A TTL of zero disables caching entirely.
    async fn cached_table(&self) -> Result<SheetTable, StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref() {
            if !self.cache_ttl.is_zero() && cached.fetched_at.elapsed() < self.cache_ttl {
                return Ok(cached.table.clone());
            }
        }

        debug!("sheet cache empty or expired, refetching");
        let table = self.fetch_table().await?;
        *cache = Some(Cached {
            table: table.clone(),
            fetched_at: Instant::now(),
        });
        Ok(table)
    }

    async fn invalidate_cache(&self) {
        *self.cache.lock().await = None;
    }

    /// Write a set of single-cell updates in one batch.
    async fn write_cells(&self, data: Vec<serde_json::Value>) -> Result<(), StoreError> {
        let body = json!({
            "valueInputOption": "RAW",
            "data": data,
        });
        let response = self
            .authorize(self.http.post(self.batch_update_url()))
            .json(&body)
            .send()
            .await
            .map_err(request_error)?;
        check_status(response)?;
        Ok(())
    }
}

fn request_error(err: reqwest::Error) -> StoreError {
    StoreError::Unavailable(format!("sheets api request failed: {err}"))
}

/// Map HTTP status codes: rate limits and server errors are transient,
/// anything else non-success is a configuration or data problem that a
/// retry will not fix.
fn check_status(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        return Err(StoreError::Unavailable(format!(
            "sheets api returned {status}"
        )));
    }
    Err(StoreError::Data(format!("sheets api returned {status}")))
}

#[async_trait]
impl CardStore for SheetsStore {
    async fn fetch_by_color(&self, color: Color) -> Result<Vec<CardRecord>, StoreError> {
        let table = self.cached_table().await?;
        Ok(table
            .rows
            .into_iter()
            .filter(|r| r.record.color == color)
            .map(|r| r.record)
            .collect())
    }

    async fn fetch_card(
        &self,
        name: &str,
        color: Color,
    ) -> Result<Option<CardRecord>, StoreError> {
        let table = self.cached_table().await?;
        Ok(table.find(name, color).map(|r| r.record.clone()))
    }

    async fn conditional_reserve(
        &self,
        name: &str,
        color: Color,
        new_owner: &str,
    ) -> Result<ReserveOutcome, StoreError> {
        // Hold the write lock across re-read and write: within this process
        // the availability check cannot go stale before the cells land.
        let _guard = self.write_lock.lock().await;

        let table = self.fetch_table().await?;
        let Some(row) = table.find(name, color) else {
            return Ok(ReserveOutcome::NotFound);
        };

        if row.record.status == CardStatus::Reserved {
            return Ok(ReserveOutcome::Conflict {
                reserved_by: row.record.reserved_by.clone(),
            });
        }

        let owner = normalize_user(new_owner);
        let updates = vec![
            json!({
                "range": cell_ref(&self.worksheet, row.row_index, table.col(COL_STATUS)),
                "values": [[RESERVED_MARKER]],
            }),
            json!({
                "range": cell_ref(&self.worksheet, row.row_index, table.col(COL_RESERVED_BY)),
                "values": [[owner.as_str()]],
            }),
        ];
        let updated = CardRecord {
            name: row.record.name.clone(),
            color,
            status: CardStatus::Reserved,
            reserved_by: Some(owner.clone()),
        };

        self.write_cells(updates).await?;
        self.invalidate_cache().await;
        info!(card = name, %color, %owner, "sheet reservation written");
        Ok(ReserveOutcome::Reserved(updated))
    }

    async fn reset_all(&self) -> Result<ResetReport, StoreError> {
        let _guard = self.write_lock.lock().await;

        let table = self.fetch_table().await?;
        let status_col = table.col(COL_STATUS);
        let reserved_col = table.col(COL_RESERVED_BY);

        let mut updates = Vec::new();
        let mut cleared = 0;
        for row in &table.rows {
            if row.record.status == CardStatus::Reserved || row.record.reserved_by.is_some() {
                updates.push(json!({
                    "range": cell_ref(&self.worksheet, row.row_index, status_col),
                    "values": [[""]],
                }));
                updates.push(json!({
                    "range": cell_ref(&self.worksheet, row.row_index, reserved_col),
                    "values": [[""]],
                }));
                cleared += 1;
            }
        }

        if updates.is_empty() {
            return Ok(ResetReport::default());
        }

        self.write_cells(updates).await?;
        self.invalidate_cache().await;
        info!(cleared, "sheet pool reset");
        Ok(ResetReport {
            cleared,
            failures: Vec::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Stub-server tests: exercise the HTTP paths against a local fake Sheets API
// ---------------------------------------------------------------------------
