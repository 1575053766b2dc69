//! # Spreadsheet Source
//!
//! Secondary lookup against a published Google spreadsheet through the
//! visualization query endpoint (`gviz/tq`). Each configured tab is queried
//! in order with a server-side filter on the code column; the first tab that
//! returns a row wins.
//!
//! Responses come wrapped in a JavaScript callback:
//!
//! ```text
//! /*O_o*/
//! google.visualization.Query.setResponse({"status":"ok","table":{...}});
//! ```
//!
//! Rows are positional. [`SheetSchema`] names each column offset so a layout
//! change is reported as an error instead of silently misreading fields.

use super::catalog::{parse_extra_services, ShipmentStatus};
use super::models::ShipmentRecord;
use super::timeline::{parse_local_datetime, synthesize_events, TimelineInput};
use super::{SecondarySource, ShipmentCode};
use crate::core::config::{SheetConfig, TimelineConfig};
use crate::core::error::{TrackingError, TrackingResult};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Named column offsets of a spreadsheet row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetSchema {
    pub version: u32,
    pub start_date: usize,
    pub code: usize,
    pub customer_code: usize,
    pub recipient: usize,
    pub address: usize,
    pub category: usize,
    pub quantity: usize,
    pub status: usize,
    pub operator: usize,
    pub reasons: usize,
    pub end_date: usize,
}

impl SheetSchema {
    pub const V1: SheetSchema = SheetSchema {
        version: 1,
        start_date: 0,
        code: 1,
        customer_code: 2,
        recipient: 3,
        address: 4,
        category: 5,
        quantity: 6,
        status: 7,
        operator: 8,
        reasons: 9,
        end_date: 10,
    };

    pub fn for_version(version: u32) -> TrackingResult<Self> {
        match version {
            1 => Ok(Self::V1),
            other => Err(TrackingError::config(format!(
                "unknown sheet schema version {}",
                other
            ))),
        }
    }

    /// Minimum number of cells a row must have
    pub fn width(&self) -> usize {
        [
            self.start_date,
            self.code,
            self.customer_code,
            self.recipient,
            self.address,
            self.category,
            self.quantity,
            self.status,
            self.operator,
            self.reasons,
            self.end_date,
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
            + 1
    }
}

#[derive(Debug, Deserialize)]
struct GvizResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    errors: Vec<GvizMessage>,
    table: Option<GvizTable>,
}

#[derive(Debug, Deserialize)]
struct GvizMessage {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    detailed_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GvizTable {
    #[serde(default)]
    rows: Vec<GvizRow>,
}

#[derive(Debug, Deserialize)]
struct GvizRow {
    #[serde(default)]
    c: Vec<Option<GvizCell>>,
}

#[derive(Debug, Deserialize)]
struct GvizCell {
    #[serde(default)]
    v: Value,
    #[serde(default)]
    f: Option<String>,
}

/// Strip the callback wrapper around a gviz JSON payload
fn strip_envelope(body: &str) -> TrackingResult<&str> {
    let start = body
        .find('(')
        .ok_or_else(|| TrackingError::sheet("response is not a gviz payload"))?;
    let inner = body[start + 1..].trim_end();
    let inner = inner
        .strip_suffix(");")
        .or_else(|| inner.strip_suffix(')'))
        .ok_or_else(|| TrackingError::sheet("gviz payload is not terminated"))?;
    Ok(inner)
}

fn cell_text(cell: Option<&GvizCell>) -> String {
    let Some(cell) = cell else {
        return String::new();
    };

    match &cell.v {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => i.to_string(),
            (None, Some(f)) if f.fract() == 0.0 => format!("{:.0}", f),
            _ => n.to_string(),
        },
        Value::Bool(b) => b.to_string(),
        Value::Null => cell.f.as_deref().unwrap_or_default().trim().to_string(),
        other => other.to_string(),
    }
}

/// Parse a gviz date literal, `Date(year, month0, day[, h, m, s])`
fn parse_gviz_date(raw: &str, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let args = raw.trim().strip_prefix("Date(")?.strip_suffix(')')?;
    let parts: Vec<u32> = args
        .split(',')
        .map(|part| part.trim().parse().ok())
        .collect::<Option<_>>()?;
    if parts.len() < 3 {
        return None;
    }

    let part = |i: usize| parts.get(i).copied().unwrap_or(0);
    let naive = NaiveDate::from_ymd_opt(i32::try_from(parts[0]).ok()?, parts[1].checked_add(1)?, parts[2])?
        .and_hms_opt(part(3), part(4), part(5))?;
    offset.from_local_datetime(&naive).single()
}

fn cell_datetime(cell: Option<&GvizCell>, offset: FixedOffset) -> Option<DateTime<FixedOffset>> {
    let text = cell_text(cell);
    parse_gviz_date(&text, offset)
        .or_else(|| parse_local_datetime(&text, offset))
        .or_else(|| {
            cell.and_then(|c| c.f.as_deref())
                .and_then(|formatted| parse_local_datetime(formatted, offset))
        })
}

/// One decoded spreadsheet row
#[derive(Debug, Clone, PartialEq)]
pub struct SheetShipment {
    pub start: DateTime<FixedOffset>,
    pub code: String,
    pub customer_code: String,
    pub recipient: String,
    pub address: String,
    pub category: String,
    pub quantity: u32,
    pub status: ShipmentStatus,
    pub operator: String,
    pub reasons: Vec<String>,
    pub end: Option<DateTime<FixedOffset>>,
}

impl SheetShipment {
    /// Map into the unified record, synthesizing events
    pub fn normalize(&self, origin: &str, timeline: &TimelineConfig) -> ShipmentRecord {
        let events = synthesize_events(
            &TimelineInput {
                code: &self.code,
                status: self.status,
                start: self.start,
                end: self.end,
                origin,
                destination: &self.address,
                operator: &self.operator,
                reasons: &self.reasons,
            },
            timeline,
        );

        ShipmentRecord {
            code: self.code.clone(),
            origin: origin.to_string(),
            destination: self.address.clone(),
            quantity: self.quantity,
            description: self.recipient.clone(),
            status: self.status.title().to_string(),
            extra_services: parse_extra_services(&self.category),
            events,
        }
    }
}

fn decode_row(
    row: &GvizRow,
    schema: &SheetSchema,
    expected_code: &str,
    offset: FixedOffset,
) -> TrackingResult<SheetShipment> {
    let mismatch = |message: String| TrackingError::sheet_schema(schema.version, message);

    if row.c.len() < schema.width() {
        return Err(mismatch(format!(
            "row has {} columns, expected at least {}",
            row.c.len(),
            schema.width()
        )));
    }

    let cell = |index: usize| row.c.get(index).and_then(Option::as_ref);
    let text = |index: usize| cell_text(cell(index));

    let code = text(schema.code).to_uppercase();
    if code != expected_code {
        return Err(mismatch(format!(
            "code column holds '{}' where '{}' was requested",
            code, expected_code
        )));
    }

    let start = cell_datetime(cell(schema.start_date), offset).ok_or_else(|| {
        mismatch(format!("unreadable start date '{}'", text(schema.start_date)))
    })?;

    let raw_quantity = text(schema.quantity);
    let quantity = if raw_quantity.is_empty() {
        1
    } else {
        raw_quantity
            .parse::<f64>()
            .ok()
            .filter(|q| *q >= 0.0)
            .map(|q| q as u32)
            .ok_or_else(|| mismatch(format!("unreadable quantity '{}'", raw_quantity)))?
    };

    let raw_status = text(schema.status);
    let status = if raw_status.is_empty() {
        ShipmentStatus::New
    } else {
        ShipmentStatus::resolve(&raw_status)
            .ok_or_else(|| mismatch(format!("unknown status '{}'", raw_status)))?
    };

    let reasons = text(schema.reasons)
        .split(|c| c == ',' || c == ';' || c == '\n')
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .map(str::to_string)
        .collect();

    let end = match cell_datetime(cell(schema.end_date), offset) {
        Some(end) => Some(end),
        None => {
            let raw_end = text(schema.end_date);
            if !raw_end.is_empty() {
                warn!("Ignoring unreadable end date '{}' for {}", raw_end, code);
            }
            None
        }
    };

    Ok(SheetShipment {
        start,
        customer_code: text(schema.customer_code),
        recipient: text(schema.recipient),
        address: text(schema.address),
        category: text(schema.category),
        quantity,
        status,
        operator: text(schema.operator),
        reasons,
        end,
        code,
    })
}

/// Client for the published spreadsheet
pub struct SheetClient {
    http: reqwest::Client,
    config: SheetConfig,
    schema: SheetSchema,
    timeline: TimelineConfig,
    offset: FixedOffset,
}

impl SheetClient {
    pub fn new(
        config: SheetConfig,
        timeline: TimelineConfig,
        offset: FixedOffset,
    ) -> TrackingResult<Self> {
        let schema = SheetSchema::for_version(config.schema_version)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| TrackingError::internal(format!("failed to build sheet HTTP client: {}", e)))?;

        Ok(Self {
            http,
            config,
            schema,
            timeline,
            offset,
        })
    }

    fn query_url(&self, tab: &str, code: &str) -> TrackingResult<Url> {
        let endpoint = format!(
            "{}/spreadsheets/d/{}/gviz/tq",
            self.config.base_url.trim_end_matches('/'),
            self.config.spreadsheet_id
        );
        let query = format!("select * where {} = '{}'", self.config.code_column, code);

        Url::parse_with_params(
            &endpoint,
            &[("tqx", "out:json"), ("sheet", tab), ("tq", query.as_str())],
        )
        .map_err(|e| TrackingError::config(format!("invalid sheet URL '{}': {}", endpoint, e)))
    }

    async fn query_tab(&self, tab: &str, code: &str) -> TrackingResult<Option<SheetShipment>> {
        let url = self.query_url(tab, code)?;
        debug!("Querying sheet tab {} for {}", tab, code);

        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| TrackingError::sheet(format!("request for tab '{}' failed: {}", tab, e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackingError::sheet(format!(
                "tab '{}' answered with HTTP {}",
                tab, status
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| TrackingError::sheet(format!("reading tab '{}' failed: {}", tab, e)))?;

        let payload: GvizResponse = serde_json::from_str(strip_envelope(&body)?)
            .map_err(|e| TrackingError::sheet(format!("malformed response for tab '{}': {}", tab, e)))?;

        if payload.status == "error" {
            let reasons: Vec<String> = payload
                .errors
                .iter()
                .map(|e| e.detailed_message.clone().unwrap_or_else(|| e.reason.clone()))
                .collect();
            return Err(TrackingError::sheet(format!(
                "query on tab '{}' failed: {}",
                tab,
                reasons.join("; ")
            )));
        }

        let rows = payload.table.map(|table| table.rows).unwrap_or_default();
        if rows.len() > 1 {
            warn!("Tab {} has {} rows for {}, using the first", tab, rows.len(), code);
        }

        rows.first()
            .map(|row| decode_row(row, &self.schema, code, self.offset))
            .transpose()
    }

    /// Scan the configured tabs in order for a row matching `code`
    pub async fn find(&self, code: &ShipmentCode) -> TrackingResult<Option<SheetShipment>> {
        for tab in &self.config.tabs {
            if let Some(shipment) = self.query_tab(tab, code.as_str()).await? {
                debug!("Found {} in sheet tab {}", code, tab);
                return Ok(Some(shipment));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl SecondarySource for SheetClient {
    async fn fetch(&self, code: &ShipmentCode) -> TrackingResult<Option<ShipmentRecord>> {
        Ok(self
            .find(code)
            .await?
            .map(|shipment| shipment.normalize(&self.config.default_origin, &self.timeline)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(7 * 3600).unwrap()
    }

    fn gviz_body(payload: Value) -> String {
        format!(
            "/*O_o*/\ngoogle.visualization.Query.setResponse({});",
            payload
        )
    }

    fn row_cells(code: &str, status: &str) -> Value {
        json!({"c": [
            {"v": "Date(2024,2,1,8,0,0)", "f": "01/03/2024 08:00:00"},
            {"v": code},
            {"v": "KH23"},
            {"v": "Trần Thị B"},
            {"v": "12 Lê Lợi, Hà Nội"},
            {"v": "PHG+DE+XX"},
            {"v": 2.0},
            {"v": status},
            {"v": "Nguyễn Văn A"},
            {"v": "Sai địa chỉ, Vắng nhà"},
            null
        ]})
    }

    fn table(rows: Vec<Value>) -> String {
        gviz_body(json!({"version": "0.6", "status": "ok", "table": {"cols": [], "rows": rows}}))
    }

    async fn client_for(server: &MockServer, tabs: &[&str]) -> SheetClient {
        let config = SheetConfig {
            base_url: server.uri(),
            spreadsheet_id: "SHEET".to_string(),
            tabs: tabs.iter().map(|t| t.to_string()).collect(),
            ..SheetConfig::default()
        };
        SheetClient::new(config, TimelineConfig::default(), offset()).unwrap()
    }

    fn code(raw: &str) -> ShipmentCode {
        ShipmentCode::parse(raw).unwrap()
    }

    #[test]
    fn test_strip_envelope() {
        let body = gviz_body(json!({"status": "ok"}));
        assert_eq!(strip_envelope(&body).unwrap(), r#"{"status":"ok"}"#);
        assert!(strip_envelope("{\"status\":\"ok\"}").is_err());
        assert!(strip_envelope("setResponse({}").is_err());
    }

    #[test]
    fn test_gviz_dates() {
        let expected = offset().with_ymd_and_hms(2024, 1, 15, 8, 30, 0).unwrap();
        assert_eq!(parse_gviz_date("Date(2024,0,15,8,30,0)", offset()), Some(expected));
        assert_eq!(
            parse_gviz_date("Date(2024,11,31)", offset()),
            Some(offset().with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_gviz_date("Date(2024,12,1)", offset()), None);
        assert_eq!(parse_gviz_date("2024-01-15", offset()), None);
        assert_eq!(parse_gviz_date("Date(2024,4294967295,1)", offset()), None);
    }

    #[test]
    fn test_decode_row() {
        let row: GvizRow = serde_json::from_value(row_cells("abc123456", "Phát thất bại")).unwrap();
        let shipment = decode_row(&row, &SheetSchema::V1, "ABC123456", offset()).unwrap();

        assert_eq!(shipment.code, "ABC123456");
        assert_eq!(shipment.quantity, 2);
        assert_eq!(shipment.status, ShipmentStatus::Failed);
        assert_eq!(shipment.reasons, vec!["Sai địa chỉ", "Vắng nhà"]);
        assert_eq!(shipment.end, None);
        assert_eq!(shipment.start, offset().with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap());
    }

    #[test]
    fn test_schema_mismatch_fails_loudly() {
        let narrow: GvizRow = serde_json::from_value(json!({"c": [{"v": "x"}, {"v": "ABC123456"}]})).unwrap();
        let err = decode_row(&narrow, &SheetSchema::V1, "ABC123456", offset()).unwrap_err();
        assert!(matches!(err, TrackingError::SheetSchema { version: 1, .. }));

        let shifted: GvizRow = serde_json::from_value(row_cells("OTHER1234", "Mới")).unwrap();
        assert!(decode_row(&shifted, &SheetSchema::V1, "ABC123456", offset()).is_err());

        let bad_status: GvizRow = serde_json::from_value(row_cells("ABC123456", "Đang bay")).unwrap();
        assert!(decode_row(&bad_status, &SheetSchema::V1, "ABC123456", offset()).is_err());

        assert_eq!(SheetSchema::V1.width(), 11);
        assert!(SheetSchema::for_version(2).is_err());
    }

    #[tokio::test]
    async fn test_scans_tabs_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/d/SHEET/gviz/tq"))
            .and(query_param("sheet", "T1"))
            .respond_with(ResponseTemplate::new(200).set_body_string(table(vec![])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/spreadsheets/d/SHEET/gviz/tq"))
            .and(query_param("sheet", "T2"))
            .and(query_param("tq", "select * where B = 'ABC123456'"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(table(vec![row_cells("ABC123456", "Đi phát")])),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server, &["T1", "T2", "T3"]).await;
        let record = client.fetch(&code("abc123456")).await.unwrap().unwrap();

        assert_eq!(record.code, "ABC123456");
        assert_eq!(record.status, "Đi phát");
        assert_eq!(record.destination, "12 Lê Lợi, Hà Nội");
        assert_eq!(record.origin, SheetConfig::default().default_origin);
        let services: Vec<_> = record.extra_services.iter().map(|s| s.code.as_str()).collect();
        assert_eq!(services, vec!["PHG", "DE"]);
        assert_eq!(record.events.len(), 3);
    }

    #[tokio::test]
    async fn test_missing_everywhere_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(table(vec![])))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_for(&server, &["T1", "T2"]).await;
        assert_eq!(client.fetch(&code("NOPE000001")).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_error_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("sheet", "Broken"))
            .respond_with(ResponseTemplate::new(200).set_body_string(gviz_body(json!({
                "status": "error",
                "errors": [{"reason": "invalid_query", "detailed_message": "Invalid column B"}]
            }))))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("sheet", "Gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let broken = client_for(&server, &["Broken"]).await;
        let err = broken.fetch(&code("ABC123456")).await.unwrap_err();
        assert!(err.to_string().contains("Invalid column B"));

        let gone = client_for(&server, &["Gone"]).await;
        let err = gone.fetch(&code("ABC123456")).await.unwrap_err();
        assert!(matches!(err, TrackingError::Sheet { .. }));
    }
}
