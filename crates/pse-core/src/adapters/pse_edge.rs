//! PSE Edge (edge.pse.com.ph) source adapter.
//!
//! Three endpoints are used:
//!
//! | Endpoint | Method | Purpose |
//! |----------|--------|---------|
//! | `/companyDirectory/search.ax` | form POST | paginated HTML company directory |
//! | `/autoComplete/searchCompanyNameSymbol.ax` | GET | symbol to company id lookup (JSON) |
//! | `/common/DisclosureCht.ax` | JSON POST | daily OHLC chart data |
//!
//! Directory rows carry the company and security ids in their detail links, so
//! listing the directory also primes the lookup cache used by price reads.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::json;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, UtcOffset};
use tracing::{debug, warn};

use crate::clock::{Clock, SystemClock};
use crate::data_source::{PriceRequest, SourceError, SourceFuture, StockSource};
use crate::domain::calendar::{today_at, SOURCE_UTC_OFFSET};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse, ReqwestHttpClient};
use crate::throttling::RequestThrottle;
use crate::{Company, PriceRecord, Symbol, UtcDateTime};

pub const DEFAULT_BASE_URL: &str = "https://edge.pse.com.ph";

const DIRECTORY_PATH: &str = "/companyDirectory/search.ax";
const DIRECTORY_REFERER_PATH: &str = "/companyDirectory/form.do";
const AUTOCOMPLETE_PATH: &str = "/autoComplete/searchCompanyNameSymbol.ax";
const CHART_PATH: &str = "/common/DisclosureCht.ax";
const STOCK_PAGE_PATH: &str = "/companyPage/stockData.do";

const CHART_REQUEST_DATE: &[BorrowedFormatItem<'static>] =
    format_description!("[month]-[day]-[year]");

const SOURCE_DATE_FORMATS: &[&[BorrowedFormatItem<'static>]] = &[
    format_description!("[month repr:short] [day], [year]"),
    format_description!("[month repr:short] [day padding:none], [year]"),
    format_description!("[year]-[month]-[day]"),
    format_description!("[month]/[day]/[year]"),
];

/// Connection settings for the PSE Edge adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PseEdgeConfig {
    pub base_url: String,
    pub timeout_ms: u64,
    pub requests_per_second: u32,
    /// Offset used for the default end date ("today").
    pub source_offset: UtcOffset,
}

impl Default for PseEdgeConfig {
    fn default() -> Self {
        Self {
            base_url: String::from(DEFAULT_BASE_URL),
            timeout_ms: 10_000,
            requests_per_second: 4,
            source_offset: SOURCE_UTC_OFFSET,
        }
    }
}

/// Identifiers PSE Edge needs to serve a company's chart data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyRef {
    pub company_id: String,
    pub security_id: String,
    pub listing_date: Option<Date>,
}

/// One parsed page of the company directory.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryPage {
    pub companies: Vec<Company>,
    pub refs: Vec<(Symbol, CompanyRef)>,
    pub page_count: u32,
}

#[derive(Clone)]
pub struct PseEdgeAdapter {
    config: PseEdgeConfig,
    http_client: Arc<dyn HttpClient>,
    throttle: RequestThrottle,
    clock: Arc<dyn Clock>,
    refs: Arc<Mutex<HashMap<Symbol, CompanyRef>>>,
}

impl PseEdgeAdapter {
    pub fn new(config: PseEdgeConfig) -> Self {
        Self::with_http_client(config, Arc::new(ReqwestHttpClient::new()))
    }

    pub fn with_http_client(config: PseEdgeConfig, http_client: Arc<dyn HttpClient>) -> Self {
        Self {
            throttle: RequestThrottle::per_second(config.requests_per_second),
            config,
            http_client,
            clock: Arc::new(SystemClock),
            refs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url.trim_end_matches('/'))
    }

    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, SourceError> {
        self.throttle.acquire().await;
        let url = request.url.clone();
        let response = self
            .http_client
            .execute(request.timeout_ms(self.config.timeout_ms))
            .await
            .map_err(|error| {
                if error.is_transient() {
                    SourceError::unavailable(format!("pse edge {error}"))
                } else {
                    SourceError::internal(format!("pse edge {error}"))
                }
            })?;

        match response.status {
            status if (200..300).contains(&status) => Ok(response),
            429 => Err(SourceError::rate_limited(format!(
                "pse edge throttled request to {url}"
            ))),
            status if status >= 500 => Err(SourceError::unavailable(format!(
                "pse edge returned status {status} for {url}"
            ))),
            status => Err(SourceError::invalid_response(format!(
                "pse edge returned status {status} for {url}"
            ))),
        }
    }

    fn extracted_at(&self, response: &HttpResponse) -> UtcDateTime {
        response
            .header("date")
            .and_then(|value| UtcDateTime::parse_http_date(value).ok())
            .unwrap_or_else(|| UtcDateTime::from_any_offset(self.clock.now()))
    }

    fn directory_request(&self, fields: &[(&str, &str)]) -> HttpRequest {
        HttpRequest::post(self.url(DIRECTORY_PATH))
            .header("accept", "*/*")
            .header("origin", self.config.base_url.clone())
            .header("referer", self.url(DIRECTORY_REFERER_PATH))
            .header("x-requested-with", "XMLHttpRequest")
            .form(fields)
    }

    async fn directory_page(&self, page: u32) -> Result<DirectoryPage, SourceError> {
        let page_no = page.to_string();
        let request = self.directory_request(&directory_form(&page_no, "", "", ""));
        let response = self.send(request).await?;
        let extracted_at = self.extracted_at(&response);
        parse_directory_page(&response.body, extracted_at)
    }

    fn cached_ref(&self, symbol: &Symbol) -> Option<CompanyRef> {
        self.refs
            .lock()
            .ok()
            .and_then(|refs| refs.get(symbol).cloned())
    }

    fn remember_refs(&self, refs: Vec<(Symbol, CompanyRef)>) {
        if let Ok(mut cache) = self.refs.lock() {
            cache.extend(refs);
        }
    }

    /// Resolves company and security ids for `symbol`, from cache when possible.
    pub async fn lookup_company(&self, symbol: &Symbol) -> Result<CompanyRef, SourceError> {
        if let Some(cached) = self.cached_ref(symbol) {
            return Ok(cached);
        }

        let url = format!(
            "{}?term={}",
            self.url(AUTOCOMPLETE_PATH),
            urlencoding::encode(symbol.as_str())
        );
        let response = self
            .send(
                HttpRequest::get(url)
                    .header("accept", "application/json, text/javascript, */*; q=0.01")
                    .header("x-requested-with", "XMLHttpRequest"),
            )
            .await?;
        let company_id = parse_autocomplete(&response.body, symbol)?;

        let request = self.directory_request(&directory_form("", &company_id, &company_id, "cmpy"));
        let response = self.send(request).await?;
        let detail = parse_company_detail(&response.body, &company_id)?;

        debug!(%symbol, company_id = %detail.company_id, security_id = %detail.security_id, "resolved company ids");
        self.remember_refs(vec![(symbol.clone(), detail.clone())]);
        Ok(detail)
    }
}

impl StockSource for PseEdgeAdapter {
    fn id(&self) -> &'static str {
        "pse_edge"
    }

    fn list_companies<'a>(&'a self) -> SourceFuture<'a, Vec<Company>> {
        Box::pin(async move {
            let first = self.directory_page(1).await?;
            let page_count = first.page_count.max(1);
            debug!(page_count, "fetched company directory page 1");

            let mut companies = first.companies;
            self.remember_refs(first.refs);
            for page in 2..=page_count {
                let next = self.directory_page(page).await?;
                debug!(page, rows = next.companies.len(), "fetched company directory page");
                companies.extend(next.companies);
                self.remember_refs(next.refs);
            }

            Ok(companies)
        })
    }

    fn fetch_prices<'a>(&'a self, req: PriceRequest) -> SourceFuture<'a, Vec<PriceRecord>> {
        Box::pin(async move {
            let company = self.lookup_company(&req.symbol).await?;
            let today = today_at(self.clock.now(), self.config.source_offset);

            let mut start = req.start.or(company.listing_date).unwrap_or(today);
            if let Some(listing_date) = company.listing_date {
                start = start.max(listing_date);
            }
            let end = req.end.unwrap_or(today);
            if start > end {
                debug!(symbol = %req.symbol, %start, %end, "window ends before listing; nothing to fetch");
                return Ok(Vec::new());
            }

            let body = json!({
                "cmpy_id": company.company_id,
                "security_id": company.security_id,
                "startDate": format_chart_date(start)?,
                "endDate": format_chart_date(end)?,
            });
            let referer = format!(
                "{}?cmpy_id={}",
                self.url(STOCK_PAGE_PATH),
                urlencoding::encode(&company.company_id)
            );
            let request = HttpRequest::post(self.url(CHART_PATH))
                .header("accept", "application/json, text/javascript, */*; q=0.01")
                .header("origin", self.config.base_url.clone())
                .header("referer", referer)
                .header("x-requested-with", "XMLHttpRequest")
                .json(body);

            let response = self.send(request).await?;
            let extracted_at = self.extracted_at(&response);
            parse_chart_data(&response.body, &req.symbol, extracted_at)
        })
    }
}

fn directory_form<'a>(
    page_no: &'a str,
    company_id: &'a str,
    keyword: &'a str,
    sort_type: &'a str,
) -> [(&'static str, &'a str); 9] {
    [
        ("pageNo", page_no),
        ("companyId", company_id),
        ("keyword", keyword),
        ("sortType", sort_type),
        ("dateSortType", "DESC"),
        ("cmpySortType", "DESC"),
        ("symbolSortType", "ASC"),
        ("sector", "ALL"),
        ("subsector", "ALL"),
    ]
}

fn format_chart_date(date: Date) -> Result<String, SourceError> {
    date.format(CHART_REQUEST_DATE)
        .map_err(|error| SourceError::internal(format!("cannot format chart date {date}: {error}")))
}

fn selector(css: &str) -> Result<Selector, SourceError> {
    Selector::parse(css)
        .map_err(|error| SourceError::internal(format!("invalid selector '{css}': {error}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Parses dates as PSE Edge renders them (`Jan 04, 2021`, optionally followed by a time).
pub fn parse_source_date(text: &str) -> Option<Date> {
    let mut value = text.trim();
    if let Some((head, tail)) = value.rsplit_once(' ') {
        if tail.contains(':') {
            value = head.trim_end();
        }
    }
    if let Some((head, _)) = value.split_once('T') {
        if head.len() == 10 {
            value = head;
        }
    }
    SOURCE_DATE_FORMATS
        .iter()
        .find_map(|format| Date::parse(value, format).ok())
}

/// Extracts `(company_id, security_id)` from `cmDetail('29','146');return false;`.
pub fn parse_cm_detail(onclick: &str) -> Option<(String, String)> {
    let inner = onclick
        .trim()
        .strip_prefix("cmDetail(")?
        .split(')')
        .next()?;
    let mut ids = inner
        .split(',')
        .map(|part| part.trim().trim_matches(|c| c == '\'' || c == '"').to_owned());
    let company_id = ids.next().filter(|id| !id.is_empty())?;
    let security_id = ids.next().filter(|id| !id.is_empty())?;
    Some((company_id, security_id))
}

#[derive(Debug, Clone, Copy)]
struct DirectoryColumns {
    name: usize,
    symbol: usize,
    sector: usize,
    subsector: usize,
    listing_date: usize,
}

impl DirectoryColumns {
    const DEFAULT: Self = Self {
        name: 0,
        symbol: 1,
        sector: 2,
        subsector: 3,
        listing_date: 4,
    };

    fn from_headers(headers: &[String]) -> Self {
        let position = |label: &str, fallback: usize| {
            headers
                .iter()
                .position(|header| header.eq_ignore_ascii_case(label))
                .unwrap_or(fallback)
        };
        Self {
            name: position("Company Name", Self::DEFAULT.name),
            symbol: position("Stock Symbol", Self::DEFAULT.symbol),
            sector: position("Sector", Self::DEFAULT.sector),
            subsector: position("Subsector", Self::DEFAULT.subsector),
            listing_date: position("Listing Date", Self::DEFAULT.listing_date),
        }
    }

    fn width(self) -> usize {
        [self.name, self.symbol, self.sector, self.subsector, self.listing_date]
            .into_iter()
            .max()
            .unwrap_or(0)
            + 1
    }
}

/// Parses one company directory page. Rows with an invalid symbol or name are skipped.
pub fn parse_directory_page(html: &str, extracted_at: UtcDateTime) -> Result<DirectoryPage, SourceError> {
    let document = Html::parse_document(html);
    let header_selector = selector("table th")?;
    let row_selector = selector("table tbody tr")?;
    let cell_selector = selector("td")?;
    let onclick_selector = selector("[onclick]")?;
    let pager_selector = selector(r##"a[href="#"]"##)?;

    let headers: Vec<String> = document.select(&header_selector).map(cell_text).collect();
    if headers.is_empty() && document.select(&row_selector).next().is_none() {
        return Err(SourceError::invalid_response(
            "company directory response has no table",
        ));
    }
    let columns = DirectoryColumns::from_headers(&headers);

    let mut companies = Vec::new();
    let mut refs = Vec::new();
    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
        if cells.len() < columns.width() {
            continue;
        }

        let raw_symbol = cell_text(cells[columns.symbol]);
        let symbol = match Symbol::parse(&raw_symbol) {
            Ok(symbol) => symbol,
            Err(error) => {
                warn!(symbol = %raw_symbol, %error, "skipping directory row with invalid symbol");
                continue;
            }
        };
        let listing_date = parse_source_date(&cell_text(cells[columns.listing_date]));

        let company = match Company::new(
            symbol.clone(),
            cell_text(cells[columns.name]),
            cell_text(cells[columns.sector]),
            cell_text(cells[columns.subsector]),
            listing_date,
            extracted_at,
        ) {
            Ok(company) => company,
            Err(error) => {
                warn!(%symbol, %error, "skipping directory row");
                continue;
            }
        };

        let ids = row
            .select(&onclick_selector)
            .filter_map(|element| element.value().attr("onclick"))
            .find_map(parse_cm_detail);
        if let Some((company_id, security_id)) = ids {
            refs.push((
                symbol,
                CompanyRef {
                    company_id,
                    security_id,
                    listing_date,
                },
            ));
        }
        companies.push(company);
    }

    let page_count = document
        .select(&pager_selector)
        .filter_map(|link| cell_text(link).parse::<u32>().ok())
        .max()
        .unwrap_or(1);

    Ok(DirectoryPage {
        companies,
        refs,
        page_count,
    })
}

/// Parses the single-company directory search used to resolve a security id.
pub fn parse_company_detail(html: &str, company_id: &str) -> Result<CompanyRef, SourceError> {
    let document = Html::parse_document(html);
    let row_selector = selector("table tbody tr")?;
    let cell_selector = selector("td")?;
    let onclick_selector = selector("[onclick]")?;

    for row in document.select(&row_selector) {
        let cells: Vec<ElementRef<'_>> = row.select(&cell_selector).collect();
        let Some(first) = cells.first() else {
            continue;
        };
        let ids = first
            .select(&onclick_selector)
            .filter_map(|element| element.value().attr("onclick"))
            .find_map(parse_cm_detail);
        let Some((found_company, security_id)) = ids else {
            continue;
        };
        if found_company != company_id {
            continue;
        }

        return Ok(CompanyRef {
            company_id: found_company,
            security_id,
            listing_date: cells
                .get(DirectoryColumns::DEFAULT.listing_date)
                .and_then(|cell| parse_source_date(&cell_text(*cell))),
        });
    }

    Err(SourceError::invalid_response(format!(
        "company search for id {company_id} returned no detail link"
    )))
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Number(u64),
}

impl IdValue {
    fn into_string(self) -> String {
        match self {
            Self::Text(value) => value.trim().to_owned(),
            Self::Number(value) => value.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AutocompleteEntry {
    symbol: String,
    #[serde(rename = "cmpyId")]
    company_id: IdValue,
}

/// Returns the company id the autocomplete endpoint lists for exactly `symbol`.
pub fn parse_autocomplete(body: &str, symbol: &Symbol) -> Result<String, SourceError> {
    let entries: Vec<AutocompleteEntry> = serde_json::from_str(body).map_err(|error| {
        SourceError::invalid_response(format!("malformed autocomplete response: {error}"))
    })?;

    entries
        .into_iter()
        .find(|entry| entry.symbol.trim().eq_ignore_ascii_case(symbol.as_str()))
        .map(|entry| entry.company_id.into_string())
        .filter(|id| !id.is_empty())
        .ok_or_else(|| SourceError::unknown_symbol(symbol))
}

#[derive(Debug, Deserialize)]
struct ChartResponse {
    #[serde(rename = "chartData")]
    chart_data: Option<Vec<ChartPoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
struct ChartPoint {
    #[serde(rename = "CHART_DATE")]
    chart_date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
}

pub fn parse_chart_data(
    body: &str,
    symbol: &Symbol,
    extracted_at: UtcDateTime,
) -> Result<Vec<PriceRecord>, SourceError> {
    let response: ChartResponse = serde_json::from_str(body).map_err(|error| {
        SourceError::invalid_response(format!("malformed chart response for {symbol}: {error}"))
    })?;
    let points = response.chart_data.ok_or_else(|| {
        SourceError::invalid_response(format!("chart response for {symbol} has no chartData"))
    })?;

    points
        .into_iter()
        .map(|point| {
            let date = parse_source_date(&point.chart_date).ok_or_else(|| {
                SourceError::invalid_response(format!(
                    "unparseable chart date '{}' for {symbol}",
                    point.chart_date
                ))
            })?;
            PriceRecord::new(
                symbol.clone(),
                date,
                point.open,
                point.high,
                point.low,
                point.close,
                extracted_at,
            )
            .map_err(|error| SourceError::invalid_response(format!("{symbol} {date}: {error}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;

    use time::macros::{date, datetime};

    use super::*;
    use crate::clock::FixedClock;
    use crate::data_source::SourceErrorKind;
    use crate::http_client::{Body, HttpError, HttpFuture, HttpMethod};

    const DIRECTORY_PAGE_1: &str = r##"
<html><body>
<table class="list">
  <thead><tr><th>Company Name</th><th>Stock Symbol</th><th>Sector</th><th>Subsector</th><th>Listing Date</th></tr></thead>
  <tbody>
    <tr>
      <td><a href="#company" onclick="cmDetail('29','146');return false;">Ayala Land, Inc.</a></td>
      <td><a href="#company" onclick="cmDetail('29','146');return false;">ALI</a></td>
      <td>Property</td><td>Property</td><td>Jul 05, 1991</td>
    </tr>
    <tr>
      <td><a href="#company" onclick="cmDetail('86','158');return false;">Jollibee Foods Corporation</a></td>
      <td>JFC</td>
      <td>Industrial</td><td>Food, Beverage &amp; Tobacco</td><td>Jul 14, 1993</td>
    </tr>
    <tr><td>Broken Row Inc.</td><td>BAD ROW</td><td>x</td><td>y</td><td>Jan 01, 2000</td></tr>
  </tbody>
</table>
<div class="paging"><a href="#">1</a> <a href="#">2</a> <a href="#">Next</a></div>
</body></html>
"##;

    const DIRECTORY_PAGE_2: &str = r##"
<table class="list">
  <thead><tr><th>Company Name</th><th>Stock Symbol</th><th>Sector</th><th>Subsector</th><th>Listing Date</th></tr></thead>
  <tbody>
    <tr>
      <td><a href="#company" onclick="cmDetail('599','520');return false;">SM Investments Corporation</a></td>
      <td>SM</td><td>Holding Firms</td><td>Holding Firms</td><td>Mar 22, 2005</td>
    </tr>
  </tbody>
</table>
<div class="paging"><a href="#">1</a> <a href="#">2</a></div>
"##;

    const SINGLE_PAGE_DIRECTORY: &str = r##"
<table class="list">
  <thead><tr><th>Company Name</th><th>Stock Symbol</th><th>Sector</th><th>Subsector</th><th>Listing Date</th></tr></thead>
  <tbody>
    <tr>
      <td><a href="#company" onclick="cmDetail('599','520');return false;">SM Investments Corporation</a></td>
      <td>SM</td><td>Holding Firms</td><td>Holding Firms</td><td>Mar 22, 2005</td>
    </tr>
  </tbody>
</table>
<div class="paging"><a href="#">1</a></div>
"##;

    const COMPANY_DETAIL: &str = r##"
<table class="list"><tbody><tr>
  <td><a href="#company" onclick="cmDetail('180','244');return false;">BDO Unibank, Inc.</a></td>
  <td>BDO</td><td>Financials</td><td>Banks</td><td>May 21, 2002</td>
</tr></tbody></table>
"##;

    /// Replays canned responses in order and records every request.
    #[derive(Default)]
    struct CannedHttpClient {
        responses: Mutex<VecDeque<HttpResponse>>,
        requests: Mutex<Vec<HttpRequest>>,
    }

    impl CannedHttpClient {
        fn new(responses: Vec<HttpResponse>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::default(),
            })
        }

        fn requests(&self) -> Vec<HttpRequest> {
            self.requests.lock().expect("requests").clone()
        }
    }

    impl HttpClient for CannedHttpClient {
        fn execute<'a>(&'a self, request: HttpRequest) -> HttpFuture<'a> {
            self.requests.lock().expect("requests").push(request);
            let next = self.responses.lock().expect("responses").pop_front();
            Box::pin(async move { next.ok_or_else(|| HttpError::Invalid(String::from("no canned response left"))) })
        }
    }

    fn adapter(client: Arc<CannedHttpClient>) -> PseEdgeAdapter {
        let config = PseEdgeConfig {
            base_url: String::from("https://edge.test"),
            requests_per_second: 1_000,
            ..PseEdgeConfig::default()
        };
        PseEdgeAdapter::with_http_client(config, client)
            .with_clock(Arc::new(FixedClock::new(datetime!(2024-01-12 10:00 +8))))
    }

    fn symbol(value: &str) -> Symbol {
        Symbol::parse(value).expect("symbol")
    }

    fn json_body(request: &HttpRequest) -> serde_json::Value {
        match &request.body {
            Body::Json(value) => value.clone(),
            other => panic!("expected a JSON body, got {other:?}"),
        }
    }

    #[test]
    fn parses_directory_rows_ids_and_page_count() {
        let extracted_at = UtcDateTime::parse("2024-01-12T02:00:00Z").expect("timestamp");
        let page = parse_directory_page(DIRECTORY_PAGE_1, extracted_at).expect("page");

        assert_eq!(page.page_count, 2);
        assert_eq!(page.companies.len(), 2);
        let jfc = &page.companies[1];
        assert_eq!(jfc.symbol.as_str(), "JFC");
        assert_eq!(jfc.name, "Jollibee Foods Corporation");
        assert_eq!(jfc.subsector, "Food, Beverage & Tobacco");
        assert_eq!(jfc.listing_date, Some(date!(1993 - 07 - 14)));
        assert_eq!(jfc.extracted_at, extracted_at);

        assert_eq!(
            page.refs[0],
            (
                symbol("ALI"),
                CompanyRef {
                    company_id: String::from("29"),
                    security_id: String::from("146"),
                    listing_date: Some(date!(1991 - 07 - 05)),
                }
            )
        );
    }

    #[test]
    fn parses_cm_detail_links() {
        assert_eq!(
            parse_cm_detail("cmDetail('29','146');return false;"),
            Some((String::from("29"), String::from("146")))
        );
        assert_eq!(parse_cm_detail("openPopup('29')"), None);
        assert_eq!(parse_cm_detail("cmDetail('29');return false;"), None);
    }

    #[test]
    fn parses_source_date_variants() {
        assert_eq!(parse_source_date("Jan 04, 2021"), Some(date!(2021 - 01 - 04)));
        assert_eq!(parse_source_date("Jan 04, 2021 00:00:00"), Some(date!(2021 - 01 - 04)));
        assert_eq!(parse_source_date("2021-01-04T00:00:00"), Some(date!(2021 - 01 - 04)));
        assert_eq!(parse_source_date("not a date"), None);
    }

    #[test]
    fn autocomplete_miss_is_unknown_symbol() {
        let body = r#"[{"cmpyId":"29","symbol":"ALI","cmpyNm":"Ayala Land, Inc."},{"cmpyId":612,"symbol":"ALLHC"}]"#;
        assert_eq!(parse_autocomplete(body, &symbol("ALLHC")).expect("id"), "612");

        let err = parse_autocomplete(body, &symbol("AL")).expect_err("partial match");
        assert_eq!(err.kind(), SourceErrorKind::UnknownSymbol);
    }

    #[test]
    fn chart_without_chart_data_is_invalid() {
        let extracted_at = UtcDateTime::parse("2024-01-12T02:00:00Z").expect("timestamp");
        let err = parse_chart_data(r#"{"tickerData":[]}"#, &symbol("ALI"), extracted_at)
            .expect_err("missing chartData");
        assert_eq!(err.kind(), SourceErrorKind::InvalidResponse);
    }

    #[tokio::test]
    async fn lists_every_directory_page() {
        let client = CannedHttpClient::new(vec![
            HttpResponse::ok(DIRECTORY_PAGE_1).with_header("Date", "Fri, 12 Jan 2024 02:00:00 GMT"),
            HttpResponse::ok(DIRECTORY_PAGE_2).with_header("Date", "Fri, 12 Jan 2024 02:00:01 GMT"),
        ]);
        let adapter = adapter(Arc::clone(&client));

        let companies = adapter.list_companies().await.expect("companies");
        let symbols: Vec<&str> = companies.iter().map(|c| c.symbol.as_str()).collect();
        assert_eq!(symbols, ["ALI", "JFC", "SM"]);
        assert_eq!(
            companies[2].extracted_at,
            UtcDateTime::parse("2024-01-12T02:00:01Z").expect("timestamp")
        );

        let requests = client.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].method, HttpMethod::Post);
        assert_eq!(requests[1].url, "https://edge.test/companyDirectory/search.ax");
        assert!(requests[1]
            .body
            .encode()
            .is_some_and(|body| body.starts_with("pageNo=2&companyId=&keyword=&sortType=&dateSortType=DESC")));
    }

    #[tokio::test]
    async fn fetches_prices_after_resolving_ids() {
        let chart = r#"{"chartData":[
            {"CHART_DATE":"Jan 10, 2024 00:00:00","OPEN":52.0,"HIGH":53.5,"LOW":51.8,"CLOSE":53.0,"VALUE":1000.0},
            {"CHART_DATE":"Jan 11, 2024 00:00:00","OPEN":53.0,"HIGH":54.0,"LOW":52.5,"CLOSE":53.8,"VALUE":1200.0}
        ]}"#;
        let client = CannedHttpClient::new(vec![
            HttpResponse::ok(r#"[{"cmpyId":"180","symbol":"BDO","cmpyNm":"BDO Unibank, Inc."}]"#),
            HttpResponse::ok(COMPANY_DETAIL),
            HttpResponse::ok(chart).with_header("Date", "Fri, 12 Jan 2024 02:00:00 GMT"),
        ]);
        let adapter = adapter(Arc::clone(&client));

        let request = PriceRequest::new(symbol("BDO"), Some(date!(2024 - 01 - 10)), Some(date!(2024 - 01 - 11)))
            .expect("request");
        let rows = adapter.fetch_prices(request).await.expect("prices");

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].date, date!(2024 - 01 - 11));
        assert_eq!(rows[1].close, 53.8);

        let requests = client.requests();
        assert_eq!(requests[0].url, "https://edge.test/autoComplete/searchCompanyNameSymbol.ax?term=BDO");
        let chart_body = json_body(&requests[2]);
        assert_eq!(chart_body["cmpy_id"], "180");
        assert_eq!(chart_body["security_id"], "244");
        assert_eq!(chart_body["startDate"], "01-10-2024");
        assert_eq!(chart_body["endDate"], "01-11-2024");
    }

    #[tokio::test]
    async fn start_before_listing_is_clamped_to_listing_date() {
        let client = CannedHttpClient::new(vec![
            HttpResponse::ok(r#"[{"cmpyId":"180","symbol":"BDO"}]"#),
            HttpResponse::ok(COMPANY_DETAIL),
            HttpResponse::ok(r#"{"chartData":[]}"#),
        ]);
        let adapter = adapter(Arc::clone(&client));

        let request = PriceRequest::new(symbol("BDO"), Some(date!(1900 - 01 - 01)), None).expect("request");
        let rows = adapter.fetch_prices(request).await.expect("prices");
        assert!(rows.is_empty());

        let chart_body = json_body(&client.requests()[2]);
        assert_eq!(chart_body["startDate"], "05-21-2002");
        assert_eq!(chart_body["endDate"], "01-12-2024");
    }

    #[tokio::test]
    async fn listing_primes_the_id_cache() {
        let client = CannedHttpClient::new(vec![
            HttpResponse::ok(SINGLE_PAGE_DIRECTORY),
            HttpResponse::ok(r#"{"chartData":[]}"#),
        ]);
        let adapter = adapter(Arc::clone(&client));

        let companies = adapter.list_companies().await.expect("companies");
        assert_eq!(companies.len(), 1);
        let request = PriceRequest::new(symbol("SM"), Some(date!(2024 - 01 - 11)), Some(date!(2024 - 01 - 11)))
            .expect("request");
        adapter.fetch_prices(request).await.expect("prices");

        let requests = client.requests();
        assert_eq!(requests.len(), 2, "no autocomplete or detail lookups expected");
        assert_eq!(requests[1].url, "https://edge.test/common/DisclosureCht.ax");
    }

    #[tokio::test]
    async fn maps_http_status_to_source_errors() {
        let client = CannedHttpClient::new(vec![
            HttpResponse::ok("").with_status(429),
            HttpResponse::ok("").with_status(503),
        ]);
        let adapter = adapter(client);

        let throttled = adapter.list_companies().await.expect_err("429");
        assert_eq!(throttled.kind(), SourceErrorKind::RateLimited);
        let unavailable = adapter.list_companies().await.expect_err("503");
        assert_eq!(unavailable.kind(), SourceErrorKind::Unavailable);
    }

    #[tokio::test]
    async fn unknown_symbol_surfaces_from_fetch() {
        let client = CannedHttpClient::new(vec![HttpResponse::ok("[]")]);
        let adapter = adapter(client);

        let request = PriceRequest::new(symbol("ZZZ"), None, None).expect("request");
        let err = adapter.fetch_prices(request).await.expect_err("unknown");
        assert!(err.is_unknown_symbol());
    }
}
