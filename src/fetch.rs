use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value;
use std::sync::LazyLock;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::raw::RawRecord;
use crate::types::Tag;
use crate::{LISTING_URL, SEARCH_API_URL, SEARCH_SITE_ID, STOREFRONT_DOMAIN, STOREFRONT_URL, USER_AGENT};

const RESULTS_PER_PAGE: u32 = 96;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static LISTING_CARD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.ss__result").unwrap());
static NEXT_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.next-icon-new").unwrap());

/// A slice of the catalog fetched on its own to get under the source's
/// result-count ceiling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Category(String),
    Condition(String),
    /// Free-text search, used for the alphabetic split
    Query(String),
}

impl Segment {
    /// The label stored on records fetched under this segment, if any
    pub fn tag(&self) -> Option<Tag> {
        match self {
            Segment::Category(c) => Some(Tag::Category(c.clone())),
            Segment::Condition(c) => Some(Tag::Condition(c.clone())),
            Segment::Query(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageRequest {
    Page { page: u32, segment: Option<Segment> },
    Url(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub current_page: u32,
    pub total_pages: u32,
}

#[derive(Debug, Default)]
pub struct Batch {
    pub records: Vec<RawRecord>,
    pub pagination: Option<Pagination>,
    /// Where a link walk goes next
    pub next: Option<String>,
}

#[derive(Debug)]
pub enum FetchOutcome {
    Batch(Batch),
    /// The source answered 429
    Throttled,
    /// Transport failure, non-success status, or an undecodable body
    Failed(anyhow::Error),
}

pub trait Fetcher {
    fn fetch(&mut self, request: &PageRequest) -> FetchOutcome;
}

fn build_client() -> Result<Client> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(REQUEST_TIMEOUT)
        .build()?;
    Ok(client)
}

/// Send a request and read the body, classifying the status on the way
fn send_text(request: RequestBuilder, what: &str) -> Result<String, FetchOutcome> {
    let response = request
        .send()
        .with_context(|| format!("Failed to fetch {}", what))
        .map_err(FetchOutcome::Failed)?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(FetchOutcome::Throttled);
    }
    if !status.is_success() {
        return Err(FetchOutcome::Failed(anyhow!("{} returned status {}", what, status)));
    }

    response
        .text()
        .with_context(|| format!("Failed to read response from {}", what))
        .map_err(FetchOutcome::Failed)
}

// Search API response types
#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
    pagination: Option<SearchPagination>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPagination {
    current_page: Option<u32>,
    #[serde(default)]
    total_pages: u32,
}

/// JSON search API backing the storefront's product grid
pub struct SearchApi {
    client: Client,
    /// Background category every request is confined to
    scope: String,
}

impl SearchApi {
    pub fn new(scope: &str) -> Result<Self> {
        Ok(Self {
            client: build_client()?,
            scope: scope.to_string(),
        })
    }

    fn params(&self, page: u32, segment: Option<&Segment>) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("siteId", SEARCH_SITE_ID.to_string()),
            ("page", page.to_string()),
            ("resultsPerPage", RESULTS_PER_PAGE.to_string()),
            ("resultsFormat", "native".to_string()),
            ("redirectResponse", "full".to_string()),
            ("bgfilter.categories_hierarchy", self.scope.clone()),
            ("bgfilter.ss_ad", "0".to_string()),
        ];
        match segment {
            Some(Segment::Category(c)) => params.push(("filter.categories_hierarchy", c.clone())),
            Some(Segment::Condition(c)) => {
                params.push(("filter.variant_mfield_extra_data_f_cond", c.clone()))
            }
            Some(Segment::Query(q)) => params.push(("q", q.clone())),
            None => {}
        }
        params
    }
}

/// Decode one search API page. `page` fills in a missing `currentPage`.
fn parse_search_response(body: &str, page: u32) -> Result<Batch> {
    let response: SearchResponse =
        serde_json::from_str(body).context("Failed to parse search API JSON")?;
    let pagination = response.pagination.map(|p| Pagination {
        current_page: p.current_page.unwrap_or(page),
        total_pages: p.total_pages,
    });
    Ok(Batch {
        records: response.results.into_iter().map(RawRecord::Api).collect(),
        pagination,
        next: None,
    })
}

impl Fetcher for SearchApi {
    fn fetch(&mut self, request: &PageRequest) -> FetchOutcome {
        let PageRequest::Page { page, segment } = request else {
            return FetchOutcome::Failed(anyhow!("search API is paged, cannot follow {:?}", request));
        };

        let what = format!("search API page {}", page);
        let builder = self
            .client
            .get(SEARCH_API_URL)
            .query(&self.params(*page, segment.as_ref()))
            .header("Referer", STOREFRONT_URL);
        let body = match send_text(builder, &what) {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };

        match parse_search_response(&body, *page) {
            Ok(batch) => {
                debug!(page, results = batch.records.len(), "search API page");
                FetchOutcome::Batch(batch)
            }
            Err(e) => FetchOutcome::Failed(e),
        }
    }
}

/// Split a listing page into its product cards
fn parse_listing_page(html: &str) -> Batch {
    let doc = Html::parse_document(html);
    let records = doc
        .select(&LISTING_CARD)
        .map(|card| RawRecord::ListingCard(card.html()))
        .collect();
    Batch {
        records,
        pagination: None,
        next: None,
    }
}

/// Server-rendered product listing pages
pub struct ListingPages {
    client: Client,
}

impl ListingPages {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

impl Fetcher for ListingPages {
    fn fetch(&mut self, request: &PageRequest) -> FetchOutcome {
        let page = match request {
            PageRequest::Page { page, segment: None } => *page,
            other => {
                return FetchOutcome::Failed(anyhow!("listing pages cannot serve {:?}", other));
            }
        };

        let url = format!("{}{}", LISTING_URL, page);
        let body = match send_text(self.client.get(&url), &url) {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };
        let batch = parse_listing_page(&body);
        debug!(page, cards = batch.records.len(), "listing page");
        FetchOutcome::Batch(batch)
    }
}

/// The "next product" link of a detail page, if it leads anywhere on the
/// storefront. Disabled buttons, `#` anchors and off-site links end the walk.
fn next_product_link(doc: &Html, current: &str) -> Option<String> {
    let link = doc.select(&NEXT_LINK).next()?;
    if link.value().attr("class").is_some_and(|c| c.contains("disable")) {
        return None;
    }

    let href = link.value().attr("href")?.trim();
    if href.is_empty() || href == "#" {
        return None;
    }

    let base = Url::parse(current).ok()?;
    let next = base.join(href).ok()?;
    let host = next.host_str()?;
    if host != STOREFRONT_DOMAIN && !host.ends_with(&format!(".{}", STOREFRONT_DOMAIN)) {
        return None;
    }
    Some(next.to_string())
}

/// Product detail pages, one product per fetch
pub struct ProductPages {
    client: Client,
}

impl ProductPages {
    pub fn new() -> Result<Self> {
        Ok(Self {
            client: build_client()?,
        })
    }
}

impl Fetcher for ProductPages {
    fn fetch(&mut self, request: &PageRequest) -> FetchOutcome {
        let PageRequest::Url(url) = request else {
            return FetchOutcome::Failed(anyhow!("product pages are walked by URL, got {:?}", request));
        };

        let body = match send_text(self.client.get(url), url) {
            Ok(body) => body,
            Err(outcome) => return outcome,
        };
        let next = next_product_link(&Html::parse_document(&body), url);
        FetchOutcome::Batch(Batch {
            records: vec![RawRecord::ProductPage(body)],
            pagination: None,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "https://www.mysticstamp.com/1855-norway-1/";

    fn next_of(body: &str) -> Option<String> {
        next_product_link(&Html::parse_document(body), PAGE)
    }

    #[test]
    fn test_next_link_relative_and_absolute() {
        assert_eq!(
            next_of(r#"<a class="next-icon-new" href="/1856-norway-2/">Next</a>"#).as_deref(),
            Some("https://www.mysticstamp.com/1856-norway-2/")
        );
        assert_eq!(
            next_of(r#"<a class="next-icon-new" href="https://mysticstamp.com/x/">Next</a>"#)
                .as_deref(),
            Some("https://mysticstamp.com/x/")
        );
    }

    #[test]
    fn test_next_link_end_of_walk() {
        assert_eq!(next_of("<p>no button</p>"), None);
        assert_eq!(
            next_of(r#"<a class="next-icon-new disabled" href="/x/">Next</a>"#),
            None
        );
        assert_eq!(next_of(r##"<a class="next-icon-new" href="#">Next</a>"##), None);
        assert_eq!(
            next_of(r#"<a class="next-icon-new" href="https://elsewhere.com/x/">Next</a>"#),
            None
        );
        assert_eq!(
            next_of(r#"<a class="next-icon-new" href="https://notmysticstamp.com/x/">Next</a>"#),
            None
        );
    }

    #[test]
    fn test_parse_search_response() {
        let body = r#"{
            "results": [{"uid": "1"}, {"uid": "2"}],
            "pagination": {"currentPage": 3, "totalPages": 7, "totalResults": 650}
        }"#;
        let batch = parse_search_response(body, 3).unwrap();
        assert_eq!(batch.records.len(), 2);
        assert_eq!(
            batch.pagination,
            Some(Pagination {
                current_page: 3,
                total_pages: 7
            })
        );
    }

    #[test]
    fn test_parse_search_response_defaults() {
        let batch = parse_search_response(r#"{"pagination": {"totalPages": 2}}"#, 5).unwrap();
        assert!(batch.records.is_empty());
        assert_eq!(batch.pagination.unwrap().current_page, 5);

        let batch = parse_search_response("{}", 1).unwrap();
        assert_eq!(batch.pagination, None);

        assert!(parse_search_response("<html>", 1).is_err());
    }

    #[test]
    fn test_parse_listing_page() {
        let html = r#"<html><body><ul>
            <li class="ss__result" data-product-id="1"><a class="StampNumber">Norway 1</a></li>
            <li class="ss__result" data-product-id="2"></li>
            <li class="other"></li>
            </ul></body></html>"#;
        let batch = parse_listing_page(html);
        assert_eq!(batch.records.len(), 2);
        match &batch.records[0] {
            RawRecord::ListingCard(card) => assert!(card.contains("data-product-id=\"1\"")),
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_segment_params_and_tags() {
        let api = SearchApi::new("US Stamps").unwrap();
        let condition = Segment::Condition("Used Stamp(s)".to_string());
        let params = api.params(2, Some(&condition));
        assert!(params.contains(&("page", "2".to_string())));
        assert!(params.contains(&("bgfilter.categories_hierarchy", "US Stamps".to_string())));
        assert!(params.contains(&(
            "filter.variant_mfield_extra_data_f_cond",
            "Used Stamp(s)".to_string()
        )));
        assert_eq!(
            condition.tag(),
            Some(Tag::Condition("Used Stamp(s)".to_string()))
        );
        assert_eq!(Segment::Query("A".to_string()).tag(), None);
    }
}
