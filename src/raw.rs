use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::sync::LazyLock;

static LISTING_CARD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.ss__result").unwrap());
static CARD_IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img.card-image").unwrap());
static CARD_NUMBER: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.StampNumber").unwrap());
static CARD_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a.card-ellipsis span").unwrap());
static PRICE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.price--withoutTax").unwrap());

static PRODUCT_ID: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.productView-nextProducts").unwrap());
static PRODUCT_TITLE: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1.productView-title").unwrap());
static PRODUCT_NUMBER: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h6.productView-title").unwrap());
static ANY_IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img").unwrap());
static ZOOM_IMAGE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("img.zoomImg").unwrap());

/// An unvalidated product entry
#[derive(Debug, Clone)]
pub enum RawRecord {
    /// Outer HTML of one `li.ss__result` card from a listing page
    ListingCard(String),
    /// A full product detail page, reached by walking "next" links
    ProductPage(String),
    /// One element of the search API `results` array
    Api(Value),
}

/// How the title field encodes year and country
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleShape {
    /// "1855 Norway"
    YearCountry,
    /// "1 - 1855 Norway"
    Numbered,
}

/// How the catalog field is laid out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogShape {
    /// Full catalog text, e.g. "Norway 1", stored as-is
    Listed,
    /// Bare number like "#1"; stored as "<country> <number>"
    Hashed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PriceField {
    /// Already numeric
    Amount(f64),
    /// A bare number in a string, e.g. "12.50"
    Plain(String),
    /// A localized currency string, e.g. "$1,234.56"
    Money(String),
}

/// A looked-up field: `Err` when the value is present but malformed
pub type Field<T> = Result<Option<T>, String>;

/// The fields of a raw record, looked up but not yet validated.
/// A malformed field only fails the gate that reads it.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub product_id: Field<String>,
    pub image_url: Field<String>,
    pub catalog: Field<String>,
    pub catalog_shape: CatalogShape,
    pub title: Field<String>,
    pub title_shape: TitleShape,
    pub price: Field<PriceField>,
}

impl RawRecord {
    /// Short label for log lines
    pub fn describe(&self) -> &'static str {
        match self {
            RawRecord::ListingCard(_) => "listing card",
            RawRecord::ProductPage(_) => "product page",
            RawRecord::Api(_) => "api result",
        }
    }

    /// Look up every field the normalizer checks.
    ///
    /// Fails only when the record has no usable shape at all (a fragment
    /// without its card element, a JSON result that is not an object).
    pub fn candidate(&self) -> Result<Candidate, String> {
        match self {
            RawRecord::ListingCard(html) => listing_candidate(html),
            RawRecord::ProductPage(html) => Ok(product_candidate(html)),
            RawRecord::Api(value) => api_candidate(value),
        }
    }
}

/// Element text with each text node trimmed, joined by single spaces
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

fn select_text(root: ElementRef<'_>, selector: &Selector) -> Option<String> {
    root.select(selector).next().map(element_text).and_then(non_empty)
}

fn listing_candidate(html: &str) -> Result<Candidate, String> {
    let fragment = Html::parse_fragment(html);
    let card = fragment
        .select(&LISTING_CARD)
        .next()
        .ok_or_else(|| "fragment has no li.ss__result element".to_string())?;

    let product_id = card
        .value()
        .attr("data-product-id")
        .map(|s| s.trim().to_string())
        .and_then(non_empty);

    let image_url = card
        .select(&CARD_IMAGE)
        .next()
        .and_then(|img| img.value().attr("src"))
        .map(|s| s.trim().to_string())
        .and_then(non_empty);

    Ok(Candidate {
        product_id: Ok(product_id),
        image_url: Ok(image_url),
        catalog: Ok(select_text(card, &CARD_NUMBER)),
        catalog_shape: CatalogShape::Listed,
        title: Ok(select_text(card, &CARD_TITLE)),
        title_shape: TitleShape::YearCountry,
        price: Ok(select_text(card, &PRICE).map(PriceField::Money)),
    })
}

/// The product shot on a detail page: a stencil-served product image first,
/// then the zoom image and its lazy-load attribute.
fn product_image(doc: &Html) -> Option<String> {
    let stencil = doc
        .select(&ANY_IMAGE)
        .filter_map(|img| img.value().attr("src"))
        .find(|src| src.contains("products") && src.contains("stencil"));
    if let Some(src) = stencil {
        return Some(src.to_string());
    }

    let zoom = doc.select(&ZOOM_IMAGE).next()?;
    ["src", "data-zoombaimage"]
        .iter()
        .filter_map(|attr| zoom.value().attr(attr))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

fn product_candidate(html: &str) -> Candidate {
    let doc = Html::parse_document(html);
    let root = doc.root_element();

    let product_id = doc
        .select(&PRODUCT_ID)
        .next()
        .and_then(|div| div.value().attr("data-product-id"))
        .map(|s| s.trim().to_string())
        .and_then(non_empty);

    Candidate {
        product_id: Ok(product_id),
        image_url: Ok(product_image(&doc)),
        catalog: Ok(select_text(root, &PRODUCT_NUMBER)),
        catalog_shape: CatalogShape::Hashed,
        title: Ok(select_text(root, &PRODUCT_TITLE)),
        title_shape: TitleShape::YearCountry,
        price: Ok(select_text(root, &PRICE).map(PriceField::Money)),
    }
}

/// First of `keys` holding a non-empty string or a number, rendered as a string
fn json_identifier(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Field<String> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.trim().is_empty() => continue,
            Some(Value::String(s)) => return Ok(Some(s.trim().to_string())),
            Some(Value::Number(n)) => return Ok(Some(n.to_string())),
            Some(other) => return Err(format!("field {} has unexpected type: {}", key, other)),
        }
    }
    Ok(None)
}

/// First of `keys` holding a non-empty string
fn json_string(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Field<String> {
    for key in keys {
        match obj.get(*key) {
            None | Some(Value::Null) => continue,
            Some(Value::String(s)) if s.is_empty() => continue,
            Some(Value::String(s)) => return Ok(Some(s.clone())),
            Some(other) => return Err(format!("field {} is not a string: {}", key, other)),
        }
    }
    Ok(None)
}

/// Null, empty strings and zero do not count as a listed price
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// `price`, falling back to `ss_price` when `price` is blank
fn json_price(obj: &serde_json::Map<String, Value>) -> Field<PriceField> {
    let value = match obj.get("price") {
        Some(v) if !is_blank(v) => v,
        _ => match obj.get("ss_price") {
            Some(v) => v,
            None => return Ok(None),
        },
    };
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => Ok(n.as_f64().map(PriceField::Amount)),
        Value::String(s) => Ok(Some(PriceField::Plain(s.clone()))),
        other => Err(format!("price has unexpected type: {}", other)),
    }
}

fn api_candidate(value: &Value) -> Result<Candidate, String> {
    let obj = value
        .as_object()
        .ok_or_else(|| format!("api result is not an object: {}", value))?;

    Ok(Candidate {
        product_id: json_identifier(obj, &["uid", "id"]),
        image_url: json_string(obj, &["imageUrl", "thumbnailImageUrl"]),
        catalog: json_string(obj, &["sku"]),
        catalog_shape: CatalogShape::Listed,
        title: json_string(obj, &["name"]),
        title_shape: TitleShape::Numbered,
        price: json_price(obj),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const CARD: &str = r#"
        <li class="ss__result" data-product-id="9001">
          <img class="card-image" src="https://cdn.example.com/products/9001/norway-1.jpg">
          <a class="card-ellipsis" href="/n1"><span>1855 Norway</span></a>
          <a class="StampNumber" href="/n1">Norway 1</a>
          <span class="price price--withoutTax">$1,234.50</span>
        </li>"#;

    #[test]
    fn test_listing_card_fields() {
        let c = RawRecord::ListingCard(CARD.to_string()).candidate().unwrap();
        assert_eq!(c.product_id, Ok(Some("9001".to_string())));
        assert_eq!(
            c.image_url,
            Ok(Some("https://cdn.example.com/products/9001/norway-1.jpg".to_string()))
        );
        assert_eq!(c.catalog, Ok(Some("Norway 1".to_string())));
        assert_eq!(c.title, Ok(Some("1855 Norway".to_string())));
        assert_eq!(c.title_shape, TitleShape::YearCountry);
        assert_eq!(c.price, Ok(Some(PriceField::Money("$1,234.50".to_string()))));
    }

    #[test]
    fn test_listing_fragment_without_card_is_structural_error() {
        let err = RawRecord::ListingCard("<div>nothing</div>".to_string())
            .candidate()
            .unwrap_err();
        assert!(err.contains("ss__result"));
    }

    #[test]
    fn test_product_page_fields() {
        let page = r#"<html><body>
            <h1 class="productView-title">1855 Norway</h1>
            <h6 class="productView-title">#1</h6>
            <img src="https://cdn11.bigcommerce.com/s-x/images/stencil/500x659/products/77/n1.jpg">
            <span class="price--withoutTax">$12.00</span>
            <div class="productView-nextProducts" data-product-id="77"></div>
            </body></html>"#;
        let c = RawRecord::ProductPage(page.to_string()).candidate().unwrap();
        assert_eq!(c.product_id, Ok(Some("77".to_string())));
        assert!(c.image_url.unwrap().unwrap().contains("stencil"));
        assert_eq!(c.catalog, Ok(Some("#1".to_string())));
        assert_eq!(c.catalog_shape, CatalogShape::Hashed);
        assert_eq!(c.title, Ok(Some("1855 Norway".to_string())));
    }

    #[test]
    fn test_product_page_zoom_image_fallback() {
        let page = r#"<html><body>
            <img class="zoomImg" src="" data-zoombaimage="https://x/zoom.jpg">
            </body></html>"#;
        let c = RawRecord::ProductPage(page.to_string()).candidate().unwrap();
        assert_eq!(c.image_url, Ok(Some("https://x/zoom.jpg".to_string())));
        assert_eq!(c.product_id, Ok(None));
    }

    #[test]
    fn test_api_fields_with_fallbacks() {
        let raw = RawRecord::Api(json!({
            "id": 42,
            "imageUrl": "",
            "thumbnailImageUrl": "https://x/thumb.jpg",
            "sku": "Norway 1",
            "name": "1 - 1855 Norway",
            "ss_price": "12.50"
        }));
        let c = raw.candidate().unwrap();
        assert_eq!(c.product_id, Ok(Some("42".to_string())));
        assert_eq!(c.image_url, Ok(Some("https://x/thumb.jpg".to_string())));
        assert_eq!(c.title_shape, TitleShape::Numbered);
        assert_eq!(c.price, Ok(Some(PriceField::Plain("12.50".to_string()))));
    }

    #[test]
    fn test_api_uid_preferred_over_id() {
        let c = RawRecord::Api(json!({"uid": "abc", "id": 1}))
            .candidate()
            .unwrap();
        assert_eq!(c.product_id, Ok(Some("abc".to_string())));
    }

    #[test]
    fn test_api_wrong_types_fail_only_their_field() {
        assert!(RawRecord::Api(json!([1, 2])).candidate().is_err());

        let c = RawRecord::Api(json!({"uid": {"nested": true}}))
            .candidate()
            .unwrap();
        assert!(c.product_id.is_err());

        let c = RawRecord::Api(json!({"uid": "1", "imageUrl": 5}))
            .candidate()
            .unwrap();
        assert_eq!(c.product_id, Ok(Some("1".to_string())));
        assert!(c.image_url.is_err());
        assert_eq!(c.catalog, Ok(None));
    }

    #[test]
    fn test_api_blank_price_falls_back_to_ss_price() {
        for price in [json!(""), json!(0), json!(null)] {
            let c = RawRecord::Api(json!({"price": price, "ss_price": "3.10"}))
                .candidate()
                .unwrap();
            assert_eq!(c.price, Ok(Some(PriceField::Plain("3.10".to_string()))));
        }

        let c = RawRecord::Api(json!({"price": "7.00", "ss_price": "3.10"}))
            .candidate()
            .unwrap();
        assert_eq!(c.price, Ok(Some(PriceField::Plain("7.00".to_string()))));

        let c = RawRecord::Api(json!({"price": 0})).candidate().unwrap();
        assert_eq!(c.price, Ok(None));
    }
}
