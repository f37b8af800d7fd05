use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

use crate::raw::{CatalogShape, Field, PriceField, RawRecord, TitleShape};
use crate::types::{Rejection, StampRecord, Tag};
use crate::PLACEHOLDER_IMAGE;

static MONEY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$([\d,]+\.?\d*)").unwrap());

/// Delimiter between the catalog number and "YYYY Country" in API titles
const NUMBERED_TITLE_DELIMITER: &str = " - ";

/// Check a raw record gate by gate: identifier, duplicate, image, catalog
/// number, title (year then country), price. The first failing gate decides
/// the rejection, and a record only enters `seen` once it passes all of them.
pub fn normalize(
    raw: &RawRecord,
    seen: &mut HashSet<String>,
    tag: Option<&Tag>,
) -> Result<StampRecord, Rejection> {
    let candidate = raw.candidate().map_err(Rejection::ExtractionError)?;

    let product_id = field(candidate.product_id)?.ok_or(Rejection::NoIdentifier)?;
    if seen.contains(&product_id) {
        return Err(Rejection::Duplicate(product_id));
    }

    let image_url = match field(candidate.image_url)? {
        Some(url) if !url.contains(PLACEHOLDER_IMAGE) => url,
        _ => return Err(Rejection::NoImage),
    };

    let catalog = field(candidate.catalog)?.unwrap_or_default();
    let catalog = catalog.trim();
    let catalog_body = match candidate.catalog_shape {
        CatalogShape::Listed => catalog,
        CatalogShape::Hashed => catalog.trim_start_matches('#').trim(),
    };
    if !is_valid_catalog_number(catalog_body) {
        return Err(Rejection::InvalidCatalogNumber(catalog.to_string()));
    }

    let title = field(candidate.title)?.unwrap_or_default();
    let (year, country) = split_title(&title, candidate.title_shape)?;

    let price = field(candidate.price)?
        .as_ref()
        .and_then(parse_price)
        .ok_or(Rejection::NoPrice)?;

    let stamp_number = match candidate.catalog_shape {
        CatalogShape::Listed => catalog_body.to_string(),
        CatalogShape::Hashed => format!("{} {}", country, catalog_body),
    };

    seen.insert(product_id.clone());

    Ok(StampRecord {
        product_id,
        image_url,
        stamp_number,
        year,
        country,
        price,
        category: None,
        condition: None,
    }
    .with_tag(tag))
}

fn field<T>(value: Field<T>) -> Result<Option<T>, Rejection> {
    value.map_err(Rejection::ExtractionError)
}

/// The last whitespace-delimited token must be a plain run of digits.
/// Ranges ("12-14"), fractions ("3/4") and empty text are not single stamps.
pub fn is_valid_catalog_number(text: &str) -> bool {
    match text.split_whitespace().last() {
        Some(last) => last.chars().all(|c| c.is_ascii_digit()),
        None => false,
    }
}

fn split_title(title: &str, shape: TitleShape) -> Result<(String, String), Rejection> {
    let year_country = match shape {
        TitleShape::YearCountry => title.trim(),
        TitleShape::Numbered => match title.split_once(NUMBERED_TITLE_DELIMITER) {
            Some((_, rest)) => rest.trim(),
            None => return Err(Rejection::NoYear),
        },
    };
    split_year_country(year_country)
}

/// Split "1855 Norway" into ("1855", "Norway")
pub fn split_year_country(text: &str) -> Result<(String, String), Rejection> {
    let year = text.get(..4).ok_or(Rejection::NoYear)?;
    if !year.chars().all(|c| c.is_ascii_digit()) {
        return Err(Rejection::NoYear);
    }
    let country = text[4..].trim();
    if country.is_empty() {
        return Err(Rejection::NoCountry);
    }
    Ok((year.to_string(), country.to_string()))
}

/// Pull the amount out of a currency string like "$1,234.56"
pub fn parse_money(text: &str) -> Option<f64> {
    let caps = MONEY_RE.captures(text)?;
    caps[1].replace(',', "").parse().ok()
}

fn parse_price(field: &PriceField) -> Option<f64> {
    let amount = match field {
        PriceField::Amount(v) => Some(*v),
        PriceField::Plain(s) => s.trim().parse().ok(),
        PriceField::Money(s) => parse_money(s),
    }?;
    (amount.is_finite() && amount >= 0.0).then_some(amount)
}
