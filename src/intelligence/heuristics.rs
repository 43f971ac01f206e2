//! Regex extraction used when the semantic service is unavailable.
//!
//! Deliberately shallow: street and unit addresses, written dates, named
//! companies with a legal suffix, and money amounts. People are added by the
//! processor from the message headers, not from the body.

use std::sync::OnceLock;

use regex::Regex;

use crate::entity::{CompanyEntity, DateEntity, EntityBag, FinancialDetail, PropertyEntity};

const ADDRESS_CONFIDENCE: f64 = 0.7;
const DATE_CONFIDENCE: f64 = 0.8;
const COMPANY_CONFIDENCE: f64 = 0.6;
const MONEY_CONFIDENCE: f64 = 0.7;

fn address_res() -> &'static [Regex; 2] {
    static RES: OnceLock<[Regex; 2]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(
                r"(?i)\b\d+[ \t]+[A-Za-z0-9 ,]+?[ \t](?:Street|St|Avenue|Ave|Road|Rd|Boulevard|Blvd|Lane|Ln|Drive|Dr|Court|Ct|Plaza|Plz|Square|Sq|Highway|Hwy|Parkway|Pkwy)\b",
            )
            .expect("street address regex should compile"),
            Regex::new(
                r"(?i)\b\d+[ \t]+[A-Za-z0-9 ,]+?[ \t](?:Unit|Apt|Apartment|Suite|Ste)[ \t]+[A-Za-z0-9-]+",
            )
            .expect("unit address regex should compile"),
        ]
    })
}

fn date_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(
                r"\b(?:Jan(?:uary)?|Feb(?:ruary)?|Mar(?:ch)?|Apr(?:il)?|May|Jun(?:e)?|Jul(?:y)?|Aug(?:ust)?|Sep(?:tember)?|Oct(?:ober)?|Nov(?:ember)?|Dec(?:ember)?)\s+\d{1,2}(?:st|nd|rd|th)?,\s+\d{4}\b",
            )
            .expect("written date regex should compile"),
            Regex::new(r"\b\d{1,2}/\d{1,2}/\d{2,4}\b").expect("slash date regex should compile"),
            Regex::new(r"\b\d{4}-\d{2}-\d{2}\b").expect("iso date regex should compile"),
        ]
    })
}

fn company_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"\b[A-Z][a-z]+(?:[ \t]+[A-Z][a-z]+)*[ \t]+(?:LLC|Inc|Corp|Corporation|Company|Co|Ltd|Limited)\b",
        )
        .expect("company regex should compile")
    })
}

fn money_res() -> &'static [Regex; 3] {
    static RES: OnceLock<[Regex; 3]> = OnceLock::new();
    RES.get_or_init(|| {
        [
            Regex::new(r"\$\d+(?:,\d{3})*(?:\.\d{2})?").expect("dollar regex should compile"),
            Regex::new(r"\b\d+(?:,\d{3})*\s+dollars\b").expect("dollars regex should compile"),
            Regex::new(r"\b\d+(?:\.\d{2})?\s*(?:USD|EUR|GBP)\b")
                .expect("currency code regex should compile"),
        ]
    })
}

/// Extract what the patterns can find in a message body.
pub fn extract(body: &str) -> EntityBag {
    let mut bag = EntityBag::default();

    for re in address_res() {
        for m in re.find_iter(body) {
            let address = m.as_str().trim().to_string();
            let already = bag
                .properties
                .iter()
                .any(|p| p.address.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(&address)));
            if !already {
                bag.properties.push(PropertyEntity {
                    address: Some(address),
                    confidence: Some(ADDRESS_CONFIDENCE),
                    ..Default::default()
                });
            }
        }
    }

    for re in date_res() {
        for m in re.find_iter(body) {
            let date = m.as_str().to_string();
            if !bag.dates.iter().any(|d| d.date.as_deref() == Some(date.as_str())) {
                bag.dates.push(DateEntity {
                    date: Some(date),
                    confidence: Some(DATE_CONFIDENCE),
                    ..Default::default()
                });
            }
        }
    }

    for m in company_re().find_iter(body) {
        let name = m.as_str().to_string();
        if !bag.companies.iter().any(|c| c.name.as_deref() == Some(name.as_str())) {
            bag.companies.push(CompanyEntity {
                name: Some(name),
                confidence: Some(COMPANY_CONFIDENCE),
                ..Default::default()
            });
        }
    }

    for re in money_res() {
        for m in re.find_iter(body) {
            let amount = m.as_str();
            bag.financial_details.push(FinancialDetail {
                amount: Some(amount.to_string()),
                currency: currency_of(amount).map(str::to_string),
                confidence: Some(MONEY_CONFIDENCE),
                ..Default::default()
            });
        }
    }

    bag
}

fn currency_of(amount: &str) -> Option<&'static str> {
    if amount.starts_with('$') || amount.ends_with("dollars") || amount.ends_with("USD") {
        Some("USD")
    } else if amount.ends_with("EUR") {
        Some("EUR")
    } else if amount.ends_with("GBP") {
        Some("GBP")
    } else {
        None
    }
}
