//! Extracted facts attached to a message, and the capsule-level entity lists
//! built from them.
//!
//! The semantic service returns loosely shaped JSON; everything here is
//! deserialized leniently (nulls become empty lists, unparseable list items are
//! dropped) so one odd field never throws away a whole extraction.
//!
//! Capsule entity lists hold at most one entry per normalized key:
//! properties key on name, then address, then value; people and companies on
//! name; dates on date, then value. Keys are lower-cased. First occurrence wins.

use std::collections::HashSet;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

/// Everything extracted from one message.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityBag {
    #[serde(default, deserialize_with = "lenient_list")]
    pub properties: Vec<PropertyEntity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub people: Vec<PersonEntity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub companies: Vec<CompanyEntity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub dates: Vec<DateEntity>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub financial_details: Vec<FinancialDetail>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub action_items: Vec<ActionItem>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub keywords: Vec<Keyword>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub property_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl PropertyEntity {
    pub fn with_address(address: &str) -> Self {
        Self {
            address: Some(address.to_string()),
            ..Default::default()
        }
    }

    pub fn with_name(name: &str) -> Self {
        Self {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    /// Label used when prefixing capsule titles: address, else value.
    pub fn label(&self) -> &str {
        non_empty(&self.address)
            .or_else(|| non_empty(&self.value))
            .unwrap_or("")
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PersonEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompanyEntity {
    #[serde(default, alias = "company_name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "type", skip_serializing_if = "Option::is_none")]
    pub company_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, alias = "refers_to", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialDetail {
    #[serde(default, deserialize_with = "string_or_number", skip_serializing_if = "Option::is_none")]
    pub amount: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, alias = "refers_to", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// A structured action item, as extracted alongside the other entities.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionItem {
    #[serde(default, alias = "task", skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, alias = "owner", skip_serializing_if = "Option::is_none")]
    pub responsible: Option<String>,
    #[serde(default, alias = "due_date", skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
}

/// A keyword; the service sends either bare strings or `{ "term": ... }` objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Keyword(pub String);

impl<'de> Deserialize<'de> for Keyword {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Text(String),
            Tagged {
                #[serde(alias = "keyword", alias = "value")]
                term: String,
            },
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Text(term) | Repr::Tagged { term } => Keyword(term),
        })
    }
}

/// The entity subset a capsule carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapsuleEntities {
    #[serde(default)]
    pub properties: Vec<PropertyEntity>,
    #[serde(default)]
    pub people: Vec<PersonEntity>,
    #[serde(default)]
    pub companies: Vec<CompanyEntity>,
    #[serde(default)]
    pub dates: Vec<DateEntity>,
}

impl CapsuleEntities {
    /// Merge the entity lists of several bags, dropping duplicate keys and
    /// entries that have no key at all.
    pub fn merge<'a>(bags: impl IntoIterator<Item = &'a EntityBag>) -> Self {
        let mut merged = CapsuleEntities::default();
        let mut seen_properties = HashSet::new();
        let mut seen_people = HashSet::new();
        let mut seen_companies = HashSet::new();
        let mut seen_dates = HashSet::new();

        for bag in bags {
            for property in &bag.properties {
                if first_seen(&mut seen_properties, property_key(property)) {
                    merged.properties.push(property.clone());
                }
            }
            for person in &bag.people {
                if first_seen(&mut seen_people, lower(&person.name)) {
                    merged.people.push(person.clone());
                }
            }
            for company in &bag.companies {
                if first_seen(&mut seen_companies, lower(&company.name)) {
                    merged.companies.push(company.clone());
                }
            }
            for date in &bag.dates {
                if first_seen(&mut seen_dates, date_key(date)) {
                    merged.dates.push(date.clone());
                }
            }
        }

        merged
    }

    pub fn from_bag(bag: &EntityBag) -> Self {
        Self::merge(std::iter::once(bag))
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
            && self.people.is_empty()
            && self.companies.is_empty()
            && self.dates.is_empty()
    }
}

/// Dedup key for a property: name, else address, else value.
pub fn property_key(property: &PropertyEntity) -> String {
    let key = lower(&property.name);
    if !key.is_empty() {
        return key;
    }
    let key = lower(&property.address);
    if !key.is_empty() {
        return key;
    }
    lower(&property.value)
}

fn date_key(date: &DateEntity) -> String {
    let key = lower(&date.date);
    if key.is_empty() {
        lower(&date.value)
    } else {
        key
    }
}

/// The set used for entity-overlap comparisons between messages: lower-cased
/// property names and addresses, person names and company names.
pub fn entity_keys(bag: &EntityBag) -> HashSet<String> {
    let mut keys = HashSet::new();
    for property in &bag.properties {
        keys.insert(lower(&property.name));
        keys.insert(lower(&property.address));
    }
    for person in &bag.people {
        keys.insert(lower(&person.name));
    }
    for company in &bag.companies {
        keys.insert(lower(&company.name));
    }
    keys.remove("");
    keys
}

/// Number of keys two sets share.
pub fn overlap(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.intersection(b).count()
}

fn first_seen(seen: &mut HashSet<String>, key: String) -> bool {
    !key.is_empty() && seen.insert(key)
}

fn lower(value: &Option<String>) -> String {
    value.as_deref().unwrap_or("").trim().to_lowercase()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Accept `null`, a missing field, or a list; drop items that do not parse.
fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let raw = Option::<Vec<serde_json::Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect())
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<serde_json::Value>::deserialize(deserializer)? {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
