//! Combines provider payloads into one set of fields.
//!
//! Each field has a fixed provider preference. A lower-priority provider only
//! contributes when every provider ahead of it omitted the field or sent a
//! null-equivalent, so the outcome depends on the payloads and never on the
//! order they arrived in.

use chrono::NaiveDate;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{Field, FieldKind, FieldValue, ProviderId, ProviderPayload, VehicleProfile};
use crate::services::field_map;

/// Provider preference per field, most trusted first.
///
/// The registry is authoritative for what is registered with the government
/// (identity, CO2, tax and MOT); the history provider is more granular for
/// everything descriptive.
pub const fn priority(field: Field) -> [ProviderId; 2] {
    use ProviderId::{History, Registry};
    match field {
        Field::Make
        | Field::Year
        | Field::Colour
        | Field::FuelType
        | Field::EngineCapacity
        | Field::Co2
        | Field::TaxStatus
        | Field::TaxDueDate
        | Field::MotStatus
        | Field::MotExpiry
        | Field::FirstRegistered => [Registry, History],
        Field::Model
        | Field::Variant
        | Field::BodyType
        | Field::Transmission
        | Field::Doors
        | Field::Seats
        | Field::UrbanMpg
        | Field::ExtraUrbanMpg
        | Field::CombinedMpg
        | Field::AnnualTax
        | Field::InsuranceGroup
        | Field::EmissionClass
        | Field::ListPrice
        | Field::WriteOffCategory
        | Field::Stolen
        | Field::PreviousKeepers => [History, Registry],
    }
}

/// Merged value and the provider it was taken from.
pub type MergedFields = BTreeMap<Field, (FieldValue, ProviderId)>;

/// True for the string sentinels providers use in place of a missing value.
pub fn is_null_sentinel(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("undefined")
}

/// Parses a raw JSON value for `field`, returning `None` for anything null-equivalent.
pub fn parse_value(field: Field, raw: &Value) -> Option<FieldValue> {
    if let Some(text) = raw.as_str() {
        if is_null_sentinel(text) {
            return None;
        }
    }

    let value = match field.kind() {
        FieldKind::Text => match raw {
            Value::String(s) => FieldValue::Text(s.trim().to_string()),
            Value::Number(n) => FieldValue::Text(n.to_string()),
            _ => return None,
        },
        FieldKind::Integer => {
            FieldValue::Integer(parse_integer(raw).filter(|n| field.holds_integer(*n))?)
        }
        FieldKind::Decimal => FieldValue::Decimal(parse_decimal(raw)?),
        FieldKind::Date => FieldValue::Date(parse_date(raw.as_str()?)?),
        FieldKind::Flag => FieldValue::Flag(parse_flag(raw)?),
    };

    let is_zero = match &value {
        FieldValue::Integer(n) => *n == 0,
        FieldValue::Decimal(n) => *n == 0.0,
        _ => false,
    };
    if is_zero && !field.zero_is_valid() {
        return None;
    }

    Some(value)
}

fn parse_integer(raw: &Value) -> Option<i64> {
    match raw {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
        // Leading digits only: insurance groups arrive as "14E", prices as "41,500"
        Value::String(s) => {
            let digits: String = s
                .trim()
                .trim_start_matches('£')
                .chars()
                .filter(|c| *c != ',')
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse().ok()
        }
        _ => None,
    }
}

fn parse_decimal(raw: &Value) -> Option<f64> {
    let parsed = match raw {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|f| f.is_finite())
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .or_else(|_| NaiveDate::parse_from_str(text, "%d/%m/%Y"))
        .or_else(|_| NaiveDate::parse_from_str(&format!("{}-01", text), "%Y-%m-%d"))
        .ok()
        // Timestamps such as "2024-05-01T00:00:00Z"
        .or_else(|| text.get(..10).and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok()))
}

fn parse_flag(raw: &Value) -> Option<bool> {
    match raw {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" => Some(true),
            "false" | "no" | "n" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Non-null fields present in one provider payload.
pub fn extract_fields(payload: &ProviderPayload) -> BTreeMap<Field, FieldValue> {
    field_map(payload.provider)
        .iter()
        .filter_map(|(field, pointer)| {
            let raw = payload.body.pointer(pointer)?;
            parse_value(*field, raw).map(|value| (*field, value))
        })
        .collect()
}

/// Merges payloads under the priority table.
///
/// If the same provider appears more than once, its first payload is used.
pub fn merge_payloads(payloads: &[ProviderPayload]) -> MergedFields {
    let mut by_provider: BTreeMap<ProviderId, BTreeMap<Field, FieldValue>> = BTreeMap::new();
    for payload in payloads {
        by_provider
            .entry(payload.provider)
            .or_insert_with(|| extract_fields(payload));
    }

    let mut merged = MergedFields::new();
    for field in Field::ALL {
        let winner = priority(field).into_iter().find_map(|provider| {
            by_provider
                .get(&provider)
                .and_then(|fields| fields.get(&field))
                .map(|value| (value.clone(), provider))
        });
        if let Some(entry) = winner {
            merged.insert(field, entry);
        }
    }

    merged
}

/// Writes merged fields into `profile`, tagging each with its provider.
pub fn apply_merged(profile: &mut VehicleProfile, merged: &MergedFields) {
    for (field, (value, provider)) in merged {
        profile.set(*field, value, (*provider).into());
    }
}
