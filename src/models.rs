use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

// ============ Providers ============

/// Identifies a vehicle data provider.
///
/// Declaration order doubles as the tie-break order when two failures are equally
/// specific: the registry is consulted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    /// Government vehicle-enquiry registry.
    Registry,
    /// Commercial vehicle history / specification provider.
    History,
}

impl ProviderId {
    pub const fn as_str(self) -> &'static str {
        match self {
            ProviderId::Registry => "registry",
            ProviderId::History => "history",
        }
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw JSON body returned by one provider, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderPayload {
    pub provider: ProviderId,
    pub body: Value,
}

impl ProviderPayload {
    pub fn new(provider: ProviderId, body: Value) -> Self {
        Self { provider, body }
    }
}

/// A successful provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderFetch {
    pub payload: ProviderPayload,
    /// Whether the provider charges for this call.
    pub billable: bool,
}

// ============ Fields ============

/// Every field of a [`VehicleProfile`] that a provider or calculator can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Make,
    Model,
    Variant,
    Year,
    Colour,
    FuelType,
    Transmission,
    BodyType,
    Doors,
    Seats,
    EngineCapacity,
    UrbanMpg,
    ExtraUrbanMpg,
    CombinedMpg,
    Co2,
    AnnualTax,
    InsuranceGroup,
    EmissionClass,
    ListPrice,
    TaxStatus,
    TaxDueDate,
    MotStatus,
    MotExpiry,
    FirstRegistered,
    WriteOffCategory,
    Stolen,
    PreviousKeepers,
}

/// How a raw provider value is parsed for a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Integer,
    Decimal,
    Date,
    Flag,
}

impl Field {
    pub const ALL: [Field; 27] = [
        Field::Make,
        Field::Model,
        Field::Variant,
        Field::Year,
        Field::Colour,
        Field::FuelType,
        Field::Transmission,
        Field::BodyType,
        Field::Doors,
        Field::Seats,
        Field::EngineCapacity,
        Field::UrbanMpg,
        Field::ExtraUrbanMpg,
        Field::CombinedMpg,
        Field::Co2,
        Field::AnnualTax,
        Field::InsuranceGroup,
        Field::EmissionClass,
        Field::ListPrice,
        Field::TaxStatus,
        Field::TaxDueDate,
        Field::MotStatus,
        Field::MotExpiry,
        Field::FirstRegistered,
        Field::WriteOffCategory,
        Field::Stolen,
        Field::PreviousKeepers,
    ];

    /// Name used in serialized provenance maps.
    pub const fn as_str(self) -> &'static str {
        match self {
            Field::Make => "make",
            Field::Model => "model",
            Field::Variant => "variant",
            Field::Year => "year",
            Field::Colour => "colour",
            Field::FuelType => "fuel_type",
            Field::Transmission => "transmission",
            Field::BodyType => "body_type",
            Field::Doors => "doors",
            Field::Seats => "seats",
            Field::EngineCapacity => "engine_capacity_cc",
            Field::UrbanMpg => "urban_mpg",
            Field::ExtraUrbanMpg => "extra_urban_mpg",
            Field::CombinedMpg => "combined_mpg",
            Field::Co2 => "co2_g_km",
            Field::AnnualTax => "annual_tax",
            Field::InsuranceGroup => "insurance_group",
            Field::EmissionClass => "emission_class",
            Field::ListPrice => "list_price",
            Field::TaxStatus => "tax_status",
            Field::TaxDueDate => "tax_due_date",
            Field::MotStatus => "mot_status",
            Field::MotExpiry => "mot_expiry",
            Field::FirstRegistered => "first_registered",
            Field::WriteOffCategory => "write_off_category",
            Field::Stolen => "stolen",
            Field::PreviousKeepers => "previous_keepers",
        }
    }

    pub const fn kind(self) -> FieldKind {
        match self {
            Field::Year
            | Field::Doors
            | Field::Seats
            | Field::EngineCapacity
            | Field::Co2
            | Field::AnnualTax
            | Field::InsuranceGroup
            | Field::ListPrice
            | Field::PreviousKeepers => FieldKind::Integer,
            Field::UrbanMpg | Field::ExtraUrbanMpg | Field::CombinedMpg => FieldKind::Decimal,
            Field::TaxDueDate | Field::MotExpiry | Field::FirstRegistered => FieldKind::Date,
            Field::Stolen => FieldKind::Flag,
            _ => FieldKind::Text,
        }
    }

    /// Zero is a real value for these numeric fields (electric cars emit no CO2 and
    /// may pay no tax, a new car has had no previous keepers).
    pub const fn zero_is_valid(self) -> bool {
        matches!(self, Field::Co2 | Field::AnnualTax | Field::PreviousKeepers)
    }

    /// Whether an integer reading fits the profile slot for this field.
    pub fn holds_integer(self, n: i64) -> bool {
        match self {
            Field::Year => i32::try_from(n).is_ok(),
            _ => u32::try_from(n).is_ok(),
        }
    }
}

/// A parsed, non-null provider value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Date(NaiveDate),
    Flag(bool),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_decimal(&self) -> Option<f64> {
        match self {
            FieldValue::Decimal(n) => Some(*n),
            FieldValue::Integer(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            FieldValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_flag(&self) -> Option<bool> {
        match self {
            FieldValue::Flag(b) => Some(*b),
            _ => None,
        }
    }
}

/// Where a populated profile field came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSource {
    Registry,
    History,
    /// Computed by the tax calculator from other fields.
    Calculated,
    /// Coarse fallback estimate, never a provider figure.
    Estimated,
}

impl From<ProviderId> for FieldSource {
    fn from(provider: ProviderId) -> Self {
        match provider {
            ProviderId::Registry => FieldSource::Registry,
            ProviderId::History => FieldSource::History,
        }
    }
}

// ============ Profile ============

/// The resolved, normalized vehicle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleProfile {
    pub plate: String,
    pub title: String,

    // Identity
    pub make: Option<String>,
    pub model: Option<String>,
    pub variant: Option<String>,
    pub year: Option<i32>,
    pub colour: Option<String>,
    pub fuel_type: Option<String>,
    pub transmission: Option<String>,
    pub body_type: Option<String>,
    pub doors: Option<u32>,
    pub seats: Option<u32>,
    pub engine_capacity_cc: Option<u32>,
    pub mild_hybrid: bool,
    pub plug_in_hybrid: bool,

    // Running costs
    pub urban_mpg: Option<f64>,
    pub extra_urban_mpg: Option<f64>,
    pub combined_mpg: Option<f64>,
    pub co2_g_km: Option<u32>,
    pub annual_tax: Option<u32>,
    pub insurance_group: Option<u32>,
    pub emission_class: Option<String>,
    pub list_price: Option<u32>,

    // Status
    pub tax_status: Option<String>,
    pub tax_due_date: Option<NaiveDate>,
    pub mot_status: Option<String>,
    pub mot_expiry: Option<NaiveDate>,
    pub first_registered: Option<NaiveDate>,

    // History
    pub write_off_category: Option<String>,
    pub stolen: Option<bool>,
    pub previous_keepers: Option<u32>,

    // Provenance
    pub provenance: BTreeMap<String, FieldSource>,
    pub resolved_at: DateTime<Utc>,
}

impl VehicleProfile {
    pub fn empty(plate: &str, resolved_at: DateTime<Utc>) -> Self {
        Self {
            plate: plate.to_string(),
            title: String::new(),
            make: None,
            model: None,
            variant: None,
            year: None,
            colour: None,
            fuel_type: None,
            transmission: None,
            body_type: None,
            doors: None,
            seats: None,
            engine_capacity_cc: None,
            mild_hybrid: false,
            plug_in_hybrid: false,
            urban_mpg: None,
            extra_urban_mpg: None,
            combined_mpg: None,
            co2_g_km: None,
            annual_tax: None,
            insurance_group: None,
            emission_class: None,
            list_price: None,
            tax_status: None,
            tax_due_date: None,
            mot_status: None,
            mot_expiry: None,
            first_registered: None,
            write_off_category: None,
            stolen: None,
            previous_keepers: None,
            provenance: BTreeMap::new(),
            resolved_at,
        }
    }

    /// Stores `value` in the matching field and records where it came from.
    ///
    /// Values of the wrong kind or out of range for the target type are dropped,
    /// leaving the field and its provenance untouched.
    pub fn set(&mut self, field: Field, value: &FieldValue, source: FieldSource) {
        let text = || value.as_text().map(str::to_string);
        let uint = || value.as_integer().and_then(|n| u32::try_from(n).ok());

        let stored = match field {
            Field::Make => assign(&mut self.make, text()),
            Field::Model => assign(&mut self.model, text()),
            Field::Variant => assign(&mut self.variant, text()),
            Field::Year => assign(
                &mut self.year,
                value.as_integer().and_then(|n| i32::try_from(n).ok()),
            ),
            Field::Colour => assign(&mut self.colour, text()),
            Field::FuelType => assign(&mut self.fuel_type, text()),
            Field::Transmission => assign(&mut self.transmission, text()),
            Field::BodyType => assign(&mut self.body_type, text()),
            Field::Doors => assign(&mut self.doors, uint()),
            Field::Seats => assign(&mut self.seats, uint()),
            Field::EngineCapacity => assign(&mut self.engine_capacity_cc, uint()),
            Field::UrbanMpg => assign(&mut self.urban_mpg, value.as_decimal()),
            Field::ExtraUrbanMpg => assign(&mut self.extra_urban_mpg, value.as_decimal()),
            Field::CombinedMpg => assign(&mut self.combined_mpg, value.as_decimal()),
            Field::Co2 => assign(&mut self.co2_g_km, uint()),
            Field::AnnualTax => assign(&mut self.annual_tax, uint()),
            Field::InsuranceGroup => assign(&mut self.insurance_group, uint()),
            Field::EmissionClass => assign(&mut self.emission_class, text()),
            Field::ListPrice => assign(&mut self.list_price, uint()),
            Field::TaxStatus => assign(&mut self.tax_status, text()),
            Field::TaxDueDate => assign(&mut self.tax_due_date, value.as_date()),
            Field::MotStatus => assign(&mut self.mot_status, text()),
            Field::MotExpiry => assign(&mut self.mot_expiry, value.as_date()),
            Field::FirstRegistered => assign(&mut self.first_registered, value.as_date()),
            Field::WriteOffCategory => assign(&mut self.write_off_category, text()),
            Field::Stolen => assign(&mut self.stolen, value.as_flag()),
            Field::PreviousKeepers => assign(&mut self.previous_keepers, uint()),
        };

        if stored {
            self.provenance.insert(field.as_str().to_string(), source);
        }
    }

    pub fn source_of(&self, field: Field) -> Option<FieldSource> {
        self.provenance.get(field.as_str()).copied()
    }
}

fn assign<T>(slot: &mut Option<T>, value: Option<T>) -> bool {
    match value {
        Some(v) => {
            *slot = Some(v);
            true
        }
        None => false,
    }
}

// ============ Cost ============

/// What a single resolution cost.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CostReport {
    /// Number of billable provider calls made for this resolution.
    pub paid_calls: u32,
    pub providers_charged: Vec<ProviderId>,
    /// Served from the cache at zero cost.
    pub cache_hit: bool,
}

impl CostReport {
    pub fn cache_hit() -> Self {
        Self {
            paid_calls: 0,
            providers_charged: Vec::new(),
            cache_hit: true,
        }
    }
}

// ============ Caller contract ============

/// Options accepted by `LookupEngine::resolve`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct ResolveOptions {
    /// Skip the freshness check; still goes through single-flight.
    #[serde(default)]
    pub force_refresh: bool,
    /// Current odometer reading, forwarded to the history provider.
    #[serde(default)]
    pub mileage: Option<u32>,
}

/// Successful outcome of a resolution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Resolution {
    pub profile: VehicleProfile,
    pub cost: CostReport,
}
