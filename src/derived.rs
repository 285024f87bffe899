//! Fallback calculators for fields the providers left empty.
//!
//! Figures are UK vehicle excise duty rates in whole pounds and a coarse 1-50
//! insurance group estimate. A calculator that lacks its inputs reports
//! [`CannotCalculate`]; the caller leaves the field empty rather than guess.

use chrono::Datelike;

use crate::models::{Field, FieldSource, FieldValue, VehicleProfile};

/// A derived value could not be produced from the available inputs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cannot calculate: {0}")]
pub struct CannotCalculate(pub &'static str);

/// First registration year taxed under the flat-rate regime.
pub const FLAT_RATE_FROM_YEAR: i32 = 2017;
/// First registration year taxed by CO2 band.
pub const CO2_BANDS_FROM_YEAR: i32 = 2001;

pub const FLAT_RATE: u32 = 195;
pub const EXPENSIVE_CAR_SUPPLEMENT: u32 = 425;
/// List price above which the supplement applies.
pub const EXPENSIVE_CAR_THRESHOLD: u32 = 40_000;

/// (CO2 ceiling in g/km, annual rate). Rates never decrease as the ceiling rises.
pub const CO2_BANDS: &[(u32, u32)] = &[
    (100, 20),
    (110, 20),
    (120, 35),
    (130, 165),
    (140, 195),
    (150, 215),
    (165, 265),
    (175, 315),
    (185, 345),
    (200, 395),
    (225, 430),
    (255, 735),
];
/// Rate for cars above the last band ceiling.
pub const CO2_TOP_RATE: u32 = 760;

pub const SMALL_ENGINE_MAX_CC: u32 = 1549;
pub const SMALL_ENGINE_RATE: u32 = 220;
pub const LARGE_ENGINE_RATE: u32 = 360;

/// Inputs for the annual tax calculation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaxInputs<'a> {
    pub year: Option<i32>,
    pub co2_g_km: Option<u32>,
    pub engine_capacity_cc: Option<u32>,
    pub fuel_type: Option<&'a str>,
    pub list_price: Option<u32>,
}

impl<'a> TaxInputs<'a> {
    pub fn from_profile(profile: &'a VehicleProfile) -> Self {
        Self {
            year: profile.year,
            co2_g_km: profile.co2_g_km,
            engine_capacity_cc: profile.engine_capacity_cc,
            fuel_type: profile.fuel_type.as_deref(),
            list_price: profile.list_price,
        }
    }

    fn is_electric(&self) -> bool {
        let fuel_electric = self
            .fuel_type
            .map(|fuel| {
                let fuel = fuel.to_ascii_lowercase();
                fuel.contains("electric") && !fuel.contains("hybrid")
            })
            .unwrap_or(false);
        fuel_electric || self.co2_g_km == Some(0)
    }
}

/// Annual vehicle excise duty in pounds.
pub fn annual_tax(inputs: &TaxInputs<'_>) -> Result<u32, CannotCalculate> {
    if inputs.is_electric() {
        return Ok(0);
    }

    let year = inputs.year.ok_or(CannotCalculate("year of manufacture unknown"))?;

    if year >= FLAT_RATE_FROM_YEAR {
        let supplement = match inputs.list_price {
            Some(price) if price > EXPENSIVE_CAR_THRESHOLD => EXPENSIVE_CAR_SUPPLEMENT,
            _ => 0,
        };
        return Ok(FLAT_RATE + supplement);
    }

    if year >= CO2_BANDS_FROM_YEAR {
        let co2 = inputs.co2_g_km.ok_or(CannotCalculate("CO2 emissions unknown"))?;
        return Ok(co2_band_rate(co2));
    }

    let engine = inputs
        .engine_capacity_cc
        .ok_or(CannotCalculate("engine capacity unknown"))?;
    if engine <= SMALL_ENGINE_MAX_CC {
        Ok(SMALL_ENGINE_RATE)
    } else {
        Ok(LARGE_ENGINE_RATE)
    }
}

/// Rate of the first band whose ceiling is at or above `co2`.
pub fn co2_band_rate(co2: u32) -> u32 {
    CO2_BANDS
        .iter()
        .find(|(ceiling, _)| co2 <= *ceiling)
        .map(|(_, rate)| *rate)
        .unwrap_or(CO2_TOP_RATE)
}

/// Upper bounds of the engine buckets in cc; anything larger uses the last row.
const ENGINE_BUCKETS: [u32; 5] = [1000, 1400, 1800, 2200, 3000];

/// Estimated group per engine bucket, by age: 0-3, 4-10, 11+ years.
const INSURANCE_GROUPS: [[u32; 3]; 6] = [
    [5, 4, 3],
    [10, 8, 6],
    [16, 13, 10],
    [24, 20, 16],
    [33, 28, 22],
    [42, 36, 30],
];

/// Coarse insurance group from engine size and age. Display fallback only.
pub fn estimate_insurance_group(
    engine_capacity_cc: Option<u32>,
    year: Option<i32>,
    current_year: i32,
) -> Result<u32, CannotCalculate> {
    let engine = engine_capacity_cc.ok_or(CannotCalculate("engine capacity unknown"))?;
    let year = year.ok_or(CannotCalculate("year of manufacture unknown"))?;

    let row = ENGINE_BUCKETS
        .iter()
        .position(|limit| engine <= *limit)
        .unwrap_or(ENGINE_BUCKETS.len());
    let age = (current_year - year).max(0);
    let column = match age {
        0..=3 => 0,
        4..=10 => 1,
        _ => 2,
    };

    Ok(INSURANCE_GROUPS[row][column])
}

/// Fills annual tax and insurance group when no provider supplied them.
pub fn fill_derived(profile: &mut VehicleProfile) {
    if profile.annual_tax.is_none() {
        let tax = annual_tax(&TaxInputs::from_profile(profile));
        match tax {
            Ok(tax) => profile.set(
                Field::AnnualTax,
                &FieldValue::Integer(i64::from(tax)),
                FieldSource::Calculated,
            ),
            Err(reason) => {
                tracing::debug!("{}: annual tax omitted ({})", profile.plate, reason)
            }
        }
    }

    if profile.insurance_group.is_none() {
        let current_year = profile.resolved_at.year();
        let group =
            estimate_insurance_group(profile.engine_capacity_cc, profile.year, current_year);
        match group {
            Ok(group) => profile.set(
                Field::InsuranceGroup,
                &FieldValue::Integer(i64::from(group)),
                FieldSource::Estimated,
            ),
            Err(reason) => {
                tracing::debug!("{}: insurance group omitted ({})", profile.plate, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_electric_pays_nothing() {
        let inputs = TaxInputs {
            year: Some(2022),
            co2_g_km: Some(0),
            ..Default::default()
        };
        assert_eq!(annual_tax(&inputs), Ok(0));

        let by_fuel = TaxInputs {
            year: Some(2022),
            fuel_type: Some("ELECTRICITY"),
            list_price: Some(60_000),
            ..Default::default()
        };
        assert_eq!(annual_tax(&by_fuel), Ok(0));
    }

    #[test]
    fn test_hybrid_is_not_electric() {
        let inputs = TaxInputs {
            year: Some(2021),
            co2_g_km: Some(30),
            fuel_type: Some("Hybrid Electric"),
            ..Default::default()
        };
        assert_eq!(annual_tax(&inputs), Ok(FLAT_RATE));
    }

    #[test]
    fn test_flat_rate_with_supplement() {
        let cheap = TaxInputs {
            year: Some(2019),
            co2_g_km: Some(120),
            list_price: Some(25_000),
            ..Default::default()
        };
        assert_eq!(annual_tax(&cheap), Ok(FLAT_RATE));

        let expensive = TaxInputs {
            list_price: Some(52_000),
            ..cheap.clone()
        };
        assert_eq!(annual_tax(&expensive), Ok(FLAT_RATE + EXPENSIVE_CAR_SUPPLEMENT));

        let unknown_price = TaxInputs {
            list_price: None,
            ..cheap
        };
        assert_eq!(annual_tax(&unknown_price), Ok(FLAT_RATE));
    }

    #[test]
    fn test_co2_band_lookup() {
        let inputs = TaxInputs {
            year: Some(2010),
            co2_g_km: Some(135),
            ..Default::default()
        };
        // 135 g/km falls in the band with ceiling 140
        assert_eq!(annual_tax(&inputs), Ok(195));
        assert_eq!(co2_band_rate(140), 195);
        assert_eq!(co2_band_rate(141), 215);
        assert_eq!(co2_band_rate(400), CO2_TOP_RATE);
    }

    #[test]
    fn test_co2_bands_monotonic() {
        for pair in CO2_BANDS.windows(2) {
            assert!(pair[0].0 < pair[1].0);
            assert!(pair[0].1 <= pair[1].1);
        }
        assert!(CO2_BANDS.last().unwrap().1 <= CO2_TOP_RATE);
    }

    #[test]
    fn test_pre_2001_engine_tiers() {
        let large = TaxInputs {
            year: Some(1998),
            engine_capacity_cc: Some(1800),
            ..Default::default()
        };
        assert_eq!(annual_tax(&large), Ok(LARGE_ENGINE_RATE));

        let small = TaxInputs {
            engine_capacity_cc: Some(1549),
            ..large
        };
        assert_eq!(annual_tax(&small), Ok(SMALL_ENGINE_RATE));
    }

    #[test]
    fn test_missing_inputs_cannot_calculate() {
        let banded = TaxInputs {
            year: Some(2010),
            ..Default::default()
        };
        assert!(annual_tax(&banded).is_err());

        let old = TaxInputs {
            year: Some(1995),
            co2_g_km: Some(180),
            ..Default::default()
        };
        assert!(annual_tax(&old).is_err());

        assert!(annual_tax(&TaxInputs::default()).is_err());
    }

    #[test]
    fn test_insurance_estimate_buckets() {
        assert_eq!(estimate_insurance_group(Some(998), Some(2023), 2025), Ok(5));
        assert_eq!(estimate_insurance_group(Some(1998), Some(2015), 2025), Ok(20));
        assert_eq!(estimate_insurance_group(Some(4400), Some(2005), 2025), Ok(30));
        assert!(estimate_insurance_group(None, Some(2015), 2025).is_err());
        assert!(estimate_insurance_group(Some(1600), None, 2025).is_err());
    }

    #[test]
    fn test_fill_derived_tags_provenance() {
        let resolved_at = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let mut profile = VehicleProfile::empty("AB12CDE", resolved_at);
        profile.year = Some(2012);
        profile.co2_g_km = Some(119);
        profile.engine_capacity_cc = Some(1390);

        fill_derived(&mut profile);

        assert_eq!(profile.annual_tax, Some(35));
        assert_eq!(profile.source_of(Field::AnnualTax), Some(FieldSource::Calculated));
        assert_eq!(profile.insurance_group, Some(6));
        assert_eq!(profile.source_of(Field::InsuranceGroup), Some(FieldSource::Estimated));
    }

    #[test]
    fn test_fill_derived_keeps_provider_values() {
        let mut profile = VehicleProfile::empty("AB12CDE", Utc::now());
        profile.set(Field::AnnualTax, &FieldValue::Integer(180), FieldSource::History);
        profile.set(Field::InsuranceGroup, &FieldValue::Integer(14), FieldSource::History);

        fill_derived(&mut profile);

        assert_eq!(profile.annual_tax, Some(180));
        assert_eq!(profile.source_of(Field::InsuranceGroup), Some(FieldSource::History));
    }

    #[test]
    fn test_fill_derived_omits_when_inputs_missing() {
        let mut profile = VehicleProfile::empty("AB12CDE", Utc::now());
        profile.year = Some(2008);

        fill_derived(&mut profile);

        assert_eq!(profile.annual_tax, None);
        assert_eq!(profile.insurance_group, None);
        assert!(profile.provenance.is_empty());
    }
}
