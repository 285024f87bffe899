//! Manufacturer-specific clean-up applied after merge.
//!
//! Providers disagree on where the model name ends and the trim begins
//! ("Golf GTE", "320d M Sport", "C220 AMG Line"). Each manufacturer registers a
//! rule that knows its naming convention; adding a manufacturer means adding a
//! rule, not a branch.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::VehicleProfile;

static BMW_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<code>[1-8]\d{2}[a-z]{0,2}|[XZ]\d|M\d{1,3}[a-z]?|i[X3-8]\d?)\s+(?P<rest>.+)$")
        .expect("static BMW pattern")
});

static AUDI_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<code>RS\s?Q?\d|SQ\d|TTS?|[AQS]\d)\s+(?P<rest>.+)$")
        .expect("static Audi pattern")
});

static VOLVO_MODEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<code>XC\d{2}|EX\d{2}|[CSV]\d{2})\s+(?P<rest>.+)$")
        .expect("static Volvo pattern")
});

static MERCEDES_FAMILY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<code>CLA|CLS|GLA|GLB|GLC|GLE|GLS|EQA|EQB|EQC|EQE|EQS|SLK|SLC|SL)\b\s*(?P<rest>.+)$")
        .expect("static Mercedes family pattern")
});

static MERCEDES_CLASS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?P<letter>[ABCEGSV])\s?(?P<number>\d{3})").expect("static Mercedes class pattern")
});

/// How a manufacturer's model string is split into model and variant.
pub enum Splitter {
    /// Model starts with one of these base names followed by trim text.
    BaseModel(&'static [&'static str]),
    /// Regex with `code` and `rest` groups: model = code, variant = rest.
    ModelCode(&'static LazyLock<Regex>),
    /// Regex with a `letter` group naming a class: model = "<letter>-Class",
    /// variant = the original model string when no variant is set.
    ClassLetter(&'static LazyLock<Regex>),
}

pub struct ManufacturerRule {
    pub name: &'static str,
    /// Upper-case make spellings this rule applies to, compared without spaces or hyphens.
    pub makes: &'static [&'static str],
    pub splitters: Vec<Splitter>,
}

/// Result of applying a splitter to a model string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSplit {
    pub model: String,
    pub variant: Option<String>,
}

const VOLKSWAGEN_MODELS: &[&str] = &[
    "Golf",
    "Polo",
    "Passat",
    "Tiguan",
    "T-Roc",
    "T-Cross",
    "Touran",
    "Touareg",
    "Arteon",
    "Up",
    "ID.3",
    "ID.4",
    "ID.5",
    "ID.7",
    "Taigo",
    "Sharan",
    "Scirocco",
    "Caddy",
    "Transporter",
    "Amarok",
    "Beetle",
    "Jetta",
];

const MILD_HYBRID_MARKERS: &[&str] = &["mhev", "mild hybrid", "mild-hybrid"];
const PLUG_IN_MARKERS: &[&str] = &["phev", "plug-in", "gte", "e-hybrid", "recharge"];

impl Splitter {
    pub fn split(&self, model: &str) -> Option<ModelSplit> {
        match self {
            Splitter::BaseModel(bases) => {
                let model = model.trim();
                bases
                    .iter()
                    .filter(|base| {
                        model
                            .get(..base.len())
                            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(base))
                            && model[base.len()..].starts_with(char::is_whitespace)
                    })
                    .max_by_key(|base| base.len())
                    .map(|base| ModelSplit {
                        model: base.to_string(),
                        variant: Some(model[base.len()..].trim().to_string()),
                    })
            }
            Splitter::ModelCode(pattern) => {
                let caps = pattern.captures(model.trim())?;
                Some(ModelSplit {
                    model: caps["code"].to_string(),
                    variant: Some(caps["rest"].trim().to_string()),
                })
            }
            Splitter::ClassLetter(pattern) => {
                let caps = pattern.captures(model.trim())?;
                Some(ModelSplit {
                    model: format!("{}-Class", caps["letter"].to_uppercase()),
                    variant: Some(model.trim().to_string()),
                })
            }
        }
    }
}

impl ManufacturerRule {
    pub fn matches_make(&self, make: &str) -> bool {
        let key = make_key(make);
        self.makes.iter().any(|m| make_key(m) == key)
    }
}

fn make_key(make: &str) -> String {
    make.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_uppercase)
        .collect()
}

/// Registry of manufacturer rules plus the manufacturer-independent passes.
pub struct Normalizer {
    rules: Vec<ManufacturerRule>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(vec![
            ManufacturerRule {
                name: "volkswagen",
                makes: &["VOLKSWAGEN", "VW"],
                splitters: vec![Splitter::BaseModel(VOLKSWAGEN_MODELS)],
            },
            ManufacturerRule {
                name: "bmw",
                makes: &["BMW"],
                splitters: vec![Splitter::ModelCode(&BMW_MODEL)],
            },
            ManufacturerRule {
                name: "audi",
                makes: &["AUDI"],
                splitters: vec![Splitter::ModelCode(&AUDI_MODEL)],
            },
            ManufacturerRule {
                name: "volvo",
                makes: &["VOLVO"],
                splitters: vec![Splitter::ModelCode(&VOLVO_MODEL)],
            },
            ManufacturerRule {
                name: "mercedes-benz",
                makes: &["MERCEDES-BENZ", "MERCEDES", "MERCEDES BENZ"],
                splitters: vec![
                    Splitter::ModelCode(&MERCEDES_FAMILY),
                    Splitter::ClassLetter(&MERCEDES_CLASS),
                ],
            },
        ])
    }
}

impl Normalizer {
    pub fn new(rules: Vec<ManufacturerRule>) -> Self {
        Self { rules }
    }

    /// Runs every normalization pass over a merged profile.
    pub fn apply(&self, profile: &mut VehicleProfile) {
        self.split_model(profile);

        if let Some(body) = profile.body_type.take() {
            profile.body_type = Some(sentence_case(&body));
        }

        profile.title = display_title(profile);
        self.flag_hybrids(profile);
    }

    fn split_model(&self, profile: &mut VehicleProfile) {
        let (Some(make), Some(model)) = (profile.make.as_deref(), profile.model.as_deref()) else {
            return;
        };
        let Some(rule) = self.rules.iter().find(|r| r.matches_make(make)) else {
            return;
        };
        let Some(split) = rule.splitters.iter().find_map(|s| s.split(model)) else {
            return;
        };

        tracing::debug!(
            "{}: {} rule split '{}' into '{}' / {:?}",
            profile.plate,
            rule.name,
            model,
            split.model,
            split.variant
        );

        let model_source = profile.source_of(crate::models::Field::Model);
        profile.model = Some(split.model);
        if profile.variant.is_none() {
            if let (Some(variant), Some(source)) = (split.variant, model_source) {
                profile.variant = Some(variant);
                profile
                    .provenance
                    .insert(crate::models::Field::Variant.as_str().to_string(), source);
            }
        }
    }

    fn flag_hybrids(&self, profile: &mut VehicleProfile) {
        let haystack = [
            profile.model.as_deref(),
            profile.variant.as_deref(),
            Some(profile.title.as_str()),
        ];

        profile.mild_hybrid = haystack
            .iter()
            .flatten()
            .any(|text| contains_marker(text, MILD_HYBRID_MARKERS));
        profile.plug_in_hybrid = haystack
            .iter()
            .flatten()
            .any(|text| contains_marker(text, PLUG_IN_MARKERS));

        if profile.mild_hybrid {
            if let Some(fuel) = profile.fuel_type.as_mut() {
                if !fuel.to_lowercase().contains("hybrid") {
                    fuel.push_str(" Hybrid");
                }
            }
        }
    }
}

/// First letter upper, rest lower.
pub fn sentence_case(text: &str) -> String {
    let mut chars = text.trim().chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

/// "{year} {make} {model} {variant}", skipping missing parts.
pub fn display_title(profile: &VehicleProfile) -> String {
    let year = profile.year.map(|y| y.to_string());
    [
        year.as_deref(),
        profile.make.as_deref(),
        profile.model.as_deref(),
        profile.variant.as_deref(),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(" ")
}

/// Case-insensitive whole-word match of any marker in `text`.
fn contains_marker(text: &str, markers: &[&str]) -> bool {
    let lower = text.to_lowercase();
    markers.iter().any(|marker| {
        lower.match_indices(marker).any(|(start, _)| {
            let end = start + marker.len();
            let before = lower[..start].chars().next_back();
            let after = lower[end..].chars().next();
            !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
        })
    })
}
