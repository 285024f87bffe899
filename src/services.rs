use crate::config::Config;
use crate::errors::ProviderError;
use crate::models::*;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Outcome of one provider call.
pub type ProviderResult = Result<ProviderFetch, ProviderError>;

/// A paid vehicle data source.
///
/// Implementations make exactly one network request per `fetch` and never retry:
/// retries belong to the orchestrator, which is the only place that can keep the
/// paid-call count honest.
#[async_trait]
pub trait VehicleDataProvider: Send + Sync {
    fn id(&self) -> ProviderId;

    async fn fetch(&self, plate: &str, mileage: Option<u32>) -> ProviderResult;
}

/// JSON pointers into each provider's response body, per profile field.
pub fn field_map(provider: ProviderId) -> &'static [(Field, &'static str)] {
    match provider {
        ProviderId::Registry => REGISTRY_FIELDS,
        ProviderId::History => HISTORY_FIELDS,
    }
}

const REGISTRY_FIELDS: &[(Field, &str)] = &[
    (Field::Make, "/make"),
    (Field::Model, "/model"),
    (Field::Year, "/yearOfManufacture"),
    (Field::Colour, "/colour"),
    (Field::FuelType, "/fuelType"),
    (Field::EngineCapacity, "/engineCapacity"),
    (Field::Co2, "/co2Emissions"),
    (Field::EmissionClass, "/euroStatus"),
    (Field::TaxStatus, "/taxStatus"),
    (Field::TaxDueDate, "/taxDueDate"),
    (Field::MotStatus, "/motStatus"),
    (Field::MotExpiry, "/motExpiryDate"),
    (Field::FirstRegistered, "/monthOfFirstRegistration"),
];

const HISTORY_FIELDS: &[(Field, &str)] = &[
    (Field::Make, "/vehicle/make"),
    (Field::Model, "/vehicle/model"),
    (Field::Variant, "/vehicle/variant"),
    (Field::Year, "/vehicle/yearOfManufacture"),
    (Field::Colour, "/vehicle/colour"),
    (Field::FuelType, "/vehicle/fuelType"),
    (Field::Transmission, "/vehicle/transmission"),
    (Field::BodyType, "/vehicle/bodyStyle"),
    (Field::Doors, "/vehicle/numberOfDoors"),
    (Field::Seats, "/vehicle/numberOfSeats"),
    (Field::EngineCapacity, "/vehicle/engineCapacity"),
    (Field::UrbanMpg, "/vehicle/fuelEconomy/urbanMpg"),
    (Field::ExtraUrbanMpg, "/vehicle/fuelEconomy/extraUrbanMpg"),
    (Field::CombinedMpg, "/vehicle/fuelEconomy/combinedMpg"),
    (Field::Co2, "/vehicle/co2Emissions"),
    (Field::AnnualTax, "/vehicle/annualTax"),
    (Field::InsuranceGroup, "/vehicle/insuranceGroup"),
    (Field::EmissionClass, "/vehicle/euroStatus"),
    (Field::ListPrice, "/vehicle/listPrice"),
    (Field::FirstRegistered, "/vehicle/firstRegistered"),
    (Field::WriteOffCategory, "/history/writeOffCategory"),
    (Field::Stolen, "/history/stolen"),
    (Field::PreviousKeepers, "/history/previousKeepers"),
];

/// Maps an unsuccessful HTTP status onto the shared failure taxonomy.
pub fn classify_status(status: StatusCode, detail: &str) -> ProviderError {
    let message = format!("status {}: {}", status, detail);
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ProviderError::InvalidInput(message)
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Auth(message),
        StatusCode::NOT_FOUND => ProviderError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => ProviderError::RateLimited(message),
        _ => ProviderError::Network(message),
    }
}

fn transport_error(provider: ProviderId, err: reqwest::Error) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Network(format!("{} request timed out", provider))
    } else {
        ProviderError::Network(format!("{} request failed: {}", provider, err))
    }
}

fn build_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(timeout).build()
}

// ============ Registry (government vehicle enquiry) ============

pub struct RegistryService {
    client: Client,
    base_url: String,
    api_key: String,
}

impl RegistryService {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.provider_timeout_secs))?,
            base_url: config.registry_base_url.clone(),
            api_key: config.registry_api_key.clone(),
        })
    }
}

#[async_trait]
impl VehicleDataProvider for RegistryService {
    fn id(&self) -> ProviderId {
        ProviderId::Registry
    }

    /// Look up registration, tax and MOT status for a plate.
    async fn fetch(&self, plate: &str, _mileage: Option<u32>) -> ProviderResult {
        let url = format!("{}/vehicle-enquiry/v1/vehicles", self.base_url);

        tracing::info!("Registry: Looking up {}", plate);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&json!({ "registrationNumber": plate }))
            .send()
            .await
            .map_err(|e| transport_error(ProviderId::Registry, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("Registry returned error {} for {}", status, plate);
            return Err(classify_status(status, &error_text));
        }

        let body: Value = response.json().await.map_err(|e| {
            ProviderError::Network(format!("Failed to parse registry response: {}", e))
        })?;

        tracing::info!("Registry: Successfully retrieved {}", plate);
        Ok(ProviderFetch {
            payload: ProviderPayload::new(ProviderId::Registry, body),
            billable: true,
        })
    }
}

// ============ History / specification provider ============

pub struct HistoryService {
    client: Client,
    base_url: String,
    api_token: String,
}

impl HistoryService {
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_client(Duration::from_secs(config.provider_timeout_secs))?,
            base_url: config.history_base_url.clone(),
            api_token: config.history_api_key.clone(),
        })
    }
}

/// Maps the provider's in-body status onto the shared taxonomy.
///
/// The provider answers 200 for most business failures and reports them in
/// `responseStatus`.
pub fn classify_history_status(status: &str) -> Result<(), ProviderError> {
    match status {
        "Success" => Ok(()),
        "NoResults" | "VehicleNotFound" => {
            Err(ProviderError::NotFound(format!("history provider: {}", status)))
        }
        "InvalidVrm" => Err(ProviderError::InvalidInput(format!(
            "history provider: {}",
            status
        ))),
        "KeyInvalid" | "Unauthorised" => {
            Err(ProviderError::Auth(format!("history provider: {}", status)))
        }
        "ThrottleExceeded" => Err(ProviderError::RateLimited(format!(
            "history provider: {}",
            status
        ))),
        other => Err(ProviderError::Network(format!(
            "history provider returned unexpected status '{}'",
            other
        ))),
    }
}

#[async_trait]
impl VehicleDataProvider for HistoryService {
    fn id(&self) -> ProviderId {
        ProviderId::History
    }

    /// Fetch specification, running costs and history flags for a plate.
    async fn fetch(&self, plate: &str, mileage: Option<u32>) -> ProviderResult {
        let mut params = vec![("vrm", plate.to_string())];
        if let Some(miles) = mileage {
            params.push(("mileage", miles.to_string()));
        }

        // Build URL with proper parameter encoding to prevent injection attacks
        let url = reqwest::Url::parse_with_params(
            &format!("{}/api/v1/vehicle-data", self.base_url),
            &params,
        )
        .map_err(|e| ProviderError::InvalidInput(format!("Failed to build URL: {}", e)))?;

        tracing::info!("History: Fetching vehicle data for {}", plate);

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(|e| transport_error(ProviderId::History, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::warn!("History provider returned error {} for {}", status, plate);
            return Err(classify_status(status, &error_text));
        }

        let body: Value = response.json().await.map_err(|e| {
            ProviderError::Network(format!("Failed to parse history response: {}", e))
        })?;

        let status = body
            .get("responseStatus")
            .and_then(|v| v.as_str())
            .unwrap_or("Success");
        classify_history_status(status)?;

        tracing::info!("History: Successfully retrieved {}", plate);
        Ok(ProviderFetch {
            payload: ProviderPayload::new(ProviderId::History, body),
            billable: true,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, ""),
            ProviderError::NotFound(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, ""),
            ProviderError::Auth(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ProviderError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::BAD_REQUEST, ""),
            ProviderError::InvalidInput(_)
        ));
        assert!(matches!(
            classify_status(StatusCode::SERVICE_UNAVAILABLE, ""),
            ProviderError::Network(_)
        ));
    }

    #[test]
    fn test_history_body_status() {
        assert!(classify_history_status("Success").is_ok());
        assert!(matches!(
            classify_history_status("NoResults"),
            Err(ProviderError::NotFound(_))
        ));
        assert!(matches!(
            classify_history_status("ThrottleExceeded"),
            Err(ProviderError::RateLimited(_))
        ));
        assert!(matches!(
            classify_history_status("SomethingNew"),
            Err(ProviderError::Network(_))
        ));
    }

    #[test]
    fn test_field_maps_have_unique_fields() {
        for provider in [ProviderId::Registry, ProviderId::History] {
            let mut fields: Vec<Field> = field_map(provider).iter().map(|(f, _)| *f).collect();
            let total = fields.len();
            fields.sort();
            fields.dedup();
            assert_eq!(fields.len(), total, "duplicate field in {} map", provider);
        }
    }
}
