//! Registry of the services citizens can request, with their prices and form schemas.
//!
//! The catalog is built once at startup and shared as `Arc<ServiceCatalog>`; it is
//! never mutated afterwards. Display code must go through [`ServiceCatalog::display_name`]
//! so that stored records carrying an unknown service key still render.

mod standard;

pub use standard::BIRTH_CERTIFICATE;

use crate::errors::ServiceError;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use thiserror::Error;
use utoipa::ToSchema;

pub const UNKNOWN_SERVICE: &str = "Unknown Service";

/// Submitted values keyed by [`FieldSpec::name`].
pub type FormData = BTreeMap<String, String>;

static PHONE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+?[0-9][0-9 \-]{6,18}[0-9]$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    ShortText,
    Phone,
    Number,
    Date,
    SingleSelect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct FieldSpec {
    /// Form input identifier and key into submitted data
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Allowed values, only for `single_select`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

fn default_required() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ServiceDefinition {
    #[schema(example = "tax-receipt")]
    pub key: String,
    #[schema(example = "Tax Receipt")]
    pub display_name: String,
    /// Whole Naira
    #[schema(example = 2000)]
    pub unit_price: i64,
    pub fields: Vec<FieldSpec>,
}

impl ServiceDefinition {
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog defines no services")]
    Empty,
    #[error("service key '{0}' is defined more than once")]
    DuplicateService(String),
    #[error("service '{0}' has no fields")]
    NoFields(String),
    #[error("service '{service}' defines field '{field}' more than once")]
    DuplicateField { service: String, field: String },
    #[error("service '{0}' must have a positive unit price")]
    NonPositivePrice(String),
    #[error("select field '{field}' of service '{service}' has no options")]
    MissingOptions { service: String, field: String },
    #[error("field '{field}' of service '{service}' is not a select but lists options")]
    UnexpectedOptions { service: String, field: String },
    #[error("failed to load catalog: {0}")]
    Load(#[from] config::ConfigError),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    services: Vec<ServiceDefinition>,
}

#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    services: Vec<ServiceDefinition>,
    index: HashMap<String, usize>,
}

impl ServiceCatalog {
    /// The services offered by the portal out of the box.
    pub fn standard() -> Self {
        Self::build(standard::definitions())
    }

    pub fn from_definitions(services: Vec<ServiceDefinition>) -> Result<Self, CatalogError> {
        validate_definitions(&services)?;
        Ok(Self::build(services))
    }

    /// Reads a catalog file of the shape `services = [ { key, display_name, unit_price, fields } ]`.
    /// Format is picked from the extension (toml, json, yaml).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let file: CatalogFile = config::Config::builder()
            .add_source(config::File::from(path.as_ref()))
            .build()?
            .try_deserialize()?;
        Self::from_definitions(file.services)
    }

    fn build(services: Vec<ServiceDefinition>) -> Self {
        let index = services
            .iter()
            .enumerate()
            .map(|(i, s)| (s.key.clone(), i))
            .collect();
        Self { services, index }
    }

    pub fn lookup(&self, key: &str) -> Option<&ServiceDefinition> {
        self.index.get(key).map(|&i| &self.services[i])
    }

    pub fn display_name(&self, key: &str) -> &str {
        self.lookup(key)
            .map(|s| s.display_name.as_str())
            .unwrap_or(UNKNOWN_SERVICE)
    }

    pub fn list(&self) -> &[ServiceDefinition] {
        &self.services
    }

    /// Checks a submission against the service's form schema and returns the
    /// normalised values: trimmed, blank optionals removed, unknown keys dropped.
    pub fn validate_submission(
        &self,
        key: &str,
        form_data: &FormData,
    ) -> Result<FormData, ServiceError> {
        let service = self
            .lookup(key)
            .ok_or_else(|| ServiceError::UnknownService(key.to_string()))?;

        let missing = missing_required(service, form_data);
        if !missing.is_empty() {
            return Err(ServiceError::ValidationError(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let mut normalised = FormData::new();
        for field in &service.fields {
            let Some(value) = form_data.get(&field.name).map(|v| v.trim()) else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            check_value(field, value)?;
            normalised.insert(field.name.clone(), value.to_string());
        }

        Ok(normalised)
    }
}

impl Default for ServiceCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

/// Labels of required fields that are absent or blank, in form order.
pub fn missing_required<'a>(service: &'a ServiceDefinition, form_data: &FormData) -> Vec<&'a str> {
    service
        .fields
        .iter()
        .filter(|f| f.required)
        .filter(|f| {
            form_data
                .get(&f.name)
                .map_or(true, |v| v.trim().is_empty())
        })
        .map(|f| f.label.as_str())
        .collect()
}

fn check_value(field: &FieldSpec, value: &str) -> Result<(), ServiceError> {
    let ok = match field.kind {
        FieldKind::ShortText => true,
        FieldKind::SingleSelect => field.options.iter().any(|o| o == value),
        FieldKind::Number => value.parse::<f64>().map_or(false, f64::is_finite),
        FieldKind::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        FieldKind::Phone => PHONE_PATTERN.is_match(value),
    };

    if ok {
        Ok(())
    } else {
        Err(ServiceError::InvalidInput(format!(
            "Invalid value for {}",
            field.label
        )))
    }
}

fn validate_definitions(services: &[ServiceDefinition]) -> Result<(), CatalogError> {
    if services.is_empty() {
        return Err(CatalogError::Empty);
    }

    let mut keys = HashSet::new();
    for service in services {
        if !keys.insert(service.key.as_str()) {
            return Err(CatalogError::DuplicateService(service.key.clone()));
        }
        if service.fields.is_empty() {
            return Err(CatalogError::NoFields(service.key.clone()));
        }
        if service.unit_price <= 0 {
            return Err(CatalogError::NonPositivePrice(service.key.clone()));
        }

        let mut names = HashSet::new();
        for field in &service.fields {
            if !names.insert(field.name.as_str()) {
                return Err(CatalogError::DuplicateField {
                    service: service.key.clone(),
                    field: field.name.clone(),
                });
            }
            match (field.kind, field.options.is_empty()) {
                (FieldKind::SingleSelect, true) => {
                    return Err(CatalogError::MissingOptions {
                        service: service.key.clone(),
                        field: field.name.clone(),
                    })
                }
                (kind, false) if kind != FieldKind::SingleSelect => {
                    return Err(CatalogError::UnexpectedOptions {
                        service: service.key.clone(),
                        field: field.name.clone(),
                    })
                }
                _ => {}
            }
        }
    }

    Ok(())
}
