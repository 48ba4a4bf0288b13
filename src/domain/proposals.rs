use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::validation::{FieldReader, ValidationErrors};

/// Pest-control service variants. Each has its own proposal and contract template.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Pipanasi,
    Spraying,
    InjectSpraying,
    RefillPipanasi,
    Baiting,
    Trapping,
    Exclusion,
}

impl ServiceType {
    pub const ALL: [ServiceType; 7] = [
        Self::Pipanasi,
        Self::Spraying,
        Self::InjectSpraying,
        Self::RefillPipanasi,
        Self::Baiting,
        Self::Trapping,
        Self::Exclusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pipanasi => "pipanasi",
            Self::Spraying => "spraying",
            Self::InjectSpraying => "inject_spraying",
            Self::RefillPipanasi => "refill_pipanasi",
            Self::Baiting => "baiting",
            Self::Trapping => "trapping",
            Self::Exclusion => "exclusion",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == s)
    }

    pub fn is_baiting(&self) -> bool {
        matches!(self, Self::Baiting)
    }
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Proposal families offered in the service-type picker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProposalType {
    PestControl,
    RatControl,
}

impl ProposalType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pest_control" => Some(Self::PestControl),
            "rat_control" => Some(Self::RatControl),
            _ => None,
        }
    }

    pub fn service_types(&self) -> &'static [ServiceType] {
        match self {
            Self::PestControl => &[
                ServiceType::Pipanasi,
                ServiceType::Spraying,
                ServiceType::InjectSpraying,
                ServiceType::RefillPipanasi,
            ],
            Self::RatControl => &[ServiceType::Baiting, ServiceType::Trapping, ServiceType::Exclusion],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportMode {
    #[serde(rename = "mobil")]
    Car,
    #[serde(rename = "motor")]
    Motorcycle,
}

impl TransportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "mobil" | "car" => Some(Self::Car),
            "motor" | "motorcycle" => Some(Self::Motorcycle),
            _ => None,
        }
    }
}

/// A named material and the quantity requested for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MaterialQuantity {
    pub name: String,
    pub quantity: f64,
}

impl MaterialQuantity {
    pub fn new(name: impl Into<String>, quantity: f64) -> Self {
        Self {
            name: name.into(),
            quantity,
        }
    }
}

/// Inspection photos shown side by side, with a caption.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageGroup {
    #[serde(default)]
    pub paths: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Validated input of the proposal pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceRequest {
    pub client_name: String,
    pub address: String,
    pub service_type: ServiceType,
    pub area_treatment: f64,
    pub floor_count: i64,
    pub distance_km: f64,
    pub transport: TransportMode,
    pub monitoring_duration_months: i64,
    pub preparation_set_items: Vec<MaterialQuantity>,
    pub additional_set_items: Vec<MaterialQuantity>,
    pub images: Vec<ImageGroup>,
}

impl ServiceRequest {
    /// Validate a raw JSON payload, reporting every offending field.
    pub fn from_payload(body: &Map<String, Value>) -> Result<Self, ValidationErrors> {
        let mut r = FieldReader::new(body);

        let client_name = r.required_string("client_name");
        let address = r.required_string("address");
        let service_type = r.required_string("service_type").and_then(|s| {
            let parsed = ServiceType::parse(s.trim());
            if parsed.is_none() {
                r.fail("service_type", "The selected service type is invalid.");
            }
            parsed
        });
        let area_treatment = r.required_number("area_treatment");
        let floor_count = r.required_integer("floor_count");
        let distance_km = r.required_number("distance_km");
        let transport = r.required_string("transport").and_then(|s| {
            let parsed = TransportMode::parse(s.trim());
            if parsed.is_none() {
                r.fail("transport", "The selected transport is invalid.");
            }
            parsed
        });
        let monitoring_duration_months = r.required_integer("monitoring_duration_months");
        let preparation_set_items = material_set(&mut r, "preparation_set_items");
        let additional_set_items = material_set(&mut r, "additional_set_items");
        let images = image_groups(&mut r, "images");

        let request = (|| {
            Some(Self {
                client_name: client_name?,
                address: address?,
                service_type: service_type?,
                area_treatment: area_treatment?,
                floor_count: floor_count?,
                distance_km: distance_km?,
                transport: transport?,
                monitoring_duration_months: monitoring_duration_months?,
                preparation_set_items: preparation_set_items?,
                additional_set_items: additional_set_items?,
                images: images?,
            })
        })();

        r.finish(request)
    }
}

/// `{ "<material>": <quantity>, ... }`; an empty list is accepted as an empty set.
fn material_set(r: &mut FieldReader<'_>, field: &str) -> Option<Vec<MaterialQuantity>> {
    let raw = r.present(field)?;
    match raw {
        Value::Object(items) => {
            let mut set = Vec::with_capacity(items.len());
            let mut valid = true;
            for (name, qty) in items {
                let quantity = match qty {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    Value::Null => Some(0.0),
                    _ => None,
                }
                .filter(|q| q.is_finite());
                match quantity {
                    Some(q) => set.push(MaterialQuantity::new(name.clone(), q)),
                    None => {
                        r.fail(&format!("{}.{}", field, name), "The quantity must be a number.");
                        valid = false;
                    }
                }
            }
            valid.then_some(set)
        }
        Value::Array(items) if items.is_empty() => Some(Vec::new()),
        _ => {
            r.fail(field, format!("The {} field must be an array.", field.replace('_', " ")));
            None
        }
    }
}

fn image_groups(r: &mut FieldReader<'_>, field: &str) -> Option<Vec<ImageGroup>> {
    match r.raw(field) {
        None | Some(Value::Null) => Some(Vec::new()),
        Some(raw @ Value::Array(_)) => match serde_json::from_value::<Vec<ImageGroup>>(raw.clone()) {
            Ok(groups) => Some(groups),
            Err(e) => {
                r.fail(field, format!("The images field is malformed: {}", e));
                None
            }
        },
        Some(_) => {
            r.fail(field, "The images field must be an array.");
            None
        }
    }
}
