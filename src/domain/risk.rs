//! Termite-risk calculator used on the public landing page.
//!
//! Field names follow the calculator form, which is why the wire format is
//! in Indonesian.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};

use crate::api::validation::{FieldReader, ValidationErrors};

#[derive(Debug, Clone)]
pub struct RiskAssessmentRequest {
    pub house_area: f64,
    pub building_age: f64,
    pub location: String,
    pub building_material: String,
    pub termite_history: String,
    pub humidity: f64,
    pub wooden_furniture: f64,
    pub former_lake: String,
    pub soil_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RiskCategory {
    #[serde(rename = "Rendah")]
    Low,
    #[serde(rename = "Sedang")]
    Medium,
    #[serde(rename = "Tinggi")]
    High,
    #[serde(rename = "Sangat Tinggi")]
    VeryHigh,
}

impl RiskCategory {
    pub fn from_score(score: f64) -> Self {
        if score < 30.0 {
            Self::Low
        } else if score < 60.0 {
            Self::Medium
        } else if score < 80.0 {
            Self::High
        } else {
            Self::VeryHigh
        }
    }

    /// Expected damage cost per m² of house area.
    pub fn loss_per_square_meter(&self) -> f64 {
        match self {
            Self::Low => 100_000.0,
            Self::Medium => 300_000.0,
            Self::High => 750_000.0,
            Self::VeryHigh => 1_500_000.0,
        }
    }

    pub fn recommendation(&self) -> &'static str {
        match self {
            Self::Low => "Pemeriksaan tahunan dan tindakan pencegahan dasar",
            Self::Medium => "Pemeriksaan berkala (6 bulan) dan pemasangan sistem anti-rayap",
            Self::High => "Pemeriksaan intensif (3 bulan) dan pemasangan sistem anti-rayap premium",
            Self::VeryHigh => "Tindakan darurat! Pemeriksaan menyeluruh dan penanganan segera",
        }
    }
}

/// Whole numbers go out as JSON integers, so `59` rather than `59.0`.
fn whole_as_integer<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        serializer.serialize_i64(*value as i64)
    } else {
        serializer.serialize_f64(*value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    /// Sum of the factor points, capped at 100. Not rounded and not floored
    /// at zero: fractional or negative ages carry straight through.
    #[serde(rename = "skorRisiko", serialize_with = "whole_as_integer")]
    pub score: f64,
    #[serde(rename = "kategoriRisiko")]
    pub category: RiskCategory,
    #[serde(rename = "estimasiKerugian", serialize_with = "whole_as_integer")]
    pub estimated_loss: f64,
    #[serde(rename = "rekomendasiLayanan")]
    pub recommendation: &'static str,
}

impl RiskAssessmentRequest {
    /// All nine calculator fields are required.
    pub fn from_payload(body: &Map<String, Value>) -> Result<Self, ValidationErrors> {
        let mut r = FieldReader::new(body);

        let house_area = r.required_number("luasRumah");
        let building_age = r.required_number("umurBangunan");
        let location = r.required_string("lokasiRumah");
        let building_material = r.required_string("materialBangunan");
        let termite_history = r.required_string("riwayatRayap");
        let humidity = r.required_number("tingkatKelembaban");
        let wooden_furniture = r.required_number("jumlahPerabotKayu");
        let former_lake = r.required_string("adaDanauSebelumnya");
        let soil_type = r.required_string("jenisTanah");

        let request = (|| {
            Some(Self {
                house_area: house_area?,
                building_age: building_age?,
                location: location?,
                building_material: building_material?,
                termite_history: termite_history?,
                humidity: humidity?,
                wooden_furniture: wooden_furniture?,
                former_lake: former_lake?,
                soil_type: soil_type?,
            })
        })();

        r.finish(request)
    }

    pub fn assess(&self) -> RiskAssessment {
        let mut score = (self.building_age * 4.0).min(40.0);

        score += match self.location.as_str() {
            "dekat-air" => 20.0,
            "pinggiran-kota" => 15.0,
            "perkotaan" => 10.0,
            _ => 0.0,
        };
        score += match self.building_material.as_str() {
            "kayu-dominan" => 25.0,
            "kayu-sedang" => 15.0,
            "beton-dominan" => 5.0,
            _ => 0.0,
        };
        if self.termite_history == "ya" {
            score += 25.0;
        }
        score += (self.humidity / 5.0).floor();
        score += (self.wooden_furniture / 2.0).floor().min(15.0);
        if self.former_lake == "ya" {
            score += 15.0;
        }
        score += match self.soil_type.as_str() {
            "gambut" => 20.0,
            "berpasir" => 15.0,
            "liat" => 10.0,
            "berbatu" => 5.0,
            _ => 0.0,
        };

        let score = score.min(100.0);
        let category = RiskCategory::from_score(score);

        RiskAssessment {
            score,
            category,
            estimated_loss: self.house_area * category.loss_per_square_meter(),
            recommendation: category.recommendation(),
        }
    }
}
