//! Cell layout of the calculation workbook.
//!
//! The workbook is authored by the sales team; the addresses below are the
//! inputs its formulas read and the outputs they produce.

use crate::domain::chemicals::{self, EXPOSE_SOIL};
use crate::domain::proposals::{MaterialQuantity, ServiceRequest, ServiceType, TransportMode};
use crate::domain::pricing::CrewEstimate;

use super::formula::Value;

/// Calculated service price.
pub const PRICE_CELL: &str = "O17";

const CLIENT_NAME_CELL: &str = "C1";
const ADDRESS_CELL: &str = "C5";
const DISTANCE_CELL: &str = "C20";
const AREA_CELL: &str = "C22";
const FLOORS_CELL: &str = "C23";

/// Material name to its quantity input cell.
pub const MATERIAL_CELLS: [(&str, &str); 21] = [
    ("Expose Soil Treatent per Liter Larutan", "C65"),
    ("Premise Soil Treatent per Liter Larutan", "C66"),
    ("Agenda Soil Treatent per Liter Larutan", "C67"),
    ("Xterm AG Station", "C68"),
    ("Xterm IG Station", "C69"),
    ("Expose Wood Treatent per Liter Larutan", "C70"),
    ("Queen Killer", "C71"),
    ("Mata Bor kayu 2mm", "C74"),
    ("Mata Bor kayu 3mm", "C75"),
    ("Mata bor Hilti 6mm", "C78"),
    ("Mata Bor Hilti 8mm", "C79"),
    ("Mata Bor Hilti 10mm", "C80"),
    ("Semen Warna", "C81"),
    ("Premium", "C82"),
    ("Oli Fastron 10W-40SL", "C83"),
    ("Jarum B&G", "C84"),
    ("Masker untuk Klien", "C96"),
    ("Company Profile", "C97"),
    ("Laporan/SPK/Surat/Kontrak", "C98"),
    ("BAP", "C99"),
    ("LOG BOOK", "C100"),
];

pub fn material_cell(name: &str) -> Option<&'static str> {
    MATERIAL_CELLS
        .iter()
        .find(|(material, _)| *material == name)
        .map(|(_, cell)| *cell)
}

/// Cell holding the solution volume computed for a comparable chemical.
pub fn quantity_cell(chemical: &str) -> &'static str {
    if chemical == EXPOSE_SOIL {
        "M66"
    } else {
        "M67"
    }
}

/// Everything the workbook needs to price one request.
#[derive(Debug, Clone, PartialEq)]
pub struct CalculationInput {
    pub client_name: String,
    pub address: String,
    pub service_type: ServiceType,
    pub area: f64,
    pub floors: i64,
    pub distance_km: f64,
    pub transport: TransportMode,
    pub monitoring_months: i64,
    pub preparation: Vec<MaterialQuantity>,
    pub additional: Vec<MaterialQuantity>,
}

impl From<&ServiceRequest> for CalculationInput {
    fn from(req: &ServiceRequest) -> Self {
        Self {
            client_name: req.client_name.clone(),
            address: req.address.clone(),
            service_type: req.service_type,
            area: req.area_treatment,
            floors: req.floor_count,
            distance_km: req.distance_km,
            transport: req.transport,
            monitoring_months: req.monitoring_duration_months,
            preparation: req.preparation_set_items.clone(),
            additional: req.additional_set_items.clone(),
        }
    }
}

/// A value to write into an input cell.
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub cell: &'static str,
    pub value: Value,
}

fn write(cell: &'static str, value: impl Into<Value>) -> CellWrite {
    CellWrite {
        cell,
        value: value.into(),
    }
}

/// Cell writes for an input, in application order. Later writes to the same
/// cell win; the time estimate section reuses `C30`.
pub fn cell_writes(input: &CalculationInput) -> Vec<CellWrite> {
    let mut writes = Vec::new();
    general_info(input, &mut writes);
    transport_and_staff(input, &mut writes);
    materials(input, &mut writes);
    time_and_workers(input, &mut writes);
    writes
}

fn general_info(input: &CalculationInput, writes: &mut Vec<CellWrite>) {
    writes.push(write(CLIENT_NAME_CELL, input.client_name.as_str()));
    writes.push(write(ADDRESS_CELL, input.address.as_str()));
    writes.push(write(DISTANCE_CELL, input.distance_km));
    writes.push(write(AREA_CELL, input.area));
    writes.push(write(FLOORS_CELL, input.floors as f64));
}

fn transport_and_staff(input: &CalculationInput, writes: &mut Vec<CellWrite>) {
    let months = input.monitoring_months as f64;
    let (active, idle) = match input.transport {
        TransportMode::Car => (["C30", "C45"], ["C31", "C46"]),
        TransportMode::Motorcycle => (["C31", "C46"], ["C30", "C45"]),
    };
    for cell in active {
        writes.push(write(cell, months));
    }
    for cell in idle {
        writes.push(write(cell, 0.0));
    }
}

fn materials(input: &CalculationInput, writes: &mut Vec<CellWrite>) {
    for (_, cell) in MATERIAL_CELLS {
        writes.push(write(cell, 0.0));
    }

    // Additional items override preparation items of the same name.
    let mut merged: Vec<&MaterialQuantity> = Vec::new();
    for item in input.preparation.iter().chain(input.additional.iter()) {
        match merged.iter_mut().find(|m| m.name == item.name) {
            Some(existing) => *existing = item,
            None => merged.push(item),
        }
    }

    if input.service_type.is_baiting() {
        tracing::info!("Baiting service: soil treatment chemical quantities forced to 0");
        merged.retain(|m| !chemicals::is_comparable(&m.name));
    }

    for item in merged {
        match material_cell(&item.name) {
            Some(cell) => writes.push(write(cell, item.quantity)),
            None => tracing::warn!(material = %item.name, "Unmapped material in price calculation"),
        }
    }
}

fn time_and_workers(input: &CalculationInput, writes: &mut Vec<CellWrite>) {
    // The baiting table has rows for 1..=999 and 1000 upwards only.
    let in_baiting_table = (1.0..=999.0).contains(&input.area) || input.area >= 1000.0;
    let crew = if input.service_type.is_baiting() && !in_baiting_table {
        tracing::warn!(area = input.area, "Baiting area outside the estimation table");
        CrewEstimate { days: 0, workers: 0 }
    } else {
        CrewEstimate::for_service(input.service_type, input.area)
    };
    let days = crew.days as f64;
    let workers = crew.workers as f64;

    match input.transport {
        TransportMode::Car => {
            writes.push(write("C29", days));
            writes.push(write("C41", days));
            writes.push(write("E41", workers));
            writes.push(write("C30", 0.0));
            writes.push(write("C42", 0.0));
        }
        TransportMode::Motorcycle => {
            writes.push(write("C30", days));
            writes.push(write("C42", days));
            writes.push(write("E42", workers));
            writes.push(write("C29", 0.0));
            writes.push(write("C41", 0.0));
        }
    }
}
