//! Pricing engine: fills the calculation workbook with a request and reads
//! back the price its formulas compute.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::domain::chemicals;
use crate::domain::pricing::{format_rupiah, ComparativePrice, PricingPolicy};
use crate::domain::proposals::{MaterialQuantity, ServiceType};

use super::formula::{ErrorValue, Value};
use super::layout::{self, CalculationInput, PRICE_CELL};
use super::workbook::{UnsupportedFormula, Workbook, WorkbookError};

#[derive(Debug, Error)]
pub enum PricingError {
    #[error("calculation template not found at {0}")]
    TemplateNotFound(PathBuf),

    #[error(transparent)]
    Workbook(#[from] WorkbookError),

    #[error("cell {cell} evaluated to {value}, expected a number")]
    NonNumeric { cell: &'static str, value: ErrorValue },
}

#[derive(Debug, Clone)]
pub struct PricingEngine {
    template_path: PathBuf,
    sheet: Option<String>,
    /// Services whose quotes compare soil-treatment chemicals.
    comparable: Vec<ServiceType>,
}

impl PricingEngine {
    pub fn new(template_path: impl Into<PathBuf>, sheet: Option<String>) -> Self {
        Self {
            template_path: template_path.into(),
            sheet,
            comparable: PricingPolicy::default().comparable_services(),
        }
    }

    pub fn with_comparable_services(mut self, services: Vec<ServiceType>) -> Self {
        self.comparable = services;
        self
    }

    pub fn template_path(&self) -> &Path {
        &self.template_path
    }

    /// Price of the request as computed by the workbook, unrounded.
    pub fn compute_price(&self, input: &CalculationInput) -> Result<f64, PricingError> {
        let workbook = self.filled_workbook(input)?;
        number(&workbook, PRICE_CELL)
    }

    /// One price per comparable chemical selected in the preparation set, in
    /// request order. Each price is computed with only that chemical in use.
    /// Empty for services that do not compare chemicals.
    pub fn compute_comparative_prices(
        &self,
        input: &CalculationInput,
    ) -> Result<Vec<ComparativePrice>, PricingError> {
        if !self.comparable.contains(&input.service_type) {
            return Ok(Vec::new());
        }
        tracing::info!(service = %input.service_type, "Service supports comparison, calculating comparative prices");

        let selected: Vec<&str> = input
            .preparation
            .iter()
            .map(|m| m.name.as_str())
            .filter(|name| chemicals::is_comparable(name))
            .collect();

        let mut prices = Vec::with_capacity(selected.len());
        for chemical in selected {
            let mut preparation: Vec<MaterialQuantity> = input
                .preparation
                .iter()
                .filter(|m| !chemicals::is_comparable(&m.name))
                .cloned()
                .collect();
            for comparable in chemicals::COMPARABLE_CHEMICALS {
                if input.preparation.iter().any(|m| m.name == comparable) {
                    let quantity = if comparable == chemical { 1.0 } else { 0.0 };
                    preparation.push(MaterialQuantity::new(comparable, quantity));
                }
            }

            tracing::info!(chemical, "Calculating comparative price");
            let workbook = self.filled_workbook(&CalculationInput {
                preparation,
                ..input.clone()
            })?;

            let price = number(&workbook, PRICE_CELL)?.round().max(0.0);
            let quantity = number(&workbook, layout::quantity_cell(chemical))?;
            prices.push(ComparativePrice {
                chemical: chemical.to_string(),
                price,
                formatted_price: format_rupiah(price as i64),
                quantity_liters: (quantity * 100.0).round() / 100.0,
            });
        }

        Ok(prices)
    }

    /// Formulas in the template that would evaluate to `#NAME?`.
    pub fn unsupported_formulas(&self) -> Result<Vec<UnsupportedFormula>, PricingError> {
        Ok(self.template()?.unsupported_formulas())
    }

    fn template(&self) -> Result<Workbook, PricingError> {
        if !self.template_path.is_file() {
            return Err(PricingError::TemplateNotFound(self.template_path.clone()));
        }
        let mut workbook = Workbook::open(&self.template_path)?;
        if let Some(sheet) = &self.sheet {
            workbook.select_sheet(sheet)?;
        }
        Ok(workbook)
    }

    /// Fresh copy of the template with the request written into its input cells.
    fn filled_workbook(&self, input: &CalculationInput) -> Result<Workbook, PricingError> {
        let mut workbook = self.template()?;
        for write in layout::cell_writes(input) {
            workbook.set_value(write.cell, write.value)?;
        }
        Ok(workbook)
    }
}

fn number(workbook: &Workbook, cell: &'static str) -> Result<f64, PricingError> {
    match workbook.calculated_value(cell)? {
        Value::Error(value) => Err(PricingError::NonNumeric { cell, value }),
        other => other
            .as_number()
            .map_err(|value| PricingError::NonNumeric { cell, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::chemicals::{AGENDA_SOIL, EXPOSE_SOIL, PREMISE_SOIL};
    use crate::domain::proposals::{ServiceType, TransportMode};
    use crate::services::fixtures::{formula_cell, num_cell, write_xlsx};

    /// Workbook where the price is area × 1000 plus 100 000 per litre of each
    /// soil chemical (Expose 1×, Premise 2×, Agenda 3×), and the solution
    /// volumes are derived from the area.
    fn pricing_template(dir: &Path) -> PathBuf {
        let path = dir.join("calculation_template.xlsx");
        let rows = [
            format!(
                r#"<row r="17">{}</row>"#,
                formula_cell("O17", "C22*1000+C65*100000+C66*200000+C67*300000+C71*50000")
            ),
            format!(r#"<row r="22">{}</row>"#, num_cell("C22", 0.0)),
            format!(r#"<row r="65">{}</row>"#, num_cell("C65", 0.0)),
            format!(r#"<row r="66">{}{}</row>"#, num_cell("C66", 0.0), formula_cell("M66", "C22/3")),
            format!(r#"<row r="67">{}{}</row>"#, num_cell("C67", 0.0), formula_cell("M67", "C22/4")),
        ];
        write_xlsx(&path, &rows.concat());
        path
    }

    fn input(preparation: Vec<MaterialQuantity>) -> CalculationInput {
        CalculationInput {
            client_name: "Budi".into(),
            address: "Surabaya".into(),
            service_type: ServiceType::Spraying,
            area: 100.0,
            floors: 1,
            distance_km: 5.0,
            transport: TransportMode::Car,
            monitoring_months: 3,
            preparation,
            additional: vec![],
        }
    }

    #[test]
    fn test_compute_price_reads_output_cell() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PricingEngine::new(pricing_template(dir.path()), None);
        let price = engine
            .compute_price(&input(vec![
                MaterialQuantity::new(EXPOSE_SOIL, 2.0),
                MaterialQuantity::new("Queen Killer", 1.0),
            ]))
            .unwrap();
        assert_eq!(price, 100_000.0 + 200_000.0 + 50_000.0);
    }

    #[test]
    fn test_comparative_prices_follow_request_order() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PricingEngine::new(pricing_template(dir.path()), None);
        let prices = engine
            .compute_comparative_prices(&input(vec![
                MaterialQuantity::new(AGENDA_SOIL, 7.0),
                MaterialQuantity::new("Queen Killer", 2.0),
                MaterialQuantity::new(EXPOSE_SOIL, 4.0),
            ]))
            .unwrap();

        let chemicals: Vec<_> = prices.iter().map(|p| p.chemical.as_str()).collect();
        assert_eq!(chemicals, vec![AGENDA_SOIL, EXPOSE_SOIL]);

        // Only the compared chemical counts, at one litre.
        assert_eq!(prices[0].price, 100_000.0 + 300_000.0 + 100_000.0);
        assert_eq!(prices[0].formatted_price, "Rp 500.000");
        assert_eq!(prices[0].quantity_liters, 25.0);
        assert_eq!(prices[1].price, 100_000.0 + 100_000.0 + 100_000.0);
        assert_eq!(prices[1].quantity_liters, 33.33);
    }

    #[test]
    fn test_comparative_prices_empty_without_selected_chemicals() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PricingEngine::new(pricing_template(dir.path()), None);
        let prices = engine
            .compute_comparative_prices(&input(vec![MaterialQuantity::new("Queen Killer", 1.0)]))
            .unwrap();
        assert!(prices.is_empty());
        assert!(!chemicals::is_comparable("Queen Killer"));
        assert!(chemicals::is_comparable(PREMISE_SOIL));
    }

    #[test]
    fn test_comparative_prices_only_for_allowed_services() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PricingEngine::new(pricing_template(dir.path()), None);
        let selected = vec![MaterialQuantity::new(EXPOSE_SOIL, 4.0)];

        let baiting = CalculationInput {
            service_type: ServiceType::Baiting,
            ..input(selected.clone())
        };
        assert!(engine.compute_comparative_prices(&baiting).unwrap().is_empty());
        assert_eq!(engine.compute_comparative_prices(&input(selected.clone())).unwrap().len(), 1);

        let narrowed = engine.with_comparable_services(vec![ServiceType::Pipanasi]);
        assert!(narrowed.compute_comparative_prices(&input(selected)).unwrap().is_empty());
    }

    #[test]
    fn test_unsupported_formulas_in_template() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PricingEngine::new(pricing_template(dir.path()), None);
        assert!(engine.unsupported_formulas().unwrap().is_empty());

        let path = dir.path().join("lookup.xlsx");
        write_xlsx(
            &path,
            &format!(r#"<row r="17">{}</row>"#, formula_cell("O17", "XLOOKUP(C22,A:A,B:B)")),
        );
        let found = PricingEngine::new(path, None).unsupported_formulas().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].cell.to_a1(), "O17");
        assert_eq!(found[0].reason, "unsupported function XLOOKUP");

        let missing = PricingEngine::new(dir.path().join("missing.xlsx"), None);
        assert!(matches!(missing.unsupported_formulas(), Err(PricingError::TemplateNotFound(_))));
    }

    #[test]
    fn test_missing_template_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PricingEngine::new(dir.path().join("missing.xlsx"), None);
        let err = engine.compute_price(&input(vec![])).unwrap_err();
        assert!(matches!(err, PricingError::TemplateNotFound(_)));
    }

    #[test]
    fn test_unknown_sheet_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let engine = PricingEngine::new(pricing_template(dir.path()), Some("Harga".into()));
        let err = engine.compute_price(&input(vec![])).unwrap_err();
        assert!(matches!(err, PricingError::Workbook(WorkbookError::SheetNotFound(_))));
    }

    #[test]
    fn test_error_values_are_not_prices() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.xlsx");
        write_xlsx(&path, &format!(r#"<row r="17">{}</row>"#, formula_cell("O17", "1/0")));
        let engine = PricingEngine::new(path, None);
        let err = engine.compute_price(&input(vec![])).unwrap_err();
        assert!(matches!(
            err,
            PricingError::NonNumeric { cell: "O17", value: ErrorValue::Div0 }
        ));
    }
}
