//! In-memory spreadsheet model backed by an `.xlsx` file.
//!
//! Cell values and formulas are read with calamine. Inputs written through
//! [`Workbook::set_value`] replace whatever the cell held, and formulas are
//! evaluated on demand when a value is read back.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};

use calamine::{open_workbook, Data, Reader, Xlsx, XlsxError};
use quick_xml::events::Event;
use thiserror::Error;

use super::formula::{self, CellRef, ErrorValue, FormulaError, Value};

#[derive(Debug, Error)]
pub enum WorkbookError {
    #[error("failed to read workbook {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: XlsxError,
    },

    #[error("workbook {0} contains no worksheets")]
    NoSheets(PathBuf),

    #[error("worksheet '{0}' not found")]
    SheetNotFound(String),

    #[error(transparent)]
    Address(#[from] FormulaError),
}

/// A formula the evaluator cannot compute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsupportedFormula {
    pub sheet: String,
    pub cell: CellRef,
    pub reason: String,
}

#[derive(Debug, Clone)]
struct Cell {
    value: Value,
    formula: Option<String>,
}

#[derive(Debug, Clone)]
struct Sheet {
    name: String,
    cells: HashMap<CellRef, Cell>,
}

#[derive(Debug, Clone)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    active: usize,
}

impl Workbook {
    /// Load every worksheet of an `.xlsx` file. The tab that was active when
    /// the file was saved starts out active, or the first sheet without one.
    pub fn open(path: &Path) -> Result<Self, WorkbookError> {
        let read_err = |source: XlsxError| WorkbookError::Read {
            path: path.to_path_buf(),
            source,
        };

        let mut xlsx: Xlsx<_> = open_workbook(path).map_err(read_err)?;
        let mut sheets = Vec::new();

        for name in xlsx.sheet_names() {
            let mut cells: HashMap<CellRef, Cell> = HashMap::new();

            let values = xlsx.worksheet_range(&name).map_err(read_err)?;
            if let Some((row0, col0)) = values.start() {
                for (row, col, data) in values.used_cells() {
                    let at = CellRef::new(row0 + row as u32, col0 + col as u32);
                    cells.insert(
                        at,
                        Cell {
                            value: from_data(data),
                            formula: None,
                        },
                    );
                }
            }

            let formulas = xlsx.worksheet_formula(&name).map_err(read_err)?;
            if let Some((row0, col0)) = formulas.start() {
                for (row, col, text) in formulas.used_cells() {
                    if text.trim().is_empty() {
                        continue;
                    }
                    let at = CellRef::new(row0 + row as u32, col0 + col as u32);
                    cells
                        .entry(at)
                        .or_insert(Cell {
                            value: Value::Empty,
                            formula: None,
                        })
                        .formula = Some(text.clone());
                }
            }

            tracing::debug!(sheet = %name, cells = cells.len(), "Loaded worksheet");
            sheets.push(Sheet { name, cells });
        }

        if sheets.is_empty() {
            return Err(WorkbookError::NoSheets(path.to_path_buf()));
        }

        let active = match saved_active_tab(path) {
            Some(tab) if tab < sheets.len() => tab,
            _ => 0,
        };
        tracing::debug!(sheet = %sheets[active].name, "Active worksheet");

        Ok(Self { sheets, active })
    }

    pub fn active_sheet(&self) -> &str {
        &self.sheets[self.active].name
    }

    /// Build a workbook from named sheets of `(address, value or "=formula")` pairs.
    #[cfg(test)]
    pub fn from_cells(sheets: &[(&str, &[(&str, &str)])]) -> Self {
        let sheets = sheets
            .iter()
            .map(|(name, cells)| Sheet {
                name: name.to_string(),
                cells: cells
                    .iter()
                    .map(|(a1, raw)| {
                        let cell = match raw.strip_prefix('=') {
                            Some(f) => Cell {
                                value: Value::Empty,
                                formula: Some(f.to_string()),
                            },
                            None => Cell {
                                value: raw
                                    .parse::<f64>()
                                    .map(Value::Number)
                                    .unwrap_or_else(|_| Value::Text(raw.to_string())),
                                formula: None,
                            },
                        };
                        (CellRef::parse(a1).unwrap(), cell)
                    })
                    .collect(),
            })
            .collect();
        Self { sheets, active: 0 }
    }

    pub fn sheet_names(&self) -> impl Iterator<Item = &str> {
        self.sheets.iter().map(|s| s.name.as_str())
    }

    pub fn select_sheet(&mut self, name: &str) -> Result<(), WorkbookError> {
        self.active = self
            .sheet_index(name)
            .ok_or_else(|| WorkbookError::SheetNotFound(name.to_string()))?;
        Ok(())
    }

    /// Write a constant into a cell of the active sheet, dropping any formula.
    pub fn set_value(&mut self, a1: &str, value: impl Into<Value>) -> Result<(), WorkbookError> {
        let at = CellRef::parse(a1)?;
        self.sheets[self.active].cells.insert(
            at,
            Cell {
                value: value.into(),
                formula: None,
            },
        );
        Ok(())
    }

    /// Calculated value of a cell of the active sheet.
    pub fn calculated_value(&self, a1: &str) -> Result<Value, WorkbookError> {
        let at = CellRef::parse(a1)?;
        let mut evaluation = Evaluation {
            workbook: self,
            current: self.active,
            cache: HashMap::new(),
            in_progress: HashSet::new(),
        };
        Ok(evaluation.cell(self.active, at))
    }

    /// Formulas that fail to parse or call functions the evaluator lacks,
    /// in sheet order then cell order.
    pub fn unsupported_formulas(&self) -> Vec<UnsupportedFormula> {
        let mut found = Vec::new();
        for sheet in &self.sheets {
            let mut cells: Vec<(&CellRef, &str)> = sheet
                .cells
                .iter()
                .filter_map(|(at, cell)| cell.formula.as_deref().map(|f| (at, f)))
                .collect();
            cells.sort();

            for (at, source) in cells {
                let reason = match formula::parse(source) {
                    Ok(expr) => {
                        let missing = formula::unsupported_functions(&expr);
                        if missing.is_empty() {
                            continue;
                        }
                        format!("unsupported function {}", missing.join(", "))
                    }
                    Err(e) => e.to_string(),
                };
                found.push(UnsupportedFormula {
                    sheet: sheet.name.clone(),
                    cell: *at,
                    reason,
                });
            }
        }
        found
    }

    fn sheet_index(&self, name: &str) -> Option<usize> {
        self.sheets
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }
}

/// `activeTab` of the first workbook view in `xl/workbook.xml`.
fn saved_active_tab(path: &Path) -> Option<usize> {
    let file = std::fs::File::open(path).ok()?;
    let mut archive = zip::ZipArchive::new(file).ok()?;
    let mut xml = String::new();
    archive
        .by_name("xl/workbook.xml")
        .ok()?
        .read_to_string(&mut xml)
        .ok()?;

    let mut reader = quick_xml::Reader::from_str(&xml);
    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.local_name().as_ref() == b"workbookView" => {
                let attr = e.try_get_attribute("activeTab").ok()??;
                return attr.unescape_value().ok()?.trim().parse().ok();
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
    }
}

fn from_data(data: &Data) -> Value {
    match data {
        Data::Int(i) => Value::Number(*i as f64),
        Data::Float(f) => Value::Number(*f),
        Data::String(s) => Value::Text(s.clone()),
        Data::Bool(b) => Value::Bool(*b),
        Data::DateTime(dt) => Value::Number(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Value::Text(s.clone()),
        Data::Error(_) => Value::Error(ErrorValue::Value),
        _ => Value::Empty,
    }
}

/// One read of the workbook: memoizes computed cells and detects cycles.
struct Evaluation<'a> {
    workbook: &'a Workbook,
    current: usize,
    cache: HashMap<(usize, CellRef), Value>,
    in_progress: HashSet<(usize, CellRef)>,
}

impl Evaluation<'_> {
    fn cell(&mut self, sheet: usize, at: CellRef) -> Value {
        let key = (sheet, at);
        if let Some(v) = self.cache.get(&key) {
            return v.clone();
        }

        let workbook = self.workbook;
        let Some(cell) = workbook.sheets[sheet].cells.get(&at) else {
            return Value::Empty;
        };
        let Some(source) = cell.formula.as_deref() else {
            return cell.value.clone();
        };

        if !self.in_progress.insert(key) {
            tracing::warn!(
                sheet = %workbook.sheets[sheet].name,
                cell = %at,
                "Circular reference in workbook"
            );
            return Value::Error(ErrorValue::Ref);
        }

        let value = match formula::parse(source) {
            Ok(expr) => {
                let previous = std::mem::replace(&mut self.current, sheet);
                let value = formula::evaluate(&expr, self);
                self.current = previous;
                value
            }
            Err(e) => {
                tracing::warn!(
                    sheet = %workbook.sheets[sheet].name,
                    cell = %at,
                    formula = source,
                    error = %e,
                    "Unsupported formula"
                );
                Value::Error(ErrorValue::Name)
            }
        };

        self.in_progress.remove(&key);
        self.cache.insert(key, value.clone());
        value
    }
}

impl Evaluation<'_> {
    fn resolve_sheet(&self, sheet: Option<&str>) -> Option<usize> {
        match sheet {
            None => Some(self.current),
            Some(name) => self.workbook.sheet_index(name),
        }
    }
}

impl formula::CellSource for Evaluation<'_> {
    fn cell_value(&mut self, sheet: Option<&str>, cell: CellRef) -> Value {
        match self.resolve_sheet(sheet) {
            Some(index) => self.cell(index, cell),
            None => Value::Error(ErrorValue::Ref),
        }
    }

    fn last_row(&mut self, sheet: Option<&str>) -> Option<u32> {
        let index = self.resolve_sheet(sheet)?;
        self.workbook.sheets[index].cells.keys().map(|at| at.row).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{write_workbook, write_xlsx};

    #[test]
    fn test_formulas_follow_written_inputs() {
        let mut wb = Workbook::from_cells(&[(
            "Kalkulasi",
            &[("C22", "0"), ("D22", "12250"), ("O17", "=ROUND(C22*D22*1.1,0)")],
        )]);

        wb.set_value("C22", 100.0).unwrap();
        assert_eq!(wb.calculated_value("O17").unwrap(), Value::Number(1_347_500.0));

        wb.set_value("C22", 0.0).unwrap();
        assert_eq!(wb.calculated_value("O17").unwrap(), Value::Number(0.0));
    }

    #[test]
    fn test_writing_over_formula_replaces_it() {
        let mut wb = Workbook::from_cells(&[("S", &[("A1", "=B1*2"), ("B1", "4")])]);
        assert_eq!(wb.calculated_value("A1").unwrap(), Value::Number(8.0));
        wb.set_value("A1", 1.0).unwrap();
        assert_eq!(wb.calculated_value("A1").unwrap(), Value::Number(1.0));
    }

    #[test]
    fn test_cross_sheet_reference_and_active_sheet() {
        let mut wb = Workbook::from_cells(&[
            ("Input", &[("A1", "3"), ("B1", "=Tarif!A1*A1")]),
            ("Tarif", &[("A1", "7"), ("B1", "=Input!B1+1")]),
        ]);
        assert_eq!(wb.calculated_value("B1").unwrap(), Value::Number(21.0));

        wb.select_sheet("tarif").unwrap();
        assert_eq!(wb.calculated_value("B1").unwrap(), Value::Number(22.0));
        assert!(matches!(wb.select_sheet("Missing"), Err(WorkbookError::SheetNotFound(_))));
    }

    #[test]
    fn test_circular_reference_yields_error_value() {
        let wb = Workbook::from_cells(&[("S", &[("A1", "=B1+1"), ("B1", "=A1+1")])]);
        assert_eq!(wb.calculated_value("A1").unwrap(), Value::Error(ErrorValue::Ref));
    }

    #[test]
    fn test_unknown_sheet_and_bad_formula() {
        let wb = Workbook::from_cells(&[("S", &[("A1", "=Nope!A1"), ("A2", "=1+")])]);
        assert_eq!(wb.calculated_value("A1").unwrap(), Value::Error(ErrorValue::Ref));
        assert_eq!(wb.calculated_value("A2").unwrap(), Value::Error(ErrorValue::Name));
        assert!(matches!(wb.calculated_value("1A"), Err(WorkbookError::Address(_))));
    }

    #[test]
    fn test_open_reads_values_and_formulas_from_xlsx() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calc.xlsx");
        write_xlsx(
            &path,
            r#"<row r="1"><c r="A1"><v>2</v></c><c r="B1"><f>A1*10</f><v>20</v></c></row>"#,
        );

        let mut wb = Workbook::open(&path).unwrap();
        assert_eq!(wb.sheet_names().collect::<Vec<_>>(), vec!["Kalkulasi"]);
        assert_eq!(wb.calculated_value("B1").unwrap(), Value::Number(20.0));

        wb.set_value("A1", 5.0).unwrap();
        assert_eq!(wb.calculated_value("B1").unwrap(), Value::Number(50.0));
    }

    #[test]
    fn test_open_selects_saved_active_tab() {
        let dir = tempfile::tempdir().unwrap();
        let sheets = [
            ("Catatan", r#"<row r="17"><c r="O17"><v>1</v></c></row>"#),
            ("Kalkulasi", r#"<row r="17"><c r="O17"><f>2*3</f><v>6</v></c></row>"#),
        ];

        let saved = dir.path().join("saved.xlsx");
        write_workbook(&saved, &sheets, Some(1));
        let wb = Workbook::open(&saved).unwrap();
        assert_eq!(wb.active_sheet(), "Kalkulasi");
        assert_eq!(wb.calculated_value("O17").unwrap(), Value::Number(6.0));

        let plain = dir.path().join("plain.xlsx");
        write_workbook(&plain, &sheets, None);
        assert_eq!(Workbook::open(&plain).unwrap().active_sheet(), "Catatan");

        let out_of_range = dir.path().join("range.xlsx");
        write_workbook(&out_of_range, &sheets, Some(7));
        assert_eq!(Workbook::open(&out_of_range).unwrap().active_sheet(), "Catatan");
    }

    #[test]
    fn test_lookup_over_whole_columns() {
        let mut wb = Workbook::from_cells(&[
            ("Kalkulasi", &[("C22", "0"), ("O17", "=C22*VLOOKUP(\"Spraying\",Tarif!A:B,2,FALSE)")]),
            ("Tarif", &[("A1", "Baiting"), ("B1", "9000"), ("A2", "Spraying"), ("B2", "12250")]),
        ]);
        wb.set_value("C22", 100.0).unwrap();
        assert_eq!(wb.calculated_value("O17").unwrap(), Value::Number(1_225_000.0));
    }

    #[test]
    fn test_unsupported_formulas_are_listed() {
        let wb = Workbook::from_cells(&[
            ("Kalkulasi", &[("B2", "=XLOOKUP(1,A:A,B:B)"), ("A1", "=SUMIF(A2:A3,\">0\")"), ("A9", "=1+")]),
            ("Tarif", &[("C3", "=TEXT(1,\"0\")+NPV(1,2)")]),
        ]);
        let found = wb.unsupported_formulas();
        let summary: Vec<(String, String, String)> = found
            .iter()
            .map(|f| (f.sheet.clone(), f.cell.to_a1(), f.reason.clone()))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("Kalkulasi".into(), "B2".into(), "unsupported function XLOOKUP".into()),
                ("Kalkulasi".into(), "A9".into(), "formula ended unexpectedly".into()),
                ("Tarif".into(), "C3".into(), "unsupported function TEXT, NPV".into()),
            ]
        );
    }

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = Workbook::open(&dir.path().join("nope.xlsx")).unwrap_err();
        assert!(matches!(err, WorkbookError::Read { .. }));
    }
}
