//! Template filling.
//!
//! [`build_plan`] resolves a request into a [`FillPlan`] without touching a
//! document; [`apply`] executes the plan against one template and reports
//! the outcome of every step in a [`FillReport`].

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Local};
use rand::Rng;

use crate::domain::chemicals;
use crate::domain::pricing::{format_rupiah, ComparativePrice, CrewEstimate, PriceQuote, PricingPolicy};
use crate::domain::proposals::ServiceRequest;

use super::compositor::CompositeImage;
use super::docx::{ImageSpec, TemplateDocument};

pub const DOCUMENT_TYPE: &str = "Penawaran Harga Pest Control";
pub const GUARANTEE: &str = "1 tahun";
pub const PRICE_GUARANTEE: &str = "3 Tahun Garansi";
pub const INSPECTION_HEADING: &str = "HASIL INSPEKSI";
pub const MISSING_DESCRIPTION: &str = "no detail";
const CHEMICAL_IMAGE_SIZE: u32 = 150;

/// Placeholders blanked after filling when a template still carries them.
pub const CLEARED_PLACEHOLDERS: [&str; 10] = [
    "inspection_heading",
    "image_desc",
    "image_content",
    "chem_name",
    "chem_desc_1",
    "chem_desc_2",
    "chem_desc_3",
    "price_treatment_name",
    "price_final",
    "price_psychological",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Text(String),
    Image(ImageSpec),
    Empty,
}

impl Resolution {
    fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }
}

/// A structural change to the template, applied before indexed values.
#[derive(Debug, Clone, PartialEq)]
pub enum Expansion {
    Block {
        name: String,
        count: usize,
        indexed: bool,
    },
    /// One table row per entry, anchored on `anchor`. Templates without such
    /// a row get the paragraph block `fallback` cloned instead.
    Rows {
        anchor: String,
        fallback: String,
        rows: Vec<Vec<(String, String)>>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FillPlan {
    /// Plain placeholders, set before any expansion.
    pub scalars: BTreeMap<String, Resolution>,
    pub expansions: Vec<Expansion>,
    /// Placeholders created by expansions (`name#i`).
    pub values: BTreeMap<String, Resolution>,
    pub clears: Vec<&'static str>,
}

/// Everything besides the request that a plan depends on.
#[derive(Debug, Clone)]
pub struct FillContext<'a> {
    pub proposal_number: &'a str,
    pub policy: &'a PricingPolicy,
    pub chemical_images: &'a Path,
    pub image_max_width: u32,
}

/// `NNN-SPH-PC-YYYY-MM` with a random sequence part.
pub fn proposal_number<R: Rng>(rng: &mut R, now: DateTime<Local>) -> String {
    format!("{:03}-SPH-PC-{}", rng.gen_range(1..=999), now.format("%Y-%m"))
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

/// A gallery is shown only when the first group carries a first photo.
pub fn has_images(request: &ServiceRequest) -> bool {
    request
        .images
        .first()
        .and_then(|g| g.paths.first())
        .is_some_and(|p| !p.is_empty())
}

pub fn build_plan(
    request: &ServiceRequest,
    quote: &PriceQuote,
    composites: &[Option<CompositeImage>],
    ctx: &FillContext<'_>,
) -> FillPlan {
    let mut plan = FillPlan {
        scalars: BTreeMap::new(),
        expansions: Vec::new(),
        values: BTreeMap::new(),
        clears: CLEARED_PLACEHOLDERS.to_vec(),
    };

    general_attributes(&mut plan, request, ctx);
    gallery(&mut plan, request, composites, ctx);
    match quote {
        PriceQuote::Comparative { prices } if !prices.is_empty() => {
            comparative_attributes(&mut plan, request, prices, ctx)
        }
        PriceQuote::Comparative { .. } => single_price_attributes(&mut plan, request, 0.0, ctx),
        PriceQuote::Single { base_price } => single_price_attributes(&mut plan, request, *base_price, ctx),
    }

    plan
}

fn general_attributes(plan: &mut FillPlan, request: &ServiceRequest, ctx: &FillContext<'_>) {
    let crew = CrewEstimate::for_service(request.service_type, request.area_treatment);
    let scalars = [
        ("number", ctx.proposal_number.to_string()),
        ("type", DOCUMENT_TYPE.to_string()),
        ("client_name", request.client_name.clone()),
        ("address", request.address.clone()),
        ("guarantee", GUARANTEE.to_string()),
        ("estimated_time", crew.days_label()),
        ("total_technician", crew.workers_label()),
        ("area_treatment", format_number(request.area_treatment)),
    ];
    for (name, value) in scalars {
        plan.scalars.insert(name.to_string(), Resolution::Text(value));
    }
}

fn gallery(
    plan: &mut FillPlan,
    request: &ServiceRequest,
    composites: &[Option<CompositeImage>],
    ctx: &FillContext<'_>,
) {
    if !has_images(request) {
        plan.scalars.insert("inspection_heading".into(), Resolution::Empty);
        plan.expansions.push(Expansion::Block {
            name: "image_block".into(),
            count: 0,
            indexed: true,
        });
        return;
    }

    plan.scalars
        .insert("inspection_heading".into(), Resolution::text(INSPECTION_HEADING));
    plan.expansions.push(Expansion::Block {
        name: "image_block".into(),
        count: request.images.len(),
        indexed: true,
    });

    for (i, group) in request.images.iter().enumerate() {
        let index = i + 1;
        let description = group
            .description
            .as_deref()
            .filter(|d| !d.is_empty())
            .unwrap_or(MISSING_DESCRIPTION);
        plan.values
            .insert(format!("image_desc#{}", index), Resolution::text(description));

        let content = match composites.get(i) {
            Some(Some(composite)) if !group.paths.is_empty() => {
                Resolution::Image(composite.display_spec(ctx.image_max_width))
            }
            _ => Resolution::Empty,
        };
        plan.values.insert(format!("image_content#{}", index), content);
    }
}

fn comparative_attributes(
    plan: &mut FillPlan,
    request: &ServiceRequest,
    prices: &[ComparativePrice],
    ctx: &FillContext<'_>,
) {
    let entries: Vec<_> = prices
        .iter()
        .filter_map(|p| chemicals::profile(&p.chemical).map(|profile| (p, profile)))
        .collect();

    plan.expansions.push(Expansion::Block {
        name: "chemical_block".into(),
        count: entries.len(),
        indexed: true,
    });

    let mut rows = Vec::with_capacity(entries.len());
    for (i, (price, profile)) in entries.iter().enumerate() {
        let index = i + 1;
        let adjusted = ctx
            .policy
            .adjust(request.service_type, price.price, request.area_treatment);
        rows.push(vec![
            ("price_block_counter".to_string(), index.to_string()),
            ("price_treatment_name".to_string(), profile.treatment_name.to_string()),
            ("price_psychological".to_string(), format_rupiah(adjusted.psychological_price)),
            ("price_final".to_string(), format_rupiah(adjusted.final_price)),
            ("price_guarantee".to_string(), PRICE_GUARANTEE.to_string()),
        ]);

        plan.values
            .insert(format!("chem_name#{}", index), Resolution::text(profile.name));
        for (n, desc) in profile.descriptions.iter().enumerate() {
            plan.values
                .insert(format!("chem_desc_{}#{}", n + 1, index), Resolution::text(*desc));
        }
        let image = ctx.chemical_images.join(profile.image);
        if image.is_file() {
            plan.values.insert(
                format!("chem_image#{}", index),
                Resolution::Image(ImageSpec {
                    path: image,
                    width: CHEMICAL_IMAGE_SIZE,
                    height: CHEMICAL_IMAGE_SIZE,
                }),
            );
        }
    }

    plan.expansions.push(Expansion::Rows {
        anchor: "price_block_counter".into(),
        fallback: "price_block".into(),
        rows,
    });
}

fn single_price_attributes(plan: &mut FillPlan, request: &ServiceRequest, base_price: f64, ctx: &FillContext<'_>) {
    let adjusted = ctx
        .policy
        .adjust(request.service_type, base_price, request.area_treatment);
    plan.scalars
        .insert("final_price".into(), Resolution::Text(format_rupiah(adjusted.final_price)));
    plan.scalars.insert(
        "psychological_price".into(),
        Resolution::Text(format_rupiah(adjusted.psychological_price)),
    );
    for name in ["chemical_block", "price_block"] {
        plan.expansions.push(Expansion::Block {
            name: name.into(),
            count: 0,
            indexed: false,
        });
    }
}

/// What happened to one step of a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Applied,
    /// The primary strategy failed and the fallback succeeded.
    Fallback(String),
    /// Nothing to do in this template.
    Skipped(String),
    Failed(String),
    /// A leftover placeholder removed by the final sweep.
    Swept,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillStep {
    pub document: String,
    pub target: String,
    pub outcome: Outcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FillReport {
    steps: Vec<FillStep>,
}

impl FillReport {
    pub fn record(&mut self, document: &str, target: impl Into<String>, outcome: Outcome) {
        self.steps.push(FillStep {
            document: document.to_string(),
            target: target.into(),
            outcome,
        });
    }

    pub fn merge(&mut self, other: FillReport) {
        self.steps.extend(other.steps);
    }

    pub fn steps(&self) -> &[FillStep] {
        &self.steps
    }

    pub fn failures(&self) -> impl Iterator<Item = &FillStep> {
        self.steps
            .iter()
            .filter(|s| matches!(s.outcome, Outcome::Failed(_)))
    }

    /// Failures, fallbacks and swept leftovers.
    pub fn warning_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| {
                matches!(
                    s.outcome,
                    Outcome::Failed(_) | Outcome::Fallback(_) | Outcome::Swept
                )
            })
            .count()
    }

    pub fn outcome_of(&self, target: &str) -> Option<&Outcome> {
        self.steps.iter().find(|s| s.target == target).map(|s| &s.outcome)
    }
}

fn set_resolution(doc: &mut TemplateDocument, name: &str, resolution: &Resolution) -> Outcome {
    let replaced = match resolution {
        Resolution::Text(text) => Ok(doc.set_value(name, text)),
        Resolution::Empty => Ok(doc.set_value(name, "")),
        Resolution::Image(spec) => doc.set_image_value(name, spec),
    };
    match replaced {
        Ok(0) => Outcome::Skipped("placeholder not in template".into()),
        Ok(_) => Outcome::Applied,
        Err(e) => Outcome::Failed(e.to_string()),
    }
}

fn expand(doc: &mut TemplateDocument, expansion: &Expansion) -> (String, Outcome) {
    match expansion {
        Expansion::Block { name, count, indexed } => {
            let outcome = match doc.clone_block(name, *count, *indexed) {
                Ok(()) => Outcome::Applied,
                Err(e) if *count == 0 => Outcome::Skipped(e.to_string()),
                Err(e) => Outcome::Failed(e.to_string()),
            };
            (name.clone(), outcome)
        }
        Expansion::Rows { anchor, fallback, rows } => {
            let outcome = match doc.clone_row_and_set_values(anchor, rows) {
                Ok(()) => Outcome::Applied,
                Err(row_err) => {
                    tracing::warn!(error = %row_err, "Row clone failed, cloning block instead");
                    match doc.clone_block(fallback, rows.len(), true) {
                        Ok(()) => {
                            for (i, row) in rows.iter().enumerate() {
                                for (name, value) in row {
                                    doc.set_value(&format!("{}#{}", name, i + 1), value);
                                }
                            }
                            Outcome::Fallback(row_err.to_string())
                        }
                        Err(block_err) => Outcome::Failed(format!("{}; {}", row_err, block_err)),
                    }
                }
            };
            (anchor.clone(), outcome)
        }
    }
}

/// Execute `plan` against `doc`. Never fails; every step's outcome is reported.
pub fn apply(plan: &FillPlan, doc: &mut TemplateDocument, document: &str) -> FillReport {
    let mut report = FillReport::default();

    for (name, resolution) in &plan.scalars {
        let outcome = set_resolution(doc, name, resolution);
        report.record(document, name.as_str(), outcome);
    }

    for expansion in &plan.expansions {
        let (target, outcome) = expand(doc, expansion);
        if let Outcome::Failed(reason) = &outcome {
            tracing::error!(document, target = %target, reason = %reason, "Template expansion failed");
        }
        report.record(document, target, outcome);
    }

    for (name, resolution) in &plan.values {
        let outcome = set_resolution(doc, name, resolution);
        if let Outcome::Failed(reason) = &outcome {
            tracing::error!(document, placeholder = %name, reason = %reason, "Failed to fill placeholder");
        }
        report.record(document, name.as_str(), outcome);
    }

    for name in &plan.clears {
        let outcome = set_resolution(doc, name, &Resolution::Empty);
        report.record(document, *name, outcome);
    }

    for leftover in doc.sweep() {
        tracing::warn!(document, placeholder = %leftover, "Removed unfilled placeholder");
        report.record(document, leftover, Outcome::Swept);
    }

    report
}
