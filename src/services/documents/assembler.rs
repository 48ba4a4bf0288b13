//! Proposal pipeline: price the request, fill the proposal and contract
//! templates, save both and bundle them.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use thiserror::Error;

use crate::config::{Settings, StoragePaths};
use crate::domain::pricing::{PriceQuote, PricingPolicy};
use crate::domain::proposals::{ServiceRequest, ServiceType};
use crate::services::pricing::{CalculationInput, PricingEngine, PricingError};

use super::compositor::{CompositeImage, Compositor};
use super::docx::{TemplateDocument, TemplateError};
use super::filler::{self, FillContext, FillReport};
use super::packager::{GeneratedArchive, PackageError, Packager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Proposal,
    Contract,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Proposal => "proposal",
            Self::Contract => "contract",
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{kind} template not found for service type {service}")]
    TemplateNotFound {
        kind: DocumentKind,
        service: ServiceType,
        path: PathBuf,
    },

    #[error("price calculation failed: {0}")]
    Pricing(#[from] PricingError),

    #[error("template processing failed: {0}")]
    Template(#[from] TemplateError),

    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{failures} template fill step(s) failed")]
    FillFailed { failures: usize, report: FillReport },

    #[error(transparent)]
    Package(#[from] PackageError),
}

/// Spaces become hyphens; anything outside `[A-Za-z0-9-]` is dropped.
pub fn sanitize_client_name(name: &str) -> String {
    name.replace(' ', "-")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

pub fn output_filename(kind: DocumentKind, service: ServiceType, client_name: &str, now: DateTime<Local>) -> String {
    format!(
        "{}_{}_{}_{}.docx",
        kind,
        service,
        sanitize_client_name(client_name),
        now.format("%Y-%m-%d_%H-%M-%S")
    )
}

#[derive(Debug)]
pub struct GeneratedDocuments {
    pub proposal_path: PathBuf,
    pub contract_path: PathBuf,
    pub report: FillReport,
    /// Timestamp in both file names and the proposal number.
    pub generated_at: DateTime<Local>,
}

/// Archive ready for download plus the diagnostics collected while filling.
#[derive(Debug)]
pub struct ProposalPackage {
    pub archive: GeneratedArchive,
    pub report: FillReport,
}

#[derive(Debug, Clone)]
pub struct DocumentAssembler {
    paths: StoragePaths,
    engine: PricingEngine,
    policy: PricingPolicy,
    compositor: Compositor,
    packager: Packager,
    image_max_width: u32,
    fail_on_fill_errors: bool,
}

impl DocumentAssembler {
    pub fn new(settings: &Settings, policy: PricingPolicy) -> Self {
        let paths = settings.paths();
        Self {
            engine: PricingEngine::new(&paths.calculation_template, settings.pricing_sheet.clone())
                .with_comparable_services(policy.comparable_services()),
            compositor: Compositor::new(
                &paths.public,
                &paths.generated,
                settings.image_target_height,
                settings.image_spacing,
                settings.image_scale_policy,
            ),
            packager: Packager::new(&paths.generated),
            policy,
            image_max_width: settings.image_max_width,
            fail_on_fill_errors: settings.fail_on_fill_errors,
            paths,
        }
    }

    pub fn paths(&self) -> &StoragePaths {
        &self.paths
    }

    pub fn policy(&self) -> &PricingPolicy {
        &self.policy
    }

    pub fn engine(&self) -> &PricingEngine {
        &self.engine
    }

    fn template_path(&self, kind: DocumentKind, service: ServiceType) -> PathBuf {
        let dir = match kind {
            DocumentKind::Proposal => &self.paths.proposal_templates,
            DocumentKind::Contract => &self.paths.contract_templates,
        };
        dir.join(format!("{}.docx", service))
    }

    fn open_template(&self, kind: DocumentKind, service: ServiceType) -> Result<TemplateDocument, PipelineError> {
        let path = self.template_path(kind, service);
        if !path.is_file() {
            tracing::error!(%service, path = %path.display(), "{} template not found", kind);
            return Err(PipelineError::TemplateNotFound { kind, service, path });
        }
        Ok(TemplateDocument::open(&path)?)
    }

    /// Comparative prices for services that compare chemicals and have some
    /// selected; a single workbook price otherwise.
    pub fn quote(&self, request: &ServiceRequest) -> Result<PriceQuote, PricingError> {
        let input = CalculationInput::from(request);
        let prices = self.engine.compute_comparative_prices(&input)?;
        if !prices.is_empty() {
            return Ok(PriceQuote::Comparative { prices });
        }
        let base_price = self.engine.compute_price(&input)?;
        Ok(PriceQuote::Single { base_price })
    }

    /// One composite per image group, in group order.
    fn compose_images(&self, request: &ServiceRequest) -> Vec<Option<CompositeImage>> {
        if !filler::has_images(request) {
            return Vec::new();
        }
        request
            .images
            .iter()
            .enumerate()
            .map(|(i, group)| {
                if group.paths.is_empty() {
                    return None;
                }
                match self.compositor.composite(&group.paths, i + 1) {
                    Ok(composite) => composite,
                    Err(e) => {
                        tracing::error!(group = i + 1, error = %e, "Failed to compose inspection images");
                        None
                    }
                }
            })
            .collect()
    }

    /// Fill and save both documents for a request.
    pub fn generate(&self, request: &ServiceRequest) -> Result<GeneratedDocuments, PipelineError> {
        let service = request.service_type;
        let mut proposal = self.open_template(DocumentKind::Proposal, service)?;
        let mut contract = self.open_template(DocumentKind::Contract, service)?;

        let quote = self.quote(request)?;
        let composites = self.compose_images(request);

        let result = self.fill_and_save(request, &quote, &composites, &mut proposal, &mut contract);

        for composite in composites.iter().flatten() {
            if let Err(e) = std::fs::remove_file(&composite.path) {
                tracing::warn!(path = %composite.path.display(), error = %e, "Failed to delete composite image");
            }
        }

        result
    }

    fn fill_and_save(
        &self,
        request: &ServiceRequest,
        quote: &PriceQuote,
        composites: &[Option<CompositeImage>],
        proposal: &mut TemplateDocument,
        contract: &mut TemplateDocument,
    ) -> Result<GeneratedDocuments, PipelineError> {
        let now = Local::now();
        let number = filler::proposal_number(&mut rand::thread_rng(), now);
        let ctx = FillContext {
            proposal_number: &number,
            policy: &self.policy,
            chemical_images: &self.paths.chemical_images,
            image_max_width: self.image_max_width,
        };

        let plan = filler::build_plan(request, quote, composites, &ctx);
        let mut report = filler::apply(&plan, proposal, DocumentKind::Proposal.as_str());
        report.merge(filler::apply(&plan, contract, DocumentKind::Contract.as_str()));

        let failures = report.failures().count();
        if failures > 0 && self.fail_on_fill_errors {
            return Err(PipelineError::FillFailed { failures, report });
        }

        let generated = &self.paths.generated;
        std::fs::create_dir_all(generated).map_err(|source| PipelineError::Io {
            path: generated.clone(),
            source,
        })?;

        let service = request.service_type;
        let proposal_path = generated.join(output_filename(DocumentKind::Proposal, service, &request.client_name, now));
        let contract_path = generated.join(output_filename(DocumentKind::Contract, service, &request.client_name, now));
        proposal.save_as(&proposal_path)?;
        contract.save_as(&contract_path)?;

        tracing::info!(
            proposal = %proposal_path.display(),
            contract = %contract_path.display(),
            warnings = report.warning_count(),
            "Documents generated"
        );

        Ok(GeneratedDocuments {
            proposal_path,
            contract_path,
            report,
            generated_at: now,
        })
    }

    /// Full pipeline: generate both documents and bundle them in a zip archive.
    pub fn generate_package(&self, request: &ServiceRequest) -> Result<ProposalPackage, PipelineError> {
        let documents = self.generate(request)?;
        let archive = self.packager.pack(
            &documents.proposal_path,
            &documents.contract_path,
            request.service_type,
            &request.client_name,
            documents.generated_at.date_naive(),
        );
        let archive = match archive {
            Ok(archive) => archive,
            Err(e) => {
                remove_quietly(&documents.proposal_path);
                remove_quietly(&documents.contract_path);
                return Err(e.into());
            }
        };
        Ok(ProposalPackage {
            archive,
            report: documents.report,
        })
    }
}

fn remove_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_file(path) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to delete generated document");
        }
    }
}
