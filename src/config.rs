use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

use crate::services::documents::ScalePolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Staging,
    Prod,
}

impl Environment {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "prod" | "production" => Self::Prod,
            "staging" => Self::Staging,
            _ => Self::Dev,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, Self::Dev)
    }

    pub fn is_prod(&self) -> bool {
        matches!(self, Self::Prod)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub env: Environment,
    pub server_addr: String,

    // CORS
    pub cors_allow_origins: Vec<String>,

    // Storage
    pub storage_dir: PathBuf,
    pub public_dir: PathBuf,
    pub max_upload_bytes: usize,

    // Pricing workbook
    /// Worksheet to price with; the workbook's saved active tab when unset.
    pub pricing_sheet: Option<String>,

    // Inspection image composition
    pub image_target_height: u32,
    pub image_spacing: u32,
    pub image_max_width: u32,
    pub image_scale_policy: ScalePolicy,

    // Treat any fill failure as a failed request
    pub fail_on_fill_errors: bool,
}

impl Settings {
    pub fn from_env() -> Result<Self> {
        let env = Environment::from_str(&env::var("ENV").unwrap_or_else(|_| "dev".to_string()));
        let server_addr = env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        // CORS
        let cors_allow_origins = env::var("CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:3000".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        // Storage
        let storage_dir = PathBuf::from(env::var("STORAGE_DIR").unwrap_or_else(|_| "./storage".to_string()));
        let public_dir = PathBuf::from(env::var("PUBLIC_DIR").unwrap_or_else(|_| "./public".to_string()));
        let max_upload_bytes = parse_var("MAX_UPLOAD_BYTES")?.unwrap_or(5 * 1024 * 1024); // 5 MiB

        let pricing_sheet = env::var("PRICING_SHEET").ok().filter(|s| !s.trim().is_empty());

        // Inspection images
        let image_target_height = parse_var("IMAGE_TARGET_HEIGHT")?.unwrap_or(300);
        let image_spacing = parse_var("IMAGE_SPACING")?.unwrap_or(10);
        let image_max_width = parse_var("IMAGE_MAX_WIDTH")?.unwrap_or(600);
        let image_scale_policy = match env::var("IMAGE_SCALE_POLICY") {
            Ok(v) => ScalePolicy::from_str(&v)
                .with_context(|| format!("IMAGE_SCALE_POLICY has unknown value '{}'", v))?,
            Err(_) => ScalePolicy::default(),
        };

        let fail_on_fill_errors = env::var("FAIL_ON_FILL_ERRORS")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Settings {
            env,
            server_addr,
            cors_allow_origins,
            storage_dir,
            public_dir,
            max_upload_bytes,
            pricing_sheet,
            image_target_height,
            image_spacing,
            image_max_width,
            image_scale_policy,
            fail_on_fill_errors,
        })
    }

    /// Settings rooted at the given directories, used by tests.
    #[cfg(test)]
    pub fn for_dirs(storage_dir: &Path, public_dir: &Path) -> Self {
        Self {
            env: Environment::Dev,
            server_addr: "127.0.0.1:0".to_string(),
            cors_allow_origins: vec!["http://localhost:3000".to_string()],
            storage_dir: storage_dir.to_path_buf(),
            public_dir: public_dir.to_path_buf(),
            max_upload_bytes: 5 * 1024 * 1024,
            pricing_sheet: None,
            image_target_height: 300,
            image_spacing: 10,
            image_max_width: 600,
            image_scale_policy: ScalePolicy::default(),
            fail_on_fill_errors: false,
        }
    }

    pub fn paths(&self) -> StoragePaths {
        StoragePaths::new(&self.storage_dir, &self.public_dir)
    }
}

/// Filesystem layout of templates, generated output and public uploads.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    pub proposal_templates: PathBuf,
    pub contract_templates: PathBuf,
    pub calculation_template: PathBuf,
    pub chemical_images: PathBuf,
    pub generated: PathBuf,
    pub public: PathBuf,
    pub inspection_uploads: PathBuf,
}

impl StoragePaths {
    pub fn new(storage_dir: &Path, public_dir: &Path) -> Self {
        let app = storage_dir.join("app");
        Self {
            proposal_templates: app.join("templates"),
            contract_templates: app.join("contracts"),
            calculation_template: app.join("templates").join("calculation_template.xlsx"),
            chemical_images: app.join("templates").join("images"),
            generated: app.join("generated"),
            public: public_dir.to_path_buf(),
            inspection_uploads: public_dir.join("storage").join("inspections"),
        }
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} must be a number, got '{}'", name, raw)),
        Err(_) => Ok(None),
    }
}
