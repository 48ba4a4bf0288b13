//! Bundles the generated proposal and contract into one download.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::domain::proposals::ServiceType;

use super::assembler::sanitize_client_name;

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("could not create archive {path}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not add {path} to archive: {source}")]
    Add {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not write archive: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// A zip archive waiting to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedArchive {
    pub path: PathBuf,
    pub filename: String,
}

impl GeneratedArchive {
    /// Read the archive into memory and delete it from disk.
    pub fn take_bytes(&self) -> std::io::Result<Vec<u8>> {
        let bytes = std::fs::read(&self.path)?;
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to delete sent archive");
        }
        Ok(bytes)
    }
}

pub fn archive_filename(service: ServiceType, client_name: &str, date: NaiveDate) -> String {
    format!(
        "document_{}_{}_{}.zip",
        service,
        sanitize_client_name(client_name),
        date.format("%Y-%m-%d")
    )
}

#[derive(Debug, Clone)]
pub struct Packager {
    output_dir: PathBuf,
}

impl Packager {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// Zip both documents under their own file names, overwriting any archive
    /// of the same name, then delete the documents.
    pub fn pack(
        &self,
        proposal: &Path,
        contract: &Path,
        service: ServiceType,
        client_name: &str,
        date: NaiveDate,
    ) -> Result<GeneratedArchive, PackageError> {
        let filename = archive_filename(service, client_name, date);
        let path = self.output_dir.join(&filename);

        let file = File::create(&path).map_err(|source| PackageError::Create {
            path: path.clone(),
            source,
        })?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for document in [proposal, contract] {
            let add_err = |source| PackageError::Add {
                path: document.to_path_buf(),
                source,
            };
            let bytes = std::fs::read(document).map_err(add_err)?;
            let name = document
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            zip.start_file(name, options)?;
            zip.write_all(&bytes).map_err(add_err)?;
        }
        zip.finish()?;

        for document in [proposal, contract] {
            if let Err(e) = std::fs::remove_file(document) {
                tracing::warn!(path = %document.display(), error = %e, "Failed to delete packed document");
            }
        }

        tracing::info!(archive = %filename, "Document archive created");
        Ok(GeneratedArchive { path, filename })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fixtures::{entry_names, read_entry};

    #[test]
    fn test_archive_name() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(
            archive_filename(ServiceType::Spraying, "Budi Santoso!", date),
            "document_spraying_Budi-Santoso_2025-01-31.zip"
        );
    }

    #[test]
    fn test_pack_zips_and_removes_documents() {
        let dir = tempfile::tempdir().unwrap();
        let proposal = dir.path().join("proposal_spraying_Budi_2025-01-31_10-00-00.docx");
        let contract = dir.path().join("contract_spraying_Budi_2025-01-31_10-00-00.docx");
        std::fs::write(&proposal, "P").unwrap();
        std::fs::write(&contract, "C").unwrap();

        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let archive = Packager::new(dir.path())
            .pack(&proposal, &contract, ServiceType::Spraying, "Budi", date)
            .unwrap();

        assert_eq!(archive.filename, "document_spraying_Budi_2025-01-31.zip");
        assert_eq!(
            entry_names(&archive.path),
            vec![
                "proposal_spraying_Budi_2025-01-31_10-00-00.docx",
                "contract_spraying_Budi_2025-01-31_10-00-00.docx"
            ]
        );
        assert_eq!(read_entry(&archive.path, "contract_spraying_Budi_2025-01-31_10-00-00.docx"), "C");
        assert!(!proposal.exists());
        assert!(!contract.exists());

        let bytes = archive.take_bytes().unwrap();
        assert!(bytes.starts_with(b"PK"));
        assert!(!archive.path.exists());
    }

    #[test]
    fn test_missing_output_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        let packager = Packager::new(dir.path().join("nope"));
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        let err = packager
            .pack(&dir.path().join("a"), &dir.path().join("b"), ServiceType::Baiting, "x", date)
            .unwrap_err();
        assert!(matches!(err, PackageError::Create { .. }));
    }
}
