//! `.docx` template engine.
//!
//! Templates carry `${name}` macros in their text. Blocks are delimited by
//! paragraphs holding `${block}` and `${/block}`; table rows are anchored on
//! any macro inside them. Cloned content can be indexed, which rewrites every
//! `${var}` in copy `i` to `${var#i}`.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const MAIN_PART: &str = "word/document.xml";
const RELS_PART: &str = "word/_rels/document.xml.rels";
const CONTENT_TYPES_PART: &str = "[Content_Types].xml";

const IMAGE_REL_TYPE: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/image";
const VML_NS: &str = r#"xmlns:v="urn:schemas-microsoft-com:vml""#;
const OFFICE_NS: &str = r#"xmlns:o="urn:schemas-microsoft-com:office:office""#;

/// A macro split across runs by Word's spell checker or formatting.
static BROKEN_MACRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\$(?:\{|[^{$]*?>\{)[^}$]*?\}").expect("Invalid broken macro regex")
});
static XML_TAG: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("Invalid XML tag regex"));
static MACRO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([^{}$<>]*)\}").expect("Invalid macro regex"));
static REL_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r#"Id="rId(\d+)""#).expect("Invalid rId regex"));
static HEADER_FOOTER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^word/(header|footer)\d*\.xml$").expect("Invalid part name regex"));

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid docx package: {0}")]
    Package(#[from] zip::result::ZipError),

    #[error("document part {0} is missing")]
    MissingPart(&'static str),

    #[error("document part {0} is not valid UTF-8")]
    InvalidPart(String),

    #[error("block '{0}' not found in template")]
    BlockNotFound(String),

    #[error("macro '{0}' not found in template")]
    MacroNotFound(String),

    #[error("macro '{0}' is not inside a table row")]
    NotInTableRow(String),

    #[error("unsupported image format: {0}")]
    UnsupportedImage(PathBuf),
}

/// Picture to embed in place of a macro, sized in pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageSpec {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
}

/// An XML part that macros are substituted in.
#[derive(Debug, Clone)]
struct Part {
    name: String,
    xml: String,
}

#[derive(Debug, Clone)]
pub struct TemplateDocument {
    /// Package entries in their original order; XML parts below override the bytes.
    entries: Vec<(String, Vec<u8>)>,
    main: Part,
    headers_footers: Vec<Part>,
    rels: Option<String>,
    content_types: Option<String>,
    media: Vec<(String, Vec<u8>)>,
    next_rel_id: u32,
}

fn macro_token(name: &str) -> String {
    format!("${{{}}}", name)
}

/// Join macros split over several runs back into a single text node.
fn fix_broken_macros(xml: &str) -> String {
    BROKEN_MACRO
        .replace_all(xml, |caps: &regex::Captures| XML_TAG.replace_all(&caps[0], "").into_owned())
        .into_owned()
}

/// `${var}` becomes `${var#index}` throughout `xml`.
fn index_variables(xml: &str, index: usize) -> String {
    MACRO
        .replace_all(xml, |caps: &regex::Captures| format!("${{{}#{}}}", &caps[1], index))
        .into_owned()
}

/// Start of the element `tag` (e.g. `w:p`) that opens last before `pos`.
fn element_start_before(xml: &str, pos: usize, tag: &str) -> Option<usize> {
    let head = &xml[..pos];
    let bare = head.rfind(&format!("<{}>", tag));
    let with_attrs = head.rfind(&format!("<{} ", tag));
    bare.max(with_attrs)
}

/// End (exclusive) of the element `tag` that closes first after `pos`.
fn element_end_after(xml: &str, pos: usize, tag: &str) -> Option<usize> {
    let close = format!("</{}>", tag);
    xml[pos..].find(&close).map(|i| pos + i + close.len())
}

fn image_content_type(ext: &str) -> Option<&'static str> {
    match ext {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        _ => None,
    }
}

impl TemplateDocument {
    pub fn open(path: &Path) -> Result<Self, TemplateError> {
        let io_err = |source: std::io::Error| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let mut archive = ZipArchive::new(file)?;

        let mut entries = Vec::with_capacity(archive.len());
        for i in 0..archive.len() {
            let mut entry = archive.by_index(i)?;
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes).map_err(io_err)?;
            entries.push((entry.name().to_string(), bytes));
        }

        let text = |name: &str| -> Result<Option<String>, TemplateError> {
            entries
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, bytes)| {
                    String::from_utf8(bytes.clone()).map_err(|_| TemplateError::InvalidPart(name.to_string()))
                })
                .transpose()
        };

        let main_xml = text(MAIN_PART)?.ok_or(TemplateError::MissingPart(MAIN_PART))?;
        let rels = text(RELS_PART)?;
        let content_types = text(CONTENT_TYPES_PART)?;

        let mut headers_footers = Vec::new();
        for (name, _) in entries.iter().filter(|(n, _)| HEADER_FOOTER.is_match(n)) {
            if let Some(xml) = text(name)? {
                headers_footers.push(Part {
                    name: name.clone(),
                    xml: fix_broken_macros(&xml),
                });
            }
        }

        let next_rel_id = rels
            .as_deref()
            .map(|r| {
                REL_ID
                    .captures_iter(r)
                    .filter_map(|c| c[1].parse::<u32>().ok())
                    .max()
                    .unwrap_or(0)
            })
            .unwrap_or(0)
            + 1;

        Ok(Self {
            main: Part {
                name: MAIN_PART.to_string(),
                xml: fix_broken_macros(&main_xml),
            },
            headers_footers,
            rels,
            content_types,
            media: Vec::new(),
            next_rel_id,
            entries,
        })
    }

    fn parts(&self) -> impl Iterator<Item = &Part> {
        std::iter::once(&self.main).chain(self.headers_footers.iter())
    }

    fn parts_mut(&mut self) -> impl Iterator<Item = &mut Part> {
        std::iter::once(&mut self.main).chain(self.headers_footers.iter_mut())
    }

    /// Distinct macro names, in document order.
    pub fn variables(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        let mut names = Vec::new();
        for part in self.parts() {
            for caps in MACRO.captures_iter(&part.xml) {
                let name = caps[1].to_string();
                if seen.insert(name.clone()) {
                    names.push(name);
                }
            }
        }
        names
    }

    /// Replace every `${name}` with `value`. Returns the number of replacements.
    pub fn set_value(&mut self, name: &str, value: &str) -> usize {
        let token = macro_token(name);
        let escaped = quick_xml::escape::escape(value);
        let mut replaced = 0;
        for part in self.parts_mut() {
            let count = part.xml.matches(&token).count();
            if count > 0 {
                part.xml = part.xml.replace(&token, &escaped);
                replaced += count;
            }
        }
        replaced
    }

    /// Repeat the content between `${name}` and `${/name}` `count` times,
    /// dropping the delimiting paragraphs. A count of 0 removes the block.
    pub fn clone_block(&mut self, name: &str, count: usize, indexed: bool) -> Result<(), TemplateError> {
        let xml = &self.main.xml;
        let not_found = || TemplateError::BlockNotFound(name.to_string());

        let open_at = xml.find(&macro_token(name)).ok_or_else(not_found)?;
        let close_token = macro_token(&format!("/{}", name));
        let close_at = xml[open_at..]
            .find(&close_token)
            .map(|i| open_at + i)
            .ok_or_else(not_found)?;

        let block_start = element_start_before(xml, open_at, "w:p").ok_or_else(not_found)?;
        let content_start = element_end_after(xml, open_at, "w:p").ok_or_else(not_found)?;
        let content_end = element_start_before(xml, close_at, "w:p").ok_or_else(not_found)?;
        let block_end = element_end_after(xml, close_at, "w:p").ok_or_else(not_found)?;

        // Both delimiters in the same paragraph: nothing between them to clone.
        let content = if content_end >= content_start {
            &xml[content_start..content_end]
        } else {
            ""
        };

        let cloned: String = (1..=count)
            .map(|i| if indexed { index_variables(content, i) } else { content.to_string() })
            .collect();

        self.main.xml = format!("{}{}{}", &xml[..block_start], cloned, &xml[block_end..]);
        Ok(())
    }

    /// Repeat the table row holding `${anchor}` `count` times with indexed
    /// variables. A count of 0 removes the row.
    pub fn clone_row(&mut self, anchor: &str, count: usize) -> Result<(), TemplateError> {
        let xml = &self.main.xml;
        let at = xml
            .find(&macro_token(anchor))
            .ok_or_else(|| TemplateError::MacroNotFound(anchor.to_string()))?;
        let not_in_row = || TemplateError::NotInTableRow(anchor.to_string());

        let row_start = element_start_before(xml, at, "w:tr").ok_or_else(not_in_row)?;
        if xml[row_start..at].contains("</w:tr>") {
            return Err(not_in_row());
        }
        let row_end = element_end_after(xml, at, "w:tr").ok_or_else(not_in_row)?;

        let row = &xml[row_start..row_end];
        let cloned: String = (1..=count).map(|i| index_variables(row, i)).collect();

        self.main.xml = format!("{}{}{}", &xml[..row_start], cloned, &xml[row_end..]);
        Ok(())
    }

    /// Clone the row holding `${anchor}` once per entry and fill copy `i`
    /// with the `i`-th entry's values.
    pub fn clone_row_and_set_values(
        &mut self,
        anchor: &str,
        rows: &[Vec<(String, String)>],
    ) -> Result<(), TemplateError> {
        self.clone_row(anchor, rows.len())?;
        for (i, row) in rows.iter().enumerate() {
            for (name, value) in row {
                self.set_value(&format!("{}#{}", name, i + 1), value);
            }
        }
        Ok(())
    }

    /// Replace `${name}` in the document body with a picture. Returns the
    /// number of replacements; the image is only embedded when there is one.
    pub fn set_image_value(&mut self, name: &str, image: &ImageSpec) -> Result<usize, TemplateError> {
        let token = macro_token(name);
        let count = self.main.xml.matches(&token).count();
        if count == 0 {
            return Ok(0);
        }

        let ext = image
            .path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let content_type =
            image_content_type(&ext).ok_or_else(|| TemplateError::UnsupportedImage(image.path.clone()))?;
        let bytes = std::fs::read(&image.path).map_err(|source| TemplateError::Io {
            path: image.path.clone(),
            source,
        })?;

        let rel_id = format!("rId{}", self.next_rel_id);
        self.next_rel_id += 1;
        let target = format!("media/image_{}.{}", rel_id, ext);

        let rels = self.rels.as_mut().ok_or(TemplateError::MissingPart(RELS_PART))?;
        let relationship = format!(
            r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
            rel_id, IMAGE_REL_TYPE, target
        );
        insert_before_closing(rels, "</Relationships>", &relationship);

        if let Some(types) = self.content_types.as_mut() {
            if !types.contains(&format!(r#"Extension="{}""#, ext)) {
                let default = format!(r#"<Default Extension="{}" ContentType="{}"/>"#, ext, content_type);
                insert_before_closing(types, "</Types>", &default);
            }
        }

        self.media.push((format!("word/{}", target), bytes));
        self.ensure_vml_namespaces();

        let picture = format!(
            concat!(
                r#"</w:t></w:r><w:r><w:pict>"#,
                r##"<v:shape type="#_x0000_t75" style="width:{}px;height:{}px" stroked="f" filled="f">"##,
                r#"<v:imagedata r:id="{}" o:title=""/></v:shape></w:pict></w:r>"#,
                r#"<w:r><w:t xml:space="preserve">"#
            ),
            image.width, image.height, rel_id
        );
        self.main.xml = self.main.xml.replace(&token, &picture);
        Ok(count)
    }

    fn ensure_vml_namespaces(&mut self) {
        let Some(root) = self.main.xml.find("<w:document") else {
            return;
        };
        let insert_at = root + "<w:document".len();
        let head = self.main.xml[root..].split('>').next().unwrap_or_default();
        let mut declarations = String::new();
        for ns in [VML_NS, OFFICE_NS] {
            let prefix = &ns[..ns.find('=').unwrap_or(ns.len())];
            if !head.contains(prefix) {
                declarations.push(' ');
                declarations.push_str(ns);
            }
        }
        self.main.xml.insert_str(insert_at, &declarations);
    }

    /// Remove every macro still present. Returns the names removed.
    pub fn sweep(&mut self) -> Vec<String> {
        let mut swept = Vec::new();
        for part in self.parts_mut() {
            for caps in MACRO.captures_iter(&part.xml) {
                swept.push(caps[1].to_string());
            }
            part.xml = MACRO.replace_all(&part.xml, "").into_owned();
        }
        swept
    }

    /// Text of the main document part.
    pub fn main_xml(&self) -> &str {
        &self.main.xml
    }

    /// Write the package to `path`, keeping the original entry order.
    pub fn save_as(&self, path: &Path) -> Result<(), TemplateError> {
        let io_err = |source: std::io::Error| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::create(path).map_err(io_err)?;
        let mut zip = ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for (name, bytes) in &self.entries {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(self.current_bytes(name, bytes)).map_err(io_err)?;
        }
        for (name, bytes) in &self.media {
            zip.start_file(name.as_str(), options)?;
            zip.write_all(bytes).map_err(io_err)?;
        }
        zip.finish()?;
        Ok(())
    }

    fn current_bytes<'a>(&'a self, name: &str, original: &'a [u8]) -> &'a [u8] {
        if name == MAIN_PART {
            return self.main.xml.as_bytes();
        }
        if name == RELS_PART {
            if let Some(rels) = &self.rels {
                return rels.as_bytes();
            }
        }
        if name == CONTENT_TYPES_PART {
            if let Some(types) = &self.content_types {
                return types.as_bytes();
            }
        }
        self.headers_footers
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.xml.as_bytes())
            .unwrap_or(original)
    }
}

fn insert_before_closing(xml: &mut String, closing: &str, fragment: &str) {
    match xml.rfind(closing) {
        Some(at) => xml.insert_str(at, fragment),
        None => xml.push_str(fragment),
    }
}
