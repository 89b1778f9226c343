//! Export dispatch: turn a LaTeX source into a downloadable artifact.
//!
//! | Format | Tool | Output |
//! |--------|------|--------|
//! | `tex`  | none | the source, verbatim |
//! | `html` | pandoc | standalone page with MathML, resources embedded |
//! | `pdf`  | pdflatex | compiled document |
//!
//! Each tool run gets a fresh scratch directory holding `input.tex` and the
//! tool's output. The directory is a [`tempfile::TempDir`], removed when the
//! export returns, whichever way it returns.

pub mod tool;

use crate::config::ExportConfig;
use crate::error::MonogramError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tempfile::TempDir;
use tracing::{debug, info};

/// Name used when the caller gives no filename.
pub const DEFAULT_EXPORT_NAME: &str = "notes";

const INPUT_FILE: &str = "input.tex";
const HTML_OUTPUT: &str = "output.html";
const PDF_OUTPUT: &str = "input.pdf";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    Tex,
    Html,
    Pdf,
}

impl ExportFormat {
    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Tex => "application/x-tex",
            ExportFormat::Html => "text/html",
            ExportFormat::Pdf => "application/pdf",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Tex => "tex",
            ExportFormat::Html => "html",
            ExportFormat::Pdf => "pdf",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = MonogramError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tex" => Ok(ExportFormat::Tex),
            "html" => Ok(ExportFormat::Html),
            "pdf" => Ok(ExportFormat::Pdf),
            _ => Err(MonogramError::UnsupportedFormat {
                format: s.to_string(),
            }),
        }
    }
}

/// A finished export, ready to send as a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub content: Vec<u8>,
    pub mime_type: String,
    pub filename: String,
}

/// `{stem}.{ext}` for a user-supplied name.
///
/// Directory components and a trailing `.tex` are dropped; an empty name
/// becomes [`DEFAULT_EXPORT_NAME`].
pub fn artifact_filename(filename: &str, format: ExportFormat) -> String {
    let base = filename
        .trim()
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    let stem = match base.len().checked_sub(4) {
        Some(i) if base.is_char_boundary(i) && base[i..].eq_ignore_ascii_case(".tex") => &base[..i],
        _ => base,
    };
    let stem = if stem.trim().is_empty() {
        DEFAULT_EXPORT_NAME
    } else {
        stem
    };
    format!("{stem}.{}", format.extension())
}

/// Runs exports with the configured toolchain.
#[derive(Debug, Clone, Default)]
pub struct Exporter {
    config: ExportConfig,
}

impl Exporter {
    pub fn new(config: ExportConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Export `source` in `format`, naming the artifact after `filename`.
    pub async fn export(
        &self,
        source: &str,
        format: ExportFormat,
        filename: &str,
    ) -> Result<ExportArtifact, MonogramError> {
        let content = match format {
            ExportFormat::Tex => source.as_bytes().to_vec(),
            ExportFormat::Html => self.render_html(source).await?,
            ExportFormat::Pdf => self.compile_pdf(source).await?,
        };

        let artifact = ExportArtifact {
            content,
            mime_type: format.mime_type().to_string(),
            filename: artifact_filename(filename, format),
        };
        info!(
            "Exported {} ({} bytes)",
            artifact.filename,
            artifact.content.len()
        );
        Ok(artifact)
    }

    /// Same as [`Exporter::export`] with the format given as text.
    pub async fn export_named(
        &self,
        source: &str,
        format: &str,
        filename: &str,
    ) -> Result<ExportArtifact, MonogramError> {
        let format: ExportFormat = format.parse()?;
        self.export(source, format, filename).await
    }

    /// Compile with pdflatex in non-interactive mode, stopping at the first error.
    pub async fn compile_pdf(&self, source: &str) -> Result<Vec<u8>, MonogramError> {
        let tool = "pdflatex";
        let program = tool::resolve_tool(&self.config.pdflatex)?;
        let scratch = self.scratch_dir(source).await?;

        tool::run_tool(
            tool,
            &program,
            ["-interaction=nonstopmode", "-halt-on-error", INPUT_FILE],
            scratch.path(),
            self.timeout(),
        )
        .await?;

        read_output(tool, &scratch, PDF_OUTPUT).await
    }

    /// Convert to a standalone HTML page with MathML via pandoc.
    pub async fn render_html(&self, source: &str) -> Result<Vec<u8>, MonogramError> {
        let tool = "pandoc";
        let program = tool::resolve_tool(&self.config.pandoc)?;
        let scratch = self.scratch_dir(source).await?;

        tool::run_tool(
            tool,
            &program,
            [
                INPUT_FILE,
                "--standalone",
                "--embed-resources",
                "--mathml",
                "--output",
                HTML_OUTPUT,
            ],
            scratch.path(),
            self.timeout(),
        )
        .await?;

        read_output(tool, &scratch, HTML_OUTPUT).await
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.tool_timeout_secs.max(1))
    }

    /// Fresh directory containing the source as `input.tex`.
    async fn scratch_dir(&self, source: &str) -> Result<TempDir, MonogramError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("monogram-export-");
        let dir = match self.config.scratch_root {
            Some(ref root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(|e| MonogramError::Internal(format!("Failed to create scratch directory: {e}")))?;

        tokio::fs::write(dir.path().join(INPUT_FILE), source)
            .await
            .map_err(|e| MonogramError::Internal(format!("Failed to write {INPUT_FILE}: {e}")))?;

        debug!("Scratch directory {}", dir.path().display());
        Ok(dir)
    }
}

async fn read_output(tool: &str, scratch: &TempDir, name: &str) -> Result<Vec<u8>, MonogramError> {
    tokio::fs::read(scratch.path().join(name))
        .await
        .map_err(|e| MonogramError::ToolFailed {
            tool: tool.to_string(),
            diagnostics: format!("expected output {name} was not produced: {e}"),
        })
}
