//! The operations behind the HTTP surface.
//!
//! [`NotesService`] has one method per route. Each method authenticates the
//! request first and scopes every persistence call to the caller's user id,
//! so a routing layer only has to translate requests and map
//! [`MonogramError::status_code`] onto responses.

use crate::auth::{AuthRequest, Identity, IdentityVerifier};
use crate::config::{ContextHint, ConversionConfig};
use crate::convert::convert_pdf;
use crate::error::MonogramError;
use crate::export::{ExportArtifact, ExportFormat, Exporter, DEFAULT_EXPORT_NAME};
use crate::output::ConversionOutput;
use crate::pipeline::input::Upload;
use crate::pipeline::render::PageRasterizer;
use crate::pipeline::vision::VisionModelFactory;
use crate::project::{infer_project_files, ProjectFileEntry};
use crate::store::{DocumentPatch, DocumentStore, DocumentSummary, TexDocument, MAX_LIST_LIMIT};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Page size of the document listing when the caller gives none.
pub const DEFAULT_LIST_LIMIT: usize = 10;

/// Result of an upload: the conversion, plus the stored record when saved.
#[derive(Debug, Clone, Serialize)]
pub struct ConvertedUpload {
    #[serde(flatten)]
    pub output: ConversionOutput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document: Option<DocumentSummary>,
}

/// Route handlers, minus the routing.
pub struct NotesService {
    verifier: Arc<dyn IdentityVerifier>,
    store: Arc<dyn DocumentStore>,
    exporter: Exporter,
    conversion: ConversionConfig,
    rasterizer: Arc<dyn PageRasterizer>,
    vision: Arc<dyn VisionModelFactory>,
}

impl NotesService {
    pub fn new(
        verifier: Arc<dyn IdentityVerifier>,
        store: Arc<dyn DocumentStore>,
        exporter: Exporter,
        conversion: ConversionConfig,
        rasterizer: Arc<dyn PageRasterizer>,
        vision: Arc<dyn VisionModelFactory>,
    ) -> Self {
        Self {
            verifier,
            store,
            exporter,
            conversion,
            rasterizer,
            vision,
        }
    }

    async fn identify(&self, request: &AuthRequest) -> Result<Identity, MonogramError> {
        let identity = self.verifier.authenticate(request).await?;
        debug!("{} {} as {}", request.method, request.url, identity.user_id);
        Ok(identity)
    }

    // ── Conversion ───────────────────────────────────────────────────────

    /// Convert an uploaded PDF. With `save`, the result is also stored as
    /// `<upload stem>.tex` under the caller's account.
    pub async fn convert_upload(
        &self,
        request: &AuthRequest,
        upload: &Upload,
        context: Option<&str>,
        save: bool,
    ) -> Result<ConvertedUpload, MonogramError> {
        let identity = self.identify(request).await?;
        let context = context.map(ContextHint::parse_lenient).unwrap_or(self.conversion.context);

        let mut config = self.conversion.clone();
        config.context = context;
        let model = self.vision.for_context(context);

        let output = convert_pdf(upload, &config, Arc::clone(&self.rasterizer), model).await?;

        let document = if save {
            let filename = stored_filename(upload.filename.as_deref());
            let doc = self
                .store
                .create(&identity.user_id, &filename, &output.latex)
                .await?;
            info!("Saved conversion as {} ({})", doc.filename, doc.id);
            Some(DocumentSummary::from(&doc))
        } else {
            None
        };

        Ok(ConvertedUpload { output, document })
    }

    // ── Documents ────────────────────────────────────────────────────────

    /// The caller's most recent documents. `limit` must be within
    /// `1..=50`; `None` means 10.
    pub async fn list_documents(
        &self,
        request: &AuthRequest,
        limit: Option<usize>,
    ) -> Result<Vec<DocumentSummary>, MonogramError> {
        let identity = self.identify(request).await?;
        let limit = limit.unwrap_or(DEFAULT_LIST_LIMIT);
        if !(1..=MAX_LIST_LIMIT).contains(&limit) {
            return Err(MonogramError::Validation(format!(
                "limit must be between 1 and {MAX_LIST_LIMIT}"
            )));
        }
        self.store.list_recent(&identity.user_id, limit).await
    }

    pub async fn get_document(
        &self,
        request: &AuthRequest,
        id: Uuid,
    ) -> Result<TexDocument, MonogramError> {
        let identity = self.identify(request).await?;
        self.store.get(&identity.user_id, id).await
    }

    pub async fn create_document(
        &self,
        request: &AuthRequest,
        filename: Option<&str>,
        latex: Option<&str>,
    ) -> Result<TexDocument, MonogramError> {
        let identity = self.identify(request).await?;
        match (non_empty(filename), non_empty(latex)) {
            (Some(filename), Some(latex)) => {
                self.store.create(&identity.user_id, filename, latex).await
            }
            _ => Err(MonogramError::Validation(
                "Both 'filename' and 'latex' are required".into(),
            )),
        }
    }

    /// Apply `patch` to one of the caller's documents.
    ///
    /// Ownership is checked before the patch, so a foreign id is
    /// `NotFound` even when the patch is empty.
    pub async fn update_document(
        &self,
        request: &AuthRequest,
        id: Uuid,
        patch: DocumentPatch,
    ) -> Result<TexDocument, MonogramError> {
        let identity = self.identify(request).await?;
        self.store.get(&identity.user_id, id).await?;
        if patch.is_empty() {
            return Err(MonogramError::Validation(
                "At least one of 'filename' or 'latex' must be provided".into(),
            ));
        }
        self.store.update(&identity.user_id, id, patch).await
    }

    pub async fn delete_document(&self, request: &AuthRequest, id: Uuid) -> Result<(), MonogramError> {
        let identity = self.identify(request).await?;
        self.store.delete(&identity.user_id, id).await?;
        info!("Deleted document {}", id);
        Ok(())
    }

    /// The stored source as a download, under its stored filename.
    pub async fn download_document(
        &self,
        request: &AuthRequest,
        id: Uuid,
    ) -> Result<ExportArtifact, MonogramError> {
        let doc = self.get_document(request, id).await?;
        Ok(ExportArtifact {
            content: doc.latex.into_bytes(),
            mime_type: ExportFormat::Tex.mime_type().to_string(),
            filename: doc.filename,
        })
    }

    // ── Projects and export ──────────────────────────────────────────────

    /// The files a document's project would consist of, main file first.
    pub async fn project_files(
        &self,
        request: &AuthRequest,
        id: Uuid,
    ) -> Result<Vec<ProjectFileEntry>, MonogramError> {
        let doc = self.get_document(request, id).await?;
        Ok(infer_project_files(&doc.filename, &doc.latex))
    }

    /// Compile a stored document to PDF.
    pub async fn compile_project(
        &self,
        request: &AuthRequest,
        id: Uuid,
    ) -> Result<ExportArtifact, MonogramError> {
        let doc = self.get_document(request, id).await?;
        self.exporter
            .export(&doc.latex, ExportFormat::Pdf, &doc.filename)
            .await
    }

    /// Export a stored document as `tex`, `html` or `pdf`.
    pub async fn export_document(
        &self,
        request: &AuthRequest,
        id: Uuid,
        format: &str,
    ) -> Result<ExportArtifact, MonogramError> {
        let format: ExportFormat = format.parse()?;
        let doc = self.get_document(request, id).await?;
        self.exporter.export(&doc.latex, format, &doc.filename).await
    }

    /// Export source text the caller sends directly, without storing it.
    pub async fn export_source(
        &self,
        request: &AuthRequest,
        latex: &str,
        filename: Option<&str>,
        format: &str,
    ) -> Result<ExportArtifact, MonogramError> {
        self.identify(request).await?;
        let format: ExportFormat = format.parse()?;
        if latex.trim().is_empty() {
            return Err(MonogramError::Validation("LaTeX content is required".into()));
        }
        let filename = non_empty(filename).unwrap_or(DEFAULT_EXPORT_NAME);
        self.exporter.export(latex, format, filename).await
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// `notes.pdf` becomes `notes.tex`; no name becomes `notes.tex`.
fn stored_filename(upload_name: Option<&str>) -> String {
    let stem = upload_name
        .map(Path::new)
        .and_then(|p| p.file_stem())
        .and_then(|s| s.to_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_EXPORT_NAME);
    format!("{stem}.tex")
}
