//! Integration tests for `NotesService`: the route-level operations run
//! against fake identity, rasterizer and vision collaborators.
//!
//! No network, pdfium or TeX installation is needed. Export tests that would
//! need pdflatex or pandoc only check the missing-tool path.

use async_trait::async_trait;
use edgequake_llm::ImageData;
use image::{DynamicImage, Rgba, RgbaImage};
use monogram::auth::{bearer_token, AuthRequest, Identity, IdentityVerifier};
use monogram::pipeline::render::PageRasterizer;
use monogram::pipeline::vision::{Transcription, VisionModel, VisionModelFactory};
use monogram::{
    ContextHint, ConversionConfig, DocumentPatch, ExportConfig, Exporter, FileKind,
    ManualClock, MemoryDocumentStore, MonogramError, NotesService, Upload,
};
use std::sync::{Arc, Mutex};
use tokio_test::{assert_err, assert_ok};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ── Fakes ────────────────────────────────────────────────────────────────

/// Treats the bearer token as the user id.
struct TokenIsUser;

#[async_trait]
impl IdentityVerifier for TokenIsUser {
    async fn authenticate(&self, request: &AuthRequest) -> Result<Identity, MonogramError> {
        let token = bearer_token(request.header("authorization"))?;
        Ok(Identity {
            user_id: token.to_string(),
            email: None,
            full_name: None,
            avatar_url: None,
        })
    }
}

struct BlankPages(usize);

impl PageRasterizer for BlankPages {
    fn rasterize(&self, _: &[u8], _: u32, max_pages: usize) -> Result<Vec<DynamicImage>, MonogramError> {
        Ok((0..self.0.min(max_pages))
            .map(|_| DynamicImage::ImageRgba8(RgbaImage::from_pixel(16, 16, Rgba([250; 4]))))
            .collect())
    }
}

/// Answers like a chatty model: fenced, with its own preamble.
struct Chatty {
    context: ContextHint,
}

#[async_trait]
impl VisionModel for Chatty {
    async fn transcribe(&self, page_num: usize, _: ImageData) -> Result<Transcription, MonogramError> {
        Ok(Transcription {
            content: format!(
                "```latex\n\\documentclass{{article}}\n\\begin{{document}}\n\\section{{Page {page_num}}} {:?}\n\\end{{document}}\n```",
                self.context
            ),
            input_tokens: 100,
            output_tokens: 20,
        })
    }
}

struct Harness {
    service: NotesService,
    store: Arc<MemoryDocumentStore>,
    contexts: Arc<Mutex<Vec<ContextHint>>>,
}

fn harness(pages: usize) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let store = Arc::new(MemoryDocumentStore::new(Arc::new(ManualClock::at_unix(1_760_000_000))));
    let contexts = Arc::new(Mutex::new(Vec::new()));

    let seen = Arc::clone(&contexts);
    let factory = move |context: ContextHint| -> Arc<dyn VisionModel> {
        seen.lock().unwrap().push(context);
        Arc::new(Chatty { context })
    };
    let vision: Arc<dyn VisionModelFactory> = Arc::new(factory);

    let exporter = Exporter::new(ExportConfig {
        pdflatex: "monogram-missing-pdflatex".into(),
        pandoc: "monogram-missing-pandoc".into(),
        ..ExportConfig::default()
    });

    let service = NotesService::new(
        Arc::new(TokenIsUser),
        store.clone(),
        exporter,
        ConversionConfig::builder().max_pages(2).build().unwrap(),
        Arc::new(BlankPages(pages)),
        vision,
    );

    Harness {
        service,
        store,
        contexts,
    }
}

fn as_user(user: &str) -> AuthRequest {
    AuthRequest::new("GET", "/api/tex").with_header("Authorization", format!("Bearer {user}"))
}

fn pdf(name: &str) -> Upload {
    Upload::new("application/pdf", b"%PDF-1.7\n%fake\n".to_vec()).with_filename(name)
}

// ── Conversion ───────────────────────────────────────────────────────────

#[tokio::test]
async fn convert_and_save_round_trip() {
    let h = harness(3);
    let alice = as_user("alice");

    let result = h
        .service
        .convert_upload(&alice, &pdf("week3.pdf"), Some("math"), true)
        .await
        .unwrap();

    // two pages (max_pages), one preamble, no fences
    let latex = &result.output.latex;
    assert_eq!(latex.matches("\\documentclass").count(), 1);
    assert_eq!(latex.matches("\\begin{document}").count(), 1);
    assert_eq!(latex.matches("\\end{document}").count(), 1);
    assert!(!latex.contains("```"));
    assert!(latex.find("Page 1").unwrap() < latex.find("Page 2").unwrap());
    assert!(!latex.contains("Page 3"));
    assert_eq!(result.output.stats.total_input_tokens, 200);
    assert!(result.output.raw_text.contains("```latex"));

    assert_eq!(*h.contexts.lock().unwrap(), vec![ContextHint::Math]);

    let summary = result.document.expect("saved");
    assert_eq!(summary.filename, "week3.tex");
    let stored = h.service.get_document(&alice, summary.id).await.unwrap();
    assert_eq!(&stored.latex, latex);
    assert_eq!(stored.owner_id, "alice");
}

#[tokio::test]
async fn unknown_context_falls_back_to_general_and_nothing_is_saved() {
    let h = harness(1);
    let result = h
        .service
        .convert_upload(&as_user("alice"), &pdf("x.pdf"), Some("astrology"), false)
        .await
        .unwrap();

    assert!(result.document.is_none());
    assert!(h.store.is_empty().await);
    assert_eq!(*h.contexts.lock().unwrap(), vec![ContextHint::General]);
}

#[tokio::test]
async fn upload_validation_runs_before_conversion() {
    let h = harness(1);
    let png = Upload::new("image/png", vec![0x89, b'P', b'N', b'G']);
    let err = h
        .service
        .convert_upload(&as_user("alice"), &png, None, true)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Supported format: pdf");
    assert_eq!(err.status_code(), 422);

    let h = harness(0);
    let err = h
        .service
        .convert_upload(&as_user("alice"), &pdf("empty.pdf"), None, true)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "No pages found in PDF");
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn anonymous_requests_are_rejected() {
    let h = harness(1);
    let anonymous = AuthRequest::new("POST", "/convert");

    let err = h
        .service
        .convert_upload(&anonymous, &pdf("x.pdf"), None, true)
        .await
        .unwrap_err();
    assert_eq!(err.status_code(), 401);
    assert!(h.contexts.lock().unwrap().is_empty());

    let err = h.service.list_documents(&anonymous, None).await.unwrap_err();
    assert_eq!(err.to_string(), "Unauthorized: Missing Authorization header");
}

// ── Documents ────────────────────────────────────────────────────────────

#[tokio::test]
async fn documents_are_owner_scoped() {
    let h = harness(1);
    let (alice, bob) = (as_user("alice"), as_user("bob"));

    let doc = h
        .service
        .create_document(&alice, Some("private.tex"), Some("\\section{Mine}"))
        .await
        .unwrap();

    assert!(h.service.list_documents(&bob, None).await.unwrap().is_empty());

    let not_found = |r: Result<_, MonogramError>| matches!(r, Err(MonogramError::NotFound));
    assert!(not_found(h.service.get_document(&bob, doc.id).await.map(|_| ())));
    assert!(not_found(h.service.download_document(&bob, doc.id).await.map(|_| ())));
    assert!(not_found(h.service.project_files(&bob, doc.id).await.map(|_| ())));
    assert!(not_found(h.service.export_document(&bob, doc.id, "tex").await.map(|_| ())));
    assert!(not_found(
        h.service
            .update_document(&bob, doc.id, DocumentPatch {
                latex: Some("stolen".into()),
                filename: None,
            })
            .await
            .map(|_| ())
    ));
    assert!(not_found(h.service.delete_document(&bob, doc.id).await));

    // unknown id looks the same as a foreign one
    assert!(not_found(h.service.get_document(&alice, Uuid::new_v4()).await.map(|_| ())));

    let still = h.service.get_document(&alice, doc.id).await.unwrap();
    assert_eq!(still.latex, "\\section{Mine}");
}

#[tokio::test]
async fn create_requires_both_fields() {
    let h = harness(1);
    let alice = as_user("alice");

    for (filename, latex) in [(None, Some("x")), (Some("a.tex"), None), (Some("  "), Some("x")), (None, None)] {
        let err = h.service.create_document(&alice, filename, latex).await.unwrap_err();
        assert_eq!(err.to_string(), "Both 'filename' and 'latex' are required");
        assert_eq!(err.status_code(), 422);
    }
    assert!(h.store.is_empty().await);
}

#[tokio::test]
async fn update_requires_a_field_and_keeps_the_rest() {
    let h = harness(1);
    let alice = as_user("alice");
    let doc = h
        .service
        .create_document(&alice, Some("a.tex"), Some("old"))
        .await
        .unwrap();

    let err = h
        .service
        .update_document(&alice, doc.id, DocumentPatch::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "At least one of 'filename' or 'latex' must be provided");

    // a missing record wins over an empty patch
    let err = h
        .service
        .update_document(&alice, Uuid::new_v4(), DocumentPatch::default())
        .await
        .unwrap_err();
    assert!(matches!(err, MonogramError::NotFound));

    let updated = h
        .service
        .update_document(&alice, doc.id, DocumentPatch {
            filename: Some("renamed.tex".into()),
            latex: None,
        })
        .await
        .unwrap();
    assert_eq!(updated.filename, "renamed.tex");
    assert_eq!(updated.latex, "old");
}

#[tokio::test]
async fn list_limit_bounds() {
    let h = harness(1);
    let alice = as_user("alice");
    for i in 0..12 {
        h.service
            .create_document(&alice, Some(format!("n{i}.tex").as_str()), Some("x"))
            .await
            .unwrap();
    }

    let default = h.service.list_documents(&alice, None).await.unwrap();
    assert_eq!(default.len(), 10);
    assert_eq!(default[0].filename, "n11.tex");

    assert_eq!(h.service.list_documents(&alice, Some(50)).await.unwrap().len(), 12);
    assert_eq!(h.service.list_documents(&alice, Some(1)).await.unwrap().len(), 1);

    for bad in [0, 51] {
        let err = h.service.list_documents(&alice, Some(bad)).await.unwrap_err();
        assert_eq!(err.status_code(), 422);
    }
}

#[tokio::test]
async fn delete_then_missing() {
    let h = harness(1);
    let alice = as_user("alice");
    let doc = h
        .service
        .create_document(&alice, Some("a.tex"), Some("x"))
        .await
        .unwrap();

    assert_ok!(h.service.delete_document(&alice, doc.id).await);
    let err = assert_err!(h.service.get_document(&alice, doc.id).await);
    assert!(matches!(err, MonogramError::NotFound));
    let err = assert_err!(h.service.delete_document(&alice, doc.id).await);
    assert!(matches!(err, MonogramError::NotFound));
}

// ── Download, projects, export ───────────────────────────────────────────

#[tokio::test]
async fn download_uses_stored_filename() {
    let h = harness(1);
    let alice = as_user("alice");
    let doc = h
        .service
        .create_document(&alice, Some("Lecture 4.tex"), Some("\\section{Groups}"))
        .await
        .unwrap();

    let artifact = h.service.download_document(&alice, doc.id).await.unwrap();
    assert_eq!(artifact.filename, "Lecture 4.tex");
    assert_eq!(artifact.mime_type, "application/x-tex");
    assert_eq!(artifact.content, b"\\section{Groups}");
}

#[tokio::test]
async fn project_manifest_of_stored_document() {
    let h = harness(1);
    let alice = as_user("alice");
    let source = "\\input{chapters/intro}\n\\includegraphics[width=3cm]{figs/plot.png}\n\\bibliography{refs}";
    let doc = h
        .service
        .create_document(&alice, Some("thesis.tex"), Some(source))
        .await
        .unwrap();

    let files = h.service.project_files(&alice, doc.id).await.unwrap();
    let listed: Vec<(&str, FileKind)> = files.iter().map(|f| (f.path.as_str(), f.kind)).collect();
    assert_eq!(
        listed,
        vec![
            ("thesis.tex", FileKind::Tex),
            ("chapters", FileKind::Dir),
            ("figs", FileKind::Dir),
            ("chapters/intro.tex", FileKind::Tex),
            ("figs/plot.png", FileKind::Image),
            ("refs.bib", FileKind::Bib),
        ]
    );
    assert!(files[0].stored && files[0].editable);
    assert!(files[1..].iter().all(|f| !f.stored && !f.editable));
}

#[tokio::test]
async fn export_formats() {
    let h = harness(1);
    let alice = as_user("alice");
    let doc = h
        .service
        .create_document(&alice, Some("week1.tex"), Some("\\section{A}"))
        .await
        .unwrap();

    let tex = assert_ok!(h.service.export_document(&alice, doc.id, "tex").await);
    assert_eq!(tex.filename, "week1.tex");
    assert_eq!(tex.content, b"\\section{A}");

    let err = h.service.export_document(&alice, doc.id, "docx").await.unwrap_err();
    assert!(matches!(err, MonogramError::UnsupportedFormat { .. }));
    assert_eq!(err.status_code(), 422);

    let err = h.service.compile_project(&alice, doc.id).await.unwrap_err();
    assert!(matches!(err, MonogramError::ToolUnavailable { .. }));
    assert_eq!(err.status_code(), 503);

    let err = h.service.export_document(&alice, doc.id, "html").await.unwrap_err();
    assert!(matches!(err, MonogramError::ToolUnavailable { .. }));
}

#[tokio::test]
async fn export_source_defaults_and_validation() {
    let h = harness(1);
    let alice = as_user("alice");

    let artifact = h
        .service
        .export_source(&alice, "\\section{Loose}", None, "tex")
        .await
        .unwrap();
    assert_eq!(artifact.filename, "notes.tex");
    assert_eq!(artifact.mime_type, "application/x-tex");

    let artifact = h
        .service
        .export_source(&alice, "\\section{Loose}", Some("  "), "tex")
        .await
        .unwrap();
    assert_eq!(artifact.filename, "notes.tex");

    let err = h
        .service
        .export_source(&alice, "   \n", Some("x"), "tex")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "LaTeX content is required");

    // nothing is stored by a direct export
    assert!(h.store.is_empty().await);
}
