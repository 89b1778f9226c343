//! Result types returned by a conversion.

use serde::Serialize;

/// The assembled document plus per-page detail.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionOutput {
    /// Complete LaTeX document with exactly one preamble.
    pub latex: String,
    /// Unprocessed model answers, joined with a blank line in page order.
    pub raw_text: String,
    /// One entry per converted page, in page order.
    pub pages: Vec<PageResult>,
    pub stats: ConversionStats,
}

/// Result for a single page.
#[derive(Debug, Clone, Serialize)]
pub struct PageResult {
    /// 1-indexed page number.
    pub page_num: usize,
    /// The model's answer as received.
    pub raw: String,
    /// Body extracted from the normalised answer.
    pub body: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Time spent on this page including retries.
    pub duration_ms: u64,
    pub retries: u32,
}

/// Aggregate counters for a conversion.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ConversionStats {
    /// Pages rendered from the PDF (at most `max_pages`).
    pub total_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_retries: u32,
    pub render_duration_ms: u64,
    pub llm_duration_ms: u64,
    pub total_duration_ms: u64,
}
