//! System prompts for transcribing handwritten notes into LaTeX.
//!
//! Callers can override the prompt via
//! [`crate::config::ConversionConfig::system_prompt`]; the subject hint is
//! appended in both cases.

use crate::config::ContextHint;

/// Default system prompt for converting a page image of handwriting to LaTeX.
///
/// The preamble listed in rule 2 matches
/// [`crate::pipeline::postprocess::DEFAULT_PREAMBLE`], so a well-behaved
/// response needs no repair.
pub const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert OCR and LaTeX typesetting engine specializing in handwritten academic content.

INPUT: An image of handwritten notes, equations, or diagrams.
OUTPUT: Clean, compilable LaTeX code.

RULES:
1. Output ONLY valid LaTeX code. No explanations, no markdown fences.
2. Include a complete document preamble:
   \documentclass[12pt]{article}
   \usepackage{amsmath,amssymb,amsfonts}
   \usepackage[utf8]{inputenc}
   \usepackage{geometry}
   \geometry{a4paper, margin=1in}
3. Use \section{} for headers, \begin{align} for displayed math.
4. Use $...$ for inline math.
5. If text is illegible, insert: \textcolor{red}{[illegible]}
6. NEVER invent content not present in the image.
7. For diagrams, add: % [Diagram: description]
8. Do not transcribe hand-drawn graphs; insert a framed box as a placeholder for a figure to be added later."#;

/// Subject-specific guidance appended to the system prompt.
pub fn context_hint(hint: ContextHint) -> &'static str {
    match hint {
        ContextHint::Math => {
            "Pay special attention to integrals, derivatives, summation notation, limits, and Greek letters."
        }
        ContextHint::Chemistry => {
            "Use the mhchem package for chemical equations. Recognize molecular structures and reaction arrows."
        }
        ContextHint::Physics => {
            "Recognize vector notation, bra-ket notation, circuit diagrams, and unit expressions."
        }
        ContextHint::General => "Preserve headings, bullet points, and inline math as written.",
    }
}

/// Full system prompt: base prompt (or override) plus the subject hint.
pub fn system_prompt(base: Option<&str>, hint: ContextHint) -> String {
    format!(
        "{}\n\nCONTEXT: {}",
        base.unwrap_or(DEFAULT_SYSTEM_PROMPT),
        context_hint(hint)
    )
}
