//! Post-processing: recover a well-formed LaTeX document from model output.
//!
//! Even a well-prompted vision model returns text with structural damage
//! from the LaTeX point of view:
//!
//! - the whole answer wrapped in ```` ```latex ... ``` ```` fences
//! - newlines returned as the escape sequence `\\n` instead of line breaks
//! - a bare body with no preamble, or a preamble with no `\end{document}`
//! - repeated `\begin{document}` / `\end{document}` markers
//!
//! [`normalize`] repairs these into a [`NormalizedDocument`] with exactly one
//! open and one close marker, and [`extract_body`] cuts out the page content
//! between them. Neither function fails: malformed input degrades to the best
//! string available.
//!
//! ## Rule Order
//!
//! Fences are stripped before escape replacement so a fence followed by an
//! escaped newline is still recognised, and the wrapper repair runs last so
//! it sees the final text. The whole sequence repeats until the text stops
//! changing, so running [`normalize`] on its own output returns the same
//! string.

use once_cell::sync::Lazy;
use regex::Regex;

/// Preamble used whenever a document has to be (re)wrapped.
pub const DEFAULT_PREAMBLE: &str = "\\documentclass[12pt]{article}\n\
\\usepackage{amsmath,amssymb,amsfonts}\n\
\\usepackage[utf8]{inputenc}\n\
\\usepackage{geometry}\n\
\\geometry{a4paper, margin=1in}\n\
\\begin{document}\n";

/// Document-class declaration that marks a full document.
pub const DOCUMENT_CLASS: &str = "\\documentclass";
/// Open wrapper marker.
pub const DOCUMENT_BEGIN: &str = "\\begin{document}";
/// Close wrapper marker.
pub const DOCUMENT_END: &str = "\\end{document}";

/// Escaped-newline artifact as it appears in model output.
const ESCAPED_NEWLINE: &str = "\\\\n";

/// A LaTeX string with exactly one open and one close wrapper marker,
/// or the empty string for empty input.
pub type NormalizedDocument = String;

/// The trimmed content between the wrapper markers of a normalized page.
pub type DocumentBody = String;

/// Normalise raw model output into a complete LaTeX document.
///
/// 1. Strip a leading fence line (with optional language tag) and a
///    trailing fence line
/// 2. Replace escaped newlines with real line breaks
/// 3. Repair the document wrapper:
///    - no `\documentclass` → wrap the content in [`DEFAULT_PREAMBLE`] and
///      [`DOCUMENT_END`], dropping stray markers from the content
///    - `\documentclass` present → keep the first open marker (inserting one
///      after the preamble when missing) and the last close marker (appending
///      one when missing or misplaced)
///
/// Empty or whitespace-only input yields an empty string.
pub fn normalize(raw: &str) -> NormalizedDocument {
    let mut latex = clean_text(raw);

    // Removing a marker can splice its neighbours into a new marker, an
    // escaped newline or a trailing fence, so repeat until stable.
    loop {
        if latex.is_empty() {
            return latex;
        }

        let repaired = if latex.contains(DOCUMENT_CLASS) {
            repair_wrapper(&latex)
        } else {
            wrap_document(&strip_markers(&latex))
        };

        let next = clean_text(&repaired);
        if next == latex {
            return next;
        }
        latex = next;
    }
}

/// Extract the page body from raw model output.
///
/// Normalises first, then returns the trimmed text between the first open
/// marker and the last close marker. If either marker is missing or the close
/// marker does not come after the open marker, the full normalised string is
/// returned instead.
pub fn extract_body(raw: &str) -> DocumentBody {
    let normalized = normalize(raw);

    let Some(open) = normalized.find(DOCUMENT_BEGIN) else {
        return normalized;
    };
    let Some(close) = normalized.rfind(DOCUMENT_END) else {
        return normalized;
    };

    let body_start = open + DOCUMENT_BEGIN.len();
    if close < body_start {
        return normalized;
    }

    normalized[body_start..close].trim().to_string()
}

/// Wrap a body in the default preamble and closing marker.
///
/// An empty body produces the preamble immediately followed by the
/// closing marker.
pub fn wrap_document(body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("{DEFAULT_PREAMBLE}{DOCUMENT_END}")
    } else {
        format!("{DEFAULT_PREAMBLE}{body}\n{DOCUMENT_END}")
    }
}

// ── Fences and escapes ───────────────────────────────────────────────────────

static RE_LEADING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^```[A-Za-z0-9_+-]*[ \t]*(?:\r?\n|$)").unwrap());

static RE_TRAILING_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:\r?\n)?```[ \t\r\n]*$").unwrap());

/// Strip one leading and one trailing fence line, then replace escaped
/// newlines.
///
/// Repeats until nothing changes. A second round only happens for nested
/// fences or a fence hidden behind an escaped newline.
fn clean_text(input: &str) -> String {
    let mut s = input.trim().to_string();
    loop {
        let next = strip_fences(&s).replace(ESCAPED_NEWLINE, "\n");
        let next = next.trim();
        if next == s {
            return s;
        }
        s = next.to_string();
    }
}

fn strip_fences(input: &str) -> String {
    let without_leading = RE_LEADING_FENCE.replace(input, "");
    RE_TRAILING_FENCE.replace(&without_leading, "").into_owned()
}

// ── Wrapper repair ───────────────────────────────────────────────────────────

fn strip_markers(body: &str) -> String {
    let mut s = body.to_string();
    while s.contains(DOCUMENT_BEGIN) || s.contains(DOCUMENT_END) {
        s = s.replace(DOCUMENT_BEGIN, "").replace(DOCUMENT_END, "");
    }
    s
}

/// Commands that may appear between `\documentclass` and `\begin{document}`.
static RE_PREAMBLE_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:%|\\(?:documentclass|usepackage|RequirePackage|geometry|newcommand|renewcommand|providecommand|DeclareMathOperator|newtheorem|theoremstyle|setlength|addtolength|usetikzlibrary|pagestyle|title|author|date|hypersetup|graphicspath|addbibresource|bibliographystyle|input\{|def\\)|$)",
    )
    .unwrap()
});

fn repair_wrapper(latex: &str) -> String {
    let mut doc = keep_first_open_marker(latex);
    if !doc.contains(DOCUMENT_BEGIN) {
        doc = insert_open_marker(&doc);
    }
    keep_last_close_marker(&doc)
}

fn keep_first_open_marker(latex: &str) -> String {
    match latex.find(DOCUMENT_BEGIN) {
        Some(pos) => {
            let (head, tail) = latex.split_at(pos + DOCUMENT_BEGIN.len());
            format!("{head}{}", tail.replace(DOCUMENT_BEGIN, ""))
        }
        None => latex.to_string(),
    }
}

/// Insert an open marker after the preamble block that follows
/// `\documentclass`.
fn insert_open_marker(latex: &str) -> String {
    let class_pos = latex.find(DOCUMENT_CLASS).unwrap_or(0);
    let mut offset = latex[..class_pos].rfind('\n').map_or(0, |p| p + 1);
    let mut split = latex.len();

    for line in latex[offset..].split_inclusive('\n') {
        if !RE_PREAMBLE_LINE.is_match(line) {
            split = offset;
            break;
        }
        offset += line.len();
    }

    let (preamble, body) = latex.split_at(split);
    let preamble = preamble.trim_end();
    let body = body.trim_start();
    if body.is_empty() {
        format!("{preamble}\n{DOCUMENT_BEGIN}")
    } else {
        format!("{preamble}\n{DOCUMENT_BEGIN}\n{body}")
    }
}

fn keep_last_close_marker(latex: &str) -> String {
    let open_end = latex
        .find(DOCUMENT_BEGIN)
        .map_or(0, |p| p + DOCUMENT_BEGIN.len());

    match latex.rfind(DOCUMENT_END) {
        Some(close) if close >= open_end => {
            let (head, tail) = latex.split_at(close);
            format!("{}{tail}", head.replace(DOCUMENT_END, ""))
        }
        _ => {
            let without = latex.replace(DOCUMENT_END, "");
            format!("{}\n{DOCUMENT_END}", without.trim_end())
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn count(haystack: &str, needle: &str) -> usize {
        haystack.matches(needle).count()
    }

    #[test]
    fn empty_input_is_empty() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("   \n\t "), "");
        assert_eq!(normalize("```latex\n```"), "");
    }

    #[test]
    fn bare_body_is_wrapped() {
        let out = normalize("\\section{Limits}\n$\\lim_{x\\to 0} x = 0$");
        assert!(out.starts_with(DEFAULT_PREAMBLE));
        assert!(out.ends_with(DOCUMENT_END));
        assert!(out.contains("\\section{Limits}"));
    }

    #[test]
    fn fences_with_language_tag_are_stripped() {
        let out = normalize("```latex\n\\section{A}\n```");
        assert!(!out.contains("```"));
        assert_eq!(extract_body("```latex\n\\section{A}\n```"), "\\section{A}");

        let out = normalize("```tex\nx\n```\n");
        assert!(!out.contains("```"));
        assert!(!out.contains("tex\nx"));
    }

    #[test]
    fn escaped_newlines_become_line_breaks() {
        let body = extract_body("line one\\\\nline two");
        assert_eq!(body, "line one\nline two");
    }

    #[test]
    fn control_words_starting_with_n_survive() {
        let body = extract_body("$\\nabla f \\neq 0$ \\noindent");
        assert_eq!(body, "$\\nabla f \\neq 0$ \\noindent");
    }

    #[test]
    fn missing_close_marker_is_appended() {
        let raw = "\\documentclass{article}\n\\begin{document}\nHello";
        let out = normalize(raw);
        assert_eq!(out, format!("{raw}\n{DOCUMENT_END}"));
    }

    #[test]
    fn complete_document_is_returned_as_is() {
        let raw = "\\documentclass{article}\n\\begin{document}\nHi\n\\end{document}";
        assert_eq!(normalize(&format!("  {raw}\n\n")), raw);
    }

    #[test]
    fn missing_open_marker_is_inserted_after_preamble() {
        let raw = "\\documentclass{article}\n\\usepackage{amsmath}\n\\section{One}\ntext\n\\end{document}";
        let out = normalize(raw);
        assert_eq!(
            out,
            "\\documentclass{article}\n\\usepackage{amsmath}\n\\begin{document}\n\\section{One}\ntext\n\\end{document}"
        );
        assert_eq!(extract_body(raw), "\\section{One}\ntext");
    }

    #[test]
    fn duplicate_markers_are_collapsed() {
        let raw = "\\documentclass{article}\n\\begin{document}\nA\n\\end{document}\n\\begin{document}\nB\n\\end{document}";
        let out = normalize(raw);
        assert_eq!(count(&out, DOCUMENT_BEGIN), 1);
        assert_eq!(count(&out, DOCUMENT_END), 1);
        assert_eq!(extract_body(raw), "A\n\n\nB");
    }

    #[test]
    fn stray_markers_in_bare_body_are_dropped() {
        let out = normalize("\\begin{document}\nonly body\n\\end{document}\n\\end{document}");
        assert_eq!(count(&out, DOCUMENT_BEGIN), 1);
        assert_eq!(count(&out, DOCUMENT_END), 1);
        assert_eq!(extract_body(&out), "only body");
    }

    #[test]
    fn close_before_open_is_moved_to_the_end() {
        let raw = "\\documentclass{article}\n\\end{document}\n\\begin{document}\nX";
        let out = normalize(raw);
        assert!(out.ends_with(&format!("X\n{DOCUMENT_END}")));
        assert_eq!(count(&out, DOCUMENT_END), 1);
    }

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "",
            "plain text",
            "```latex\n\\section{A}\n```",
            "```\n```latex\n\\documentclass{article}\nx\n```\n```",
            "\\documentclass{article}\n\\begin{document}\nHi",
            "\\documentclass{article}\nHi\n\\end{document}\ntrailing words",
            "a\\\\nb\\\\n\\\\nc",
            "\\begin{document}\\begin{document}x\\end{document}",
            "\\documentclass{article}\n\\begin{document}\nA\n\\end{document}\n\\end{document}",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn wrapper_invariant_holds() {
        let samples = [
            "x",
            "\\documentclass{article}",
            "\\end{document}",
            "\\documentclass{article}\\end{document}\\end{document}\\begin{document}",
        ];
        for s in samples {
            let out = normalize(s);
            assert_eq!(count(&out, DOCUMENT_BEGIN), 1, "open markers in {out:?}");
            assert_eq!(count(&out, DOCUMENT_END), 1, "close markers in {out:?}");
        }
    }

    #[test]
    fn markers_spliced_by_removal_are_removed_too() {
        let out = normalize("\\begin{doc\\begin{document}ument}");
        assert_eq!(count(&out, DOCUMENT_BEGIN), 1, "open markers in {out:?}");
        assert_eq!(count(&out, DOCUMENT_END), 1, "close markers in {out:?}");
        assert_eq!(normalize(&out), out);

        let out = normalize("\\documentclass{article}\n\\begin{document}\nA\\end{doc\\begin{document}ument}B");
        assert_eq!(count(&out, DOCUMENT_BEGIN), 1, "open markers in {out:?}");
        assert_eq!(count(&out, DOCUMENT_END), 1, "close markers in {out:?}");
        assert_eq!(normalize(&out), out);
    }

    #[test]
    fn escaped_newline_spliced_by_removal_is_replaced() {
        let raw = "x\\\\\\end{document}ny";
        let once = normalize(raw);
        assert_eq!(normalize(&once), once);
        assert_eq!(extract_body(raw), "x\ny");
    }

    #[test]
    fn fence_exposed_by_removal_is_stripped() {
        let raw = "\\documentclass{article}\n\\begin{document}\nx\n\\end{document}\n```\\begin{document}";
        let once = normalize(raw);
        assert!(!once.contains("```"), "fence left in {once:?}");
        assert_eq!(normalize(&once), once);
    }

    /// Every concatenation of three fragments drawn from the kinds of damage
    /// models produce, including halves of markers.
    fn fragment_mixes() -> Vec<String> {
        const FRAGMENTS: [&str; 16] = [
            "",
            "x",
            "\n",
            "n",
            "\\",
            "\\\\n",
            "```latex\n",
            "```",
            "\\documentclass{article}",
            "\\usepackage{amsmath}\n",
            "\\begin{document}",
            "\\end{document}",
            "\\begin{doc",
            "\\end{doc",
            "ument}",
            "%",
        ];
        let mut mixes = Vec::new();
        for a in FRAGMENTS {
            for b in FRAGMENTS {
                for c in FRAGMENTS {
                    mixes.push(format!("{a}{b}{c}"));
                }
            }
        }
        mixes
    }

    #[test]
    fn normalize_is_idempotent_on_fragment_mixes() {
        for raw in fragment_mixes() {
            let once = normalize(&raw);
            assert_eq!(normalize(&once), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn wrapper_invariant_holds_on_fragment_mixes() {
        for raw in fragment_mixes() {
            let out = normalize(&raw);
            if out.is_empty() {
                continue;
            }
            assert_eq!(count(&out, DOCUMENT_BEGIN), 1, "open markers for {raw:?}: {out:?}");
            assert_eq!(count(&out, DOCUMENT_END), 1, "close markers for {raw:?}: {out:?}");
            let open = out.find(DOCUMENT_BEGIN).unwrap_or_default();
            let close = out.find(DOCUMENT_END).unwrap_or_default();
            assert!(open < close, "close before open for {raw:?}: {out:?}");
        }
    }

    #[test]
    fn body_round_trip() {
        for body in ["x", "\\section{Intro}\nSome $a^2$ text.", "line\n\nparagraph"] {
            assert_eq!(extract_body(&wrap_document(body)), body);
        }
    }

    #[test]
    fn extract_body_of_empty_is_empty() {
        assert_eq!(extract_body(""), "");
    }

    #[test]
    fn wrap_empty_body() {
        assert_eq!(
            wrap_document(""),
            format!("{DEFAULT_PREAMBLE}{DOCUMENT_END}")
        );
    }
}
