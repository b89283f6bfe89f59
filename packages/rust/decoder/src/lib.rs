//! Transcript payload decoding: base64 → HTML → normalized plain text.
//!
//! The document endpoint returns transcripts as base64-encoded HTML. This crate
//! turns that payload into plain UTF-8 text by decoding the base64, walking the
//! parsed DOM for text nodes, and running a whitespace cleanup pipeline.
//! Output is deterministic for a given input.

mod cleanup;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use scraper::Html;
use tracing::{debug, instrument};

use hearings_shared::{HarvestError, Result};

/// Elements whose text content never belongs in a transcript.
const SKIPPED_TAGS: &[&str] = &["script", "style", "head", "noscript", "template", "svg"];

/// Elements that start a new line of output.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "blockquote", "pre", "li", "dt", "dd", "tr", "td", "th",
    "table", "h1", "h2", "h3", "h4", "h5", "h6", "header", "footer", "body",
];

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Decode a base64 transcript payload into normalized plain text.
///
/// Fails with [`HarvestError::MalformedEncoding`] when the payload is not valid
/// base64 or the decoded bytes are not UTF-8.
#[instrument(skip_all, fields(payload_len = raw.len()))]
pub fn decode(raw: &[u8]) -> Result<String> {
    let html = decode_base64(raw)?;
    let text = html_to_text(&html);
    debug!(html_len = html.len(), text_len = text.len(), "transcript decoded");
    Ok(text)
}

/// Decode the base64 layer only, returning the embedded HTML.
pub fn decode_base64(raw: &[u8]) -> Result<String> {
    let bytes = if raw.iter().any(u8::is_ascii_whitespace) {
        // Line-wrapped payloads: the standard engine rejects embedded whitespace.
        let compact: Vec<u8> = raw
            .iter()
            .copied()
            .filter(|b| !b.is_ascii_whitespace())
            .collect();
        STANDARD.decode(compact)
    } else {
        STANDARD.decode(raw)
    }
    .map_err(|e| HarvestError::MalformedEncoding(format!("invalid base64: {e}")))?;

    String::from_utf8(bytes)
        .map_err(|e| HarvestError::MalformedEncoding(format!("decoded payload is not UTF-8: {e}")))
}

/// Strip markup from an HTML document and normalize the remaining text.
pub fn html_to_text(html: &str) -> String {
    let extracted = extract_text(html);
    cleanup::run_pipeline(&extracted)
}

// ---------------------------------------------------------------------------
// Text extraction
// ---------------------------------------------------------------------------

/// Concatenate the document's text nodes in order.
///
/// Fragments inside the same block element are joined with a space; a change
/// of enclosing block or a `<br>` starts a new line.
fn extract_text(html: &str) -> String {
    let doc = Html::parse_document(html);
    let mut out = String::with_capacity(html.len() / 2);
    let mut last_block = None;
    let mut line_break = false;

    for node in doc.root_element().descendants() {
        if node.value().as_element().is_some_and(|el| el.name() == "br") {
            line_break = true;
            continue;
        }
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if text.trim().is_empty() {
            continue;
        }

        let skipped = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|el| SKIPPED_TAGS.contains(&el.name()))
        });
        if skipped {
            continue;
        }

        let block = node
            .ancestors()
            .find(|a| {
                a.value()
                    .as_element()
                    .is_some_and(|el| BLOCK_TAGS.contains(&el.name()))
            })
            .map(|a| a.id());

        if !out.is_empty() {
            out.push(if block == last_block && !line_break { ' ' } else { '\n' });
        }
        out.push_str(text);
        last_block = block;
        line_break = false;
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(html: &str) -> Vec<u8> {
        STANDARD.encode(html).into_bytes()
    }

    const TRANSCRIPT: &str = r#"<html>
<head><title>Oral evidence: Bank of England</title><style>p { margin: 0 }</style></head>
<body>
  <h1>Treasury Committee</h1>
  <p><b>Q1</b>   <b>Chair:</b> Good morning,&nbsp;Governor.</p>
  <p><b>Andrew Bailey:</b> Good morning.</p>
  <script>window.track('x')</script>
</body>
</html>"#;

    #[test]
    fn decode_strips_markup_and_keeps_speech() {
        let text = decode(&encode(TRANSCRIPT)).unwrap();

        assert!(text.contains("Treasury Committee"));
        assert!(text.contains("Q1 Chair: Good morning, Governor."));
        assert!(text.contains("Andrew Bailey: Good morning."));
        assert!(!text.contains('<'));
        assert!(!text.contains("window.track"));
        assert!(!text.contains("margin"));
        assert!(!text.contains("Oral evidence: Bank of England"));
    }

    #[test]
    fn paragraphs_land_on_separate_lines() {
        let text = decode(&encode(TRANSCRIPT)).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(
            lines,
            vec![
                "Treasury Committee",
                "Q1 Chair: Good morning, Governor.",
                "Andrew Bailey: Good morning.",
            ]
        );
    }

    #[test]
    fn decode_is_deterministic() {
        let payload = encode(TRANSCRIPT);
        let first = decode(&payload).unwrap();
        let second = decode(&payload).unwrap();
        assert_eq!(first.as_bytes(), second.as_bytes());
    }

    #[test]
    fn invalid_base64_is_malformed_encoding() {
        let err = decode(b"this is *not* base64!").unwrap_err();
        assert!(matches!(err, HarvestError::MalformedEncoding(_)), "got {err:?}");
    }

    #[test]
    fn non_utf8_payload_is_malformed_encoding() {
        let payload = STANDARD.encode([0xff_u8, 0xfe, 0x00, 0x41]).into_bytes();
        let err = decode(&payload).unwrap_err();
        assert!(matches!(err, HarvestError::MalformedEncoding(_)));
        assert!(err.to_string().contains("UTF-8"));
    }

    #[test]
    fn line_wrapped_base64_is_accepted() {
        let encoded = STANDARD.encode("<p>Wrapped payload text</p>");
        let (head, tail) = encoded.split_at(8);
        let wrapped = format!("{head}\r\n{tail}\n");
        let text = decode(wrapped.as_bytes()).unwrap();
        assert_eq!(text, "Wrapped payload text");
    }

    #[test]
    fn br_starts_a_new_line() {
        let text = html_to_text("<p>Chair: Welcome.<br>Witness: Thanks.<br/>Chair: Q2</p>");
        assert_eq!(text, "Chair: Welcome.\nWitness: Thanks.\nChair: Q2");
    }

    #[test]
    fn entities_are_resolved() {
        let text = html_to_text("<p>Fish &amp; chips &pound;5 &lt;cheap&gt;</p>");
        assert_eq!(text, "Fish & chips £5 <cheap>");
    }

    #[test]
    fn empty_document_yields_empty_text() {
        assert_eq!(decode(&encode("<html><body></body></html>")).unwrap(), "");
        assert_eq!(decode(b"").unwrap(), "");
    }

    #[test]
    fn large_transcript_is_fully_decoded() {
        let mut html = String::from("<html><body>");
        for i in 0..5_000 {
            html.push_str(&format!("<p>Q{i} Member: question number {i}.</p>\n"));
        }
        html.push_str("</body></html>");

        let text = decode(&encode(&html)).unwrap();
        assert_eq!(text.lines().count(), 5_000);
        assert!(text.ends_with("Q4999 Member: question number 4999."));
    }
}
