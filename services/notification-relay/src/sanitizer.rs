//! Inbound email body cleaning.
//!
//! Replies arrive with the quoted conversation history underneath (or, for
//! bottom-posters, above) the new text. [`clean`] reduces a raw body to the
//! text the replier actually wrote, so it can be relayed into the chat channel.

use std::sync::OnceLock;

use kuchiki::traits::*;
use kuchiki::NodeRef;
use regex::Regex;

/// Containers mail clients wrap quoted history or signatures in.
const QUOTE_SELECTORS: &[&str] = &[
    ".gmail_quote",
    "blockquote",
    ".OutlookMessageHeader",
    ".MsoNormal[style*=\"border\"]",
    ".yahoo_quoted",
    ".moz-cite-prefix",
    ".gmail_signature",
    "#Signature",
];

const BLOCK_ELEMENTS: &str = "div, p, li, tr, h1, h2, h3, h4, h5, h6, pre, table";

fn boundary_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // Gmail, Apple Mail: "On <date>, <name> wrote:"
            r"(?im)^[ \t]*On\s[^\n]*wrote:",
            // Outlook: underscore rule followed by a From: header
            r"(?i)\n[ \t]*_{5,}[ \t]*\r?\n[ \t]*From:",
            r"(?i)_{5,}[ \t]*\r?\n[ \t]*From:",
            // Outlook desktop: From/Sent/To/Subject on one line
            r"(?i)From:[^\n]*Sent:[^\n]*To:[^\n]*Subject:",
            r"(?i)-----\s*Original Message\s*-----",
            r"_{10,}",
            // Outlook Web: From: and Sent: on consecutive lines
            r"(?i)From:[^\n]*\r?\n[^\n]*Sent:",
        ]
        .iter()
        .filter_map(|pattern| Regex::new(pattern).ok())
        .collect()
    })
}

fn regex(cell: &'static OnceLock<Option<Regex>>, pattern: &str) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

fn html_tag() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"(?i)</?[a-z][a-z0-9]*(\s[^>]*)?/?>")
}

fn inline_image() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"url\(\s*data:image/[^;]+;base64,[^)]*\)")
}

fn cid_reference() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    regex(&RE, r"\[cid:[^\]]*\]")
}

/// Reduces a raw email body (plain text or HTML) to the newly written reply text.
///
/// Never returns an empty string for a non-blank body: when every line is
/// quoted history, the first line of the body is returned instead.
pub fn clean(raw: &str) -> String {
    if raw.trim().is_empty() {
        return String::new();
    }

    let text = if looks_like_html(raw) {
        html_to_text(raw)
    } else {
        raw.replace("\r\n", "\n")
    };

    let mut cleaned = text.clone();
    loop {
        let next = tidy(&strip_quoted_history(&cleaned));
        if next == cleaned {
            break;
        }
        cleaned = next;
    }

    if cleaned.is_empty() {
        return first_line(&text);
    }
    cleaned
}

fn looks_like_html(body: &str) -> bool {
    html_tag().map(|re| re.is_match(body)).unwrap_or(false)
}

/// One pass over the boundary patterns, in order.
///
/// A boundary with written text above it truncates the body there. A boundary
/// at the very top (bottom-posted reply) only has its own marker removed, so the
/// text written below the quote survives.
fn strip_quoted_history(text: &str) -> String {
    for pattern in boundary_patterns() {
        let Some(found) = pattern.find(text) else {
            continue;
        };

        let head = &text[..found.start()];
        if !head.trim().is_empty() {
            return head.to_string();
        }
        return format!("{}{}", head, &text[found.end()..]);
    }
    text.to_string()
}

/// Drops `>`-quoted lines and CID placeholders, trims trailing whitespace and
/// collapses runs of blank lines.
fn tidy(text: &str) -> String {
    let without_cid = match cid_reference() {
        Some(re) => re.replace_all(text, "").into_owned(),
        None => text.to_string(),
    };

    let mut lines: Vec<&str> = Vec::new();
    for line in without_cid.lines() {
        let line = line.trim_end();
        if line.trim_start().starts_with('>') {
            continue;
        }
        if line.trim().is_empty() && lines.last().map_or(true, |prev| prev.is_empty()) {
            continue;
        }
        lines.push(if line.trim().is_empty() { "" } else { line });
    }

    lines.join("\n").trim().to_string()
}

fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("")
        .to_string()
}

fn html_to_text(html: &str) -> String {
    let document = kuchiki::parse_html().one(html);

    detach_all(&document, "img, script, style, head");
    strip_inline_images(&document);
    for selector in QUOTE_SELECTORS {
        detach_all(&document, selector);
    }
    separate_blocks(&document);

    let root = document
        .select_first("body")
        .map(|body| body.as_node().clone())
        .unwrap_or(document);

    root.text_contents().replace('\u{a0}', " ")
}

fn detach_all(document: &NodeRef, selector: &str) {
    if let Ok(selected) = document.select(selector) {
        let nodes: Vec<NodeRef> = selected.map(|node| node.as_node().clone()).collect();
        for node in nodes {
            node.detach();
        }
    }
}

fn strip_inline_images(document: &NodeRef) {
    let Some(re) = inline_image() else {
        return;
    };
    let Ok(styled) = document.select("[style]") else {
        return;
    };

    for element in styled {
        let mut attributes = element.attributes.borrow_mut();
        let cleaned = attributes
            .get("style")
            .filter(|style| style.contains("data:image"))
            .map(|style| re.replace_all(style, "").into_owned());
        if let Some(style) = cleaned {
            attributes.insert("style", style);
        }
    }
}

fn separate_blocks(document: &NodeRef) {
    if let Ok(breaks) = document.select("br") {
        let nodes: Vec<NodeRef> = breaks.map(|node| node.as_node().clone()).collect();
        for node in nodes {
            node.insert_after(NodeRef::new_text("\n"));
        }
    }

    if let Ok(blocks) = document.select(BLOCK_ELEMENTS) {
        let nodes: Vec<NodeRef> = blocks.map(|node| node.as_node().clone()).collect();
        for node in nodes {
            node.insert_before(NodeRef::new_text("\n"));
            node.insert_after(NodeRef::new_text("\n"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bottom_posted_reply_below_attribution() {
        let raw = "On Mon, Jan 1 wrote:\n> old stuff\nNew reply text";
        assert_eq!(clean(raw), "New reply text");
    }

    #[test]
    fn test_gmail_plain_text_reply() {
        let raw = "Thanks, see you then.\n\nOn Tue, Mar 5, 2024 at 9:14 AM Ann Lee <ann@firm.com> wrote:\n> Can we meet Friday?\n>\n> Ann";
        assert_eq!(clean(raw), "Thanks, see you then.");
    }

    #[test]
    fn test_outlook_original_message() {
        let raw = "Sounds good.\r\n\r\n-----Original Message-----\r\nFrom: Ann\r\nSent: Monday\r\nTo: Bob\r\nSubject: Case";
        assert_eq!(clean(raw), "Sounds good.");
    }

    #[test]
    fn test_outlook_underscore_rule() {
        let raw = "I signed it.\n________________________________\nFrom: Ann Lee <ann@firm.com>\nSent: Monday, March 4, 2024 10:00 AM\nTo: Bob\nSubject: Documents";
        assert_eq!(clean(raw), "I signed it.");
    }

    #[test]
    fn test_outlook_web_from_sent_block() {
        let raw = "Please call me.\nFrom: Ann Lee\nSent: Monday\nTo: Bob";
        assert_eq!(clean(raw), "Please call me.");
    }

    #[test]
    fn test_plain_text_without_quotes_is_untouched() {
        assert_eq!(clean("  Just a reply.\nSecond line.  "), "Just a reply.\nSecond line.");
    }

    #[test]
    fn test_strips_remaining_quote_lines() {
        let raw = "> quoted first\nMy answer\n> quoted after";
        assert_eq!(clean(raw), "My answer");
    }

    #[test]
    fn test_all_quoted_falls_back_to_first_line() {
        let raw = "> only quoted\n> history";
        assert_eq!(clean(raw), "> only quoted");
    }

    #[test]
    fn test_blank_body() {
        assert_eq!(clean(""), "");
        assert_eq!(clean(" \n "), "");
    }

    #[test]
    fn test_gmail_html_reply() {
        let raw = r#"<div dir="ltr">Works for me.<br>Talk soon</div><br><div class="gmail_quote"><div class="gmail_attr">On Mon, Jan 1, 2024 Ann wrote:<br></div><blockquote class="gmail_quote">Earlier message</blockquote></div>"#;
        assert_eq!(clean(raw), "Works for me.\nTalk soon");
    }

    #[test]
    fn test_outlook_html_reply() {
        let raw = r#"<html><body><div class="elementToProof">Received, thank you.</div><div id="appendonsend"></div><hr><div id="divRplyFwdMsg"><b>From:</b> Ann Lee<br><b>Sent:</b> Monday<br><b>To:</b> Bob</div><div>Original body</div></body></html>"#;
        assert_eq!(clean(raw), "Received, thank you.");
    }

    #[test]
    fn test_html_images_and_cid_references_removed() {
        let raw = r#"<p>See attached <img src="cid:logo"> [cid:image001.png@01D]</p><p style="background:url(data:image/png;base64,AAAA)">Bye</p>"#;
        assert_eq!(clean(raw), "See attached\n\nBye");
    }

    #[test]
    fn test_clean_is_idempotent_on_fixtures() {
        let fixtures = [
            "On Mon, Jan 1 wrote:\n> old stuff\nNew reply text",
            "Yes.\n\nOn Tue, Ann wrote:\n> ok?",
            "Fine\n-----Original Message-----\nFrom: a",
            "Done\n__________\nFrom: a\nSent: b",
            "Call me\nFrom: A\nSent: B",
            "> all quoted",
            "<div>Hi<br>there</div><blockquote>old</blockquote>",
        ];
        for raw in fixtures {
            let once = clean(raw);
            assert_eq!(clean(&once), once, "fixture: {:?}", raw);
        }
    }
}
