use quick_xml::escape::escape;
use regex::{Captures, Regex};
use std::sync::OnceLock;

pub const EMPTY_DESCRIPTION: &str = "<p>No description available.</p>";

const CODE_BLOCK_STYLE: &str = "background: #f0f0f0; padding: 10px; border-radius: 4px; \
     overflow-x: auto; border: 1px solid #ddd;";
const QUOTE_STYLE: &str = "border-left: 4px solid #ccc; margin: 10px 0; padding: 10px; \
     background: #f9f9f9; border-radius: 4px;";
const SPOILER_SUMMARY_STYLE: &str =
    "cursor: pointer; padding: 5px; background: #f0f0f0; border-radius: 4px;";
const SPOILER_BODY_STYLE: &str =
    "padding: 10px; border: 1px solid #ddd; margin-top: 5px; border-radius: 4px;";

enum Replacement {
    Template(String),
    Size,
    ListItems,
}

struct Rule {
    pattern: Regex,
    replacement: Replacement,
}

fn rule(pattern: &str, template: impl Into<String>) -> Rule {
    Rule {
        pattern: compile(pattern),
        replacement: Replacement::Template(template.into()),
    }
}

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("bbcode pattern")
}

/// Simple `[tag]..[/tag]` pairs, applied case-insensitively across lines.
fn paired(tag: &str, open: &str, close: &str) -> Rule {
    rule(
        &format!(r"(?is)\[{tag}\](.*?)\[/{tag}\]"),
        format!("{open}${{1}}{close}"),
    )
}

fn rules() -> &'static [Rule] {
    static RULES: OnceLock<Vec<Rule>> = OnceLock::new();
    RULES.get_or_init(|| {
        let mut rules = Vec::new();
        for level in 1..=6 {
            rules.push(paired(
                &format!("h{level}"),
                &format!("<h{level}>"),
                &format!("</h{level}>"),
            ));
        }
        rules.push(rule(r"(?i)\[hr\]", "<hr>"));
        for (tag, html) in [
            ("b", "strong"),
            ("i", "em"),
            ("u", "u"),
            ("s", "s"),
            ("sup", "sup"),
            ("sub", "sub"),
        ] {
            rules.push(paired(tag, &format!("<{html}>"), &format!("</{html}>")));
        }
        for align in ["center", "left", "right", "justify"] {
            rules.push(paired(
                align,
                &format!(r#"<div style="text-align: {align};">"#),
                "</div>",
            ));
        }

        rules.push(rule(
            r"(?is)\[url=(.*?)\](.*?)\[/url\]",
            r#"<a href="${1}" target="_blank">${2}</a>"#,
        ));
        rules.push(rule(
            r"(?is)\[url\](.*?)\[/url\]",
            r#"<a href="${1}" target="_blank">${1}</a>"#,
        ));
        rules.push(rule(
            r"(?is)\[img\](.*?)\[/img\]",
            r#"<img src="${1}" style="max-width: 100%; height: auto;" alt="Image">"#,
        ));
        rules.push(rule(
            r"(?is)\[img=(\d+)x(\d+)\](.*?)\[/img\]",
            r#"<img src="${3}" width="${1}" height="${2}" style="max-width: 100%; height: auto;" alt="Image">"#,
        ));

        rules.push(rule(
            r"(?is)\[code\](.*?)\[/code\]",
            format!(r#"<pre style="{CODE_BLOCK_STYLE}"><code>${{1}}</code></pre>"#),
        ));
        rules.push(rule(
            r"(?is)\[code=(.*?)\](.*?)\[/code\]",
            format!(r#"<pre style="{CODE_BLOCK_STYLE}"><code class="language-${{1}}">${{2}}</code></pre>"#),
        ));
        rules.push(paired(
            "c",
            r#"<code style="background: #f0f0f0; padding: 2px 4px; border-radius: 2px; border: 1px solid #ddd;">"#,
            "</code>",
        ));

        rules.push(paired("list", "<ul>", "</ul>"));
        rules.push(paired("ul", "<ul>", "</ul>"));
        rules.push(paired("ol", "<ol>", "</ol>"));
        // The list style value is case-sensitive even though the tag is not.
        for (value, style) in [
            ("1", ""),
            ("a", r#" style="list-style-type: lower-alpha;""#),
            ("A", r#" style="list-style-type: upper-alpha;""#),
            ("i", r#" style="list-style-type: lower-roman;""#),
            ("I", r#" style="list-style-type: upper-roman;""#),
        ] {
            rules.push(rule(
                &format!(r"(?s)\[(?i:list)={value}\](.*?)\[/(?i:list)\]"),
                format!("<ol{style}>${{1}}</ol>"),
            ));
        }
        rules.push(Rule {
            pattern: compile(r"\[\*\]"),
            replacement: Replacement::ListItems,
        });
        rules.push(paired("li", "<li>", "</li>"));

        rules.push(paired(
            "table",
            r#"<table style="border-collapse: collapse; width: 100%;">"#,
            "</table>",
        ));
        rules.push(paired("tr", "<tr>", "</tr>"));
        rules.push(paired(
            "td",
            r#"<td style="border: 1px solid #ddd; padding: 8px;">"#,
            "</td>",
        ));
        rules.push(paired(
            "th",
            r#"<th style="border: 1px solid #ddd; padding: 8px; background-color: #f2f2f2; font-weight: bold;">"#,
            "</th>",
        ));

        rules.push(rule(
            r"(?is)\[quote\](.*?)\[/quote\]",
            format!(r#"<blockquote style="{QUOTE_STYLE}">${{1}}</blockquote>"#),
        ));
        rules.push(rule(
            r"(?is)\[quote=(.*?)\](.*?)\[/quote\]",
            format!(r#"<blockquote style="{QUOTE_STYLE}"><strong>${{1}} said:</strong><br>${{2}}</blockquote>"#),
        ));
        rules.push(rule(
            r"(?is)\[spoiler\](.*?)\[/spoiler\]",
            format!(
                r#"<details style="margin: 5px 0;"><summary style="{SPOILER_SUMMARY_STYLE}">Spoiler</summary><div style="{SPOILER_BODY_STYLE}">${{1}}</div></details>"#
            ),
        ));
        rules.push(rule(
            r"(?is)\[spoiler=(.*?)\](.*?)\[/spoiler\]",
            format!(
                r#"<details style="margin: 5px 0;"><summary style="{SPOILER_SUMMARY_STYLE}">${{1}}</summary><div style="{SPOILER_BODY_STYLE}">${{2}}</div></details>"#
            ),
        ));

        rules.push(Rule {
            pattern: compile(r"(?is)\[size=(\d+)\](.*?)\[/size\]"),
            replacement: Replacement::Size,
        });
        rules.push(rule(
            r"(?is)\[color=(.*?)\](.*?)\[/color\]",
            r#"<span style="color: ${1};">${2}</span>"#,
        ));
        rules.push(rule(
            r"(?is)\[font=(.*?)\](.*?)\[/font\]",
            r#"<span style="font-family: ${1};">${2}</span>"#,
        ));

        rules.push(rule(
            r"(?is)\[youtube\](.*?)\[/youtube\]",
            r#"<iframe width="560" height="315" src="https://www.youtube.com/embed/${1}" frameborder="0" allowfullscreen></iframe>"#,
        ));
        rules.push(rule(
            r"(?is)\[video\](.*?)\[/video\]",
            r#"<video controls style="max-width: 100%;"><source src="${1}" type="video/mp4">Your browser does not support the video tag.</video>"#,
        ));
        rules.push(rule(
            r"(?is)\[audio\](.*?)\[/audio\]",
            r#"<audio controls><source src="${1}" type="audio/mpeg">Your browser does not support the audio element.</audio>"#,
        ));
        rules.push(rule(
            r"(?is)\[email\](.*?)\[/email\]",
            r#"<a href="mailto:${1}">${1}</a>"#,
        ));
        rules.push(rule(
            r"(?is)\[email=(.*?)\](.*?)\[/email\]",
            r#"<a href="mailto:${1}">${2}</a>"#,
        ));
        rules
    })
}

fn font_size(caps: &Captures) -> String {
    let size: f64 = caps[1].parse().unwrap_or(f64::MAX);
    let em = (size / 5.0).clamp(0.6, 2.0);
    format!(r#"<span style="font-size: {em:.1}em;">{}</span>"#, &caps[2])
}

/// `[*]` items run until the next item or the end of the enclosing list.
fn list_items(text: &str) -> String {
    static BOUNDARY: OnceLock<Regex> = OnceLock::new();
    let boundary = BOUNDARY.get_or_init(|| compile(r"(?i)\[\*\]|</ul>|</ol>|\[/(?:list|ul|ol)\]"));

    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[*]") {
        out.push_str(&rest[..start]);
        let body = &rest[start + 3..];
        let end = boundary.find(body).map_or(body.len(), |found| found.start());
        out.push_str("<li>");
        out.push_str(&body[..end]);
        out.push_str("</li>");
        rest = &body[end..];
    }
    out.push_str(rest);
    out
}

fn convert(text: &str) -> String {
    let mut html = escape(text).into_owned();
    for rule in rules() {
        html = match &rule.replacement {
            Replacement::Template(template) => rule
                .pattern
                .replace_all(&html, template.as_str())
                .into_owned(),
            Replacement::Size => rule.pattern.replace_all(&html, font_size).into_owned(),
            Replacement::ListItems => list_items(&html),
        };
    }
    static NEWLINE: OnceLock<Regex> = OnceLock::new();
    NEWLINE
        .get_or_init(|| compile(r"\r?\n"))
        .replace_all(&html, "<br>")
        .into_owned()
}

/// Renders a Workshop description as a standalone HTML document.
pub fn render(text: &str) -> String {
    if text.trim().is_empty() {
        return EMPTY_DESCRIPTION.to_string();
    }
    let body = convert(text);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="UTF-8">
<style>
body {{ font-family: Arial, sans-serif; margin: 10px; line-height: 1.4; word-wrap: break-word; }}
h1, h2, h3, h4, h5, h6 {{ margin-top: 20px; margin-bottom: 10px; color: #333; }}
hr {{ border: none; border-top: 1px solid #ccc; margin: 20px 0; }}
ul, ol {{ margin: 10px 0; padding-left: 30px; }}
li {{ margin: 5px 0; }}
a {{ color: #0066cc; }}
img {{ max-width: 100%; height: auto; display: block; margin: 5px 0; }}
pre {{ white-space: pre-wrap; word-wrap: break-word; }}
video, audio, iframe {{ max-width: 100%; margin: 10px 0; }}
</style>
</head>
<body>
{body}
</body>
</html>
"#
    )
}

/// Description with markup tags stripped, for the terminal detail pane.
pub fn to_plain_text(text: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| compile(r"\[/?[a-zA-Z0-9*]+(?:=[^\]]*)?\]"));
    tag.replace_all(text, "").replace("\r\n", "\n")
}
