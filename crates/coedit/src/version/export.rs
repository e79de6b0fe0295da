use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::Version;
use crate::CoeditError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[serde(rename = "md")]
    Markdown,
    #[serde(rename = "txt")]
    PlainText,
    Html,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "md",
            ExportFormat::PlainText => "txt",
            ExportFormat::Html => "html",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::PlainText => "text/plain",
            ExportFormat::Html => "text/html",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = CoeditError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "md" | "markdown" => Ok(ExportFormat::Markdown),
            "txt" | "text" => Ok(ExportFormat::PlainText),
            "html" => Ok(ExportFormat::Html),
            other => Err(CoeditError::validation(format!(
                "unknown export format '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFile {
    pub filename: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Render one version as a downloadable file
pub fn export(version: &Version, format: ExportFormat) -> ExportedFile {
    let title = version.title.trim();
    let stem = if title.is_empty() { "document" } else { title };
    let filename = format!("{}_v{}.{}", stem, version.id, format.extension());

    let bytes = match format {
        ExportFormat::Markdown | ExportFormat::PlainText => version.content.clone().into_bytes(),
        ExportFormat::Html => render_html(version).into_bytes(),
    };

    ExportedFile {
        filename,
        mime_type: format.mime_type(),
        bytes,
    }
}

fn render_html(version: &Version) -> String {
    let title = version.title.trim();
    let title = escape_html(if title.is_empty() { "Document" } else { title });
    let created = version.created_at.format("%Y-%m-%d %H:%M:%S UTC");

    format!(
        r#"<!DOCTYPE html>
<html>
<head>
  <meta charset="UTF-8">
  <title>{title}</title>
  <style>
    body {{ font-family: Arial, sans-serif; max-width: 900px; margin: 40px; line-height: 1.6; }}
    pre {{ background: #f4f4f4; padding: 10px; overflow-x: auto; white-space: pre-wrap; }}
  </style>
</head>
<body>
  <h1>{title}</h1>
  <p><em>Created: {created}</em></p>
  <hr>
  <pre>{content}</pre>
</body>
</html>
"#,
        title = title,
        created = created,
        content = escape_html(&version.content),
    )
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::{VersionDraft, VersionLog};
    use rstest::rstest;

    fn version(title: &str, content: &str) -> Version {
        let mut log = VersionLog::new();
        log.append("doc", VersionDraft::new("u1", "Ada", content, title, "Auto-save"))
    }

    #[rstest]
    #[case(ExportFormat::Markdown, "md", "text/markdown")]
    #[case(ExportFormat::PlainText, "txt", "text/plain")]
    fn test_raw_formats(
        #[case] format: ExportFormat,
        #[case] extension: &str,
        #[case] mime_type: &str,
    ) {
        let v = version("Notes", "# Heading\nbody");
        let file = export(&v, format);

        assert_eq!(file.filename, format!("Notes_v{}.{}", v.id, extension));
        assert_eq!(file.mime_type, mime_type);
        assert_eq!(file.bytes, b"# Heading\nbody");
    }

    #[test]
    fn test_html_wraps_and_escapes() {
        let v = version("A <b> title", "1 < 2 & \"quoted\"");
        let file = export(&v, ExportFormat::Html);
        let html = String::from_utf8(file.bytes).unwrap();

        assert!(file.filename.ends_with(".html"));
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>A &lt;b&gt; title</title>"));
        assert!(html.contains("<pre>1 &lt; 2 &amp; &quot;quoted&quot;</pre>"));
        assert!(html.contains("Created: "));
    }

    #[test]
    fn test_empty_title_falls_back() {
        let v = version("  ", "text");
        assert_eq!(
            export(&v, ExportFormat::PlainText).filename,
            format!("document_v{}.txt", v.id)
        );

        let html = String::from_utf8(export(&v, ExportFormat::Html).bytes).unwrap();
        assert!(html.contains("<h1>Document</h1>"));
    }

    #[rstest]
    #[case("md", ExportFormat::Markdown)]
    #[case("TXT", ExportFormat::PlainText)]
    #[case(" html ", ExportFormat::Html)]
    fn test_parse_format(#[case] input: &str, #[case] expected: ExportFormat) {
        assert_eq!(input.parse::<ExportFormat>().unwrap(), expected);
    }

    #[test]
    fn test_parse_unknown_format() {
        assert!(matches!(
            "pdf".parse::<ExportFormat>(),
            Err(CoeditError::Validation { .. })
        ));
    }
}
