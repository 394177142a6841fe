//! Tag discovery from a remote directory index page

/// Extract candidate tags from an HTML directory listing
///
/// Only lines inside `<body>` are considered. Each line beginning with
/// `<a href="..."` contributes the first path segment of its target; the
/// parent link `..` is skipped. Listing order is preserved.
#[must_use]
pub fn parse_tag_index(html: &str) -> Vec<String> {
    let mut tags = Vec::new();
    let mut in_body = false;

    for line in html.lines() {
        if line.contains("<body>") {
            in_body = true;
        }
        if line.contains("</body>") {
            break;
        }
        if !in_body || !line.starts_with("<a href=") {
            continue;
        }

        let Some(target) = line.split('"').nth(1) else {
            continue;
        };
        let tag = target.split('/').next().unwrap_or_default();
        if tag != ".." && !tag.is_empty() {
            tags.push(tag.to_string());
        }
    }

    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    const INDEX: &str = r#"<html>
<head><title>Index of /manifest/tags/</title></head>
<a href="ignored/">outside body</a>
<body>
<h1>Index of /manifest/tags/</h1><hr><pre>
<a href="../">../</a>
<a href="V2022.0/">V2022.0/</a>                                  01-Feb-2022 14:22       -
<a href="V2022.1/">V2022.1/</a>                                  12-Jun-2022 09:03       -
<a href="T2023.3/">T2023.3/</a>                                  30-Nov-2023 17:45       -
</pre><hr>
</body>
<a href="after/">after body</a>
</html>
"#;

    #[test]
    fn test_parse_index() {
        assert_eq!(parse_tag_index(INDEX), vec!["V2022.0", "V2022.1", "T2023.3"]);
    }

    #[test]
    fn test_no_body_no_tags() {
        assert!(parse_tag_index("<a href=\"x/\">x</a>").is_empty());
        assert!(parse_tag_index("").is_empty());
    }
}
