//! Static scan rejecting Helm's `lookup` template function (spec §4.7 step
//! 3: chart rendering must be side-effect free, so a template that reads
//! live cluster state during `helm template` would silently diverge from
//! what later gets installed). Ignores Go-template comments
//! (`{{/* ... */}}`) and quoted-string literals so a chart that merely
//! mentions "lookup" in prose or a values comment isn't rejected.

/// Returns the 1-based line numbers of every live `lookup(...)` call found
/// in `template_source`.
pub fn find_lookup_calls(template_source: &str) -> Vec<usize> {
    let mut hits = Vec::new();
    let mut in_comment = false;

    for (i, line) in template_source.lines().enumerate() {
        let mut chars = line.char_indices().peekable();
        let mut in_quote: Option<char> = None;

        while let Some((idx, c)) = chars.next() {
            if in_comment {
                if line[idx..].starts_with("*/}}") {
                    in_comment = false;
                    // skip past the closer without reinspecting its chars
                    for _ in 0..3 {
                        chars.next();
                    }
                }
                continue;
            }
            match in_quote {
                Some(q) if c == q => in_quote = None,
                Some(_) => continue,
                None => {}
            }
            if in_quote.is_none() && (c == '"' || c == '\'') {
                in_quote = Some(c);
                continue;
            }
            if line[idx..].starts_with("{{/*") {
                in_comment = true;
                continue;
            }
            if line[idx..].starts_with("lookup") {
                let before_ok = idx == 0 || !line.as_bytes()[idx - 1].is_ascii_alphanumeric();
                let after = &line[idx + "lookup".len()..];
                // Helm's `lookup` is a Go-template function, always called without
                // parentheses (`lookup "v1" "Service" ns name`), so the only thing
                // distinguishing a real call from an identifier like `lookupTable`
                // is a word boundary after the keyword.
                let after_ok = after
                    .chars()
                    .next()
                    .map_or(true, |c| !c.is_ascii_alphanumeric() && c != '_');
                if before_ok && after_ok {
                    hits.push(i + 1);
                }
            }
        }
    }

    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_bare_lookup_call() {
        let src = "{{ $svc := lookup \"v1\" \"Service\" .Release.Namespace \"x\" }}";
        assert_eq!(find_lookup_calls(src), vec![1]);
    }

    #[test]
    fn ignores_lookup_inside_template_comment() {
        let src = "{{/* lookup(...) is not allowed here */}}\nreplicas: 1";
        assert!(find_lookup_calls(src).is_empty());
    }

    #[test]
    fn ignores_lookup_inside_quoted_string() {
        let src = "message: \"do not call lookup(...) in values\"";
        assert!(find_lookup_calls(src).is_empty());
    }

    #[test]
    fn ignores_identifier_with_lookup_as_substring() {
        let src = "{{ .Values.lookupTable }}";
        assert!(find_lookup_calls(src).is_empty());
    }
}
