//! Splitting a definition template into its sections
//!
//! A template is a YAML-shaped Jinja document. Its top-level `parameter:`
//! section declares the inputs; everything else is the render body. The
//! declaration lines are blanked out of the body rather than removed so
//! that line numbers in render errors still point into the original text.

/// Top-level key introducing the declaration block
pub const PARAMETER_KEY: &str = "parameter";

/// A template split into declaration block and render body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateParts {
    /// The `parameter:` block (header line included), if the template has one
    pub parameter_block: Option<String>,

    /// 1-based line of the `parameter:` header in the original template
    pub parameter_line: usize,

    /// Render body with the declaration lines blanked out
    pub body: String,
}

/// Split a template into its declaration block and render body
///
/// The block starts at a zero-indent `parameter:` line and runs until the
/// first non-empty, zero-indent line that is not a comment.
pub fn split_template(template: &str) -> TemplateParts {
    let lines: Vec<&str> = template.split('\n').collect();

    let Some(start) = lines.iter().position(|line| is_parameter_header(line)) else {
        return TemplateParts {
            parameter_block: None,
            parameter_line: 0,
            body: template.to_string(),
        };
    };

    let mut end = start + 1;
    while end < lines.len() {
        let line = lines[end];
        let trimmed = line.trim();
        let top_level = !line.starts_with(' ') && !line.starts_with('\t');
        if top_level && !trimmed.is_empty() && !is_comment(trimmed) {
            break;
        }
        end += 1;
    }

    // Trailing blank and comment lines belong to whatever follows
    while end > start + 1 {
        let trimmed = lines[end - 1].trim();
        let top_level = !lines[end - 1].starts_with(' ') && !lines[end - 1].starts_with('\t');
        if trimmed.is_empty() || (top_level && is_comment(trimmed)) {
            end -= 1;
        } else {
            break;
        }
    }

    let block = lines[start..end].join("\n");
    let body = lines
        .iter()
        .enumerate()
        .map(|(i, line)| if (start..end).contains(&i) { "" } else { line })
        .collect::<Vec<_>>()
        .join("\n");

    TemplateParts {
        parameter_block: Some(block),
        parameter_line: start + 1,
        body,
    }
}

fn is_parameter_header(line: &str) -> bool {
    line.strip_prefix(PARAMETER_KEY)
        .and_then(|rest| rest.trim_start().strip_prefix(':'))
        .is_some()
}

pub(crate) fn is_comment(trimmed: &str) -> bool {
    trimmed.starts_with('#') || trimmed.starts_with("//")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = "parameter:
  host: string
  port: *2181 | int

output:
  kind: ConfigMap";

    #[test]
    fn test_split_keeps_line_numbers() {
        let parts = split_template(TEMPLATE);

        assert_eq!(parts.parameter_line, 1);
        assert_eq!(
            parts.parameter_block.as_deref(),
            Some("parameter:\n  host: string\n  port: *2181 | int")
        );
        assert_eq!(parts.body.lines().count(), TEMPLATE.lines().count());
        assert_eq!(parts.body.lines().nth(4), Some("output:"));
        assert!(!parts.body.contains("host"));
    }

    #[test]
    fn test_split_without_parameters() {
        let parts = split_template("output:\n  kind: ConfigMap\n");
        assert!(parts.parameter_block.is_none());
        assert_eq!(parts.body, "output:\n  kind: ConfigMap\n");
    }

    #[test]
    fn test_block_in_the_middle() {
        let template = "output:\n  kind: ConfigMap\nparameter: {}\n# outputs follow\noutputs: {}\n";
        let parts = split_template(template);

        assert_eq!(parts.parameter_line, 3);
        assert_eq!(parts.parameter_block.as_deref(), Some("parameter: {}"));
        assert!(parts.body.contains("# outputs follow"));
        assert!(parts.body.contains("outputs: {}"));
    }

    #[test]
    fn test_similar_keys_are_not_headers() {
        let parts = split_template("parameters:\n  a: 1\n");
        assert!(parts.parameter_block.is_none());
    }
}
