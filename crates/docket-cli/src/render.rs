//! Error rendering for scripts typed at the shell

use ariadne::{Color, Config, Label, Report, ReportKind, Source};
use docket_eval::EvalError;

const SOURCE_ID: &str = "<shell>";

/// Render an evaluation error against its source.
///
/// Errors with a span get an ariadne report pointing into the script;
/// timeouts render as a single line.
pub fn render_eval_error(source: &str, err: &EvalError, color: bool) -> String {
    let Some(span) = err.span() else {
        return format!("error: {}", err);
    };
    let start = span.start.min(source.len());
    let end = span.end.clamp(start, source.len());
    let label = match err {
        EvalError::Parse(_) => "syntax error here",
        _ => "raised here",
    };

    let mut out = Vec::new();
    let written = Report::build(ReportKind::Error, SOURCE_ID, start)
        .with_config(Config::default().with_color(color))
        .with_message(err.to_string())
        .with_label(
            Label::new((SOURCE_ID, start..end))
                .with_message(label)
                .with_color(Color::Red),
        )
        .finish()
        .write((SOURCE_ID, Source::from(source)), &mut out);
    match written {
        Ok(()) => String::from_utf8_lossy(&out).into_owned(),
        Err(_) => format!("error: {}", err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_points_at_source() {
        let source = "var x = ;";
        let err = EvalError::from(docket_parser_error(source));
        let rendered = render_eval_error(source, &err, false);
        assert!(rendered.contains("parse error"));
        assert!(rendered.contains("var x = ;"));
        assert!(rendered.contains("syntax error here"));
    }

    #[test]
    fn test_timeout_renders_one_line() {
        let rendered = render_eval_error("while (true) {}", &EvalError::Timeout { ms: 5 }, false);
        assert_eq!(rendered, "error: script timed out after 5ms");
    }

    fn docket_parser_error(source: &str) -> docket_parser::ParseError {
        match docket_parser::parse(source) {
            Err(err) => err,
            Ok(_) => panic!("expected {source:?} to fail"),
        }
    }
}
