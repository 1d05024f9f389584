//! Rendering of compiler errors against their source text.
//!
//! Each site is shown with a line-number gutter and a few lines of
//! surrounding context. With color on, the span itself is painted in the
//! site's color; otherwise a row of carets marks it. [`diagnostic`] gives the
//! same error as a codespan diagnostic for hosts that render their own.

use crate::config::ReportOptions;
use crate::error::{CompilerError, Site, SiteColor};
use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::{Files, SimpleFile};
use codespan_reporting::term;
use std::io::{self, Write};
use termcolor::{Ansi, Color, ColorSpec, NoColor, WriteColor};

type SourceFile<'a> = SimpleFile<&'static str, &'a str>;

fn site_spec(color: SiteColor) -> ColorSpec {
    let color = match color {
        SiteColor::Red => Color::Red,
        SiteColor::Green => Color::Green,
        SiteColor::Cyan => Color::Cyan,
        SiteColor::Yellow => Color::Yellow,
    };
    let mut spec = ColorSpec::new();
    spec.set_fg(Some(color)).set_bold(true);
    spec
}

/// Byte range of line `index`, without its newline.
fn line_bounds(file: &SourceFile, index: usize) -> Option<(usize, usize)> {
    let range = file.line_range((), index).ok()?;
    let text = &file.source()[range.clone()];
    Some((range.start, range.start + text.strip_suffix('\n').unwrap_or(text).len()))
}

/// 1-based `(line, column)` of a byte offset.
pub fn line_col(source: &str, offset: usize) -> (usize, usize) {
    let file = SimpleFile::new("", source);
    file.location((), offset.min(source.len()))
        .map(|location| (location.line_number, location.column_number))
        .unwrap_or((1, 1))
}

/// Renders `err` and its causal chain, then every site of the root error.
pub fn render(source: &str, err: &CompilerError, options: &ReportOptions) -> String {
    let bytes = if options.color {
        let mut out = Ansi::new(Vec::new());
        let _ = write_report(&mut out, source, err, options.context_lines);
        out.into_inner()
    } else {
        let mut out = NoColor::new(Vec::new());
        let _ = write_report(&mut out, source, err, options.context_lines);
        out.into_inner()
    };
    String::from_utf8_lossy(&bytes).into_owned()
}

fn write_report<W: WriteColor>(out: &mut W, source: &str, err: &CompilerError, context_lines: usize) -> io::Result<()> {
    let mut current = err;
    while let CompilerError::Context { message, source: inner } = current {
        writeln!(out, "{}", message)?;
        current = &**inner;
    }
    out.set_color(ColorSpec::new().set_bold(true))?;
    write!(out, "{}", current)?;
    out.reset()?;
    writeln!(out)?;

    let file = SimpleFile::new("", source);
    for site in current.sites() {
        write_site(out, &file, site, context_lines)?;
    }
    Ok(())
}

fn write_site<W: WriteColor>(out: &mut W, file: &SourceFile, site: &Site, context_lines: usize) -> io::Result<()> {
    let source = *file.source();
    let start = site.span.start.min(source.len());
    let end = site.span.end.clamp(start, source.len());
    let line_of = |offset: usize| file.line_index((), offset).unwrap_or(0);
    let first = line_of(start);
    let last = line_of(end.saturating_sub(1).max(start));
    let (line, column) = line_col(source, start);
    writeln!(out, "  --> {}:{}", line, column)?;

    let from = first.saturating_sub(context_lines);
    let to = (last + context_lines).min(line_of(source.len()));
    let gutter = (to + 1).to_string().len();

    for index in from..=to {
        let Some((line_start, line_end)) = line_bounds(file, index) else {
            break;
        };
        let text = &source[line_start..line_end];
        write!(out, "{:>width$} | ", index + 1, width = gutter)?;

        // Portion of the site on this line.
        let hl_start = start.max(line_start);
        let hl_end = end.min(line_end);
        let highlighted = index >= first && index <= last && hl_start <= hl_end;
        if !highlighted {
            writeln!(out, "{}", text)?;
            continue;
        }
        let (before, marked, after) = (
            &source[line_start..hl_start],
            &source[hl_start..hl_end],
            &source[hl_end..line_end],
        );
        if out.supports_color() {
            write!(out, "{}", before)?;
            out.set_color(&site_spec(site.color))?;
            write!(out, "{}", marked)?;
            out.reset()?;
            writeln!(out, "{}", after)?;
        } else {
            writeln!(out, "{}", text)?;
            let carets = marked.chars().count().max(1);
            writeln!(
                out,
                "{:>width$} | {}{}",
                "",
                " ".repeat(before.chars().count()),
                "^".repeat(carets),
                width = gutter
            )?;
        }
    }
    Ok(())
}

/// `err` as a codespan diagnostic over file id `()`. Red sites become
/// primary labels, the rest secondary; the context chain becomes notes.
pub fn diagnostic(err: &CompilerError) -> Diagnostic<()> {
    let root = err.root();
    let labels = root
        .sites()
        .iter()
        .map(|site| {
            let range = site.span.start..site.span.end;
            match site.color {
                SiteColor::Red => Label::primary((), range),
                _ => Label::secondary((), range),
            }
        })
        .collect();
    let mut notes = Vec::new();
    let mut current = err;
    while let CompilerError::Context { message, source } = current {
        notes.push(message.clone());
        current = &**source;
    }
    Diagnostic::error().with_message(root.to_string()).with_labels(labels).with_notes(notes)
}

/// Renders [`diagnostic`] with codespan's own layout, without color.
pub fn emit_to_string(source: &str, path: &str, err: &CompilerError) -> String {
    let file = SimpleFile::new(path, source);
    let config = term::Config::default();
    let mut out = NoColor::new(Vec::new());
    if term::emit(&mut out, &config, &file, &diagnostic(err)).is_err() {
        return err.to_string();
    }
    String::from_utf8_lossy(&out.into_inner()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Span;
    use crate::error::ResultExt;
    use codespan_reporting::diagnostic::LabelStyle;

    fn plain(context_lines: usize) -> ReportOptions {
        ReportOptions { context_lines, color: false }
    }

    #[test]
    fn test_line_col() {
        let source = "ab\ncd\n\nef";
        assert_eq!(line_col(source, 0), (1, 1));
        assert_eq!(line_col(source, 4), (2, 2));
        assert_eq!(line_col(source, 7), (4, 1));
    }

    #[test]
    fn test_plain_carets() {
        let source = "int main() {\n    1 = 2;\n}\n";
        let err = CompilerError::TypeError(
            "Left side of '=' must be an lvalue.".to_string(),
            vec![Site::red(Span::new(17, 18))],
        );
        let text = render(source, &err, &plain(0));
        assert_eq!(
            text,
            "Type error: Left side of '=' must be an lvalue.\n  --> 2:5\n2 |     1 = 2;\n  |     ^\n"
        );
    }

    #[test]
    fn test_context_lines_and_chain() {
        let source = "a\nb\nc\nd\ne\n";
        let inner: crate::error::Result<()> =
            Err(CompilerError::CodegenError("bad".to_string(), vec![Site::red(Span::new(4, 5))]));
        let err = inner.context("In function 'main'").unwrap_err();
        let text = render(source, &err, &plain(1));
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "In function 'main'");
        assert_eq!(lines[1], "SPIR-V generation error: bad");
        assert_eq!(lines[2], "  --> 3:1");
        assert_eq!(&lines[3..], &["2 | b", "3 | c", "  | ^", "4 | d"]);
    }

    #[test]
    fn test_color_paints_every_site() {
        let source = "x y";
        let err = CompilerError::TypeError(
            "dup".to_string(),
            vec![Site::green(Span::new(0, 1)), Site::red(Span::new(2, 3))],
        );
        let text = render(source, &err, &ReportOptions::default());
        assert!(text.contains("1 | \x1b[0m\x1b[1m\x1b[32mx\x1b[0m y\n"), "{:?}", text);
        assert!(text.contains("1 | x \x1b[0m\x1b[1m\x1b[31my\x1b[0m\n"), "{:?}", text);
    }

    #[test]
    fn test_diagnostic_labels_follow_sites() {
        let inner: crate::error::Result<()> = Err(CompilerError::TypeError(
            "Metal buffer index (0) is already used.".to_string(),
            vec![Site::green(Span::new(0, 4)), Site::red(Span::new(10, 14))],
        ));
        let err = inner.context("In function 'main'").unwrap_err();
        let diagnostic = diagnostic(&err);
        assert_eq!(diagnostic.message, "Type error: Metal buffer index (0) is already used.");
        assert_eq!(diagnostic.labels.len(), 2);
        assert_eq!(diagnostic.labels[0].style, LabelStyle::Secondary);
        assert_eq!(diagnostic.labels[0].range, 0..4);
        assert_eq!(diagnostic.labels[1].style, LabelStyle::Primary);
        assert_eq!(diagnostic.labels[1].range, 10..14);
        assert_eq!(diagnostic.notes, vec!["In function 'main'".to_string()]);
    }

    #[test]
    fn test_emit_to_string_names_the_location() {
        let source = "int main() {\n    1 = 2;\n}\n";
        let err = CompilerError::TypeError(
            "Left side of '=' must be an lvalue.".to_string(),
            vec![Site::red(Span::new(17, 18))],
        );
        let text = emit_to_string(source, "shader", &err);
        assert!(text.contains("Left side of '=' must be an lvalue."), "{}", text);
        assert!(text.contains("shader:2:5"), "{}", text);
        assert!(text.contains("1 = 2;"), "{}", text);
    }
}
