use ariadne::{Color, Fmt, Label, Report, ReportKind, Source};

/// A range of character offsets into the source text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn single(pos: usize) -> Self {
        Self {
            start: pos,
            end: pos + 1,
        }
    }

    /// Smallest span covering both `self` and `other`.
    pub fn to(self, other: Span) -> Span {
        Span::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// Which stage gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LexError,
    ParseError,
    RuntimeError,
}

impl ErrorKind {
    fn title(self) -> &'static str {
        match self {
            ErrorKind::LexError => "Lexical Error",
            ErrorKind::ParseError => "Parse Error",
            ErrorKind::RuntimeError => "Runtime Error",
        }
    }

    fn color(self) -> Color {
        match self {
            ErrorKind::LexError => Color::Red,
            ErrorKind::ParseError => Color::Yellow,
            ErrorKind::RuntimeError => Color::Magenta,
        }
    }
}

/// A fatal diagnostic. Lexing, parsing or execution stops at the first one.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct CmmError {
    pub kind: ErrorKind,
    pub span: Span,
    pub message: String,
    pub help: Option<String>,
}

impl CmmError {
    pub fn new(kind: ErrorKind, span: Span, message: String) -> Self {
        Self {
            kind,
            span,
            message,
            help: None,
        }
    }

    pub fn with_help(mut self, help: String) -> Self {
        self.help = Some(help);
        self
    }

    pub fn lex_error(span: Span, message: String) -> Self {
        Self::new(ErrorKind::LexError, span, message)
    }

    pub fn parse_error(span: Span, message: String) -> Self {
        Self::new(ErrorKind::ParseError, span, message)
    }

    pub fn parse_error_with_help(span: Span, message: String, help: String) -> Self {
        Self::parse_error(span, message).with_help(help)
    }

    pub fn runtime_error(span: Span, message: String) -> Self {
        Self::new(ErrorKind::RuntimeError, span, message)
    }

    pub fn runtime_error_with_help(span: Span, message: String, help: String) -> Self {
        Self::runtime_error(span, message).with_help(help)
    }

    /// Render to stderr against `source`.
    pub fn report(&self, source: &str, filename: Option<&str>) {
        render(
            ReportKind::Error,
            self.kind.title(),
            self.kind.color(),
            self.span,
            &self.message,
            self.help.as_deref(),
            source,
            filename,
        );
    }
}

/// A non-fatal diagnostic; whatever produced it carries on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct Warning {
    pub span: Span,
    pub message: String,
}

impl Warning {
    pub fn new(span: Span, message: impl Into<String>) -> Self {
        Self {
            span,
            message: message.into(),
        }
    }

    pub fn report(&self, source: &str, filename: Option<&str>) {
        render(
            ReportKind::Warning,
            "Warning",
            Color::Yellow,
            self.span,
            &self.message,
            None,
            source,
            filename,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn render(
    kind: ReportKind,
    title: &str,
    color: Color,
    span: Span,
    message: &str,
    help: Option<&str>,
    source: &str,
    filename: Option<&str>,
) {
    let filename = filename.unwrap_or("<input>");

    let mut report = Report::build(kind, filename, span.start)
        .with_message(format!("{}: {}", title.fg(color), message))
        .with_label(
            Label::new((filename, span.start..span.end))
                .with_message(message)
                .with_color(color),
        );
    if let Some(help) = help {
        report = report.with_note(format!("{}: {}", "help".fg(Color::Cyan), help));
    }

    if let Err(err) = report.finish().eprint((filename, Source::from(source))) {
        tracing::error!(%err, "failed to render diagnostic");
    }
}
