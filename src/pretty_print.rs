use crate::error::{ErrorCategory, LispError};
use ariadne::{Label, Report, ReportKind, Source};

impl LispError {
    /// Renders this error as a caret-annotated excerpt of the program text
    /// carried by its span.
    pub fn pretty_print(&self) {
        let range = self.span.to_range();
        let label_message = match self.category() {
            ErrorCategory::Syntax => "the program text could not be read past this point",
            ErrorCategory::Scope => "this symbol is not defined in the current scope",
            ErrorCategory::Arity => "this call passes the wrong number of arguments",
            ErrorCategory::Type => "this value has the wrong type",
            ErrorCategory::Form => "this special form is malformed or incomplete",
        };

        let mut report = Report::build(ReportKind::Error, ("program", range.clone()))
            .with_message(self.kind.to_string())
            .with_label(Label::new(("program", range)).with_message(label_message));
        if let Some(suggestion) = &self.suggestion {
            report = report.with_help(format!("did you mean `{}`?", suggestion));
        }

        report
            .finish()
            .print(("program", Source::from(self.span.program.as_ref())))
            .unwrap();
    }
}
