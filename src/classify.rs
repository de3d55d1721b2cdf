//! Decides what a failure means for the loop: a diagnostic and carry on, a
//! normal quit, or termination with an error.

use crate::command::quote;
use crate::error::{CANCELLATION, Category, END_OF_INPUT, ReplError, category_of};
use crate::lexer::TokenizeError;

/// Why the loop is ending.
#[derive(Debug)]
pub(crate) enum Termination {
    Quit,
    Fatal(anyhow::Error),
}

/// Outcome of classifying one failure.
#[derive(Debug)]
pub(crate) struct Verdict {
    pub(crate) termination: Option<Termination>,
    pub(crate) lines: Vec<String>,
}

impl Verdict {
    fn report(lines: Vec<String>) -> Self {
        Self {
            termination: None,
            lines,
        }
    }

    fn end(termination: Termination, lines: Vec<String>) -> Self {
        Self {
            termination: Some(termination),
            lines,
        }
    }
}

/// Where a failure was raised.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Origin<'a> {
    /// In the loop itself, e.g. while reading input or writing the prompt.
    Loop,
    /// Inside the handler of the named command.
    Command(&'a str),
}

/// Stack-trace and fatal filters plus the rules that apply them.
#[derive(Debug, Default)]
pub(crate) struct Classifier {
    dump_stacktrace: bool,
    excluded: Vec<&'static Category>,
    fatal: Vec<&'static Category>,
}

impl Classifier {
    pub(crate) fn set_dump_stacktrace(&mut self, enabled: bool) {
        self.dump_stacktrace = enabled;
    }

    /// Errors of `category` raised by a command end the loop.
    pub(crate) fn add_fatal(&mut self, category: &'static Category) -> Result<(), ReplError> {
        check_category(category, &self.fatal)?;
        self.fatal.push(category);
        Ok(())
    }

    /// Errors of `category` are reported without their trace.
    pub(crate) fn add_excluded(&mut self, category: &'static Category) -> Result<(), ReplError> {
        check_category(category, &self.excluded)?;
        self.excluded.push(category);
        Ok(())
    }

    pub(crate) fn validate(&self) -> Result<(), ReplError> {
        if !self.dump_stacktrace && !self.excluded.is_empty() {
            return Err(ReplError::config(
                "stack trace filter must be empty if stacktrace dump is disabled",
            ));
        }
        Ok(())
    }

    pub(crate) fn classify(&self, err: anyhow::Error, origin: Origin<'_>) -> Verdict {
        if err.downcast_ref::<TokenizeError>().is_some() {
            return Verdict::report(vec![format!("(E) {err}")]);
        }
        let in_command = matches!(origin, Origin::Command(_));
        match err.downcast_ref::<ReplError>().cloned() {
            Some(ReplError::InvalidInput(message)) => {
                return Verdict::report(vec![format!("(E) {message}")]);
            }
            Some(ReplError::Quit) => return Verdict::end(Termination::Quit, Vec::new()),
            Some(ReplError::InputClosed) if !in_command => {
                return Verdict::end(Termination::Quit, Vec::new());
            }
            Some(ReplError::UnexpectedEof) if !in_command => {
                return Verdict::end(Termination::Fatal(err), Vec::new());
            }
            Some(ReplError::Cancelled(_)) if !in_command => {
                let line = format!("(E) Received cancellation: {err}");
                return Verdict::end(Termination::Fatal(err), vec![line]);
            }
            _ => {}
        }

        let Origin::Command(name) = origin else {
            let line = format!("(E) {err}");
            return Verdict::end(Termination::Fatal(err), vec![line]);
        };

        let prefix = format!("({}:E)", quote(name));
        let category = category_of(&err);
        let mut lines = vec![format!("{prefix} {err}")];
        if self.dump_stacktrace && !self.excluded.iter().any(|c| category.implies(c)) {
            let rendered = format!("{err:?}");
            lines.extend(
                rendered
                    .lines()
                    .skip(1)
                    .filter(|frame| !frame.trim().is_empty())
                    .map(|frame| format!("{prefix} {frame}")),
            );
        }
        if self.fatal.iter().any(|c| category.implies(c)) {
            Verdict::end(Termination::Fatal(err), lines)
        } else {
            Verdict::report(lines)
        }
    }
}

fn check_category(category: &Category, existing: &[&'static Category]) -> Result<(), ReplError> {
    if category.implies(&CANCELLATION) || category.implies(&END_OF_INPUT) {
        return Err(ReplError::config(format!(
            "category {category} has special handling"
        )));
    }
    if let Some(covering) = existing.iter().find(|c| category.implies(c)) {
        let via = if *covering == category {
            String::new()
        } else {
            format!(" via {covering}")
        };
        return Err(ReplError::config(format!(
            "category {category} already specified{via}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CategorizedError, ERROR, IO, PANIC};
    use anyhow::{Context, anyhow};

    static CUSTOM: Category = Category::derived("custom", &ERROR);

    #[test]
    fn test_user_errors_never_terminate() {
        let classifier = Classifier::default();
        let verdict = classifier.classify(ReplError::invalid_input("bad").into(), Origin::Command("x"));
        assert!(verdict.termination.is_none());
        assert_eq!(verdict.lines, ["(E) bad"]);

        let err = TokenizeError::DuplicateKeyword("k".into());
        let verdict = classifier.classify(err.into(), Origin::Loop);
        assert_eq!(verdict.lines, ["(E) key k specified twice"]);
    }

    #[test]
    fn test_end_of_input_outside_command() {
        let classifier = Classifier::default();
        let verdict = classifier.classify(ReplError::InputClosed.into(), Origin::Loop);
        assert!(matches!(verdict.termination, Some(Termination::Quit)));
        assert!(verdict.lines.is_empty());

        let verdict = classifier.classify(ReplError::UnexpectedEof.into(), Origin::Loop);
        assert!(matches!(verdict.termination, Some(Termination::Fatal(_))));
        assert!(verdict.lines.is_empty());
    }

    #[test]
    fn test_input_closed_inside_command_is_reported() {
        let verdict = Classifier::default().classify(ReplError::InputClosed.into(), Origin::Command("read"));
        assert!(verdict.termination.is_none());
        assert_eq!(verdict.lines, ["(read:E) input closed"]);
    }

    #[test]
    fn test_cancellation_outside_command() {
        let verdict = Classifier::default().classify(
            ReplError::cancelled("IO exception: broken pipe").into(),
            Origin::Loop,
        );
        assert!(matches!(verdict.termination, Some(Termination::Fatal(_))));
        assert_eq!(verdict.lines, ["(E) Received cancellation: IO exception: broken pipe"]);
    }

    #[test]
    fn test_other_errors_outside_command_are_fatal() {
        let mut classifier = Classifier::default();
        classifier.set_dump_stacktrace(true);
        let err = Err::<(), _>(anyhow!("disk gone")).context("writing prompt").unwrap_err();
        let verdict = classifier.classify(err, Origin::Loop);
        assert_eq!(verdict.lines, ["(E) writing prompt"]);
        assert!(matches!(verdict.termination, Some(Termination::Fatal(_))));
    }

    #[test]
    fn test_command_error_reported_with_quoted_name() {
        let verdict = Classifier::default().classify(anyhow!("Throwing!"), Origin::Command("two words"));
        assert!(verdict.termination.is_none());
        assert_eq!(verdict.lines, ["(\"two words\":E) Throwing!"]);
    }

    #[test]
    fn test_fatal_category_terminates() {
        let mut classifier = Classifier::default();
        classifier.add_fatal(&CUSTOM).unwrap();

        let err: anyhow::Error = CategorizedError::new(&CUSTOM, anyhow!("stop")).into();
        let verdict = classifier.classify(err, Origin::Command("a"));
        assert_eq!(verdict.lines, ["(a:E) stop"]);
        let Some(Termination::Fatal(err)) = verdict.termination else {
            panic!("expected fatal termination");
        };
        assert!(err.downcast_ref::<CategorizedError>().is_some());

        let verdict = classifier.classify(anyhow!("other"), Origin::Command("a"));
        assert!(verdict.termination.is_none());
    }

    #[test]
    fn test_stacktrace_lines_follow_filters() {
        let mut classifier = Classifier::default();
        classifier.set_dump_stacktrace(true);

        let failing = || Err::<(), _>(anyhow!("root cause")).context("outer").unwrap_err();
        let verdict = classifier.classify(failing(), Origin::Command("a"));
        assert_eq!(verdict.lines[0], "(a:E) outer");
        assert!(verdict.lines.iter().any(|l| l == "(a:E) Caused by:"));
        assert!(verdict.lines.iter().any(|l| l.starts_with("(a:E)") && l.contains("root cause")));

        classifier.add_excluded(&ERROR).unwrap();
        let verdict = classifier.classify(failing(), Origin::Command("a"));
        assert_eq!(verdict.lines, ["(a:E) outer"]);
    }

    #[test]
    fn test_category_validation() {
        let mut classifier = Classifier::default();
        assert_eq!(
            classifier.add_fatal(&CANCELLATION).unwrap_err().to_string(),
            "category cancellation has special handling"
        );
        assert_eq!(
            classifier.add_excluded(&END_OF_INPUT).unwrap_err().to_string(),
            "category end-of-input has special handling"
        );

        classifier.add_fatal(&IO).unwrap();
        assert_eq!(
            classifier.add_fatal(&IO).unwrap_err().to_string(),
            "category io already specified"
        );
        classifier.add_fatal(&ERROR).unwrap();
        assert_eq!(
            classifier.add_fatal(&PANIC).unwrap_err().to_string(),
            "category panic already specified via error"
        );
    }

    #[test]
    fn test_filter_requires_dumping() {
        let mut classifier = Classifier::default();
        classifier.add_excluded(&IO).unwrap();
        assert_eq!(
            classifier.validate().unwrap_err().to_string(),
            "stack trace filter must be empty if stacktrace dump is disabled"
        );
        classifier.set_dump_stacktrace(true);
        assert!(classifier.validate().is_ok());
    }
}
