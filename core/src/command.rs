//! Command line construction for triggered actions.

use crate::rule::{Listener, TriggerBy};
use crate::state::TopicState;
use crate::value::FieldValue;
use std::fmt;

/// A fully resolved command: the rule's template tokens plus the trigger argument.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandLine {
    program: Option<String>,
    args: Vec<String>,
}

impl CommandLine {
    /// Build the command for a listener from the topic's current snapshot.
    ///
    /// # Examples
    ///
    /// ```
    /// use mq_listener_core::command::CommandLine;
    /// use mq_listener_core::environment::SystemClock;
    /// use mq_listener_core::rule::{Listener, TriggerBy, TriggerRule};
    /// use mq_listener_core::schema::ValueSchema;
    /// use mq_listener_core::state::TopicState;
    /// use std::sync::Arc;
    ///
    /// let rule = TriggerRule {
    ///     trigger_by: TriggerBy::Key,
    ///     cmd: "notify --topic devices".to_string(),
    ///     ..TriggerRule::default()
    /// };
    /// let listener = Arc::new(Listener::new("devices", rule, ValueSchema::default()));
    /// let mut state = TopicState::new(Arc::clone(&listener), &SystemClock);
    /// let _ = state.update("device-7", b"");
    ///
    /// let command = CommandLine::build(&listener, &state);
    /// assert_eq!(command.to_string(), "notify --topic devices device-7");
    /// ```
    #[must_use]
    pub fn build(listener: &Listener, state: &TopicState) -> Self {
        let mut tokens = listener.rule().command_tokens().into_iter();
        let program = tokens.next();
        let mut args: Vec<String> = tokens.collect();
        args.push(trigger_argument(listener, state));
        Self { program, args }
    }

    /// Create a command line from a program and its arguments.
    #[must_use]
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program: String = program.into();
        Self {
            program: (!program.is_empty()).then_some(program),
            args,
        }
    }

    /// The program to run, `None` if the template was empty.
    #[must_use]
    pub fn program(&self) -> Option<&str> {
        self.program.as_deref()
    }

    /// Arguments after the program; the last one is the trigger argument.
    #[must_use]
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The full argv.
    #[must_use]
    pub fn argv(&self) -> Vec<&str> {
        self.program
            .iter()
            .chain(self.args.iter())
            .map(String::as_str)
            .collect()
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.argv().join(" "))
    }
}

/// The argument appended to the command template.
///
/// Key-based rules pass the current key. Everything else passes the current
/// value of the configured field, or an empty string when no field is set.
#[must_use]
pub fn trigger_argument(listener: &Listener, state: &TopicState) -> String {
    if listener.rule().trigger_by == TriggerBy::Key {
        return state.current_key().to_string();
    }

    listener
        .rule()
        .field_name()
        .and_then(|name| state.current_field(name))
        .map(FieldValue::to_argument)
        .unwrap_or_default()
}
