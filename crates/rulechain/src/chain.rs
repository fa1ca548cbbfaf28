//! The per-field execution core.
//!
//! A [`ValidationChain`] runs one field's compiled pipeline against one record.
//! Each link receives a [`ChainControl`] and must finish with exactly one
//! terminal call: [`next`](ChainControl::next), [`stop`](ChainControl::stop),
//! or [`invalid`](ChainControl::invalid). It may rewrite the working value with
//! [`update`](ChainControl::update) any number of times before that. A link
//! may await external work before its terminal call; the chain does not move
//! on until the link's future completes.
//!
//! The chain is driven by a loop rather than by links calling each other, so a
//! long run of synchronous links does not grow the stack.

use crate::record::Record;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One executable link of a field's pipeline.
#[async_trait]
pub trait CompiledValidator: Send + Sync {
    /// Inspect `value` (the chain's current working value) and finish with one
    /// terminal call on `chain`.
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl);

    /// Name of the rule this link was compiled from.
    fn rule_name(&self) -> &str;
}

/// A compiled pipeline: shared, immutable, in declaration order.
pub type Pipeline = Arc<[Arc<dyn CompiledValidator>]>;

/// Failures recorded so far in one whole-record run.
///
/// Shared by every chain of the run so that guard rules (`if_valid`) can see
/// which sibling fields have already failed.
#[derive(Debug, Clone, Default)]
pub struct RunState {
    failures: Arc<Mutex<HashMap<String, String>>>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `field` has already ended invalid in this run.
    pub fn has_failed(&self, field: &str) -> bool {
        self.failures
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(field)
    }

    pub(crate) fn record_failure(&self, field: &str, message: &str) {
        let mut failures = self.failures.lock().unwrap_or_else(|e| e.into_inner());
        failures
            .entry(field.to_string())
            .or_insert_with(|| message.to_string());
    }
}

/// The terminal action a link chose.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Next,
    Stop,
    Invalid(String),
}

/// The control surface handed to a link while it runs.
#[derive(Debug)]
pub struct ChainControl {
    field: String,
    rule: String,
    run: RunState,
    state: ChainState,
    update: Option<Value>,
    terminal: Option<Terminal>,
}

impl ChainControl {
    fn new(field: &str, rule: &str, run: RunState, state: ChainState) -> Self {
        Self {
            field: field.to_string(),
            rule: rule.to_string(),
            run,
            state,
            update: None,
            terminal: None,
        }
    }

    /// Field this chain validates.
    pub fn field(&self) -> &str {
        &self.field
    }

    /// The run this chain belongs to.
    pub fn run(&self) -> &RunState {
        &self.run
    }

    /// State of the chain running this link.
    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Replace the working value seen by later links.
    pub fn update(&mut self, value: Value) -> &mut Self {
        if self.terminal.is_some() {
            tracing::warn!(field = %self.field, rule = %self.rule, "update after terminal call ignored");
        } else {
            self.update = Some(value);
        }
        self
    }

    /// Advance to the next link.
    pub fn next(&mut self) {
        self.finish(Terminal::Next);
    }

    /// Skip the remaining links without failing the field.
    pub fn stop(&mut self) {
        self.finish(Terminal::Stop);
    }

    /// Fail the field with `message` and skip the remaining links.
    pub fn invalid(&mut self, message: impl Into<String>) {
        self.finish(Terminal::Invalid(message.into()));
    }

    /// Whether a terminal call has been made.
    pub fn is_finished(&self) -> bool {
        self.terminal.is_some()
    }

    fn finish(&mut self, terminal: Terminal) {
        if let Some(previous) = &self.terminal {
            tracing::warn!(
                field = %self.field,
                rule = %self.rule,
                ?previous,
                ignored = ?terminal,
                "second terminal call in one link ignored"
            );
            return;
        }
        self.terminal = Some(terminal);
    }
}

/// Lifecycle of a chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Ready,
    Running,
    Ended,
}

/// Final state of a chain, delivered once when it ends.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    pub field: String,
    /// Working value after every executed link.
    pub value: Value,
    /// Whether any link rewrote the value.
    pub updated: bool,
    pub valid: bool,
    /// Empty unless the chain ended invalid.
    pub message: String,
    /// Rule whose link failed the chain.
    pub rule: Option<String>,
    /// Always [`ChainState::Ended`].
    pub state: ChainState,
}

/// Stateful run of one field's pipeline against one record.
pub struct ValidationChain<'a> {
    record: &'a dyn Record,
    field: String,
    validators: Pipeline,
    run: RunState,
    state: ChainState,
    link_index: usize,
    value: Value,
    updated: bool,
    valid: bool,
    message: String,
    failed_rule: Option<String>,
}

impl<'a> ValidationChain<'a> {
    pub fn new(record: &'a dyn Record, field: impl Into<String>, validators: Pipeline) -> Self {
        Self {
            record,
            field: field.into(),
            validators,
            run: RunState::default(),
            state: ChainState::Ready,
            link_index: 0,
            value: Value::Null,
            updated: false,
            valid: true,
            message: String::new(),
            failed_rule: None,
        }
    }

    /// Share the run state of a whole-record validation.
    pub fn with_run(mut self, run: RunState) -> Self {
        self.run = run;
        self
    }

    pub fn state(&self) -> ChainState {
        self.state
    }

    /// Run the pipeline to the end.
    ///
    /// The working value starts as `value`, or the record's current field value
    /// when `None`.
    pub async fn start(mut self, value: Option<Value>) -> ChainOutcome {
        self.reset(value);
        self.state = ChainState::Running;

        while self.link_index < self.validators.len() {
            let link = self.validators[self.link_index].clone();
            let mut control = ChainControl::new(
                &self.field,
                link.rule_name(),
                self.run.clone(),
                self.state,
            );

            tracing::trace!(
                field = %self.field,
                rule = link.rule_name(),
                link = self.link_index,
                "running link"
            );
            link.validate(self.value.clone(), self.record, &mut control)
                .await;

            if let Some(value) = control.update.take() {
                self.value = value;
                self.updated = true;
            }

            match control.terminal.take() {
                Some(Terminal::Next) => self.next(),
                Some(Terminal::Stop) => self.stop(),
                Some(Terminal::Invalid(message)) => self.invalid(message, link.rule_name()),
                None => {
                    tracing::warn!(
                        field = %self.field,
                        rule = link.rule_name(),
                        "link returned without a terminal call, stopping chain"
                    );
                    self.stop();
                }
            }
        }

        self.end()
    }

    fn reset(&mut self, value: Option<Value>) {
        self.value = value.unwrap_or_else(|| self.record.get(&self.field));
        self.updated = false;
        self.valid = true;
        self.message.clear();
        self.failed_rule = None;
        self.link_index = 0;
    }

    fn next(&mut self) {
        self.link_index += 1;
    }

    fn stop(&mut self) {
        self.link_index = self.validators.len();
    }

    fn invalid(&mut self, message: String, rule: &str) {
        self.message = message;
        self.valid = false;
        self.failed_rule = Some(rule.to_string());
        self.stop();
    }

    fn end(mut self) -> ChainOutcome {
        self.state = ChainState::Ended;
        ChainOutcome {
            field: self.field,
            value: self.value,
            updated: self.updated,
            valid: self.valid,
            message: self.message,
            rule: self.failed_rule,
            state: self.state,
        }
    }
}

/// Wrap a closure as a pipeline link. Useful for ad hoc links and tests.
pub fn link_fn<F>(rule: impl Into<String>, f: F) -> Arc<dyn CompiledValidator>
where
    F: Fn(Value, &dyn Record, &mut ChainControl) + Send + Sync + 'static,
{
    Arc::new(FnLink {
        rule: rule.into(),
        f,
    })
}

struct FnLink<F> {
    rule: String,
    f: F,
}

#[async_trait]
impl<F> CompiledValidator for FnLink<F>
where
    F: Fn(Value, &dyn Record, &mut ChainControl) + Send + Sync + 'static,
{
    async fn validate(&self, value: Value, record: &dyn Record, chain: &mut ChainControl) {
        (self.f)(value, record, chain)
    }

    fn rule_name(&self) -> &str {
        &self.rule
    }
}
