//! Resumable action sequences.
//!
//! Each invocation of an `iterate_list` action runs exactly one child: the first id
//! in `action_ids` that is not yet in `processed_actions`. Only after the child
//! succeeds is its id appended to `processed_actions` and the config saved. A failed
//! child leaves the persisted config untouched, so the next invocation retries it.
//! Once every child ran, further invocations do nothing.

use super::{Engine, ExecutionReport, ExecutionState, Outcome};
use crate::config::{Action, IterateList};
use crate::error::{CommanderResult, ConfigError};
use tracing::info;

impl Engine<'_> {
    pub(super) fn run_sequence(
        &mut self,
        list_id: u32,
        list: &IterateList,
    ) -> CommanderResult<ExecutionReport> {
        let total = list.action_ids.len();
        let Some(next) = list.next_action() else {
            self.journal.event(&format!(
                "All {total} actions of action list {list_id} were already executed, nothing to do"
            ));
            self.transition(ExecutionState::Done);
            return Ok(ExecutionReport {
                action_id: list_id,
                outcome: Outcome::SequenceComplete,
                close_failures: Vec::new(),
            });
        };

        let position = list.processed_actions.len() + 1;
        let child = self.config.action(next)?.clone();
        if let Action::IterateList(_) = child {
            return Err(ConfigError::Malformed(format!(
                "Action {list_id}: nested action lists are not supported (action {next})"
            ))
            .into());
        }

        info!("Action list {list_id}: step {position} of {total} is action {next}");
        self.journal
            .event(&format!("Executing action {next}: {child}"));
        let report = self.run_action(next, &child)?;

        self.record_processed(list_id, next)?;
        self.journal.event(&format!(
            "Action list {list_id}: {position} of {total} actions processed"
        ));

        Ok(ExecutionReport {
            action_id: list_id,
            outcome: Outcome::SequenceStep {
                executed: next,
                processed: position,
                total,
                step: Box::new(report.outcome),
            },
            close_failures: report.close_failures,
        })
    }

    /// Appends `child` to the list's progress and persists the whole config.
    ///
    /// The in-memory config only changes once the save succeeded.
    fn record_processed(&mut self, list_id: u32, child: u32) -> CommanderResult<()> {
        let mut updated = self.config.clone();
        match updated.actions.get_mut(&list_id) {
            Some(Action::IterateList(list)) => list.processed_actions.push(child),
            _ => return Err(ConfigError::ActionNotFound(list_id).into()),
        }
        self.store.save(&updated)?;
        self.config = updated;
        Ok(())
    }
}
