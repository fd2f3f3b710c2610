//! The changeset entity (C6): an ordered, transactionally executed
//! group of commands with optional reverse rollback.

use crate::command::{CommandOutcomeError, CommandStatus, CommandTarget, Expect};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangesetStatus {
    Draft,
    Executing,
    Completed,
    Failed,
    RolledBack,
    RollbackFailed,
}

/// A command as declared inside a changeset, before it becomes a live
/// tracked `Command` at execute time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesetCommandSpec {
    pub target: CommandTarget,
    pub operation: String,
    pub args: Map<String, Value>,
    pub timeout_ms: u64,
    pub expect: Expect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangesetCommandResult {
    pub command_id: Option<String>,
    pub status: CommandStatus,
    pub result: Option<Value>,
    pub error: Option<CommandOutcomeError>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChangesetOptions {
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub session_id: Option<String>,
    pub trace_id: Option<String>,
    pub metadata: Map<String, Value>,
    /// Stop at the first command failure. Defaults to `true`: the
    /// contract's atomic-by-default semantics.
    pub atomic: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Changeset {
    pub schema_version: u32,
    pub id: String,
    pub status: ChangesetStatus,
    pub commands: Vec<ChangesetCommandSpec>,
    pub rollback_commands: Vec<ChangesetCommandSpec>,
    pub results: Vec<ChangesetCommandResult>,
    pub description: Option<String>,
    pub created_by: Option<String>,
    pub session_id: Option<String>,
    pub trace_id: Option<String>,
    pub metadata: Map<String, Value>,
    pub atomic: bool,
    pub created_at: i64,
    pub executed_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Changeset {
    pub fn new(id: String, options: ChangesetOptions, now: i64) -> Self {
        Self {
            schema_version: 1,
            id,
            status: ChangesetStatus::Draft,
            commands: Vec::new(),
            rollback_commands: Vec::new(),
            results: Vec::new(),
            description: options.description,
            created_by: options.created_by,
            session_id: options.session_id,
            trace_id: options.trace_id,
            metadata: options.metadata,
            atomic: options.atomic.unwrap_or(true),
            created_at: now,
            executed_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            ChangesetStatus::Completed
                | ChangesetStatus::Failed
                | ChangesetStatus::RolledBack
                | ChangesetStatus::RollbackFailed
        )
    }

    /// Commands may only be added in `draft`.
    pub fn add_command(&mut self, spec: ChangesetCommandSpec) -> Result<(), &'static str> {
        if self.status != ChangesetStatus::Draft {
            return Err("add_command requires draft");
        }
        self.commands.push(spec);
        Ok(())
    }

    pub fn add_rollback_command(&mut self, spec: ChangesetCommandSpec) -> Result<(), &'static str> {
        if self.status != ChangesetStatus::Draft {
            return Err("add_rollback_command requires draft");
        }
        self.rollback_commands.push(spec);
        Ok(())
    }

    /// Execution is a terminal operation: only callable from `draft`.
    pub fn begin_execute(&mut self, now: i64) -> Result<(), &'static str> {
        if self.status != ChangesetStatus::Draft {
            return Err("begin_execute requires draft");
        }
        self.status = ChangesetStatus::Executing;
        self.executed_at = Some(now);
        Ok(())
    }

    pub fn finish_execute(&mut self, all_succeeded: bool, now: i64) -> Result<(), &'static str> {
        if self.status != ChangesetStatus::Executing {
            return Err("finish_execute requires executing");
        }
        self.status = if all_succeeded {
            ChangesetStatus::Completed
        } else {
            ChangesetStatus::Failed
        };
        self.completed_at = Some(now);
        Ok(())
    }

    /// Admissible only when `completed|failed` and `rollback_commands`
    /// is non-empty.
    pub fn begin_rollback(&mut self, now: i64) -> Result<(), &'static str> {
        if !matches!(self.status, ChangesetStatus::Completed | ChangesetStatus::Failed) {
            return Err("begin_rollback requires a prior terminal execute");
        }
        if self.rollback_commands.is_empty() {
            return Err("begin_rollback requires non-empty rollback_commands");
        }
        self.status = ChangesetStatus::Executing;
        self.executed_at = Some(now);
        Ok(())
    }

    pub fn finish_rollback(&mut self, all_succeeded: bool, now: i64) -> Result<(), &'static str> {
        if self.status != ChangesetStatus::Executing {
            return Err("finish_rollback requires executing");
        }
        self.status = if all_succeeded {
            ChangesetStatus::RolledBack
        } else {
            ChangesetStatus::RollbackFailed
        };
        self.completed_at = Some(now);
        Ok(())
    }

    /// `delete(cs_id)` is non-executing only.
    pub fn deletable(&self) -> bool {
        self.status != ChangesetStatus::Executing
    }
}
