//! The command entity (C5): an RPC request tracked through a strict
//! state machine.
//!
//! ```text
//! pending ──send-ok──► sent ──ack-in──► ack ──res-in──► completed
//!    │                  │                 │               ▲
//!    │                  │                 └──res(ok=F)──► failed
//!    └──send-fail──► timeout ◄──tick──────┴────tick──────┘
//!                              (any non-terminal on timeout)
//! ```

use crate::ids::{DeviceId, GroupId, SiteId, TenantId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandTarget {
    Device(DeviceId),
    Group(GroupId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Expect {
    Ack,
    Result,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Pending,
    Sent,
    Ack,
    Completed,
    Failed,
    Timeout,
}

impl CommandStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandOutcomeError {
    pub kind: String,
    pub message: String,
}

impl CommandOutcomeError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Returned by every transition attempt so callers (and the engine's
/// ack/result intake) can tell a genuine transition from a no-op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    Noop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub schema_version: u32,
    pub id: String,
    pub tenant: TenantId,
    pub site: SiteId,
    pub target: CommandTarget,
    pub operation: String,
    pub args: Map<String, Value>,
    pub timeout_ms: u64,
    pub expect: Expect,
    pub status: CommandStatus,
    pub created_at: i64,
    pub sent_at: Option<i64>,
    pub ack_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub result: Option<Value>,
    pub error: Option<CommandOutcomeError>,
    /// Incremented whenever an ack/res arrives after the command has
    /// already reached a terminal state.
    pub duplicate_reply_count: u32,
}

impl Command {
    pub fn new(
        id: String,
        tenant: TenantId,
        site: SiteId,
        target: CommandTarget,
        operation: String,
        args: Map<String, Value>,
        timeout_ms: u64,
        expect: Expect,
        now: i64,
    ) -> Self {
        Self {
            schema_version: 1,
            id,
            tenant,
            site,
            target,
            operation,
            args,
            timeout_ms,
            expect,
            status: CommandStatus::Pending,
            created_at: now,
            sent_at: None,
            ack_at: None,
            completed_at: None,
            result: None,
            error: None,
            duplicate_reply_count: 0,
        }
    }

    pub fn mark_sent(&mut self, now: i64) -> Result<(), &'static str> {
        if self.status != CommandStatus::Pending {
            return Err("mark_sent requires pending");
        }
        self.status = CommandStatus::Sent;
        self.sent_at = Some(now);
        Ok(())
    }

    /// A publish failure short-circuits straight to `timeout`, the one
    /// explicit skip-forward the state machine allows.
    pub fn mark_send_failed(&mut self, now: i64) -> Result<(), &'static str> {
        if self.status != CommandStatus::Pending {
            return Err("mark_send_failed requires pending");
        }
        self.status = CommandStatus::Timeout;
        self.completed_at = Some(now);
        self.error = Some(CommandOutcomeError::new("transport", "publish_failed"));
        Ok(())
    }

    /// `sent -> ack`. Idempotent if already `ack`. Returns `Noop` if the
    /// command is already terminal (duplicate-reply bookkeeping is the
    /// caller's job, via `duplicate_reply_count`).
    pub fn mark_ack(&mut self, now: i64) -> TransitionOutcome {
        match self.status {
            CommandStatus::Sent => {
                self.status = CommandStatus::Ack;
                self.ack_at = Some(now);
                TransitionOutcome::Applied
            }
            CommandStatus::Ack => TransitionOutcome::Noop,
            _ => {
                self.duplicate_reply_count += 1;
                TransitionOutcome::Noop
            }
        }
    }

    /// `sent|ack -> completed|failed`, from a `cmd/res` reply.
    pub fn mark_result(
        &mut self,
        ok: bool,
        result: Option<Value>,
        error: Option<CommandOutcomeError>,
        now: i64,
    ) -> TransitionOutcome {
        match self.status {
            CommandStatus::Sent | CommandStatus::Ack => {
                self.status = if ok {
                    CommandStatus::Completed
                } else {
                    CommandStatus::Failed
                };
                self.completed_at = Some(now);
                self.result = result;
                self.error = error;
                TransitionOutcome::Applied
            }
            _ => {
                self.duplicate_reply_count += 1;
                TransitionOutcome::Noop
            }
        }
    }

    /// Timeout sweep transition: `pending|sent|ack -> timeout`.
    /// Idempotent — applying it to an already-terminal command is a
    /// no-op rather than an error, since the sweep operates on a
    /// snapshot that may race a concurrent terminal transition.
    pub fn mark_timeout(&mut self, now: i64) -> TransitionOutcome {
        if self.status.is_terminal() {
            return TransitionOutcome::Noop;
        }
        self.status = CommandStatus::Timeout;
        self.completed_at = Some(now);
        self.error = Some(CommandOutcomeError::new("timeout", "command exceeded its declared budget"));
        TransitionOutcome::Applied
    }

    /// `cancel(id)`: pending only. Pending is the only non-terminal
    /// status with no tracked counterpart transition in the state
    /// diagram for caller-initiated cancellation, so it is modeled as a
    /// `failed` outcome carrying the `cancelled` error kind rather than
    /// inventing an extra status.
    pub fn cancel(&mut self, now: i64) -> Result<(), &'static str> {
        if self.status != CommandStatus::Pending {
            return Err("cancel requires pending");
        }
        self.status = CommandStatus::Failed;
        self.completed_at = Some(now);
        self.error = Some(CommandOutcomeError::new("cancelled", "cancelled by caller"));
        Ok(())
    }

    /// Due for the timeout sweep: `now - sent_at > timeout_ms`, or
    /// `created_at` if never sent.
    pub fn is_timed_out(&self, now: i64) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        let base = self.sent_at.unwrap_or(self.created_at);
        now.saturating_sub(base) > self.timeout_ms as i64
    }
}
