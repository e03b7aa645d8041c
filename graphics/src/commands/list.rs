//! Pooled command lists and their lifecycle.

use kiln_core::pool::{ObjectPool, Poolable};

use super::Command;
use crate::backend::QueueRole;
use crate::error::GraphicsError;

/// Lifecycle of a command list.
///
/// ```text
/// Free --begin_recording--> Recording --end_recording--> Closed
/// Closed --on_submitted--> Submitted --on_executed--> Free
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandListState {
    Free,
    Recording,
    Closed,
    Submitted,
}

/// An ordered stream of commands for one queue.
#[derive(Debug)]
pub struct CommandList {
    name: String,
    queue: QueueRole,
    state: CommandListState,
    commands: Vec<Command>,
}

impl Poolable for CommandList {
    fn new_empty() -> Self {
        Self {
            name: String::new(),
            queue: QueueRole::Graphics,
            state: CommandListState::Free,
            commands: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.name.clear();
        self.commands.clear();
        self.state = CommandListState::Free;
    }
}

impl CommandList {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn queue(&self) -> QueueRole {
        self.queue
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    fn expect_state(&self, expected: CommandListState, op: &str) -> Result<(), GraphicsError> {
        if self.state != expected {
            return Err(GraphicsError::InvalidState(format!(
                "command list '{}': {op} requires {expected:?}, list is {:?}",
                self.name, self.state
            )));
        }
        Ok(())
    }

    pub fn begin_recording(
        &mut self,
        name: impl Into<String>,
        queue: QueueRole,
    ) -> Result<(), GraphicsError> {
        self.expect_state(CommandListState::Free, "begin_recording")?;
        self.name = name.into();
        self.queue = queue;
        self.state = CommandListState::Recording;
        Ok(())
    }

    pub fn push(&mut self, command: Command) -> Result<(), GraphicsError> {
        self.expect_state(CommandListState::Recording, "push")?;
        log::trace!("[{}] {}", self.name, command.name());
        self.commands.push(command);
        Ok(())
    }

    pub fn end_recording(&mut self) -> Result<(), GraphicsError> {
        self.expect_state(CommandListState::Recording, "end_recording")?;
        self.state = CommandListState::Closed;
        Ok(())
    }

    /// Move the recorded commands out. Only valid on a closed list.
    pub fn steal_commands(&mut self) -> Result<Vec<Command>, GraphicsError> {
        self.expect_state(CommandListState::Closed, "steal_commands")?;
        Ok(std::mem::take(&mut self.commands))
    }

    pub fn on_submitted(&mut self) -> Result<(), GraphicsError> {
        self.expect_state(CommandListState::Closed, "on_submitted")?;
        self.state = CommandListState::Submitted;
        Ok(())
    }

    pub fn on_executed(&mut self) -> Result<(), GraphicsError> {
        self.expect_state(CommandListState::Submitted, "on_executed")?;
        self.commands.clear();
        self.state = CommandListState::Free;
        Ok(())
    }
}

/// Pool of reusable command lists.
pub type CommandListPool = ObjectPool<CommandList>;
