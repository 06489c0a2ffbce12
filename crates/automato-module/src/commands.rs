//! Locally registered command handlers.

use automato_event::TaggedValue;
use tracing::debug;

use crate::error::{ModuleError, Result};

/// Default number of commands a module can register.
pub const MODULE_COMMANDS: usize = 4;

/// A command handler. Receives the input bytes of `COMMAND_INPUT` (empty for
/// plain `COMMAND` and for flow steps) and returns its result, or
/// [`TaggedValue::Unset`] when it has nothing to report.
pub type Handler = Box<dyn FnMut(&[u8]) -> TaggedValue + Send>;

/// Fixed-capacity table of command handlers keyed by command id.
pub struct CommandRegistry<const N: usize = MODULE_COMMANDS> {
    handlers: Vec<(u8, Handler)>,
}

impl<const N: usize> CommandRegistry<N> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::with_capacity(N),
        }
    }

    pub fn register(
        &mut self,
        id: u8,
        handler: impl FnMut(&[u8]) -> TaggedValue + Send + 'static,
    ) -> Result<()> {
        if self.contains(id) {
            return Err(ModuleError::DuplicateCommand(id));
        }
        if self.handlers.len() >= N {
            return Err(ModuleError::RegistryFull { max: N });
        }
        self.handlers.push((id, Box::new(handler)));
        Ok(())
    }

    pub fn contains(&self, id: u8) -> bool {
        self.handlers.iter().any(|(known, _)| *known == id)
    }

    /// Run command `id`. `None` when no handler is registered for it.
    pub fn run(&mut self, id: u8, input: &[u8]) -> Option<TaggedValue> {
        let (_, handler) = self.handlers.iter_mut().find(|(known, _)| *known == id)?;
        let output = handler(input);
        debug!(command = id, %output, "command ran");
        Some(output)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.handlers.iter().map(|(id, _)| *id)
    }
}

impl<const N: usize> Default for CommandRegistry<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> std::fmt::Debug for CommandRegistry<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandRegistry")
            .field("ids", &self.ids().collect::<Vec<_>>())
            .field("capacity", &N)
            .finish()
    }
}
