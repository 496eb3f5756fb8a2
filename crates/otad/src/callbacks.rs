//! Callback dispatcher for operator hooks.
//!
//! Hooks run synchronously in program order. A failing hook is logged and
//! otherwise ignored.

use ota_shared::callback::{CallbackEvent, CallbackMessage, CallbackResult};
use ota_shared::Version;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("cannot run {program}: {source}")]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    #[error("{program} exited with {status}")]
    Exit { program: PathBuf, status: String },
}

pub trait CallbackHook: Send + Sync {
    fn invoke(&self, event: &CallbackEvent) -> Result<(), CallbackError>;
}

/// Runs an external program with the callback metadata in its environment
pub struct ProgramHook {
    program: PathBuf,
}

impl ProgramHook {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
        }
    }
}

impl CallbackHook for ProgramHook {
    fn invoke(&self, event: &CallbackEvent) -> Result<(), CallbackError> {
        let status = Command::new(&self.program)
            .envs(event.env())
            .stdin(Stdio::null())
            .status()
            .map_err(|source| CallbackError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(CallbackError::Exit {
                program: self.program.clone(),
                status: status.to_string(),
            })
        }
    }
}

pub struct CallbackDispatcher {
    hook: Option<Box<dyn CallbackHook>>,
}

impl CallbackDispatcher {
    pub fn new(hook: Box<dyn CallbackHook>) -> Self {
        Self { hook: Some(hook) }
    }

    pub fn disabled() -> Self {
        Self { hook: None }
    }

    /// Dispatcher for the configured callback program, if any
    pub fn for_program(program: Option<&Path>) -> Self {
        match program {
            Some(path) => Self::new(Box::new(ProgramHook::new(path))),
            None => Self::disabled(),
        }
    }

    pub fn pre(&self, message: CallbackMessage, current: &Version, target: Option<&Version>, reason: &str) {
        self.dispatch(CallbackEvent::new(message, current).with_target(target).with_reason(reason));
    }

    pub fn post(
        &self,
        message: CallbackMessage,
        result: CallbackResult,
        current: &Version,
        target: Option<&Version>,
        reason: &str,
    ) {
        self.dispatch(
            CallbackEvent::new(message, current)
                .with_result(result)
                .with_target(target)
                .with_reason(reason),
        );
    }

    fn dispatch(&self, event: CallbackEvent) {
        debug!("Callback {} {}", event.message, event.result_str());
        if let Some(hook) = &self.hook {
            if let Err(e) = hook.invoke(&event) {
                warn!("Callback {} failed: {}", event.message, e);
            }
        }
    }
}
