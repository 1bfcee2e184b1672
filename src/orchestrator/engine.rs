use embassy_time::Instant;
use log::{info, warn};
use statig::blocking::IntoStateMachineExt as _;

use crate::types::Mode;

use super::machine::{DispatchContext, ModeApplyStatus, ModeCommand, ModeMachine};

#[derive(Clone, Copy, Debug)]
pub(crate) struct ModeApplyResult {
    pub(crate) before: Mode,
    pub(crate) after: Mode,
    pub(crate) status: ModeApplyStatus,
}

impl ModeApplyResult {
    pub(crate) fn changed(self) -> bool {
        matches!(self.status, ModeApplyStatus::Applied)
    }
}

pub(crate) struct ModeEngine {
    machine: statig::blocking::StateMachine<ModeMachine>,
}

impl ModeEngine {
    pub(crate) fn new() -> Self {
        Self {
            machine: ModeMachine::new().state_machine(),
        }
    }

    pub(crate) fn mode(&self) -> Mode {
        self.machine.inner().mode
    }

    pub(crate) fn apply(&mut self, command: ModeCommand, at: Instant) -> ModeApplyResult {
        let before = self.mode();
        let mut context = DispatchContext::default();
        self.machine.handle_with_context(&command, &mut context);
        let after = self.mode();
        let result = ModeApplyResult {
            before,
            after,
            status: context.status,
        };
        if result.changed() {
            emit_mode_event(result, command, at);
        } else if result.status == ModeApplyStatus::InvalidTransition {
            warn!(
                "iot: mode command rejected mode={} command={}",
                before.as_str(),
                command.as_str()
            );
        }
        result
    }
}

fn emit_mode_event(result: ModeApplyResult, trigger: ModeCommand, at: Instant) {
    info!(
        "MODE_EVENT {{\"from\":\"{}\",\"to\":\"{}\",\"trigger\":\"{}\",\"at_ms\":{}}}",
        result.before.as_str(),
        result.after.as_str(),
        trigger.as_str(),
        at.as_millis()
    );
}
