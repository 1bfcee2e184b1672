use statig::prelude::*;

use crate::types::Mode;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ModeCommand {
    EnterProvisioning,
    ProfileConfirmed,
    SessionStable,
}

impl ModeCommand {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::EnterProvisioning => "enter_provisioning",
            Self::ProfileConfirmed => "profile_confirmed",
            Self::SessionStable => "session_stable",
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum ModeApplyStatus {
    Applied,
    Unchanged,
    InvalidTransition,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct ModeMachine {
    pub(super) mode: Mode,
}

#[derive(Clone, Copy, Debug)]
pub(super) struct DispatchContext {
    pub(super) status: ModeApplyStatus,
}

impl Default for DispatchContext {
    fn default() -> Self {
        Self {
            status: ModeApplyStatus::Unchanged,
        }
    }
}

impl ModeMachine {
    pub(super) fn new() -> Self {
        Self {
            mode: Mode::Connecting,
        }
    }

    fn enter(&mut self, context: &mut DispatchContext, mode: Mode) {
        context.status = if self.mode == mode {
            ModeApplyStatus::Unchanged
        } else {
            ModeApplyStatus::Applied
        };
        self.mode = mode;
    }
}

#[state_machine(initial = "State::connecting()")]
impl ModeMachine {
    #[state]
    fn connecting(&mut self, context: &mut DispatchContext, event: &ModeCommand) -> Outcome<State> {
        match event {
            ModeCommand::EnterProvisioning => {
                self.enter(context, Mode::Provisioning);
                Transition(State::provisioning())
            }
            ModeCommand::SessionStable => {
                self.enter(context, Mode::Steady);
                Transition(State::steady())
            }
            ModeCommand::ProfileConfirmed => {
                context.status = ModeApplyStatus::Unchanged;
                Handled
            }
        }
    }

    #[state]
    fn provisioning(
        &mut self,
        context: &mut DispatchContext,
        event: &ModeCommand,
    ) -> Outcome<State> {
        match event {
            ModeCommand::ProfileConfirmed => {
                self.enter(context, Mode::Connecting);
                Transition(State::connecting())
            }
            ModeCommand::EnterProvisioning => {
                context.status = ModeApplyStatus::Unchanged;
                Handled
            }
            ModeCommand::SessionStable => {
                context.status = ModeApplyStatus::InvalidTransition;
                Handled
            }
        }
    }

    #[state]
    fn steady(&mut self, context: &mut DispatchContext, event: &ModeCommand) -> Outcome<State> {
        match event {
            ModeCommand::EnterProvisioning => {
                self.enter(context, Mode::Provisioning);
                Transition(State::provisioning())
            }
            ModeCommand::SessionStable => {
                context.status = ModeApplyStatus::Unchanged;
                Handled
            }
            ModeCommand::ProfileConfirmed => {
                context.status = ModeApplyStatus::InvalidTransition;
                Handled
            }
        }
    }
}
