#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Nothing has been written yet, or the record was cleared.
    Empty,
    Corrupt,
    Io,
}

impl StoreError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Corrupt => "corrupt",
            Self::Io => "io",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkError {
    MissingNetworkId,
    Timeout,
    AuthRejected,
    NotFound,
    Driver,
}

impl LinkError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingNetworkId => "missing_network_id",
            Self::Timeout => "timeout",
            Self::AuthRejected => "auth_rejected",
            Self::NotFound => "not_found",
            Self::Driver => "driver",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BusError {
    MissingCredentials,
    Refused,
    NotAuthorized,
    Unreachable,
    Transport,
}

impl BusError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MissingCredentials => "missing_credentials",
            Self::Refused => "refused",
            Self::NotAuthorized => "not_authorized",
            Self::Unreachable => "unreachable",
            Self::Transport => "transport",
        }
    }
}

/// Why an application publish or subscribe was not transmitted or failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionError {
    NotReady,
    Unstable,
    DroppedDuringPrepare,
    DroppedAwaitingAck,
    Rejected,
}

impl SessionError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotReady => "not_ready",
            Self::Unstable => "unstable",
            Self::DroppedDuringPrepare => "dropped_during_prepare",
            Self::DroppedAwaitingAck => "dropped_awaiting_ack",
            Self::Rejected => "rejected",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProfileError {
    FieldTooLong,
    Incomplete,
}

impl ProfileError {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::FieldTooLong => "field_too_long",
            Self::Incomplete => "incomplete",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RestartReason {
    LinkUnavailable,
    LinkLostAfterReprovision,
    SessionUnstable,
    PortalReset,
}

impl RestartReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::LinkUnavailable => "link_unavailable",
            Self::LinkLostAfterReprovision => "link_lost_after_reprovision",
            Self::SessionUnstable => "session_unstable",
            Self::PortalReset => "portal_reset",
        }
    }
}
