#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Provisioning,
    Connecting,
    Steady,
}

impl Mode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Provisioning => "provisioning",
            Self::Connecting => "connecting",
            Self::Steady => "steady",
        }
    }
}
