use std::{fmt, ops::BitOr};

/// Flags describing how a renewal pass was requested.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RunLevel(u8);

impl RunLevel {
    pub const NONE: RunLevel = RunLevel(0);
    pub const INTERACTIVE: RunLevel = RunLevel(1);
    pub const UNATTENDED: RunLevel = RunLevel(1 << 1);
    /// Ask before storing/installing brand-new certificates and always retry validation.
    pub const TEST: RunLevel = RunLevel(1 << 2);
    /// Ignore due dates.
    pub const FORCE: RunLevel = RunLevel(1 << 3);
    /// Never reuse cached certificates.
    pub const NO_CACHE: RunLevel = RunLevel(1 << 4);

    pub fn contains(self, other: RunLevel) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn with(self, other: RunLevel) -> RunLevel {
        RunLevel(self.0 | other.0)
    }
}

impl BitOr for RunLevel {
    type Output = RunLevel;

    fn bitor(self, rhs: RunLevel) -> RunLevel {
        self.with(rhs)
    }
}

impl fmt::Debug for RunLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (RunLevel::INTERACTIVE, "Interactive"),
            (RunLevel::UNATTENDED, "Unattended"),
            (RunLevel::TEST, "Test"),
            (RunLevel::FORCE, "Force"),
            (RunLevel::NO_CACHE, "NoCache"),
        ];
        let set: Vec<&str> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        if set.is_empty() {
            f.write_str("RunLevel(None)")
        } else {
            write!(f, "RunLevel({})", set.join(" | "))
        }
    }
}
