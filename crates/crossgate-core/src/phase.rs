//! Phase vocabulary.
//!
//! Phases are strictly ordered per session. The vocabulary is configurable;
//! the default is the four tags observed in practice. The last phase is
//! terminal: a session whose phase reached it is closed.

use crate::error::CoreError;

/// Ordered list of phase tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOrder {
    phases: Vec<String>,
}

impl PhaseOrder {
    /// The default vocabulary: `init`, `exec`, `done`, `ack`.
    pub const DEFAULT: [&'static str; 4] = ["init", "exec", "done", "ack"];

    /// Build a vocabulary. It must be non-empty and free of duplicates.
    pub fn new<I, S>(phases: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let phases: Vec<String> = phases.into_iter().map(Into::into).collect();
        if phases.is_empty() {
            return Err(CoreError::InvalidPhases("empty phase list".into()));
        }
        for (i, p) in phases.iter().enumerate() {
            if p.is_empty() {
                return Err(CoreError::InvalidPhases("empty phase tag".into()));
            }
            if phases[..i].contains(p) {
                return Err(CoreError::InvalidPhases(format!("duplicate phase `{}`", p)));
            }
        }
        Ok(Self { phases })
    }

    /// Position of a tag, `None` if it is not a phase.
    pub fn rank(&self, tag: &str) -> Option<usize> {
        self.phases.iter().position(|p| p == tag)
    }

    pub fn first(&self) -> &str {
        &self.phases[0]
    }

    pub fn terminal(&self) -> &str {
        &self.phases[self.phases.len() - 1]
    }

    pub fn is_terminal(&self, tag: &str) -> bool {
        self.terminal() == tag
    }

    /// Whether moving from `current` to `next` advances the session.
    ///
    /// Unknown tags never advance; anything known advances from no phase.
    pub fn advances(&self, current: Option<&str>, next: &str) -> bool {
        match (current.and_then(|c| self.rank(c)), self.rank(next)) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(cur), Some(nxt)) => nxt > cur,
        }
    }

    pub fn phases(&self) -> &[String] {
        &self.phases
    }
}

impl Default for PhaseOrder {
    fn default() -> Self {
        Self {
            phases: Self::DEFAULT.iter().map(|p| p.to_string()).collect(),
        }
    }
}
