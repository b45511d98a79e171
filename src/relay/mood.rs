//! Terminal classification of a connection, used only for accounting.

use serde::Serialize;

/// A connection's final disposition, recorded in its usage row.
///
/// `mood` starts at `Empty` and advances monotonically to one of the
/// other variants as the connection's `ConnectionState` runs its
/// transitions; it never regresses.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    /// No usable handshake was ever received.
    Empty,
    /// A valid handshake arrived but no partner showed up before close.
    Lonely,
    /// Paired, and this side closed first having also registered first.
    Happy,
    /// Paired, and this side closed first but registered second (its
    /// usage record is suppressed in favor of the partner's `Happy` one).
    Jilted,
    /// A same-side spare, evicted once its sibling was chosen to pair.
    Redundant,
    /// Bytes arrived before `ok\n` was sent.
    Impatient,
    /// A malformed handshake, or bytes in `WAIT_RELAY`.
    Errory,
}

impl Default for Mood {
    fn default() -> Self {
        Mood::Empty
    }
}

impl Mood {
    /// The wire label used in usage records and log lines.
    pub fn as_str(self) -> &'static str {
        match self {
            Mood::Empty => "empty",
            Mood::Lonely => "lonely",
            Mood::Happy => "happy",
            Mood::Jilted => "jilted",
            Mood::Redundant => "redundant",
            Mood::Impatient => "impatient",
            Mood::Errory => "errory",
        }
    }
}

impl std::fmt::Display for Mood {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
