//! Principal states observed by the identity gate.

use crate::model::entity::OwnerId;
use serde::{Deserialize, Serialize};

/// Current authenticated subject.
///
/// Guest and absent principals are both treated as "no access" by the core.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Principal {
    /// Nobody is signed in.
    #[default]
    Absent,
    /// Temporary unlinked identity.
    Guest { uid: OwnerId },
    /// Linked identity allowed to read and write its own documents.
    Full {
        uid: OwnerId,
        display_name: Option<String>,
    },
}

impl Principal {
    /// Returns the owner id when this principal has full access.
    pub fn full_owner(&self) -> Option<OwnerId> {
        match self {
            Self::Full { uid, .. } => Some(*uid),
            Self::Absent | Self::Guest { .. } => None,
        }
    }

    /// Returns the durable id of guest or full principals.
    pub fn uid(&self) -> Option<OwnerId> {
        match self {
            Self::Absent => None,
            Self::Guest { uid } | Self::Full { uid, .. } => Some(*uid),
        }
    }

    /// Short label for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Absent => "absent",
            Self::Guest { .. } => "guest",
            Self::Full { .. } => "full",
        }
    }
}
