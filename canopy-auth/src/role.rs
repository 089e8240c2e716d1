// SPDX-License-Identifier: MIT OR Apache-2.0

use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The three roles which can be assigned to a member of a tree. Greater roles are assumed to also
/// contain all lower ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Permission to read the document.
    Reader,

    /// Permission to author content changes.
    Writer,

    /// Permission to apply membership changes.
    Admin,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
            Role::Admin => "admin",
        };

        write!(f, "{}", s)
    }
}

impl Role {
    /// Role is Reader.
    pub fn is_reader(&self) -> bool {
        matches!(self, Role::Reader)
    }

    /// Role is Writer.
    pub fn is_writer(&self) -> bool {
        matches!(self, Role::Writer)
    }

    /// Role is Admin.
    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}
