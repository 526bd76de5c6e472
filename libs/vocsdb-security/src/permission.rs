use serde::{Deserialize, Serialize};

/// The three-level permission lattice governing what a role may do on a
/// loop: `NONE < RECV < SEND`.
///
/// `reference` grants `check` iff `reference >= check` under this order.
///
/// # Examples
///
/// ```
/// use vocsdb_security::Permission;
///
/// assert!(Permission::Send >= Permission::Recv);
/// assert!(Permission::Recv >= Permission::None);
/// assert!(!(Permission::Recv >= Permission::Send));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Permission {
    /// No access.
    None,
    /// Listen-only access.
    Recv,
    /// Transmit access; implies `Recv`.
    Send,
}

impl Permission {
    /// Decode the wire tri-state encoding used on loop role-permission
    /// tables: `true` is SEND, `false` is RECV, absence is NONE.
    #[must_use]
    pub fn from_wire_bool(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => Self::Send,
            Some(false) => Self::Recv,
            None => Self::None,
        }
    }

    /// Encode back to the wire tri-state: `None` for NONE, `Some(false)` for
    /// RECV, `Some(true)` for SEND.
    #[must_use]
    pub fn to_wire_bool(self) -> Option<bool> {
        match self {
            Self::None => None,
            Self::Recv => Some(false),
            Self::Send => Some(true),
        }
    }

    /// `true` iff `self` grants at least `required`.
    #[must_use]
    pub fn grants(self, required: Self) -> bool {
        self >= required
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lattice_order_matches_spec() {
        assert!(Permission::None < Permission::Recv);
        assert!(Permission::Recv < Permission::Send);
    }

    #[test]
    fn wire_bool_round_trips() {
        assert_eq!(Permission::from_wire_bool(Some(true)), Permission::Send);
        assert_eq!(Permission::from_wire_bool(Some(false)), Permission::Recv);
        assert_eq!(Permission::from_wire_bool(None), Permission::None);
        assert_eq!(Permission::Send.to_wire_bool(), Some(true));
        assert_eq!(Permission::Recv.to_wire_bool(), Some(false));
        assert_eq!(Permission::None.to_wire_bool(), None);
    }

    #[test]
    fn grants_is_monotonic() {
        assert!(Permission::Send.grants(Permission::Recv));
        assert!(Permission::Send.grants(Permission::None));
        assert!(!Permission::Recv.grants(Permission::Send));
    }
}
