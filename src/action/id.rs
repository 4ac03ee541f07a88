//! Identity types for actions.
//!
//! [`ActId`] is the pool sequence id handed out by the task controller,
//! [`MagicNum`] correlates an action with driver and 3A traffic, and
//! [`FrameNo`] / [`RequestNo`] are the consumer's own numbering.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pool sequence id. Never 0 and never [`ActId::INVALID`] for a live action.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActId(pub u32);

impl ActId {
    pub const NULL: ActId = ActId(0);
    pub const FIRST: ActId = ActId(1);
    pub const INVALID: ActId = ActId(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NULL && self != Self::INVALID
    }

    /// Successor id, skipping the reserved values on wrap
    #[inline]
    pub fn next(self) -> ActId {
        let n = self.0.wrapping_add(1);
        if n == Self::NULL.0 || n == Self::INVALID.0 {
            Self::FIRST
        } else {
            ActId(n)
        }
    }
}

impl Default for ActId {
    fn default() -> Self {
        ActId::NULL
    }
}

impl fmt::Debug for ActId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NULL => write!(f, "ActId(NULL)"),
            Self::INVALID => write!(f, "ActId(INVALID)"),
            _ => write!(f, "ActId({})", self.0),
        }
    }
}

impl fmt::Display for ActId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Driver correlation number.
///
/// 0 and -1 are reserved. Numbers handed back by the driver may carry
/// [`MagicNum::UNCERTAIN_MASK`] when it could not tell which request a
/// buffer belonged to.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MagicNum(pub i32);

impl MagicNum {
    pub const NULL: MagicNum = MagicNum(0);
    pub const INVALID: MagicNum = MagicNum(-1);
    pub const FIRST: MagicNum = MagicNum(1);
    pub const UNCERTAIN_MASK: i32 = 0x4000_0000;

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::NULL && self != Self::INVALID
    }

    #[inline]
    pub fn is_uncertain(self) -> bool {
        self.is_valid() && (self.0 & Self::UNCERTAIN_MASK) != 0
    }

    /// Successor for local generation. Stays below the uncertain mask so a
    /// locally generated number is never mistaken for an uncertain one.
    #[inline]
    pub fn next(self) -> MagicNum {
        let n = self.0.wrapping_add(1);
        if n <= Self::NULL.0 || n >= Self::UNCERTAIN_MASK {
            Self::FIRST
        } else {
            MagicNum(n)
        }
    }

    /// Normalize a number reported by the driver; reserved values map to FIRST
    pub fn from_driver(raw: i64) -> MagicNum {
        match i32::try_from(raw) {
            Ok(v) if v != Self::NULL.0 && v != Self::INVALID.0 => MagicNum(v),
            _ => Self::FIRST,
        }
    }
}

impl Default for MagicNum {
    fn default() -> Self {
        MagicNum::NULL
    }
}

impl fmt::Debug for MagicNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::NULL => write!(f, "Magic(NULL)"),
            Self::INVALID => write!(f, "Magic(INVALID)"),
            _ => write!(f, "Magic({})", self.0),
        }
    }
}

impl fmt::Display for MagicNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Consumer frame number. Delivery order follows these.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FrameNo(pub u32);

impl FrameNo {
    pub const INVALID: FrameNo = FrameNo(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for FrameNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "FrameNo(INVALID)")
        } else {
            write!(f, "FrameNo({})", self.0)
        }
    }
}

impl fmt::Display for FrameNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Consumer request number
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestNo(pub u32);

impl RequestNo {
    pub const INVALID: RequestNo = RequestNo(u32::MAX);

    #[inline]
    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl fmt::Debug for RequestNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == Self::INVALID {
            write!(f, "RequestNo(INVALID)")
        } else {
            write!(f, "RequestNo({})", self.0)
        }
    }
}

impl fmt::Display for RequestNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_act_id_wraps_past_reserved() {
        assert_eq!(ActId(u32::MAX - 1).next(), ActId::FIRST);
        assert_eq!(ActId(5).next(), ActId(6));
        assert!(!ActId::NULL.is_valid());
        assert!(!ActId::INVALID.is_valid());
    }

    #[test]
    fn test_magic_wraps_below_uncertain_mask() {
        assert_eq!(MagicNum(MagicNum::UNCERTAIN_MASK - 1).next(), MagicNum::FIRST);
        assert_eq!(MagicNum(i32::MAX).next(), MagicNum::FIRST);
        assert_eq!(MagicNum(41).next(), MagicNum(42));
    }

    #[test]
    fn test_magic_uncertain() {
        assert!(MagicNum(MagicNum::UNCERTAIN_MASK | 7).is_uncertain());
        assert!(!MagicNum(7).is_uncertain());
        assert!(!MagicNum::INVALID.is_uncertain());
    }

    #[test]
    fn test_magic_from_driver() {
        assert_eq!(MagicNum::from_driver(0), MagicNum::FIRST);
        assert_eq!(MagicNum::from_driver(-1), MagicNum::FIRST);
        assert_eq!(MagicNum::from_driver(i64::MAX), MagicNum::FIRST);
        assert_eq!(MagicNum::from_driver(12), MagicNum(12));
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", MagicNum::NULL), "Magic(NULL)");
        assert_eq!(format!("{}", FrameNo(3)), "FrameNo(3)");
        assert_eq!(format!("{}", RequestNo::INVALID), "RequestNo(INVALID)");
    }
}
