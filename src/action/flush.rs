//! Flush reasons
//!
//! A [`FlushSet`] is an OR-able set of reasons why an action is released
//! without a normal result. An empty set means a clean result. A non-empty
//! set still goes through the single release path, so the action is
//! returned exactly once either way.

use crate::types::OutPort;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitset of flush reasons
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FlushSet(u32);

impl FlushSet {
    pub const NONE: FlushSet = FlushSet(0);
    pub const GENERAL: FlushSet = FlushSet(1 << 0);
    pub const FAIL: FlushSet = FlushSet(1 << 1);
    pub const INACTIVE: FlushSet = FlushSet(1 << 2);
    pub const DROP: FlushSet = FlushSet(1 << 3);
    pub const INITIAL: FlushSet = FlushSet(1 << 4);
    pub const PADDING: FlushSet = FlushSet(1 << 5);
    pub const DUMMY: FlushSet = FlushSet(1 << 6);
    pub const ABANDON: FlushSet = FlushSet(1 << 7);
    pub const COLLECTOR: FlushSet = FlushSet(1 << 8);
    pub const REQUESTQ: FlushSet = FlushSet(1 << 9);
    pub const PROCESSQ: FlushSet = FlushSet(1 << 10);
    pub const KICK: FlushSet = FlushSet(1 << 11);
    pub const MIS_EXP: FlushSet = FlushSet(1 << 12);
    pub const MIS_UNCERTAIN: FlushSet = FlushSet(1 << 13);
    pub const MIS_BUFFER: FlushSet = FlushSet(1 << 14);
    pub const MIS_RAW: FlushSet = FlushSet(1 << 15);
    pub const MIS_RESULT: FlushSet = FlushSet(1 << 16);
    pub const MIS_RESIZE: FlushSet = FlushSet(1 << 17);
    pub const MIS_READOUT: FlushSet = FlushSet(1 << 18);
    pub const MIS_SYNC: FlushSet = FlushSet(1 << 19);

    /// Reasons used for internal actions
    pub const INTERNAL: FlushSet = FlushSet(Self::INITIAL.0 | Self::PADDING.0 | Self::DUMMY.0);

    /// Reasons used while draining queues on flush
    pub const TERMINAL: FlushSet =
        FlushSet(Self::COLLECTOR.0 | Self::REQUESTQ.0 | Self::PROCESSQ.0);

    const NAMES: [(FlushSet, &'static str); 20] = [
        (Self::GENERAL, "GENERAL"),
        (Self::FAIL, "FAIL"),
        (Self::INACTIVE, "INACTIVE"),
        (Self::DROP, "DROP"),
        (Self::INITIAL, "INITIAL"),
        (Self::PADDING, "PADDING"),
        (Self::DUMMY, "DUMMY"),
        (Self::ABANDON, "ABANDON"),
        (Self::COLLECTOR, "COLLECTOR"),
        (Self::REQUESTQ, "REQUESTQ"),
        (Self::PROCESSQ, "PROCESSQ"),
        (Self::KICK, "KICK"),
        (Self::MIS_EXP, "MIS_EXP"),
        (Self::MIS_UNCERTAIN, "MIS_UNCERTAIN"),
        (Self::MIS_BUFFER, "MIS_BUFFER"),
        (Self::MIS_RAW, "MIS_RAW"),
        (Self::MIS_RESULT, "MIS_RESULT"),
        (Self::MIS_RESIZE, "MIS_RESIZE"),
        (Self::MIS_READOUT, "MIS_READOUT"),
        (Self::MIS_SYNC, "MIS_SYNC"),
    ];

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub fn contains(self, other: FlushSet) -> bool {
        (self.0 & other.0) == other.0
    }

    #[inline]
    pub fn intersects(self, other: FlushSet) -> bool {
        (self.0 & other.0) != 0
    }

    #[inline]
    pub fn insert(&mut self, other: FlushSet) {
        self.0 |= other.0;
    }
}

impl BitOr for FlushSet {
    type Output = FlushSet;

    fn bitor(self, rhs: FlushSet) -> FlushSet {
        FlushSet(self.0 | rhs.0)
    }
}

impl BitOrAssign for FlushSet {
    fn bitor_assign(&mut self, rhs: FlushSet) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for FlushSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "FlushSet(NONE)");
        }
        write!(f, "FlushSet(")?;
        let mut first = true;
        for (flag, name) in Self::NAMES {
            if self.contains(flag) {
                if !first {
                    write!(f, "|")?;
                }
                write!(f, "{}", name)?;
                first = false;
            }
        }
        write!(f, ")")
    }
}

impl fmt::Display for FlushSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-port record of outputs that had to be served from a stuff buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NoBufferSet(u8);

impl NoBufferSet {
    pub fn mark(&mut self, port: OutPort) {
        self.0 |= port.bit();
    }

    pub fn has(&self, port: OutPort) -> bool {
        (self.0 & port.bit()) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}
