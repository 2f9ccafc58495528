pub mod prelude;
pub mod tables;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::errors::{Error, Result};

/// A BUFR descriptor, split into its class `f`, category `x` and index `y`.
#[derive(
    Serialize, Deserialize, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash,
)]
pub struct FXY {
    pub f: i32,
    pub x: i32,
    pub y: i32,
}

impl FXY {
    pub fn new(f: i32, x: i32, y: i32) -> Self {
        FXY { f, x, y }
    }

    /// Parses the six digit `FXXYYY` text form.
    pub fn from_str(fxy_str: &str) -> anyhow::Result<Self> {
        let fxy_str = fxy_str.trim();
        if fxy_str.len() != 6 || !fxy_str.is_ascii() {
            return Err(anyhow::anyhow!("Invalid FXY string length: {}", fxy_str));
        }

        let f = fxy_str[0..1]
            .parse::<i32>()
            .with_context(|| format!("Failed to parse F from FXY: {}", fxy_str))?;
        let x = fxy_str[1..3]
            .parse::<i32>()
            .with_context(|| format!("Failed to parse X from FXY: {}", fxy_str))?;
        let y = fxy_str[3..6]
            .parse::<i32>()
            .with_context(|| format!("Failed to parse Y from FXY: {}", fxy_str))?;

        Ok(FXY { f, x, y })
    }

    /// Builds a replication descriptor, rejecting counts the 6 bit X field
    /// cannot hold.
    pub fn replication(x: usize, y: usize) -> Result<Self> {
        if x > 63 || y > 255 {
            return Err(Error::MalformedReplication(format!(
                "replication 1-{}-{} exceeds descriptor field widths",
                x, y
            )));
        }
        Ok(FXY::new(1, x as i32, y as i32))
    }

    /// Decimal form used for internal arithmetic: `F*100000 + X*1000 + Y`.
    pub fn from_code(code: i32) -> Self {
        FXY {
            f: code / 100000,
            x: (code / 1000) % 100,
            y: code % 1000,
        }
    }

    pub fn to_code(&self) -> i32 {
        self.f * 100000 + self.x * 1000 + self.y
    }

    /// Wire form: F (2 bits) | X (6 bits) | Y (8 bits).
    pub fn from_u16(code: u16) -> Self {
        FXY {
            f: ((code >> 14) & 0x3) as i32,
            x: ((code >> 8) & 0x3f) as i32,
            y: (code & 0xff) as i32,
        }
    }

    pub fn to_u16(&self) -> u16 {
        (((self.f & 0x3) as u16) << 14) | (((self.x & 0x3f) as u16) << 8) | (self.y & 0xff) as u16
    }

    #[inline]
    pub fn is_element(&self) -> bool {
        self.f == 0
    }

    #[inline]
    pub fn is_replication(&self) -> bool {
        self.f == 1
    }

    #[inline]
    pub fn is_operator(&self) -> bool {
        self.f == 2
    }

    #[inline]
    pub fn is_sequence(&self) -> bool {
        self.f == 3
    }

    pub fn is_local(&self) -> bool {
        self.x > 47 || (192..=255).contains(&self.y)
    }

    pub fn is_qualifier(&self) -> bool {
        self.f == 0 && (1..=9).contains(&self.x)
    }

    pub fn is_valid(&self) -> bool {
        (0..=3).contains(&self.f) && (0..64).contains(&self.x) && (0..256).contains(&self.y)
    }
}

impl Display for FXY {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:01}{:02}{:03}", self.f, self.x, self.y)
    }
}
