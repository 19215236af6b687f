use std::fmt;
use std::str::FromStr;

use crate::format::Decoding;

/// Optional behaviours, all off by default.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Features {
    /// Decode instructions without checking their constant bits.
    pub lenient: bool,
}

impl Features {
    pub fn decoding(&self) -> Decoding {
        if self.lenient {
            Decoding::Lenient
        } else {
            Decoding::Strict
        }
    }
}

impl FromStr for Features {
    type Err = String;
    fn from_str(string: &str) -> Result<Self, Self::Err> {
        let mut features = Self::default();
        for word in string.split(',').map(str::trim) {
            let value = match word {
                "" => continue,
                "lenient" => &mut features.lenient,
                _ => return Err(format!("Unknown feature '{}'", word)),
            };
            if *value {
                return Err(format!("Cannot specify feature '{}' twice", word));
            }
            *value = true;
        }
        Ok(features)
    }
}

impl fmt::Display for Features {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let features = [("lenient", self.lenient)];
        let mut has_any_feature = false;
        for (name, value) in features {
            if !value {
                continue;
            }
            if has_any_feature {
                write!(f, ",")?;
            }
            write!(f, "{}", name)?;
            has_any_feature = true;
        }
        Ok(())
    }
}
