//! Value types shared by contexts, records and the derivation engine.
//!
//! These are serialized into records (crop data), into the context
//! configuration hash (aspect ratios, crop positions) and into TOML config,
//! so their string forms are part of the persisted format.

use crate::breakpoint::Breakpoints;
use crate::error::ConfigurationError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Target proportions, `"H:V"` in string form. Both parts are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AspectRatio {
    horizontal: u32,
    vertical: u32,
}

impl AspectRatio {
    pub fn new(horizontal: u32, vertical: u32) -> Result<Self, ConfigurationError> {
        if horizontal == 0 || vertical == 0 {
            return Err(ConfigurationError::InvalidAspectRatio(format!(
                "{horizontal}:{vertical}"
            )));
        }
        Ok(Self {
            horizontal,
            vertical,
        })
    }

    pub fn square() -> Self {
        Self {
            horizontal: 1,
            vertical: 1,
        }
    }

    pub fn horizontal(self) -> u32 {
        self.horizontal
    }

    pub fn vertical(self) -> u32 {
        self.vertical
    }

    pub fn as_tuple(self) -> (u32, u32) {
        (self.horizontal, self.vertical)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.horizontal, self.vertical)
    }
}

impl FromStr for AspectRatio {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigurationError::InvalidAspectRatio(s.to_string());
        let (h, v) = s.trim().split_once(':').ok_or_else(invalid)?;
        let h: u32 = h.trim().parse().map_err(|_| invalid())?;
        let v: u32 = v.trim().parse().map_err(|_| invalid())?;
        Self::new(h, v).map_err(|_| invalid())
    }
}

impl Serialize for AspectRatio {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for AspectRatio {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One of the nine anchors used for non-exact crops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CropPosition {
    TopLeft,
    Top,
    TopRight,
    Left,
    #[default]
    Center,
    Right,
    BottomLeft,
    Bottom,
    BottomRight,
}

/// Where along one axis an anchor sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alignment {
    Start,
    Middle,
    End,
}

impl CropPosition {
    pub const ALL: [CropPosition; 9] = [
        CropPosition::TopLeft,
        CropPosition::Top,
        CropPosition::TopRight,
        CropPosition::Left,
        CropPosition::Center,
        CropPosition::Right,
        CropPosition::BottomLeft,
        CropPosition::Bottom,
        CropPosition::BottomRight,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CropPosition::TopLeft => "top-left",
            CropPosition::Top => "top",
            CropPosition::TopRight => "top-right",
            CropPosition::Left => "left",
            CropPosition::Center => "center",
            CropPosition::Right => "right",
            CropPosition::BottomLeft => "bottom-left",
            CropPosition::Bottom => "bottom",
            CropPosition::BottomRight => "bottom-right",
        }
    }

    pub fn horizontal(self) -> Alignment {
        match self {
            CropPosition::TopLeft | CropPosition::Left | CropPosition::BottomLeft => {
                Alignment::Start
            }
            CropPosition::Top | CropPosition::Center | CropPosition::Bottom => Alignment::Middle,
            CropPosition::TopRight | CropPosition::Right | CropPosition::BottomRight => {
                Alignment::End
            }
        }
    }

    pub fn vertical(self) -> Alignment {
        match self {
            CropPosition::TopLeft | CropPosition::Top | CropPosition::TopRight => Alignment::Start,
            CropPosition::Left | CropPosition::Center | CropPosition::Right => Alignment::Middle,
            CropPosition::BottomLeft | CropPosition::Bottom | CropPosition::BottomRight => {
                Alignment::End
            }
        }
    }
}

impl fmt::Display for CropPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CropPosition {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CropPosition::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ConfigurationError::InvalidCropPosition(s.to_string()))
    }
}

/// An explicit crop rectangle for one breakpoint.
///
/// Without `x`/`y` the engine crops `width × height` around the context's
/// anchor; with both it crops at exactly that pixel offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropData {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub x: Option<u32>,
    #[serde(default)]
    pub y: Option<u32>,
}

impl CropData {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            x: None,
            y: None,
        }
    }

    pub fn at(width: u32, height: u32, x: u32, y: u32) -> Self {
        Self {
            width,
            height,
            x: Some(x),
            y: Some(y),
        }
    }

    /// `Some((x, y))` only when both offsets are set.
    pub fn offset(&self) -> Option<(u32, u32)> {
        self.x.zip(self.y)
    }
}

/// Crop data keyed by breakpoint. Always holds one entry per breakpoint.
pub type CropDataMap = BTreeMap<String, Option<CropData>>;

/// Fill in every breakpoint from a partial map; unknown keys are dropped.
pub fn normalize_crop_data(breakpoints: &Breakpoints, partial: &CropDataMap) -> CropDataMap {
    breakpoints
        .keys()
        .map(|key| (key.to_string(), partial.get(key).copied().flatten()))
        .collect()
}

/// The same crop (or none) for every breakpoint.
pub fn uniform_crop_data(breakpoints: &Breakpoints, crop: Option<CropData>) -> CropDataMap {
    breakpoints
        .keys()
        .map(|key| (key.to_string(), crop))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_string_form() {
        let ar = AspectRatio::new(16, 9).unwrap();
        assert_eq!(ar.to_string(), "16:9");
        assert_eq!("16:9".parse::<AspectRatio>().unwrap(), ar);
        assert_eq!(" 4 : 3 ".parse::<AspectRatio>().unwrap().as_tuple(), (4, 3));
    }

    #[test]
    fn aspect_ratio_rejects_zero_and_garbage() {
        assert!(AspectRatio::new(0, 1).is_err());
        assert!("1:0".parse::<AspectRatio>().is_err());
        assert!("16x9".parse::<AspectRatio>().is_err());
        assert!("a:b".parse::<AspectRatio>().is_err());
    }

    #[test]
    fn aspect_ratio_serializes_as_string() {
        let json = serde_json::to_string(&AspectRatio::new(3, 2).unwrap()).unwrap();
        assert_eq!(json, "\"3:2\"");
        let back: AspectRatio = serde_json::from_str(&json).unwrap();
        assert_eq!(back.as_tuple(), (3, 2));
    }

    #[test]
    fn crop_position_parses_kebab_case() {
        assert_eq!(
            "bottom-right".parse::<CropPosition>().unwrap(),
            CropPosition::BottomRight
        );
        assert!("middle".parse::<CropPosition>().is_err());
        assert_eq!(CropPosition::default(), CropPosition::Center);
    }

    #[test]
    fn crop_position_alignment() {
        assert_eq!(CropPosition::TopRight.horizontal(), Alignment::End);
        assert_eq!(CropPosition::TopRight.vertical(), Alignment::Start);
        assert_eq!(CropPosition::Center.vertical(), Alignment::Middle);
    }

    #[test]
    fn crop_data_offset_requires_both() {
        assert_eq!(CropData::at(10, 10, 1, 2).offset(), Some((1, 2)));
        let partial = CropData {
            x: Some(1),
            ..CropData::new(10, 10)
        };
        assert_eq!(partial.offset(), None);
    }

    #[test]
    fn normalize_fills_every_breakpoint() {
        let bps = Breakpoints::default();
        let mut partial = CropDataMap::new();
        partial.insert("md".into(), Some(CropData::new(100, 100)));
        partial.insert("bogus".into(), Some(CropData::new(1, 1)));

        let map = normalize_crop_data(&bps, &partial);
        assert_eq!(map.len(), bps.len());
        assert_eq!(map["md"], Some(CropData::new(100, 100)));
        assert_eq!(map["sm"], None);
        assert!(!map.contains_key("bogus"));
    }
}
