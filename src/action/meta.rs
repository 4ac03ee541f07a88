//! Metadata containers
//!
//! [`Metadata`] is an ordered tag/value store standing in for the camera
//! framework's metadata buffers. [`MetaSet`] bundles the app and hal
//! control metadata of one action; it is what travels to 3A in `set`,
//! `preset` and the start calls.

use super::id::{ActId, MagicNum};
use crate::types::{Rect, Size};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata tags understood by the node
pub mod tag {
    // App control / result tags
    pub const CONTROL_CAPTURE_INTENT: u32 = 0x0001_0001;
    pub const CONTROL_ENABLE_ZSL: u32 = 0x0001_0002;
    pub const SCALER_CROP_REGION: u32 = 0x0001_0003;
    pub const REQUEST_FRAME_COUNT: u32 = 0x0001_0004;
    pub const REQUEST_METADATA_MODE: u32 = 0x0001_0005;
    pub const SENSOR_TIMESTAMP: u32 = 0x0001_0006;
    pub const SENSOR_ROLLING_SHUTTER_SKEW: u32 = 0x0001_0007;
    pub const SENSOR_EXPOSURE_TIME: u32 = 0x0001_0008;

    // App tags stripped from per-frame 3A results
    pub const TONEMAP_CURVE_RED: u32 = 0x0001_0101;
    pub const TONEMAP_CURVE_GREEN: u32 = 0x0001_0102;
    pub const TONEMAP_CURVE_BLUE: u32 = 0x0001_0103;
    pub const EDGE_MODE: u32 = 0x0001_0104;
    pub const NOISE_REDUCTION_MODE: u32 = 0x0001_0105;
    pub const JPEG_THUMBNAIL_SIZE: u32 = 0x0001_0106;

    // Hal tags
    pub const HAL_SENSOR_CTRL: u32 = 0x0002_0001;
    pub const HAL_RAW_TYPE: u32 = 0x0002_0002;
    pub const HAL_SENSOR_MODE: u32 = 0x0002_0003;
    pub const HAL_PIPELINE_FRAME_NUMBER: u32 = 0x0002_0004;
    pub const HAL_BIN_CROP_REGION: u32 = 0x0002_0005;
    pub const HAL_BIN_SIZE: u32 = 0x0002_0006;
    pub const HAL_SCALAR_CROP_REGION: u32 = 0x0002_0007;
    pub const HAL_DMA_CROP_REGION: u32 = 0x0002_0008;
    pub const HAL_RESIZER_SIZE: u32 = 0x0002_0009;
    pub const HAL_FRAME_START_TIMESTAMP: u32 = 0x0002_000a;
    pub const HAL_FRAME_START_TIMESTAMP_BOOT: u32 = 0x0002_000b;
    pub const HAL_NO_BUFFER_EXCEPTION: u32 = 0x0002_000c;

    /// Capture intent value for still capture
    pub const CAPTURE_INTENT_STILL: i32 = 2;

    // HAL_SENSOR_CTRL values
    pub const SENSOR_CTRL_STANDBY: i32 = 1;
    pub const SENSOR_CTRL_STREAMING: i32 = 2;

    // HAL_RAW_TYPE values
    pub const RAW_TYPE_PROCESSED: i32 = 0;
    pub const RAW_TYPE_PURE: i32 = 1;

    /// Tags removed from Normal 3A results before they are published
    pub const STRIPPED_RESULT_TAGS: [u32; 6] = [
        TONEMAP_CURVE_RED,
        TONEMAP_CURVE_GREEN,
        TONEMAP_CURVE_BLUE,
        EDGE_MODE,
        NOISE_REDUCTION_MODE,
        JPEG_THUMBNAIL_SIZE,
    ];
}

/// A single metadata entry value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MetaValue {
    U8(u8),
    I32(i32),
    I64(i64),
    F32(f32),
    Size(Size),
    Rect(Rect),
    Bytes(Vec<u8>),
}

/// Ordered tag/value store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    entries: BTreeMap<u32, MetaValue>,
}

impl Metadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, tag: u32, value: MetaValue) {
        self.entries.insert(tag, value);
    }

    pub fn get(&self, tag: u32) -> Option<&MetaValue> {
        self.entries.get(&tag)
    }

    pub fn remove(&mut self, tag: u32) -> Option<MetaValue> {
        self.entries.remove(&tag)
    }

    pub fn contains(&self, tag: u32) -> bool {
        self.entries.contains_key(&tag)
    }

    pub fn get_u8(&self, tag: u32) -> Option<u8> {
        match self.get(tag)? {
            MetaValue::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn get_i32(&self, tag: u32) -> Option<i32> {
        match self.get(tag)? {
            MetaValue::I32(v) => Some(*v),
            MetaValue::U8(v) => Some(i32::from(*v)),
            _ => None,
        }
    }

    pub fn get_i64(&self, tag: u32) -> Option<i64> {
        match self.get(tag)? {
            MetaValue::I64(v) => Some(*v),
            MetaValue::I32(v) => Some(i64::from(*v)),
            _ => None,
        }
    }

    pub fn get_rect(&self, tag: u32) -> Option<Rect> {
        match self.get(tag)? {
            MetaValue::Rect(r) => Some(*r),
            _ => None,
        }
    }

    pub fn get_size(&self, tag: u32) -> Option<Size> {
        match self.get(tag)? {
            MetaValue::Size(s) => Some(*s),
            _ => None,
        }
    }

    /// Copy every entry of `other` into `self`, overriding existing tags
    pub fn merge(&mut self, other: &Metadata) {
        for (tag, value) in &other.entries {
            self.entries.insert(*tag, value.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&u32, &MetaValue)> {
        self.entries.iter()
    }
}

/// Control metadata of one action as exchanged with 3A
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetaSet {
    pub magic: MagicNum,
    pub preset_key: ActId,
    /// Set on Internal actions; 3A treats them as cadence fillers
    pub dummy: bool,
    pub app: Metadata,
    pub hal: Metadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_typed_getters() {
        let mut meta = Metadata::new();
        meta.set(tag::CONTROL_ENABLE_ZSL, MetaValue::U8(1));
        meta.set(tag::SENSOR_EXPOSURE_TIME, MetaValue::I64(33_000_000));
        meta.set(tag::SCALER_CROP_REGION, MetaValue::Rect(Rect::new(0, 0, 100, 50)));

        assert_eq!(meta.get_u8(tag::CONTROL_ENABLE_ZSL), Some(1));
        assert_eq!(meta.get_i32(tag::CONTROL_ENABLE_ZSL), Some(1));
        assert_eq!(meta.get_i64(tag::SENSOR_EXPOSURE_TIME), Some(33_000_000));
        assert_eq!(
            meta.get_rect(tag::SCALER_CROP_REGION),
            Some(Rect::new(0, 0, 100, 50))
        );
        assert_eq!(meta.get_rect(tag::CONTROL_ENABLE_ZSL), None);
    }

    #[test]
    fn test_metadata_merge_overrides() {
        let mut base = Metadata::new();
        base.set(1, MetaValue::I32(1));
        base.set(2, MetaValue::I32(2));
        let mut extra = Metadata::new();
        extra.set(2, MetaValue::I32(20));
        extra.set(3, MetaValue::I32(30));

        base.merge(&extra);
        assert_eq!(base.len(), 3);
        assert_eq!(base.get_i32(2), Some(20));
    }

    #[test]
    fn test_meta_set_default() {
        let set = MetaSet::default();
        assert_eq!(set.magic, MagicNum::NULL);
        assert_eq!(set.preset_key, ActId::NULL);
        assert!(!set.dummy);
    }
}
