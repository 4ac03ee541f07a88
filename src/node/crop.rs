//! Crop and resize geometry
//!
//! The full-size port always reads the whole sensor. The resizer port
//! defaults to the whole sensor scaled into its buffer; a scaler crop
//! region on the request narrows that, subject to the resize ratio limit.

use crate::action::record::CropInfo;
use crate::config::PortConfig;
use crate::types::{OutPort, Rect, Size};
use tracing::{trace, warn};

#[inline]
fn align_up_even(v: u32) -> u32 {
    v.saturating_add(v & 1)
}

/// Crop and destination of the resizer for a requested region.
///
/// Returns `None` when the region covers the whole sensor, falls outside
/// it, or would need more downscale than `ratio_percent` allows; the
/// caller then keeps the default.
pub(crate) fn resizer_crop(query: Rect, sensor: Size, buf: Size, ratio_percent: u32) -> Option<(Rect, Size)> {
    if query == Rect::of(sensor) || query.s.is_empty() {
        return None;
    }
    let (x, y) = (query.p.x, query.p.y);
    if x < 0
        || y < 0
        || x as u64 + u64::from(query.s.w) > u64::from(sensor.w)
        || y as u64 + u64::from(query.s.h) > u64::from(sensor.h)
    {
        warn!(%query, %sensor, "crop region out of sensor");
        return None;
    }
    let ratio = u64::from(ratio_percent);
    let mut crop = query;
    let mut dst = buf;

    if crop.s.w < buf.w {
        dst.w = crop.s.w.min(sensor.w);
        crop.s.w = dst.w;
    } else if u64::from(crop.s.w) * ratio > u64::from(buf.w) * 100 {
        warn!(crop_w = crop.s.w, buf_w = buf.w, ratio_percent, "resize ratio exceeded (width)");
        return None;
    } else {
        dst.w = buf.w;
    }

    if crop.s.h < buf.h {
        dst.h = align_up_even(crop.s.h).min(sensor.h);
        crop.s.h = dst.h;
        let bottom = crop.p.y as u64 + u64::from(crop.s.h);
        if bottom > u64::from(sensor.h) {
            crop.p.y = (sensor.h - crop.s.h) as i32;
        }
    } else if u64::from(crop.s.h) * ratio > u64::from(buf.h) * 100 {
        warn!(crop_h = crop.s.h, buf_h = buf.h, ratio_percent, "resize ratio exceeded (height)");
        return None;
    } else {
        dst.h = buf.h;
    }
    Some((crop, dst))
}

/// Compute the crop info of one action
pub(crate) fn compute_crop(
    sensor: Size,
    ports: &PortConfig,
    scaler_crop: Option<Rect>,
    ratio_percent: u32,
) -> CropInfo {
    let mut info = CropInfo {
        sensor,
        full_crop: Rect::of(sensor),
        full_dst: ports.size(OutPort::Imgo).unwrap_or(sensor),
        resize_crop: Rect::of(sensor),
        resize_dst: ports.size(OutPort::Rrzo).unwrap_or_default(),
        scaler_crop,
    };
    if let (Some(query), Some(buf)) = (scaler_crop, ports.size(OutPort::Rrzo)) {
        if let Some((crop, dst)) = resizer_crop(query, sensor, buf, ratio_percent) {
            trace!(%crop, %dst, "resizer crop from request");
            info.resize_crop = crop;
            info.resize_dst = dst;
        }
    }
    info
}

/// Whether an override of the resizer output is usable
pub(crate) fn resize_valid(crop: Rect, dst: Size, sensor: Size) -> bool {
    !crop.s.is_empty()
        && !dst.is_empty()
        && crop.p.x >= 0
        && crop.p.y >= 0
        && crop.p.x as u64 + u64::from(crop.s.w) <= u64::from(sensor.w)
        && crop.p.y as u64 + u64::from(crop.s.h) <= u64::from(sensor.h)
        && dst.w <= crop.s.w
        && dst.h <= crop.s.h
}
