/// Where a photo lands on screen. Offsets go negative when the photo is
/// cropped to fill the screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl DestRect {
    pub fn is_cropped(&self) -> bool {
        self.x < 0 || self.y < 0
    }
}

/// Fit `src` into `screen`, letterboxing by default. When the aspect ratios
/// differ by no more than `crop_threshold_pct` percent the photo is scaled to
/// cover the screen instead, trimming the overhang rather than leaving thin bars.
pub fn compute_dest_rect(
    src_w: u32,
    src_h: u32,
    screen_w: u32,
    screen_h: u32,
    crop_threshold_pct: u8,
) -> DestRect {
    let iw = src_w.max(1) as f64;
    let ih = src_h.max(1) as f64;
    let sw = screen_w.max(1) as f64;
    let sh = screen_h.max(1) as f64;

    let width_factor = iw / sw;
    let height_factor = ih / sh;
    let contain = width_factor.max(height_factor);
    let aspect_error = (width_factor - height_factor).abs() / contain;
    let factor = if aspect_error <= f64::from(crop_threshold_pct) / 100.0 {
        width_factor.min(height_factor)
    } else {
        contain
    };

    let width = (iw / factor).round().max(1.0) as u32;
    let height = (ih / factor).round().max(1.0) as u32;
    DestRect {
        x: center_offset(width, screen_w),
        y: center_offset(height, screen_h),
        width,
        height,
    }
}

fn center_offset(inner: u32, outer: u32) -> i32 {
    (i64::from(outer) - i64::from(inner)).div_euclid(2) as i32
}
