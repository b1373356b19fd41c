//! Rectangle arithmetic in page space.
//!
//! All rectangles use a **top-left origin**: `x` grows to the right and `y`
//! grows downward, measured in points from the top-left corner of the page's
//! media box. This is the orientation users reason in ("the name line sits
//! above the title line" means a smaller `y`). Conversion to native PDF
//! user space happens in [`PageFrame`].

use lopdf::{Document, Object, ObjectId};

/// Axis-aligned rectangle `(x0, y0, x1, y1)` with `x0 <= x1` and `y0 <= y1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x0: f32,
    pub y0: f32,
    pub x1: f32,
    pub y1: f32,
}

impl Rect {
    /// Build a rectangle, swapping coordinates so the invariant holds.
    pub fn new(x0: f32, y0: f32, x1: f32, y1: f32) -> Self {
        Rect {
            x0: x0.min(x1),
            y0: y0.min(y1),
            x1: x0.max(x1),
            y1: y0.max(y1),
        }
    }

    pub fn width(&self) -> f32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> f32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center_y(&self) -> f32 {
        (self.y0 + self.y1) * 0.5
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }

    /// Smallest rectangle containing both.
    pub fn union(&self, other: &Rect) -> Rect {
        Rect {
            x0: self.x0.min(other.x0),
            y0: self.y0.min(other.y0),
            x1: self.x1.max(other.x1),
            y1: self.y1.max(other.y1),
        }
    }

    /// Overlap of two rectangles, `None` when they share no positive area.
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x0 = self.x0.max(other.x0);
        let y0 = self.y0.max(other.y0);
        let x1 = self.x1.min(other.x1);
        let y1 = self.y1.min(other.y1);
        if x1 > x0 && y1 > y0 {
            Some(Rect { x0, y0, x1, y1 })
        } else {
            None
        }
    }

    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    pub fn contains(&self, other: &Rect) -> bool {
        self.x0 <= other.x0 && self.y0 <= other.y0 && self.x1 >= other.x1 && self.y1 >= other.y1
    }

    /// Expand by `ratio` of the rectangle's own width (left and right) and
    /// height (top and bottom). Negative ratios are treated as zero.
    pub fn padded(&self, ratio: f32) -> Rect {
        let ratio = ratio.max(0.0);
        let pad_x = self.width() * ratio;
        let pad_y = self.height() * ratio;
        Rect {
            x0: self.x0 - pad_x,
            y0: self.y0 - pad_y,
            x1: self.x1 + pad_x,
            y1: self.y1 + pad_y,
        }
    }

    /// Band shifted vertically relative to this rectangle's top edge.
    ///
    /// Top edge is `y0 - height * top_factor`, bottom edge is
    /// `y0 - height * bottom_factor`. With `top_factor > bottom_factor > 0`
    /// the band sits above the rectangle.
    pub fn offset_band(&self, top_factor: f32, bottom_factor: f32) -> Rect {
        let h = self.height();
        Rect::new(
            self.x0,
            self.y0 - h * top_factor,
            self.x1,
            self.y0 - h * bottom_factor,
        )
    }

    /// Same width, new height, centred on this rectangle's vertical midpoint.
    pub fn with_height_centered(&self, height: f32) -> Rect {
        let mid = self.center_y();
        Rect {
            x0: self.x0,
            y0: mid - height * 0.5,
            x1: self.x1,
            y1: mid + height * 0.5,
        }
    }
}

/// Grow rectangles so that text at a given size always has room for a line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizingPolicy {
    /// Font size the unmodified rectangle is assumed to be drawn for.
    pub reference_size: f32,
    /// Extra head-room multiplier applied on proportional growth.
    pub safety_factor: f32,
}

impl Default for SizingPolicy {
    fn default() -> Self {
        SizingPolicy {
            reference_size: 11.0,
            safety_factor: 1.2,
        }
    }
}

impl SizingPolicy {
    /// Return a rectangle tall enough for at least one line at `size`.
    ///
    /// Sizes above the reference grow the height by `size / reference *
    /// safety`. Independently the height never drops below `2 * size`.
    /// Either adjustment keeps the original vertical midpoint.
    pub fn fit(&self, rect: &Rect, size: f32) -> Rect {
        let mut fitted = *rect;
        if self.reference_size > 0.0 && size > self.reference_size {
            let grown = rect.height() * (size / self.reference_size) * self.safety_factor;
            if grown > fitted.height() {
                fitted = rect.with_height_centered(grown);
            }
        }
        let floor = 2.0 * size;
        if fitted.height() < floor {
            fitted = rect.with_height_centered(floor);
        }
        fitted
    }
}

/// Mapping between top-left page rectangles and PDF user space for one page.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PageFrame {
    /// Media box in PDF user space `[llx, lly, urx, ury]`.
    pub media_box: [f32; 4],
    pub rotate: i64,
}

impl PageFrame {
    /// Read `/MediaBox` and `/Rotate` for a page, walking the page tree for
    /// inherited values. Falls back to US Letter.
    pub fn for_page(doc: &Document, page_id: ObjectId) -> PageFrame {
        let media_box = inherited(doc, page_id, b"MediaBox")
            .and_then(|obj| match resolve(doc, obj) {
                Object::Array(arr) if arr.len() == 4 => {
                    let v: Vec<f32> = arr.iter().filter_map(number).collect();
                    if v.len() == 4 {
                        Some([v[0].min(v[2]), v[1].min(v[3]), v[0].max(v[2]), v[1].max(v[3])])
                    } else {
                        None
                    }
                }
                _ => None,
            })
            .unwrap_or([0.0, 0.0, 612.0, 792.0]);
        let rotate = inherited(doc, page_id, b"Rotate")
            .and_then(|obj| match resolve(doc, obj) {
                Object::Integer(n) => Some(n.rem_euclid(360)),
                _ => None,
            })
            .unwrap_or(0);
        PageFrame { media_box, rotate }
    }

    pub fn width(&self) -> f32 {
        self.media_box[2] - self.media_box[0]
    }

    pub fn height(&self) -> f32 {
        self.media_box[3] - self.media_box[1]
    }

    /// Page rectangle `(0, 0, width, height)`.
    pub fn rect(&self) -> Rect {
        Rect::new(0.0, 0.0, self.width(), self.height())
    }

    /// PDF user-space point to top-left page point.
    pub fn to_page(&self, x: f32, y: f32) -> (f32, f32) {
        (x - self.media_box[0], self.media_box[3] - y)
    }

    /// Top-left page point to PDF user-space point.
    pub fn to_user(&self, x: f32, y: f32) -> (f32, f32) {
        (x + self.media_box[0], self.media_box[3] - y)
    }

    /// Rectangle in user space as `(x, y, width, height)` for the `re` operator.
    pub fn user_re(&self, rect: &Rect) -> (f32, f32, f32, f32) {
        let (x, y) = self.to_user(rect.x0, rect.y1);
        (x, y, rect.width(), rect.height())
    }
}

/// Look up a page attribute, following `/Parent` for inheritable keys.
pub(crate) fn inherited<'a>(doc: &'a Document, page_id: ObjectId, key: &[u8]) -> Option<&'a Object> {
    let mut current = page_id;
    // Bounded walk in case of a cyclic page tree.
    for _ in 0..32 {
        let dict = doc.get_object(current).ok()?.as_dict().ok()?;
        if let Ok(value) = dict.get(key) {
            return Some(value);
        }
        match dict.get(b"Parent") {
            Ok(Object::Reference(parent)) => current = *parent,
            _ => return None,
        }
    }
    None
}

/// Resolve an indirect reference to the underlying object.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

/// Numeric value of an Integer or Real object.
pub(crate) fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(n) => Some(*n as f32),
        Object::Real(r) => Some(*r),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_new_normalizes_corners() {
        let r = Rect::new(10.0, 40.0, 5.0, 20.0);
        assert_eq!(r, Rect { x0: 5.0, y0: 20.0, x1: 10.0, y1: 40.0 });
    }

    #[test]
    fn test_padded_grows_symmetrically() {
        let r = Rect::new(100.0, 200.0, 300.0, 220.0);
        let p = r.padded(0.2);
        // 0.2 * 200 = 40 horizontally, 0.2 * 20 = 4 vertically
        assert!(approx(p.x0, 60.0));
        assert!(approx(p.x1, 340.0));
        assert!(approx(p.y0, 196.0));
        assert!(approx(p.y1, 224.0));
        assert!(p.contains(&r));
    }

    #[test]
    fn test_padded_strictly_contains_for_positive_ratio() {
        for ratio in [0.12f32, 0.15, 0.2, 0.22, 1.0] {
            let r = Rect::new(12.5, 80.0, 48.0, 91.0);
            let p = r.padded(ratio);
            assert!(p.x0 < r.x0 && p.y0 < r.y0 && p.x1 > r.x1 && p.y1 > r.y1);
            assert!(approx(r.x0 - p.x0, ratio * r.width()));
            assert!(approx(p.y1 - r.y1, ratio * r.height()));
        }
    }

    #[test]
    fn test_padded_negative_ratio_is_identity() {
        let r = Rect::new(1.0, 2.0, 3.0, 4.0);
        assert_eq!(r.padded(-0.5), r);
    }

    #[test]
    fn test_offset_band_above_anchor() {
        let anchor = Rect::new(50.0, 500.0, 250.0, 512.0);
        let band = anchor.offset_band(1.8, 0.4);
        assert!(approx(band.y0, 500.0 - 12.0 * 1.8));
        assert!(approx(band.y1, 500.0 - 12.0 * 0.4));
        assert!(band.y1 <= anchor.y0);
        assert_eq!(band.x0, anchor.x0);
        assert_eq!(band.x1, anchor.x1);
    }

    #[test]
    fn test_offset_band_swapped_factors_still_valid() {
        let anchor = Rect::new(0.0, 100.0, 10.0, 110.0);
        let band = anchor.offset_band(0.2, 1.5);
        assert!(band.y0 <= band.y1);
        assert!(approx(band.height(), 13.0));
    }

    #[test]
    fn test_intersection() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let b = Rect::new(5.0, 5.0, 15.0, 15.0);
        let c = Rect::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.intersection(&b), Some(Rect::new(5.0, 5.0, 10.0, 10.0)));
        // Touching edges share no area
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_sizing_floor_applies_below_reference() {
        let policy = SizingPolicy::default();
        let r = Rect::new(0.0, 100.0, 200.0, 108.0);
        let fitted = policy.fit(&r, 10.0);
        assert!(approx(fitted.height(), 20.0));
        assert!(approx(fitted.center_y(), r.center_y()));
    }

    #[test]
    fn test_sizing_proportional_growth() {
        let policy = SizingPolicy::default();
        let r = Rect::new(0.0, 100.0, 200.0, 160.0);
        let fitted = policy.fit(&r, 22.0);
        // 60 * 22/11 * 1.2 = 144 > 2 * 22
        assert!(approx(fitted.height(), 144.0));
        assert!(approx(fitted.center_y(), 130.0));
    }

    #[test]
    fn test_sizing_monotonic_and_floored() {
        let policy = SizingPolicy::default();
        let r = Rect::new(10.0, 300.0, 90.0, 312.0);
        let mut last = 0.0f32;
        let mut size = 11.5f32;
        while size < 60.0 {
            let h = policy.fit(&r, size).height();
            assert!(h + 1e-3 >= last, "height shrank at size {}", size);
            assert!(h + 1e-3 >= 2.0 * size);
            last = h;
            size += 0.5;
        }
    }

    #[test]
    fn test_page_frame_conversion() {
        let frame = PageFrame {
            media_box: [0.0, 0.0, 612.0, 792.0],
            rotate: 0,
        };
        assert_eq!(frame.to_page(100.0, 700.0), (100.0, 92.0));
        assert_eq!(frame.to_user(100.0, 92.0), (100.0, 700.0));
        let (x, y, w, h) = frame.user_re(&Rect::new(10.0, 20.0, 30.0, 50.0));
        assert_eq!((x, y, w, h), (10.0, 742.0, 20.0, 30.0));
    }
}
