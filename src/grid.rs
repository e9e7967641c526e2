// grid.rs — Row-major f32 surfaces.
//
// Three shapes flow through the benchmark:
//
//   BorderedArray   (w+2r)×(h+2r)   host input, halo ring around the data
//   Grid            any extent       device input/output regions
//   ResultArray     w×h              logical result, no border
//
// Memory layout of a BorderedArray (w=4, h=2, r=1):
//
//   padded col:  0   1   2   3   4   5
//   row 0:       ·   ·   ·   ·   ·   ·      · = halo cell
//   row 1:       ·  (0,0)(1,0)(2,0)(3,0) ·
//   row 2:       ·  (0,1)(1,1)(2,1)(3,1) ·
//   row 3:       ·   ·   ·   ·   ·   ·
//
//   logical (x, y) lives at padded offset (x + r) + (y + r) * (w + 2r).
//
// Halo cells hold whatever the generator wrote (zero, ramp, random). They
// are only ever read as stencil taps reaching past the logical edge.

use std::fmt;

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Extent
// ---------------------------------------------------------------------------

/// A width/height pair, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Extent {
    pub width: usize,
    pub height: usize,
}

impl Extent {
    pub const fn new(width: usize, height: usize) -> Self {
        Extent { width, height }
    }

    #[inline]
    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// True if `other` placed at the origin fits inside `self`.
    #[inline]
    pub fn contains(&self, other: Extent) -> bool {
        other.width <= self.width && other.height <= self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.width, self.height)
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// A dense 2D f32 buffer. Stride always equals width; surfaces that need a
/// wider stride are simply allocated wider and tracked by a `LayoutPlan`.
#[derive(Clone, PartialEq)]
pub struct Grid {
    data: Vec<f32>,
    width: usize,
    height: usize,
}

/// The logical `w×h` output of a correlation.
pub type ResultArray = Grid;

impl Grid {
    /// Zero-initialised grid.
    pub fn new(extent: Extent) -> Self {
        Grid {
            data: vec![0.0; extent.area()],
            width: extent.width,
            height: extent.height,
        }
    }

    /// Wrap an existing row-major buffer.
    ///
    /// # Panics
    /// Panics if `data.len() != extent.area()`.
    pub fn from_vec(extent: Extent, data: Vec<f32>) -> Self {
        assert_eq!(
            data.len(),
            extent.area(),
            "data length ({}) must equal width * height ({})",
            data.len(),
            extent.area(),
        );
        Grid { data, width: extent.width, height: extent.height }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// # Panics
    /// Panics if `(x, y)` is out of bounds.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.bounds_check(x, y);
        self.data[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        self.bounds_check(x, y);
        self.data[y * self.width + x] = value;
    }

    pub fn row(&self, y: usize) -> &[f32] {
        assert!(y < self.height, "row {y} out of bounds (height {})", self.height);
        let start = y * self.width;
        &self.data[start..start + self.width]
    }

    /// Iterate over all cells as `(x, y, value)`.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, f32)> + '_ {
        (0..self.height).flat_map(move |y| {
            (0..self.width).map(move |x| (x, y, self.data[y * self.width + x]))
        })
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    #[inline]
    fn bounds_check(&self, x: usize, y: usize) {
        assert!(
            x < self.width && y < self.height,
            "cell ({x},{y}) out of bounds for grid {}×{}",
            self.width,
            self.height,
        );
    }
}

impl std::ops::Index<(usize, usize)> for Grid {
    type Output = f32;

    #[inline]
    fn index(&self, (x, y): (usize, usize)) -> &f32 {
        self.bounds_check(x, y);
        &self.data[y * self.width + x]
    }
}

// Truncated dump, for assertion messages.
impl fmt::Debug for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Grid {{ {}×{} }}", self.width, self.height)?;
        for y in 0..self.height.min(8) {
            write!(f, "  row {y}: [")?;
            for x in 0..self.width.min(16) {
                if x > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{:?}", self.get(x, y))?;
            }
            if self.width > 16 {
                write!(f, ", ...")?;
            }
            writeln!(f, "]")?;
        }
        if self.height > 8 {
            writeln!(f, "  ...")?;
        }
        Ok(())
    }
}

// Full table, twelve columns wide with two decimals per value. Only sensible
// for small debug runs.
impl fmt::Display for Grid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for y in 0..self.height {
            for v in self.row(y) {
                write!(f, "{v:>12.2}, ")?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// BorderedArray
// ---------------------------------------------------------------------------

/// Logical `w×h` array surrounded by a halo ring of width `radius`.
#[derive(Clone, PartialEq)]
pub struct BorderedArray {
    padded: Grid,
    width: usize,
    height: usize,
    radius: usize,
}

impl BorderedArray {
    /// Zero-filled array, halo included.
    pub fn new(width: usize, height: usize, radius: usize) -> Result<Self, ConfigError> {
        check_extent(width, height)?;
        let padded = Grid::new(Extent::new(width + 2 * radius, height + 2 * radius));
        Ok(BorderedArray { padded, width, height, radius })
    }

    /// Wrap a flat `(w+2r)×(h+2r)` buffer, halo included.
    pub fn from_padded(
        width: usize,
        height: usize,
        radius: usize,
        data: Vec<f32>,
    ) -> Result<Self, ConfigError> {
        check_extent(width, height)?;
        let extent = Extent::new(width + 2 * radius, height + 2 * radius);
        if data.len() != extent.area() {
            return Err(ConfigError::BufferLength { expected: extent.area(), actual: data.len() });
        }
        Ok(BorderedArray { padded: Grid::from_vec(extent, data), width, height, radius })
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Logical extent `w×h`.
    pub fn extent(&self) -> Extent {
        Extent::new(self.width, self.height)
    }

    /// Physical extent `(w+2r)×(h+2r)`.
    pub fn padded_extent(&self) -> Extent {
        self.padded.extent()
    }

    /// Row stride of the physical buffer, `w + 2r`.
    #[inline]
    pub fn stride(&self) -> usize {
        self.padded.width()
    }

    /// Value at logical `(x, y)`.
    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        assert!(
            x < self.width && y < self.height,
            "logical cell ({x},{y}) out of bounds for {}×{}",
            self.width,
            self.height,
        );
        self.padded.get(x + self.radius, y + self.radius)
    }

    /// Value at physical `(px, py)`, halo included.
    #[inline]
    pub fn get_padded(&self, px: usize, py: usize) -> f32 {
        self.padded.get(px, py)
    }

    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        assert!(x < self.width && y < self.height);
        self.padded.set(x + self.radius, y + self.radius, value);
    }

    pub fn set_padded(&mut self, px: usize, py: usize, value: f32) {
        self.padded.set(px, py, value);
    }

    /// True if physical `(px, py)` lies in the halo ring.
    pub fn is_halo(&self, px: usize, py: usize) -> bool {
        let r = self.radius;
        px < r || py < r || px >= self.width + r || py >= self.height + r
    }

    /// The whole physical buffer.
    pub fn padded(&self) -> &Grid {
        &self.padded
    }

    /// Copy of the logical cells without the halo.
    pub fn interior(&self) -> Grid {
        let mut out = Grid::new(self.extent());
        for y in 0..self.height {
            for x in 0..self.width {
                out.set(x, y, self.get(x, y));
            }
        }
        out
    }
}

impl fmt::Debug for BorderedArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BorderedArray {{ {}×{}, r={} }} ", self.width, self.height, self.radius)?;
        fmt::Debug::fmt(&self.padded, f)
    }
}

fn check_extent(width: usize, height: usize) -> Result<(), ConfigError> {
    if width == 0 || height == 0 {
        return Err(ConfigError::EmptyExtent { width, height });
    }
    Ok(())
}
