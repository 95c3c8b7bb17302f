//! Regular sampling patterns over a pixel rectangle.

use crate::types::PixelRegion;

/// Sample grid over a rectangle that reaches, or slightly overshoots, the
/// far edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stepping {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
    pub point_count_x: i32,
    pub point_count_y: i32,
    pub step_x: i32,
    pub step_y: i32,
}

impl Stepping {
    /// Derives the stepping for `region` with at most roughly `max_point_count`
    /// samples.
    ///
    /// Steps on both axes grow alternately until the budget is met, so square
    /// rectangles get equal steps. A final extra sample is added when the last
    /// one would fall short of the far edge.
    pub fn compute(region: &PixelRegion, max_point_count: usize) -> Self {
        let width = region.width.max(1);
        let height = region.height.max(1);
        let budget = max_point_count.max(1) as i64;

        let mut step_x = 1;
        let mut step_y = 1;
        let mut count_x = width;
        let mut count_y = height;
        let mut adjust_x = true;

        while count_x as i64 * count_y as i64 > budget {
            if adjust_x {
                step_x += 1;
                count_x = width / step_x + 1;
            } else {
                step_y += 1;
                count_y = height / step_y + 1;
            }
            adjust_x = !adjust_x;
            if step_x >= width && step_y >= height {
                break;
            }
        }

        count_x = count_x.max(1);
        count_y = count_y.max(1);
        if (count_x - 1) * step_x < width - 1 {
            count_x += 1;
        }
        if (count_y - 1) * step_y < height - 1 {
            count_y += 1;
        }

        Self {
            min_x: region.x,
            min_y: region.y,
            max_x: region.x + width - 1,
            max_y: region.y + height - 1,
            point_count_x: count_x,
            point_count_y: count_y,
            step_x,
            step_y,
        }
    }

    pub fn point_count(&self) -> usize {
        (self.point_count_x.max(0) as usize) * (self.point_count_y.max(0) as usize)
    }

    /// Sample pixel coordinates, row by row, clipped to `[min, max]`.
    pub fn points(&self) -> Vec<(i32, i32)> {
        let mut points = Vec::with_capacity(self.point_count());
        for j in 0..self.point_count_y {
            let y = (self.min_y + j * self.step_y).min(self.max_y);
            for i in 0..self.point_count_x {
                let x = (self.min_x + i * self.step_x).min(self.max_x);
                points.push((x, y));
            }
        }
        points
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_stepping() {
        let stepping = Stepping::compute(&PixelRegion::new(0, 0, 512, 512), 1000);
        assert_eq!(stepping.min_x, 0);
        assert_eq!(stepping.min_y, 0);
        assert_eq!(stepping.max_x, 511);
        assert_eq!(stepping.max_y, 511);
        assert_eq!(stepping.point_count_x, 32);
        assert_eq!(stepping.point_count_y, 32);
        assert_eq!(stepping.step_x, 17);
        assert_eq!(stepping.step_y, 17);
    }

    #[test]
    fn test_stepping_reaches_far_edge() {
        for (w, h, budget) in [(100, 37, 50), (7, 300, 20), (1000, 10, 400), (3, 3, 1000)] {
            let s = Stepping::compute(&PixelRegion::new(5, 9, w, h), budget);
            assert!(s.min_x + s.step_x * (s.point_count_x - 1) >= s.max_x);
            assert!(s.min_y + s.step_y * (s.point_count_y - 1) >= s.max_y);
            if s.point_count_x > 1 {
                assert!(s.min_x + s.step_x * (s.point_count_x - 2) < s.max_x);
            }
            if s.point_count_y > 1 {
                assert!(s.min_y + s.step_y * (s.point_count_y - 2) < s.max_y);
            }
        }
    }

    #[test]
    fn test_points_are_clipped() {
        let s = Stepping::compute(&PixelRegion::new(0, 0, 10, 10), 16);
        let points = s.points();
        assert_eq!(points.len(), s.point_count());
        assert!(points.iter().all(|&(x, y)| x <= 9 && y <= 9));
        assert_eq!(points.last(), Some(&(9, 9)));
    }
}
