//! Smoothing and simplification of traced loops.

use super::contour::Vertex;

pub type Point = (f64, f64);

/// Replace each unit edge by its midpoint.
///
/// Staircase corners become diagonals, so the simplifier below sees the slope
/// of a jagged edge rather than its pixel steps.
pub fn edge_midpoints(points: &[Vertex]) -> Vec<Point> {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            (
                (f64::from(x0) + f64::from(x1)) / 2.0,
                (f64::from(y0) + f64::from(y1)) / 2.0,
            )
        })
        .collect()
}

/// Ramer-Douglas-Peucker on a closed polygon.
///
/// The polygon is split at the point farthest from the first one and each
/// half is simplified as an open polyline. A non-positive tolerance keeps
/// every point.
pub fn simplify_closed(points: &[Point], tolerance: f64) -> Vec<Point> {
    let n = points.len();
    if n <= 3 || tolerance <= 0.0 {
        return points.to_vec();
    }

    let anchor = points[0];
    let split = (1..n)
        .max_by(|&a, &b| {
            squared_distance(points[a], anchor).total_cmp(&squared_distance(points[b], anchor))
        })
        .unwrap_or(n / 2);

    let mut keep = vec![false; n + 1];
    keep[0] = true;
    keep[split] = true;
    keep[n] = true;

    // Second half wraps back to the anchor.
    let mut ring: Vec<Point> = points.to_vec();
    ring.push(anchor);

    mark(&ring, 0, split, tolerance, &mut keep);
    mark(&ring, split, n, tolerance, &mut keep);

    (0..n).filter(|&i| keep[i]).map(|i| ring[i]).collect()
}

/// Iterative RDP over `points[first..=last]`, marking survivors in `keep`.
fn mark(points: &[Point], first: usize, last: usize, tolerance: f64, keep: &mut [bool]) {
    let mut stack = vec![(first, last)];
    let tolerance2 = tolerance * tolerance;

    while let Some((a, b)) = stack.pop() {
        if b <= a + 1 {
            continue;
        }

        let mut farthest = a;
        let mut farthest_distance = 0.0;
        for i in (a + 1)..b {
            let d = segment_distance2(points[i], points[a], points[b]);
            if d > farthest_distance {
                farthest = i;
                farthest_distance = d;
            }
        }

        if farthest_distance > tolerance2 {
            keep[farthest] = true;
            stack.push((a, farthest));
            stack.push((farthest, b));
        }
    }
}

#[inline]
fn squared_distance(a: Point, b: Point) -> f64 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    dx * dx + dy * dy
}

/// Squared distance from `p` to the segment `a`-`b`.
fn segment_distance2(p: Point, a: Point, b: Point) -> f64 {
    let length2 = squared_distance(a, b);
    if length2 == 0.0 {
        return squared_distance(p, a);
    }
    let t = (((p.0 - a.0) * (b.0 - a.0) + (p.1 - a.1) * (b.1 - a.1)) / length2).clamp(0.0, 1.0);
    squared_distance(p, (a.0 + t * (b.0 - a.0), a.1 + t * (b.1 - a.1)))
}
