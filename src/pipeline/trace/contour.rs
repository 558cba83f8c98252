//! Boundary extraction on the pixel grid.
//!
//! Every layer is a binary mask. Each exposed pixel side becomes one directed
//! unit edge between grid vertices, oriented so that the filled pixel lies on
//! the same side of every edge. Outer boundaries and hole boundaries therefore
//! wind in opposite directions, which is what `fill-rule="evenodd"` expects.

use super::quantize::Quantized;

/// A grid vertex. `(x, y)` is the top-left corner of pixel `(x, y)`.
pub type Vertex = (i32, i32);

/// Direction codes. Order matters: `(d + 1) % 4` is a clockwise turn on screen.
const RIGHT: u8 = 0;
const DOWN: u8 = 1;
const LEFT: u8 = 2;
const UP: u8 = 3;
const NONE: u8 = u8::MAX;

#[inline]
fn step(direction: u8) -> (i32, i32) {
    match direction {
        RIGHT => (1, 0),
        DOWN => (0, 1),
        LEFT => (-1, 0),
        _ => (0, -1),
    }
}

/// Binary mask for one palette layer.
#[derive(Debug, Clone)]
pub struct LayerMask {
    pub width: usize,
    pub height: usize,
    cells: Vec<bool>,
}

impl LayerMask {
    pub fn from_quantized(quantized: &Quantized, index: u8) -> Self {
        Self {
            width: quantized.width,
            height: quantized.height,
            cells: quantized.indices.iter().map(|&i| i == index).collect(),
        }
    }

    #[cfg(test)]
    pub fn from_rows(rows: &[&str]) -> Self {
        let height = rows.len();
        let width = rows.first().map(|r| r.len()).unwrap_or(0);
        let cells = rows
            .iter()
            .flat_map(|row| row.bytes().map(|b| b == b'#'))
            .collect();
        Self {
            width,
            height,
            cells,
        }
    }

    /// Out-of-range coordinates read as empty.
    #[inline]
    pub fn get(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return false;
        }
        self.cells[y as usize * self.width + x as usize]
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        !self.cells.iter().any(|&c| c)
    }
}

/// Fold one-pixel-thick runs into the surrounding colour.
///
/// A pixel is thin when both of its horizontal neighbours or both of its
/// vertical neighbours belong to other layers. Thin pixels take the most
/// common index among their four neighbours. One pass, read from a snapshot so
/// the result does not depend on scan order.
pub fn filter_thin_lines(quantized: &mut Quantized) {
    let width = quantized.width;
    let height = quantized.height;
    if width < 3 || height < 3 {
        return;
    }

    let snapshot = quantized.indices.clone();
    let at = |x: usize, y: usize| snapshot[y * width + x];

    for y in 0..height {
        for x in 0..width {
            let own = at(x, y);
            let left = (x > 0).then(|| at(x - 1, y));
            let right = (x + 1 < width).then(|| at(x + 1, y));
            let up = (y > 0).then(|| at(x, y - 1));
            let down = (y + 1 < height).then(|| at(x, y + 1));

            // Image borders do not make a pixel thin.
            let differs = |n: Option<u8>| matches!(n, Some(v) if v != own);
            let thin = (differs(left) && differs(right)) || (differs(up) && differs(down));
            if !thin {
                continue;
            }

            let neighbours: Vec<u8> = [left, right, up, down]
                .into_iter()
                .flatten()
                .filter(|&v| v != own)
                .collect();
            if let Some(replacement) = most_common(&neighbours) {
                quantized.indices[y * width + x] = replacement;
            }
        }
    }
}

fn most_common(values: &[u8]) -> Option<u8> {
    let mut best: Option<(u8, usize)> = None;
    for &candidate in values {
        let count = values.iter().filter(|&&v| v == candidate).count();
        match best {
            Some((_, c)) if c >= count => {}
            _ => best = Some((candidate, count)),
        }
    }
    best.map(|(value, _)| value)
}

/// Trace every closed boundary of `mask`.
///
/// Returned loops list their vertices once, without repeating the start. Each
/// consecutive pair (and last to first) is one unit edge.
pub fn trace_loops(mask: &LayerMask) -> Vec<Vec<Vertex>> {
    let w = mask.width;
    let h = mask.height;
    let stride = w + 1;
    let vertex_index = |x: i32, y: i32| y as usize * stride + x as usize;

    // Up to two outgoing edges per vertex (two at diagonal touch points).
    let mut outgoing = vec![[NONE; 2]; stride * (h + 1)];
    let push = |outgoing: &mut Vec<[u8; 2]>, x: i32, y: i32, direction: u8| {
        let slots = &mut outgoing[vertex_index(x, y)];
        if slots[0] == NONE {
            slots[0] = direction;
        } else {
            slots[1] = direction;
        }
    };

    for y in 0..h as i64 {
        for x in 0..w as i64 {
            if !mask.get(x, y) {
                continue;
            }
            let (xi, yi) = (x as i32, y as i32);
            if !mask.get(x, y - 1) {
                push(&mut outgoing, xi, yi, RIGHT);
            }
            if !mask.get(x + 1, y) {
                push(&mut outgoing, xi + 1, yi, DOWN);
            }
            if !mask.get(x, y + 1) {
                push(&mut outgoing, xi + 1, yi + 1, LEFT);
            }
            if !mask.get(x - 1, y) {
                push(&mut outgoing, xi, yi + 1, UP);
            }
        }
    }

    let mut loops = Vec::new();

    for start in 0..outgoing.len() {
        while outgoing[start][0] != NONE || outgoing[start][1] != NONE {
            let start_vertex = ((start % stride) as i32, (start / stride) as i32);
            let mut points = vec![start_vertex];
            let mut current = start_vertex;
            let mut heading: Option<u8> = None;

            loop {
                let slots = &mut outgoing[vertex_index(current.0, current.1)];
                let Some(direction) = choose_exit(slots, heading) else {
                    // Unreachable for a well-formed edge set: every vertex has
                    // as many exits as entries.
                    break;
                };
                let (dx, dy) = step(direction);
                current = (current.0 + dx, current.1 + dy);
                heading = Some(direction);
                if current == start_vertex {
                    break;
                }
                points.push(current);
            }

            if points.len() >= 4 {
                loops.push(points);
            }
        }
    }

    loops
}

/// Take an exit from `slots`, preferring a clockwise turn, then straight on.
///
/// At a diagonal touch point this keeps each loop around its own pixel
/// instead of crossing over to the diagonal neighbour.
fn choose_exit(slots: &mut [u8; 2], heading: Option<u8>) -> Option<u8> {
    let preference = match heading {
        Some(h) => [(h + 1) % 4, h, (h + 3) % 4],
        None => [NONE; 3],
    };

    let slot = preference
        .iter()
        .filter(|&&p| p != NONE)
        .find_map(|p| slots.iter().position(|s| s == p))
        .or_else(|| slots.iter().position(|&s| s != NONE))?;

    let direction = slots[slot];
    slots[slot] = NONE;
    Some(direction)
}

/// Twice the signed area of a loop. Positive is clockwise on screen.
#[cfg(test)]
fn signed_area2(points: &[Vertex]) -> i64 {
    let n = points.len();
    (0..n)
        .map(|i| {
            let (x0, y0) = points[i];
            let (x1, y1) = points[(i + 1) % n];
            i64::from(x0) * i64::from(y1) - i64::from(x1) * i64::from(y0)
        })
        .sum()
}
