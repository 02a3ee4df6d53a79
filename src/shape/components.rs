//! 4-connected component extraction over the foreground mask.

use super::mask::Mask;

/// Runtime bound: tracing stops once a component reaches this many pixels.
pub const MAX_COMPONENT_PIXELS: usize = 1000;
/// Noise floor: smaller components are discarded.
pub const MIN_COMPONENT_PIXELS: usize = 20;

#[derive(Clone, Debug, PartialEq)]
pub struct Component {
    /// Traced pixel coordinates, in trace order.
    pub points: Vec<(f32, f32)>,
}

/// Flood-fill every foreground pixel into components, scanning seeds in
/// row-major order.
///
/// A pixel is claimed when it is popped from the trace stack. When a
/// component hits `MAX_COMPONENT_PIXELS`, pixels still waiting on the stack
/// stay unclaimed and can seed later components.
pub fn extract_components(mask: &Mask) -> Vec<Component> {
    let (w, h) = (mask.width, mask.height);
    let mut visited = vec![false; w * h];
    let mut components = Vec::new();
    let mut stack: Vec<usize> = Vec::new();

    for seed in 0..w * h {
        if visited[seed] || !mask.data[seed] {
            continue;
        }

        let mut points = Vec::new();
        stack.clear();
        stack.push(seed);
        while let Some(idx) = stack.pop() {
            if visited[idx] {
                continue;
            }
            visited[idx] = true;
            let (x, y) = (idx % w, idx / w);
            points.push((x as f32, y as f32));
            if points.len() >= MAX_COMPONENT_PIXELS {
                break;
            }

            let mut push = |nx: usize, ny: usize| {
                let n = ny * w + nx;
                if mask.data[n] && !visited[n] {
                    stack.push(n);
                }
            };
            if x + 1 < w {
                push(x + 1, y);
            }
            if x > 0 {
                push(x - 1, y);
            }
            if y + 1 < h {
                push(x, y + 1);
            }
            if y > 0 {
                push(x, y - 1);
            }
        }

        if points.len() >= MIN_COMPONENT_PIXELS {
            components.push(Component { points });
        }
    }

    components
}
