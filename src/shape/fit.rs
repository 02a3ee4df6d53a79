//! Per-component shape fitting.
//!
//! The confidence formulas are heuristics (`1 - sd(r)/r` for circles,
//! `0.5 * density + 0.3` for rectangles). They are kept exactly as-is so
//! counts stay comparable with existing inventory data.

pub const MIN_CIRCLE_RADIUS: f64 = 10.0;
pub const MIN_RECTANGLE_SIDE: f64 = 20.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShapeKind {
    Circle,
    Rectangle,
}

/// A fitted shape, expressed as its axis-aligned bounding box.
#[derive(Clone, Debug, PartialEq)]
pub struct FittedShape {
    pub kind: ShapeKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

pub fn fit(kind: ShapeKind, points: &[(f32, f32)]) -> Option<FittedShape> {
    match kind {
        ShapeKind::Circle => fit_circle(points),
        ShapeKind::Rectangle => fit_rectangle(points),
    }
}

/// Centroid plus mean radius; confidence falls with the spread of radii.
pub fn fit_circle(points: &[(f32, f32)]) -> Option<FittedShape> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.0 as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.1 as f64).sum::<f64>() / n;

    let radii: Vec<f64> = points
        .iter()
        .map(|p| ((p.0 as f64 - cx).powi(2) + (p.1 as f64 - cy).powi(2)).sqrt())
        .collect();
    let radius = radii.iter().sum::<f64>() / n;
    if radius < MIN_CIRCLE_RADIUS {
        return None;
    }
    let variance = radii.iter().map(|r| (r - radius).powi(2)).sum::<f64>() / n;
    let confidence = (1.0 - variance.sqrt() / radius).max(0.0);

    Some(FittedShape {
        kind: ShapeKind::Circle,
        x: (cx - radius) as f32,
        y: (cy - radius) as f32,
        width: (2.0 * radius) as f32,
        height: (2.0 * radius) as f32,
        confidence: confidence as f32,
    })
}

/// Axis-aligned extent; confidence grows with how densely the component
/// covers the box perimeter.
pub fn fit_rectangle(points: &[(f32, f32)]) -> Option<FittedShape> {
    let first = points.first()?;
    let (mut min_x, mut min_y) = (first.0 as f64, first.1 as f64);
    let (mut max_x, mut max_y) = (min_x, min_y);
    for &(x, y) in points {
        min_x = min_x.min(x as f64);
        min_y = min_y.min(y as f64);
        max_x = max_x.max(x as f64);
        max_y = max_y.max(y as f64);
    }

    let width = max_x - min_x;
    let height = max_y - min_y;
    if width < MIN_RECTANGLE_SIDE || height < MIN_RECTANGLE_SIDE {
        return None;
    }
    let density = points.len() as f64 / (2.0 * (width + height));
    let confidence = (density * 0.5 + 0.3).clamp(0.0, 1.0);

    Some(FittedShape {
        kind: ShapeKind::Rectangle,
        x: min_x as f32,
        y: min_y as f32,
        width: width as f32,
        height: height as f32,
        confidence: confidence as f32,
    })
}
