//! Matte geometry: turns hand-authored 2D polygons into a drawable mesh.
//!
//! Points live in the node's unit square (x right, y up, 0..1). Each polygon is split at
//! its self-intersections into simple polygons, oriented counter-clockwise, then
//! ear-clipped. The mesh maps `p` to clip space as `2p - 1` with texture coordinate `p`.

use reel_core::EngineError;

use crate::model::Model;

pub type Point = [f32; 2];

const EPS: f32 = 1e-6;
/// Upper bound on split passes per input polygon.
const MAX_SPLITS: usize = 1024;

/// One polygon or several.
#[derive(Debug, Clone, PartialEq)]
pub enum MatteInput {
    Polygon(Vec<Point>),
    Polygons(Vec<Vec<Point>>),
}

impl MatteInput {
    pub fn into_polygons(self) -> Vec<Vec<Point>> {
        match self {
            MatteInput::Polygon(p) => vec![p],
            MatteInput::Polygons(ps) => ps,
        }
    }
}

impl From<Vec<Point>> for MatteInput {
    fn from(p: Vec<Point>) -> Self {
        MatteInput::Polygon(p)
    }
}

impl From<Vec<(f32, f32)>> for MatteInput {
    fn from(p: Vec<(f32, f32)>) -> Self {
        MatteInput::Polygon(p.into_iter().map(|(x, y)| [x, y]).collect())
    }
}

impl From<Vec<Vec<Point>>> for MatteInput {
    fn from(ps: Vec<Vec<Point>>) -> Self {
        MatteInput::Polygons(ps)
    }
}

/// Builds the matte mesh for `input`.
pub fn triangulate(input: impl Into<MatteInput>) -> Result<Model, EngineError> {
    let mut vertices = Vec::new();
    let mut tex_coords = Vec::new();
    let mut indices: Vec<u16> = Vec::new();

    for polygon in input.into().into_polygons() {
        for simple in split_self_intersections(clean(polygon)) {
            let mut simple = simple;
            let area = signed_area(&simple);
            if area.abs() < EPS {
                continue;
            }
            if area < 0.0 {
                simple.reverse();
            }

            let base = vertices.len() / 3;
            if base + simple.len() > u16::MAX as usize {
                return Err(EngineError::other("matte has too many vertices"));
            }
            for p in &simple {
                vertices.extend_from_slice(&[p[0] * 2.0 - 1.0, p[1] * 2.0 - 1.0, 0.0]);
                tex_coords.extend_from_slice(p);
            }
            for [a, b, c] in ear_clip(&simple) {
                indices.extend([(base + a) as u16, (base + b) as u16, (base + c) as u16]);
            }
        }
    }

    tracing::debug!(triangles = indices.len() / 3, "matte triangulated");
    Ok(Model::new(vertices, tex_coords, indices))
}

/// Drops repeated consecutive points and an explicit closing point.
fn clean(mut polygon: Vec<Point>) -> Vec<Point> {
    polygon.dedup_by(|a, b| same(*a, *b));
    while polygon.len() > 1 && same(polygon[0], polygon[polygon.len() - 1]) {
        polygon.pop();
    }
    polygon
}

fn same(a: Point, b: Point) -> bool {
    (a[0] - b[0]).abs() < EPS && (a[1] - b[1]).abs() < EPS
}

fn cross(o: Point, a: Point, b: Point) -> f32 {
    (a[0] - o[0]) * (b[1] - o[1]) - (a[1] - o[1]) * (b[0] - o[0])
}

pub(crate) fn signed_area(polygon: &[Point]) -> f32 {
    let n = polygon.len();
    let mut sum = 0.0;
    for i in 0..n {
        let a = polygon[i];
        let b = polygon[(i + 1) % n];
        sum += a[0] * b[1] - b[0] * a[1];
    }
    sum / 2.0
}

/// Proper intersection point of segments `a-b` and `c-d` (endpoints excluded).
fn intersection(a: Point, b: Point, c: Point, d: Point) -> Option<Point> {
    let r = [b[0] - a[0], b[1] - a[1]];
    let s = [d[0] - c[0], d[1] - c[1]];
    let denom = r[0] * s[1] - r[1] * s[0];
    if denom.abs() < EPS {
        return None;
    }
    let ca = [c[0] - a[0], c[1] - a[1]];
    let t = (ca[0] * s[1] - ca[1] * s[0]) / denom;
    let u = (ca[0] * r[1] - ca[1] * r[0]) / denom;
    if t <= EPS || t >= 1.0 - EPS || u <= EPS || u >= 1.0 - EPS {
        return None;
    }
    Some([a[0] + t * r[0], a[1] + t * r[1]])
}

/// Repeatedly cuts a polygon at its first crossing pair of edges until every piece is simple.
fn split_self_intersections(polygon: Vec<Point>) -> Vec<Vec<Point>> {
    let mut done = Vec::new();
    let mut work = vec![polygon];
    let mut passes = 0;

    'next: while let Some(poly) = work.pop() {
        let n = poly.len();
        if n < 3 {
            continue;
        }
        passes += 1;
        if passes > MAX_SPLITS {
            done.push(poly);
            continue;
        }
        for i in 0..n {
            for j in (i + 2)..n {
                if i == 0 && j == n - 1 {
                    // adjacent through the closing edge
                    continue;
                }
                let Some(x) = intersection(poly[i], poly[i + 1], poly[j], poly[(j + 1) % n]) else {
                    continue;
                };
                let mut outer: Vec<Point> = poly[..=i].to_vec();
                outer.push(x);
                outer.extend_from_slice(&poly[j + 1..]);

                let mut inner = vec![x];
                inner.extend_from_slice(&poly[i + 1..=j]);

                work.push(clean(outer));
                work.push(clean(inner));
                continue 'next;
            }
        }
        done.push(poly);
    }
    done
}

/// Inclusive of the boundary: a reflex vertex sitting on a candidate diagonal blocks the ear.
fn point_in_triangle(p: Point, a: Point, b: Point, c: Point) -> bool {
    cross(a, b, p) >= -EPS && cross(b, c, p) >= -EPS && cross(c, a, p) >= -EPS
}

/// Ear clipping of a simple counter-clockwise polygon. Returns index triples into `polygon`.
fn ear_clip(polygon: &[Point]) -> Vec<[usize; 3]> {
    let mut remaining: Vec<usize> = (0..polygon.len()).collect();
    let mut out = Vec::with_capacity(polygon.len().saturating_sub(2));

    while remaining.len() > 3 {
        let n = remaining.len();
        let mut clipped = false;
        for k in 0..n {
            let ia = remaining[(k + n - 1) % n];
            let ib = remaining[k];
            let ic = remaining[(k + 1) % n];
            let (a, b, c) = (polygon[ia], polygon[ib], polygon[ic]);

            if cross(a, b, c) <= EPS {
                continue;
            }
            let blocked = remaining
                .iter()
                .filter(|&&i| i != ia && i != ib && i != ic)
                .any(|&i| point_in_triangle(polygon[i], a, b, c));
            if blocked {
                continue;
            }

            out.push([ia, ib, ic]);
            remaining.remove(k);
            clipped = true;
            break;
        }
        if !clipped {
            // Only collinear or degenerate runs remain.
            tracing::warn!(left = remaining.len(), "matte polygon could not be fully clipped");
            return out;
        }
    }
    if remaining.len() == 3 {
        let (a, b, c) = (
            polygon[remaining[0]],
            polygon[remaining[1]],
            polygon[remaining[2]],
        );
        if cross(a, b, c).abs() > EPS {
            out.push([remaining[0], remaining[1], remaining[2]]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn mesh_area(m: &Model) -> f32 {
        m.indices
            .chunks(3)
            .map(|t| {
                let p = |i: u16| [m.tex_coords[i as usize * 2], m.tex_coords[i as usize * 2 + 1]];
                cross(p(t[0]), p(t[1]), p(t[2])).abs() / 2.0
            })
            .sum()
    }

    #[test]
    fn unit_square_becomes_two_triangles_in_clip_space() {
        let m = triangulate(vec![[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]]).unwrap();
        assert_eq!(m.indices.len(), 6);
        assert_eq!(&m.vertices[..3], &[-1.0, -1.0, 0.0]);
        assert!((mesh_area(&m) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn clockwise_input_is_reoriented() {
        let m = triangulate(vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0), (1.0, 0.0)]).unwrap();
        assert_eq!(m.indices.len(), 6);
        assert!((mesh_area(&m) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn concave_l_shape() {
        let l = vec![
            [0.0, 0.0],
            [1.0, 0.0],
            [1.0, 0.5],
            [0.5, 0.5],
            [0.5, 1.0],
            [0.0, 1.0],
        ];
        let m = triangulate(l).unwrap();
        assert_eq!(m.indices.len(), 4 * 3);
        assert!((mesh_area(&m) - 0.75).abs() < 1e-5);
    }

    #[test]
    fn bowtie_is_split_at_the_crossing() {
        // Edges (0,0)-(1,1) and (1,0)-(0,1) cross at the center.
        let bowtie = vec![[0.0, 0.0], [1.0, 1.0], [1.0, 0.0], [0.0, 1.0]];
        let m = triangulate(bowtie).unwrap();
        assert_eq!(m.indices.len(), 2 * 3);
        assert!((mesh_area(&m) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn several_polygons_share_one_mesh() {
        let a = vec![[0.0, 0.0], [0.5, 0.0], [0.5, 0.5]];
        let b = vec![[0.5, 0.5], [1.0, 0.5], [1.0, 1.0]];
        let m = triangulate(vec![a, b]).unwrap();
        assert_eq!(m.vertex_count(), 6);
        assert_eq!(m.indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn degenerate_input_yields_empty_mesh() {
        let m = triangulate(vec![[0.0, 0.0], [0.5, 0.5], [1.0, 1.0], [0.0, 0.0]]).unwrap();
        assert!(m.indices.is_empty());
    }

    proptest! {
        #[test]
        fn convex_polygons_are_covered_exactly(
            mut angles in proptest::collection::vec(0.0f32..std::f32::consts::TAU, 3..24)
        ) {
            angles.sort_by(|a, b| a.partial_cmp(b).unwrap());
            angles.dedup_by(|a, b| (*a - *b).abs() < 0.1);
            prop_assume!(angles.len() >= 3);
            prop_assume!(std::f32::consts::TAU - (angles[angles.len() - 1] - angles[0]) > 0.1);
            let poly: Vec<Point> = angles
                .iter()
                .map(|a| [0.5 + 0.5 * a.cos(), 0.5 + 0.5 * a.sin()])
                .collect();
            let want = signed_area(&poly).abs();
            prop_assume!(want > 1e-3);
            let m = triangulate(poly.clone()).unwrap();
            prop_assert!((mesh_area(&m) - want).abs() < 1e-3);
            prop_assert_eq!(m.indices.len(), (poly.len() - 2) * 3);
        }
    }
}
