//! Reference rasterizer.
//!
//! Clip-space triangles are clipped against `w > 0`, divided, mapped through
//! the viewport and scan-converted with edge functions at pixel centers. Edge
//! ownership follows the top-left rule. Depth is interpolated linearly in
//! screen space; varyings are interpolated perspective-correct.

use kiln_core::math::Vec4;

use super::memory::TextureStore;
use crate::pipeline_state::{BlendMode, CullMode, DepthState};
use crate::types::{ScissorRect, Viewport};

pub(super) const VARYINGS: usize = 12;

const W_EPSILON: f32 = 1e-5;
const DEPTH_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub(super) struct ClipVertex {
    pub clip: Vec4,
    pub varyings: [f32; VARYINGS],
}

impl ClipVertex {
    pub fn new(clip: Vec4) -> Self {
        Self {
            clip,
            varyings: [0.0; VARYINGS],
        }
    }

    fn lerp(&self, other: &ClipVertex, t: f32) -> ClipVertex {
        let mut varyings = [0.0; VARYINGS];
        for (i, v) in varyings.iter_mut().enumerate() {
            *v = self.varyings[i] + (other.varyings[i] - self.varyings[i]) * t;
        }
        ClipVertex {
            clip: self.clip + (other.clip - self.clip) * t,
            varyings,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(super) struct Fragment {
    pub x: u32,
    pub y: u32,
    pub depth: f32,
    pub varyings: [f32; VARYINGS],
}

#[derive(Debug, Clone, Copy)]
pub(super) struct RasterState {
    pub viewport: Viewport,
    pub scissor: Option<ScissorRect>,
    pub depth: DepthState,
    pub blend: BlendMode,
    pub cull: CullMode,
    pub write_color: bool,
}

pub(super) struct Targets<'a> {
    pub color: Option<&'a mut TextureStore>,
    pub depth: Option<&'a mut TextureStore>,
}

impl Targets<'_> {
    fn size(&self) -> Option<(u32, u32)> {
        self.color
            .as_deref()
            .or(self.depth.as_deref())
            .map(|t| (t.width(), t.height()))
    }
}

/// Fragment shader: `None` discards.
pub(super) type Shade<'s> = dyn FnMut(&Fragment) -> Option<[f32; 4]> + 's;

#[derive(Debug, Clone, Copy)]
struct ScreenVertex {
    x: f32,
    y: f32,
    z: f32,
    inv_w: f32,
    varyings: [f32; VARYINGS],
}

fn to_screen(v: &ClipVertex, viewport: &Viewport) -> ScreenVertex {
    let inv_w = 1.0 / v.clip.w;
    let ndc_x = v.clip.x * inv_w;
    let ndc_y = v.clip.y * inv_w;
    let ndc_z = v.clip.z * inv_w;
    ScreenVertex {
        x: viewport.x + (ndc_x + 1.0) * 0.5 * viewport.width,
        y: viewport.y + (1.0 - ndc_y) * 0.5 * viewport.height,
        z: viewport.min_depth + ndc_z * (viewport.max_depth - viewport.min_depth),
        inv_w,
        varyings: v.varyings,
    }
}

/// Sutherland-Hodgman against the `w = W_EPSILON` plane.
fn clip_near(triangle: [ClipVertex; 3]) -> Vec<ClipVertex> {
    let mut out = Vec::with_capacity(4);
    for i in 0..3 {
        let a = &triangle[i];
        let b = &triangle[(i + 1) % 3];
        let a_in = a.clip.w > W_EPSILON;
        let b_in = b.clip.w > W_EPSILON;
        if a_in {
            out.push(*a);
        }
        if a_in != b_in {
            let t = (W_EPSILON - a.clip.w) / (b.clip.w - a.clip.w);
            out.push(a.lerp(b, t));
        }
    }
    out
}

fn edge(a: &ScreenVertex, b: &ScreenVertex, px: f32, py: f32) -> f32 {
    (b.x - a.x) * (py - a.y) - (b.y - a.y) * (px - a.x)
}

/// With positive winding in y-down screen space: top edges run in +x,
/// left edges run upwards.
fn is_top_left(a: &ScreenVertex, b: &ScreenVertex) -> bool {
    (a.y == b.y && b.x > a.x) || b.y < a.y
}

/// Pixel rectangle writable by this draw: viewport, scissor and target bounds.
fn clip_rect(state: &RasterState, size: (u32, u32)) -> (i64, i64, i64, i64) {
    let vp = &state.viewport;
    let mut x0 = vp.x.floor() as i64;
    let mut y0 = vp.y.floor() as i64;
    let mut x1 = (vp.x + vp.width).ceil() as i64;
    let mut y1 = (vp.y + vp.height).ceil() as i64;
    if let Some(s) = state.scissor {
        x0 = x0.max(s.x as i64);
        y0 = y0.max(s.y as i64);
        x1 = x1.min(s.x as i64 + s.width as i64);
        y1 = y1.min(s.y as i64 + s.height as i64);
    }
    (x0.max(0), y0.max(0), x1.min(size.0 as i64), y1.min(size.1 as i64))
}

fn blend(mode: BlendMode, src: [f32; 4], dst: [f32; 4]) -> [f32; 4] {
    let a = src[3];
    match mode {
        BlendMode::Opaque => src,
        BlendMode::AlphaBlend => [
            src[0] * a + dst[0] * (1.0 - a),
            src[1] * a + dst[1] * (1.0 - a),
            src[2] * a + dst[2] * (1.0 - a),
            a + dst[3] * (1.0 - a),
        ],
        BlendMode::Additive => [
            src[0] * a + dst[0],
            src[1] * a + dst[1],
            src[2] * a + dst[2],
            dst[3],
        ],
    }
}

/// Depth test, shade, depth write, blend. Returns whether the fragment was written.
fn process_fragment(
    fragment: Fragment,
    state: &RasterState,
    targets: &mut Targets<'_>,
    shade: &mut Shade<'_>,
) -> bool {
    if fragment.depth < -DEPTH_EPSILON || fragment.depth > 1.0 + DEPTH_EPSILON {
        return false;
    }
    if state.depth.test_enabled {
        if let Some(depth) = targets.depth.as_deref() {
            let stored = depth.texel(0, 0, fragment.x, fragment.y)[0];
            if !state.depth.compare.passes(fragment.depth, stored) {
                return false;
            }
        }
    }
    let Some(color) = shade(&fragment) else {
        return false;
    };
    if state.depth.write_enabled {
        if let Some(depth) = targets.depth.as_deref_mut() {
            depth.set_texel(0, 0, fragment.x, fragment.y, [fragment.depth, 0.0, 0.0, 1.0]);
        }
    }
    if state.write_color {
        if let Some(target) = targets.color.as_deref_mut() {
            let dst = target.texel(0, 0, fragment.x, fragment.y);
            target.set_texel(0, 0, fragment.x, fragment.y, blend(state.blend, color, dst));
        }
    }
    true
}

/// Rasterize a triangle list. Returns the number of fragments written.
pub(super) fn draw_triangles(
    vertices: &[ClipVertex],
    state: &RasterState,
    targets: &mut Targets<'_>,
    shade: &mut Shade<'_>,
) -> u64 {
    let Some(size) = targets.size() else {
        return 0;
    };
    let (rx0, ry0, rx1, ry1) = clip_rect(state, size);
    if rx0 >= rx1 || ry0 >= ry1 {
        return 0;
    }

    let mut written = 0;
    for tri in vertices.chunks_exact(3) {
        let polygon = clip_near([tri[0], tri[1], tri[2]]);
        if polygon.len() < 3 {
            continue;
        }
        let screen: Vec<ScreenVertex> = polygon
            .iter()
            .map(|v| to_screen(v, &state.viewport))
            .collect();
        for i in 1..screen.len() - 1 {
            let (v0, mut v1, mut v2) = (screen[0], screen[i], screen[i + 1]);
            let mut area = edge(&v0, &v1, v2.x, v2.y);
            if area == 0.0 {
                continue;
            }
            // Positive screen-space area is clockwise in y-up NDC.
            let front_facing = area < 0.0;
            let culled = match state.cull {
                CullMode::None => false,
                CullMode::Back => !front_facing,
                CullMode::Front => front_facing,
            };
            if culled {
                continue;
            }
            if area < 0.0 {
                std::mem::swap(&mut v1, &mut v2);
                area = -area;
            }

            let min_x = v0.x.min(v1.x).min(v2.x).floor().max(rx0 as f32) as i64;
            let max_x = v0.x.max(v1.x).max(v2.x).ceil().min(rx1 as f32) as i64;
            let min_y = v0.y.min(v1.y).min(v2.y).floor().max(ry0 as f32) as i64;
            let max_y = v0.y.max(v1.y).max(v2.y).ceil().min(ry1 as f32) as i64;
            let tl = [
                is_top_left(&v1, &v2),
                is_top_left(&v2, &v0),
                is_top_left(&v0, &v1),
            ];

            for py in min_y.max(ry0)..max_y.min(ry1) {
                for px in min_x.max(rx0)..max_x.min(rx1) {
                    let (cx, cy) = (px as f32 + 0.5, py as f32 + 0.5);
                    let w = [
                        edge(&v1, &v2, cx, cy),
                        edge(&v2, &v0, cx, cy),
                        edge(&v0, &v1, cx, cy),
                    ];
                    let inside = w
                        .iter()
                        .zip(tl)
                        .all(|(w, top_left)| *w > 0.0 || (*w == 0.0 && top_left));
                    if !inside {
                        continue;
                    }
                    let l = [w[0] / area, w[1] / area, w[2] / area];
                    let depth = l[0] * v0.z + l[1] * v1.z + l[2] * v2.z;
                    let one_over_w = l[0] * v0.inv_w + l[1] * v1.inv_w + l[2] * v2.inv_w;
                    let mut varyings = [0.0; VARYINGS];
                    for (k, out) in varyings.iter_mut().enumerate() {
                        *out = (l[0] * v0.varyings[k] * v0.inv_w
                            + l[1] * v1.varyings[k] * v1.inv_w
                            + l[2] * v2.varyings[k] * v2.inv_w)
                            / one_over_w;
                    }
                    let fragment = Fragment {
                        x: px as u32,
                        y: py as u32,
                        depth,
                        varyings,
                    };
                    if process_fragment(fragment, state, targets, shade) {
                        written += 1;
                    }
                }
            }
        }
    }
    written
}

/// Rasterize a line list with a DDA walk. Returns the number of fragments written.
pub(super) fn draw_lines(
    vertices: &[ClipVertex],
    state: &RasterState,
    targets: &mut Targets<'_>,
    shade: &mut Shade<'_>,
) -> u64 {
    let Some(size) = targets.size() else {
        return 0;
    };
    let (rx0, ry0, rx1, ry1) = clip_rect(state, size);
    let mut written = 0;
    for line in vertices.chunks_exact(2) {
        if line[0].clip.w <= W_EPSILON || line[1].clip.w <= W_EPSILON {
            continue;
        }
        let a = to_screen(&line[0], &state.viewport);
        let b = to_screen(&line[1], &state.viewport);
        let steps = (b.x - a.x).abs().max((b.y - a.y).abs()).ceil().max(1.0) as u32;
        for step in 0..=steps {
            let t = step as f32 / steps as f32;
            let x = (a.x + (b.x - a.x) * t).floor() as i64;
            let y = (a.y + (b.y - a.y) * t).floor() as i64;
            if x < rx0 || x >= rx1 || y < ry0 || y >= ry1 {
                continue;
            }
            let mut varyings = [0.0; VARYINGS];
            for (k, out) in varyings.iter_mut().enumerate() {
                *out = a.varyings[k] + (b.varyings[k] - a.varyings[k]) * t;
            }
            let fragment = Fragment {
                x: x as u32,
                y: y as u32,
                depth: a.z + (b.z - a.z) * t,
                varyings,
            };
            if process_fragment(fragment, state, targets, shade) {
                written += 1;
            }
        }
    }
    written
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline_state::CompareOp;
    use crate::types::{TextureDescriptor, TextureFormat, TextureUsage};

    fn target(w: u32, h: u32, format: TextureFormat) -> TextureStore {
        TextureStore::new(TextureDescriptor::new_2d(w, h, format, TextureUsage::RENDER_TARGET))
    }

    fn state(depth: DepthState, cull: CullMode) -> RasterState {
        RasterState {
            viewport: Viewport::from_dimensions(8, 8),
            scissor: None,
            depth,
            blend: BlendMode::Opaque,
            cull,
            write_color: true,
        }
    }

    fn fullscreen(z: f32) -> Vec<ClipVertex> {
        vec![
            ClipVertex::new(Vec4::new(-1.0, -1.0, z, 1.0)),
            ClipVertex::new(Vec4::new(3.0, -1.0, z, 1.0)),
            ClipVertex::new(Vec4::new(-1.0, 3.0, z, 1.0)),
        ]
    }

    #[test]
    fn fullscreen_triangle_covers_every_pixel_once() {
        let mut color = target(8, 8, TextureFormat::Rgba32Float);
        let mut targets = Targets {
            color: Some(&mut color),
            depth: None,
        };
        let mut shade = |_: &Fragment| Some([1.0, 0.0, 0.0, 1.0]);
        let written = draw_triangles(
            &fullscreen(0.5),
            &state(DepthState::DISABLED, CullMode::Back),
            &mut targets,
            &mut shade,
        );
        assert_eq!(written, 64);
        assert_eq!(color.texel(0, 0, 7, 7), [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn clockwise_triangles_are_back_faces() {
        let mut color = target(8, 8, TextureFormat::Rgba32Float);
        let mut targets = Targets {
            color: Some(&mut color),
            depth: None,
        };
        let mut cw = fullscreen(0.5);
        cw.swap(1, 2);
        let mut shade = |_: &Fragment| Some([1.0; 4]);
        let written = draw_triangles(
            &cw,
            &state(DepthState::DISABLED, CullMode::Back),
            &mut targets,
            &mut shade,
        );
        assert_eq!(written, 0);
    }

    #[test]
    fn depth_test_rejects_farther_fragments() {
        let mut color = target(8, 8, TextureFormat::Rgba32Float);
        let mut depth = target(8, 8, TextureFormat::Depth32Float);
        depth.fill([1.0, 0.0, 0.0, 0.0]);
        let raster = state(DepthState::read_write(CompareOp::LessEqual), CullMode::None);
        let mut targets = Targets {
            color: Some(&mut color),
            depth: Some(&mut depth),
        };
        let mut near = |_: &Fragment| Some([0.0, 1.0, 0.0, 1.0]);
        draw_triangles(&fullscreen(0.3), &raster, &mut targets, &mut near);
        let mut far = |_: &Fragment| Some([0.0, 0.0, 1.0, 1.0]);
        let written = draw_triangles(&fullscreen(0.6), &raster, &mut targets, &mut far);
        assert_eq!(written, 0);
        assert_eq!(color.texel(0, 0, 4, 4), [0.0, 1.0, 0.0, 1.0]);
        assert!((depth.texel(0, 0, 4, 4)[0] - 0.3).abs() < 1e-6);
    }

    #[test]
    fn shared_edges_are_not_drawn_twice() {
        let mut color = target(8, 8, TextureFormat::Rgba32Float);
        let mut targets = Targets {
            color: Some(&mut color),
            depth: None,
        };
        let quad = [
            Vec4::new(-1.0, -1.0, 0.5, 1.0),
            Vec4::new(1.0, -1.0, 0.5, 1.0),
            Vec4::new(1.0, 1.0, 0.5, 1.0),
            Vec4::new(-1.0, 1.0, 0.5, 1.0),
        ];
        let vertices: Vec<_> = [0, 1, 2, 0, 2, 3]
            .iter()
            .map(|i| ClipVertex::new(quad[*i]))
            .collect();
        let mut shade = |_: &Fragment| Some([1.0; 4]);
        let written = draw_triangles(
            &vertices,
            &state(DepthState::DISABLED, CullMode::None),
            &mut targets,
            &mut shade,
        );
        assert_eq!(written, 64);
    }

    #[test]
    fn lines_walk_every_pixel() {
        let mut color = target(8, 8, TextureFormat::Rgba32Float);
        let mut targets = Targets {
            color: Some(&mut color),
            depth: None,
        };
        let line = [
            ClipVertex::new(Vec4::new(-0.875, 0.0, 0.5, 1.0)),
            ClipVertex::new(Vec4::new(0.875, 0.0, 0.5, 1.0)),
        ];
        let mut shade = |_: &Fragment| Some([1.0; 4]);
        let written = draw_lines(
            &line,
            &state(DepthState::DISABLED, CullMode::None),
            &mut targets,
            &mut shade,
        );
        assert!(written >= 7);
        assert_eq!(color.texel(0, 0, 4, 4), [1.0; 4]);
    }
}
