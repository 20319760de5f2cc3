use bytemuck::{Pod, Zeroable};

use crate::compile::MAX_USER_UNIFORMS;
use crate::types::Resolution;

use super::FrameUniforms;

/// Host mirror of the `VizParams` std140 block injected by `compile.rs`.
#[repr(C, align(16))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct VizUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub random_seed: f32,
    pub random_run: f32,
    pub frame: i32,
    /// `-1.0` when drawing offscreen, `1.0` when drawing to the surface.
    pub flip_y: f32,
    pub padding0: f32,
    pub user: [[f32; 4]; MAX_USER_UNIFORMS / 4],
}

unsafe impl Zeroable for VizUniforms {}
unsafe impl Pod for VizUniforms {}

impl VizUniforms {
    pub fn new(target: Resolution, offscreen: bool, frame: &FrameUniforms) -> Self {
        Self {
            resolution: [target.width as f32, target.height as f32],
            time: frame.time,
            random_seed: frame.random_seed,
            random_run: frame.random_run,
            frame: frame.frame.min(i32::MAX as u64) as i32,
            flip_y: if offscreen { -1.0 } else { 1.0 },
            padding0: 0.0,
            user: [[0.0; 4]; MAX_USER_UNIFORMS / 4],
        }
    }

    /// Copies `values` into the slots named by `layout`; unknown names are
    /// ignored and unset slots stay zero.
    pub fn set_user(&mut self, layout: &[String], values: &[(String, f32)]) {
        for (name, value) in values {
            if let Some(slot) = layout.iter().position(|candidate| candidate == name) {
                self.user[slot / 4][slot % 4] = *value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_matches_std140_block() {
        assert_eq!(std::mem::size_of::<VizUniforms>(), 160);
        assert_eq!(std::mem::offset_of!(VizUniforms, frame), 20);
        assert_eq!(std::mem::offset_of!(VizUniforms, user), 32);
    }

    #[test]
    fn user_values_follow_layout_order() {
        let frame = FrameUniforms {
            time: 2.5,
            frame: 9,
            random_seed: 0.25,
            random_run: 0.75,
        };
        let mut uniforms = VizUniforms::new(Resolution::new(800, 600), true, &frame);
        let layout = vec!["a".to_string(), "b".into(), "c".into(), "d".into(), "e".into()];
        uniforms.set_user(&layout, &[("e".into(), 4.0), ("b".into(), 1.5), ("zz".into(), 9.0)]);
        assert_eq!(uniforms.user[0], [0.0, 1.5, 0.0, 0.0]);
        assert_eq!(uniforms.user[1][0], 4.0);
        assert_eq!(uniforms.flip_y, -1.0);
        assert_eq!(uniforms.frame, 9);
        assert_eq!(uniforms.resolution, [800.0, 600.0]);
    }
}
