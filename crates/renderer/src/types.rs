use std::fmt;

/// Pixel dimensions of the viewport or of an offscreen render target.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Clamps both dimensions to at least one pixel; GPUs reject empty textures.
    pub fn non_zero(self) -> Self {
        Self {
            width: self.width.max(1),
            height: self.height.max(1),
        }
    }

    pub fn largest_dimension(self) -> u32 {
        self.width.max(self.height)
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Self::new(1920, 1080)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// How offscreen buffers are sized relative to the viewport.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizePolicy {
    /// Track the viewport exactly.
    Viewport,
    /// Scale down, preserving aspect, until the larger dimension fits the limit.
    Limit(u32),
}

impl SizePolicy {
    pub fn from_limit(limit: Option<u32>) -> Self {
        match limit {
            Some(limit) if limit > 0 => SizePolicy::Limit(limit),
            _ => SizePolicy::Viewport,
        }
    }

    /// True when the policy produces something smaller than the viewport.
    pub fn applies(self, viewport: Resolution) -> bool {
        match self {
            SizePolicy::Viewport => false,
            SizePolicy::Limit(limit) => viewport.largest_dimension() > limit,
        }
    }

    pub fn resolve(self, viewport: Resolution) -> Resolution {
        let viewport = viewport.non_zero();
        match self {
            SizePolicy::Limit(limit) if self.applies(viewport) => {
                let scale = limit as f64 / viewport.largest_dimension() as f64;
                Resolution::new(
                    ((viewport.width as f64 * scale).round() as u32).max(1),
                    ((viewport.height as f64 * scale).round() as u32).max(1),
                )
            }
            _ => viewport,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_preserves_aspect() {
        let policy = SizePolicy::Limit(960);
        let resolved = policy.resolve(Resolution::new(1920, 1080));
        assert_eq!(resolved, Resolution::new(960, 540));
        assert!(policy.applies(Resolution::new(1920, 1080)));
    }

    #[test]
    fn limit_is_ignored_when_viewport_is_smaller() {
        let policy = SizePolicy::Limit(4096);
        let viewport = Resolution::new(1280, 720);
        assert!(!policy.applies(viewport));
        assert_eq!(policy.resolve(viewport), viewport);
    }

    #[test]
    fn zero_limit_means_viewport() {
        assert_eq!(SizePolicy::from_limit(Some(0)), SizePolicy::Viewport);
        assert_eq!(SizePolicy::from_limit(None), SizePolicy::Viewport);
    }
}
