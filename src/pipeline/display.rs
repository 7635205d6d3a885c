use serde::Deserialize;

/// 2D affine map `(x, y) -> (a*x + b*y + tx, c*x + d*y + ty)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Affine {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub tx: f32,
    pub ty: f32,
}

impl Default for Affine {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Affine {
    pub const IDENTITY: Affine = Affine {
        a: 1.0,
        b: 0.0,
        c: 0.0,
        d: 1.0,
        tx: 0.0,
        ty: 0.0,
    };

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self {
            a: sx,
            d: sy,
            ..Self::IDENTITY
        }
    }

    pub fn translate(dx: f32, dy: f32) -> Self {
        Self {
            tx: dx,
            ty: dy,
            ..Self::IDENTITY
        }
    }

    /// Clockwise rotation on a y-down screen.
    pub fn rotate(degrees: f32) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self {
            a: cos,
            b: -sin,
            c: sin,
            d: cos,
            ..Self::IDENTITY
        }
    }

    /// `self` applied about the pivot `(px, py)` instead of the origin.
    pub fn about(self, px: f32, py: f32) -> Self {
        Self::translate(-px, -py).then(self).then(Self::translate(px, py))
    }

    /// `self` followed by `next`.
    pub fn then(self, next: Affine) -> Self {
        Self {
            a: next.a * self.a + next.b * self.c,
            b: next.a * self.b + next.b * self.d,
            c: next.c * self.a + next.d * self.c,
            d: next.c * self.b + next.d * self.d,
            tx: next.a * self.tx + next.b * self.ty + next.tx,
            ty: next.c * self.tx + next.d * self.ty + next.ty,
        }
    }

    pub fn map_point(&self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.b * y + self.tx,
            self.c * x + self.d * y + self.ty,
        )
    }

    /// `None` when the map collapses the plane.
    pub fn invert(&self) -> Option<Self> {
        let det = self.a * self.d - self.b * self.c;
        if det.abs() < f32::EPSILON {
            return None;
        }
        let (a, b, c, d) = (self.d / det, -self.b / det, -self.c / det, self.a / det);
        Some(Self {
            a,
            b,
            c,
            d,
            tx: -(a * self.tx + b * self.ty),
            ty: -(c * self.tx + d * self.ty),
        })
    }
}

/// On-screen area the filtered frame is drawn into, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    /// Pixels per density-independent unit.
    pub density: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1080.0,
            height: 1920.0,
            density: 2.625,
        }
    }
}

impl Viewport {
    pub fn center(&self) -> (f32, f32) {
        (self.width / 2.0, self.height / 2.0)
    }
}

/// How the camera sensor sits relative to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct CameraOrientation {
    /// Clockwise sensor mounting angle in degrees, a multiple of 90.
    pub sensor_orientation: u32,
    /// Current device rotation in degrees, a multiple of 90.
    pub device_rotation: u32,
    pub front_facing: bool,
}

impl CameraOrientation {
    /// Rotation to apply to sensor frames so they appear upright.
    pub fn rotation(&self) -> u32 {
        (self.sensor_orientation % 360 + 360 - self.device_rotation % 360) % 360
    }
}

/// Viewport plus camera orientation. Still images use the default
/// orientation, which neither rotates nor mirrors.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DisplayGeometry {
    pub viewport: Viewport,
    pub orientation: CameraOrientation,
}

impl DisplayGeometry {
    /// Frame-to-view transform: mirror front cameras, rotate upright, then
    /// scale to fill the viewport and center.
    pub fn transform(&self, frame_width: u32, frame_height: u32) -> Affine {
        let (bw, bh) = (frame_width as f32, frame_height as f32);
        let (vw, vh) = (self.viewport.width, self.viewport.height);
        let (cx, cy) = (bw / 2.0, bh / 2.0);
        let rotation = self.orientation.rotation();

        let mut matrix = Affine::IDENTITY;
        if self.orientation.front_facing {
            matrix = matrix.then(Affine::scale(1.0, -1.0).about(cx, cy));
        }
        matrix = matrix.then(Affine::rotate(rotation as f32).about(cx, cy));

        let scale = if rotation == 90 || rotation == 270 {
            (vw / bh).max(vh / bw)
        } else {
            (vw / bw).max(vh / bh)
        };
        let dx = (vw - bw * scale) / 2.0;
        let dy = (vh - bh * scale) / 2.0;
        matrix
            .then(Affine::scale(scale, scale))
            .then(Affine::translate(dx, dy))
    }
}
