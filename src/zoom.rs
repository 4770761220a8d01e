//! Per-tab font zoom steps.

/// One of fifteen zoom steps, [`Zoom::MIN`] through [`Zoom::MAX`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Zoom(u32);

impl Zoom {
    pub const MIN: Zoom = Zoom(1);
    pub const DEFAULT: Zoom = Zoom(8);
    pub const MAX: Zoom = Zoom(15);

    /// Font scale of each step, `MINUS_7` through `PLUS_7`.
    const SCALES: [f64; 15] = [
        0.5, 0.57, 0.63, 0.7, 0.8, 0.9, 0.95, 1.0, 1.1, 1.2, 1.3, 1.5, 1.8, 2.2, 2.6,
    ];

    /// The step numbered `level`, if it is one.
    pub fn from_level(level: u32) -> Option<Self> {
        (Self::MIN.0..=Self::MAX.0)
            .contains(&level)
            .then_some(Self(level))
    }

    /// Like [`Zoom::from_level`] but falls back to the default step.
    pub fn from_level_or_default(level: u32) -> Self {
        Self::from_level(level).unwrap_or_default()
    }

    pub fn level(self) -> u32 {
        self.0
    }

    pub fn is_default(self) -> bool {
        self == Self::DEFAULT
    }

    pub fn scale(self) -> f64 {
        Self::SCALES[(self.0 - 1) as usize]
    }

    /// Next larger step; stays at the maximum.
    pub fn zoom_in(self) -> Self {
        Self((self.0 + 1).min(Self::MAX.0))
    }

    /// Next smaller step; stays at the minimum.
    pub fn zoom_out(self) -> Self {
        Self((self.0 - 1).max(Self::MIN.0))
    }

    /// Label like "120%".
    pub fn label(self) -> String {
        format!("{:.0}%", self.scale() * 100.0)
    }
}

impl Default for Zoom {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_bounded() {
        assert_eq!(Zoom::from_level(0), None);
        assert_eq!(Zoom::from_level(16), None);
        assert_eq!(Zoom::from_level(15), Some(Zoom::MAX));
        assert_eq!(Zoom::from_level_or_default(99), Zoom::DEFAULT);
    }

    #[test]
    fn test_zoom_steps_saturate() {
        assert_eq!(Zoom::MAX.zoom_in(), Zoom::MAX);
        assert_eq!(Zoom::MIN.zoom_out(), Zoom::MIN);
        assert_eq!(Zoom::DEFAULT.zoom_in().level(), 9);
        assert_eq!(Zoom::DEFAULT.zoom_out().level(), 7);
    }

    #[test]
    fn test_default_is_unscaled() {
        assert!(Zoom::default().is_default());
        assert_eq!(Zoom::DEFAULT.scale(), 1.0);
        assert_eq!(Zoom::DEFAULT.label(), "100%");
    }
}
