//! Resources every application starts with.

/// Time elapsed since the previous update.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeltaTime {
    /// Unscaled seconds since the previous update.
    pub value: f32,

    /// Multiplier applied by [`DeltaTime::scaled`].
    pub scale: f32,
}

impl Default for DeltaTime {
    fn default() -> Self {
        Self { value: 0.0, scale: 1.0 }
    }
}

impl DeltaTime {
    /// Creates a delta of `value` seconds at normal speed.
    pub fn new(value: f32) -> Self {
        Self { value, scale: 1.0 }
    }

    /// Returns `value * scale`.
    pub fn scaled(&self) -> f32 {
        self.value * self.scale
    }
}

/// Set to `true` to stop [`Cubos::run`](crate::engine::cubos::Cubos::run)
/// after the current update.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShouldQuit(pub bool);

/// Command-line arguments of the process.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Arguments(pub Vec<String>);
