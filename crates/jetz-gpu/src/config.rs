//! GPU backend configuration.

/// Options for bringing up the Vulkan backend.
#[derive(Debug, Clone)]
pub struct GpuConfig {
    /// Application name reported to the driver.
    pub app_name: String,
    /// Enable validation layers and the debug messenger.
    pub validation: bool,
    /// Force FIFO presentation instead of preferring mailbox.
    pub vsync: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        Self {
            app_name: "Jetz".to_string(),
            validation: cfg!(debug_assertions),
            vsync: false,
        }
    }
}

impl GpuConfig {
    /// Create a new config with the given application name.
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            ..Default::default()
        }
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }
}
