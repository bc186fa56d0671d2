#[cfg(feature = "llgi-serde")]
use serde::{Deserialize, Serialize};

/// Environment variable that turns on native validation layers.
pub const VALIDATION_ENV: &str = "LLGI_VALIDATION";

/// Settings shared by the native backends' device constructors.
#[cfg_attr(feature = "llgi-serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct ContextInfo {
    /// Index into the adapter / physical device list.
    pub device_id: usize,
    /// Enable the API's validation or debug layer.
    pub validation: bool,
    pub debug_name: String,
}

impl Default for ContextInfo {
    fn default() -> Self {
        Self {
            device_id: 0,
            validation: false,
            debug_name: "llgi".to_string(),
        }
    }
}

impl ContextInfo {
    /// `validation`, or `LLGI_VALIDATION=1` in the environment.
    pub fn validation_requested(&self) -> bool {
        self.validation
            || std::env::var(VALIDATION_ENV)
                .map(|v| v == "1")
                .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn environment_enables_validation() {
        let original = std::env::var(VALIDATION_ENV).ok();

        std::env::set_var(VALIDATION_ENV, "1");
        assert!(ContextInfo::default().validation_requested());

        std::env::set_var(VALIDATION_ENV, "0");
        assert!(!ContextInfo::default().validation_requested());

        match original {
            Some(value) => std::env::set_var(VALIDATION_ENV, value),
            None => std::env::remove_var(VALIDATION_ENV),
        }
    }
}
