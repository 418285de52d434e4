use serde::{Deserialize, Serialize};

/// Status code the control API uses for success.
pub const CODE_OK: i32 = 200;

/// Envelope every control API response is wrapped in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(default)]
    pub message: String,
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn is_ok(&self) -> bool {
        self.code == CODE_OK
    }
}
