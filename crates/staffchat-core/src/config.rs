use std::time::Duration;

use staffchat_types::UserId;

/// Default maximum number of files in one message.
pub const DEFAULT_MAX_FILES: usize = 10;

/// Default per-file upload limit (50 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 50 * 1024 * 1024;

/// Tunables for a chat session.
#[derive(Debug, Clone)]
pub struct ChatConfig {
    pub current_user_id: UserId,
    /// Subscribe to the hotel-wide channel when set.
    pub hotel_id: Option<i64>,
    pub max_files_per_message: usize,
    pub max_file_size_bytes: u64,
    /// How far apart an optimistic message and an uncorrelated echo may be
    /// and still be treated as the same message.
    pub echo_match_window: Duration,
    pub page_size: u32,
    /// Buffer of the store change feed before slow listeners start lagging.
    pub store_change_capacity: usize,
}

impl ChatConfig {
    pub fn new(current_user_id: UserId) -> Self {
        Self {
            current_user_id,
            hotel_id: None,
            max_files_per_message: DEFAULT_MAX_FILES,
            max_file_size_bytes: DEFAULT_MAX_FILE_SIZE,
            echo_match_window: Duration::from_secs(10),
            page_size: 50,
            store_change_capacity: 256,
        }
    }

    pub fn with_hotel(mut self, hotel_id: i64) -> Self {
        self.hotel_id = Some(hotel_id);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn with_file_limits(mut self, max_files: usize, max_file_size_bytes: u64) -> Self {
        self.max_files_per_message = max_files;
        self.max_file_size_bytes = max_file_size_bytes;
        self
    }

    pub fn with_echo_match_window(mut self, window: Duration) -> Self {
        self.echo_match_window = window;
        self
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new(0)
    }
}
