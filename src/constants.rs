// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants

/// Number of stills taken by one burst
pub const BURST_FRAME_COUNT: usize = 10;

/// Buffers in the still-capture image reader pool
pub const IMAGE_READER_CAPACITY: usize = 10;

/// Album the photos are stored in, under the user's Pictures directory
pub const DEFAULT_ALBUM: &str = "EagleEye";

/// Capture timing and sizing
pub mod capture {
    use std::time::Duration;

    /// How long a burst waits for the remaining frames before reporting a partial result
    pub const BURST_TIMEOUT: Duration = Duration::from_millis(5000);

    /// Largest preview stream requested from a camera
    pub const MAX_PREVIEW_WIDTH: u32 = 1920;
    pub const MAX_PREVIEW_HEIGHT: u32 = 1080;

    /// Depth of the controller's transition broadcast
    pub const TRANSITION_CHANNEL_CAPACITY: usize = 64;
}

/// Photo file naming
pub mod file_naming {
    pub const PHOTO_PREFIX: &str = "IMG_";

    /// chrono format for the timestamp part: `yyyyMMdd_HHmmss_SSS`
    pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

    pub const PHOTO_EXTENSION: &str = "jpg";

    /// Prefix of files that are still being written
    pub const PENDING_PREFIX: &str = ".pending-";

    /// Extensions recognised when scanning the album
    pub const PHOTO_EXTENSIONS: &[&str] = &["jpg", "jpeg"];

    pub fn is_photo_extension(ext: &str) -> bool {
        let ext_lower = ext.to_lowercase();
        PHOTO_EXTENSIONS.contains(&ext_lower.as_str())
    }
}

/// Defaults for the software camera
pub mod virtual_camera {
    use std::time::Duration;

    /// Delay between open_device and the device being reported open
    pub const OPEN_DELAY: Duration = Duration::from_millis(20);

    /// Delay before a session reports configured
    pub const CONFIGURE_DELAY: Duration = Duration::from_millis(10);

    /// Interval between frames of a burst
    pub const FRAME_INTERVAL: Duration = Duration::from_millis(5);

    /// Back camera still size
    pub const BACK_STILL: (u32, u32) = (64, 48);

    /// Front camera still size
    pub const FRONT_STILL: (u32, u32) = (48, 32);

    /// JPEG quality of the generated test frames
    pub const FRAME_QUALITY: u8 = 90;
}

/// Build information
pub mod app_info {
    /// Version string embedded by the build script
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    pub const APP_NAME: &str = "burst-camera";
}
