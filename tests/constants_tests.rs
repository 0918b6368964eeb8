// SPDX-License-Identifier: MPL-2.0

//! Integration tests for constants module

use burst_camera::constants::{self, file_naming};

#[test]
fn test_burst_fits_in_reader_pool() {
    // A full burst must be able to sit in the pool at once
    assert!(constants::BURST_FRAME_COUNT <= constants::IMAGE_READER_CAPACITY);
}

#[test]
fn test_photo_extensions() {
    assert!(file_naming::is_photo_extension("jpg"));
    assert!(file_naming::is_photo_extension("JPEG"));
    assert!(!file_naming::is_photo_extension("png"));
}

#[test]
fn test_pending_prefix_is_hidden() {
    assert!(file_naming::PENDING_PREFIX.starts_with('.'));
}

#[test]
fn test_version_is_set() {
    assert!(!constants::app_info::version().is_empty());
}
