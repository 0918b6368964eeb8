// SPDX-License-Identifier: GPL-3.0-only

//! User-facing notifications
//!
//! Failures and capture results are surfaced as short messages. Raw platform
//! fault codes stay in the logs.

use tokio::sync::mpsc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Every frame of a burst was saved
    BurstCaptured { count: usize },
    /// A single photo was saved
    PhotoSaved,
    /// Only some frames of a burst arrived
    PartialBurst { delivered: usize, expected: usize },
    /// Camera permission is missing
    PermissionDenied,
    /// Frame `index` of a burst could not be saved
    PersistFailed { index: usize },
    /// No image to show
    ImageUnavailable,
    /// Capture requested before the camera finished opening
    CameraNotReady,
    /// No suitable camera could be opened
    CameraUnavailable,
    /// The camera failed or disconnected
    CameraError,
}

impl Notification {
    pub fn message(&self) -> String {
        match self {
            Notification::BurstCaptured { count } => format!("Burst captured ({count} photos)"),
            Notification::PhotoSaved => "Image saved".to_string(),
            Notification::PartialBurst {
                delivered,
                expected,
            } => format!("Only {delivered} of {expected} photos were captured"),
            Notification::PermissionDenied => "Camera permission denied".to_string(),
            Notification::PersistFailed { index } => {
                format!("Could not save photo {}", index + 1)
            }
            Notification::ImageUnavailable => "Image unavailable".to_string(),
            Notification::CameraNotReady => "Camera is not ready yet".to_string(),
            Notification::CameraUnavailable => "No camera available".to_string(),
            Notification::CameraError => "Camera error, please try again".to_string(),
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

/// Sending half of the notification stream
///
/// Notifications are dropped silently once the receiver is gone.
#[derive(Debug, Clone, Default)]
pub struct Notifier {
    tx: Option<mpsc::UnboundedSender<Notification>>,
}

impl Notifier {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    pub fn notify(&self, notification: Notification) {
        debug!(?notification, "Notification");
        if let Some(tx) = &self.tx {
            let _ = tx.send(notification);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_are_human_readable() {
        assert_eq!(Notification::PhotoSaved.message(), "Image saved");
        assert_eq!(
            Notification::PartialBurst {
                delivered: 7,
                expected: 10
            }
            .message(),
            "Only 7 of 10 photos were captured"
        );
        assert_eq!(
            Notification::PersistFailed { index: 0 }.to_string(),
            "Could not save photo 1"
        );
    }

    #[test]
    fn test_notifier_delivers_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.notify(Notification::CameraNotReady);
        notifier.clone().notify(Notification::PhotoSaved);

        assert_eq!(rx.try_recv().unwrap(), Notification::CameraNotReady);
        assert_eq!(rx.try_recv().unwrap(), Notification::PhotoSaved);
    }

    #[test]
    fn test_default_notifier_is_silent() {
        Notifier::default().notify(Notification::CameraError);
    }
}
