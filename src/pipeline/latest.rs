use std::sync::{Arc, Mutex};

use crate::wire::WireFrame;

/// Most recently broadcast frame, shared with the HTTP API.
#[derive(Clone, Debug, Default)]
pub struct LatestFrame {
    inner: Arc<Mutex<Option<WireFrame>>>,
}

impl LatestFrame {
    pub fn publish(&self, frame: &WireFrame) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        match guard.as_mut() {
            Some(current) => current.clone_from(frame),
            None => *guard = Some(frame.clone()),
        }
    }

    pub fn snapshot(&self) -> Option<WireFrame> {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_until_first_publish() {
        let latest = LatestFrame::default();
        assert!(latest.snapshot().is_none());

        let frame = WireFrame {
            frame_number: 3,
            ..WireFrame::default()
        };
        latest.clone().publish(&frame);
        assert_eq!(latest.snapshot(), Some(frame));
    }
}
