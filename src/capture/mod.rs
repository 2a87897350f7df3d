pub mod decoder;
pub mod frame;
pub mod v4l2;

pub use decoder::CaptureFormat;
pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use v4l2::V4l2Capture;

use crate::error::CaptureError;

/// A producer of decoded frames, exclusively owned by the pipeline loop.
pub trait FrameSource {
    /// Block until the next frame is available.
    fn next_frame(&mut self) -> Result<Frame, CaptureError>;

    /// Release the underlying device. Calling it again is a no-op.
    fn close(&mut self);
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Frame, CaptureError> {
        (**self).next_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
