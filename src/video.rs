//! Frame acquisition and recording.

use crate::{Error, Result};
use opencv::{
    core::{Mat, Size},
    prelude::*,
    videoio::{self, VideoCapture, VideoWriter, CAP_PROP_BUFFERSIZE, CAP_PROP_FRAME_HEIGHT, CAP_PROP_FRAME_WIDTH},
};
use std::path::PathBuf;

/// Camera index or video file path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VideoSource {
    Camera(i32),
    File(PathBuf),
}

/// Anything that yields frames
pub trait FrameSource: Send {
    /// Next frame. A failed read or the end of the feed is an error.
    ///
    /// # Errors
    ///
    /// Returns `CameraRead` when no frame could be read
    fn read(&mut self) -> Result<Mat>;
}

/// Anything that consumes annotated frames
pub trait FrameSink: Send {
    /// # Errors
    ///
    /// Returns an error if the frame cannot be written
    fn write(&mut self, frame: &Mat) -> Result<()>;
}

/// `OpenCV` capture from a camera or a video file; released on drop
pub struct CaptureSource {
    capture: VideoCapture,
    source: VideoSource,
    /// Frame read to learn the size, handed out by the next `read`
    pending: Option<Mat>,
}

impl CaptureSource {
    /// Open the source and, for cameras, request the given resolution
    ///
    /// # Errors
    ///
    /// Returns `CameraRead` if the device or file cannot be opened
    pub fn open(source: &VideoSource, width: u32, height: u32) -> Result<Self> {
        let capture = match source {
            VideoSource::Camera(index) => {
                log::info!("Opening camera {index}");
                let mut capture = VideoCapture::new(*index, videoio::CAP_ANY)?;
                // Lower latency
                capture.set(CAP_PROP_BUFFERSIZE, 1.0)?;
                capture.set(CAP_PROP_FRAME_WIDTH, f64::from(width))?;
                capture.set(CAP_PROP_FRAME_HEIGHT, f64::from(height))?;
                capture
            }
            VideoSource::File(path) => {
                log::info!("Opening video file: {}", path.display());
                VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?
            }
        };

        if !capture.is_opened()? {
            return Err(Error::CameraRead(format!("Failed to open {source:?}")));
        }

        Ok(Self {
            capture,
            source: source.clone(),
            pending: None,
        })
    }

    #[must_use]
    pub fn source(&self) -> &VideoSource {
        &self.source
    }

    /// Size of the frames the source actually delivers.
    ///
    /// Cameras may ignore the requested resolution. When the backend does
    /// not report a size, the first frame is read and kept for `read`.
    ///
    /// # Errors
    ///
    /// Returns `CameraRead` if no size is reported and no frame can be read
    pub fn frame_size(&mut self) -> Result<(u32, u32)> {
        let width = self.capture.get(CAP_PROP_FRAME_WIDTH)?;
        let height = self.capture.get(CAP_PROP_FRAME_HEIGHT)?;
        if width >= 1.0 && height >= 1.0 {
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            return Ok((width.round() as u32, height.round() as u32));
        }

        let frame = match self.pending.take() {
            Some(frame) => frame,
            None => self.read_next()?,
        };
        let size = (u32::try_from(frame.cols()), u32::try_from(frame.rows()));
        self.pending = Some(frame);
        match size {
            (Ok(width), Ok(height)) => Ok((width, height)),
            _ => Err(Error::CameraRead(format!("{:?} reported an invalid frame size", self.source))),
        }
    }

    fn read_next(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        if !self.capture.read(&mut frame)? || frame.empty() {
            return Err(Error::CameraRead(match self.source {
                VideoSource::File(_) => "End of video file reached".to_string(),
                VideoSource::Camera(index) => format!("Camera {index} returned no frame"),
            }));
        }
        Ok(frame)
    }
}

impl FrameSource for CaptureSource {
    fn read(&mut self) -> Result<Mat> {
        match self.pending.take() {
            Some(frame) => Ok(frame),
            None => self.read_next(),
        }
    }
}

impl Drop for CaptureSource {
    fn drop(&mut self) {
        if let Err(e) = self.capture.release() {
            log::warn!("Failed to release video capture: {e}");
        }
    }
}

/// `OpenCV` video file writer; released on drop
pub struct VideoFileSink {
    writer: VideoWriter,
    size: Size,
}

impl VideoFileSink {
    /// # Errors
    ///
    /// Returns an error if the writer cannot be opened
    pub fn create(path: &std::path::Path, fps: f64, width: i32, height: i32) -> Result<Self> {
        log::info!("Recording to {} at {fps:.1} fps", path.display());
        let size = Size::new(width, height);
        let fourcc = VideoWriter::fourcc('m', 'p', '4', 'v')?;
        let writer = VideoWriter::new(&path.to_string_lossy(), fourcc, fps, size, true)?;
        if !writer.is_opened()? {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Failed to open video writer for {}", path.display()),
            )));
        }
        Ok(Self { writer, size })
    }
}

impl FrameSink for VideoFileSink {
    fn write(&mut self, frame: &Mat) -> Result<()> {
        if frame.size()? != self.size {
            return Err(Error::InvalidInput(format!(
                "Frame size {:?} does not match writer size {:?}",
                frame.size()?,
                self.size
            )));
        }
        self.writer.write(frame)?;
        Ok(())
    }
}

impl Drop for VideoFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.writer.release() {
            log::warn!("Failed to release video writer: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_camera_read_error() {
        let source = VideoSource::File(PathBuf::from("does/not/exist.mp4"));
        match CaptureSource::open(&source, 640, 480) {
            Err(Error::CameraRead(_) | Error::OpenCV(_)) => {}
            Err(e) => panic!("unexpected error: {e}"),
            Ok(_) => panic!("opening a missing file should fail"),
        }
    }
}
