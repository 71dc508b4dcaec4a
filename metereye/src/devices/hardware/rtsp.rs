use crate::errors::StreamError;
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use std::sync::Once;
use std::time::Duration;

/// How long to wait for the pipeline to reach the playing state when
/// opening a stream.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A source of decoded frames. The camera worker only ever sees this
/// seam, which is what lets the test suite drive the worker with
/// scripted frames instead of a network stream.
pub trait VideoSource: Send {
    /// Block until the next frame arrives or the timeout passes. The
    /// newest available frame is returned; older queued frames are
    /// discarded by the source.
    fn read_frame(&mut self, timeout: Duration) -> Result<RgbImage, StreamError>;
}

/// Opens video sources for camera workers. One factory is shared by
/// every worker; opening is what can fail and drive the backoff state.
pub trait VideoSourceFactory: Send + Sync {
    /// Open the stream behind `url`.
    fn open(&self, url: &str) -> Result<Box<dyn VideoSource>, StreamError>;
}

/// Factory producing gstreamer backed RTSP sources.
pub struct RtspSourceFactory;

impl VideoSourceFactory for RtspSourceFactory {
    fn open(&self, url: &str) -> Result<Box<dyn VideoSource>, StreamError> {
        Ok(Box::new(RtspSource::open(url)?))
    }
}

/// One RTSP stream decoded to RGB frames through
/// `uridecodebin ! videoconvert ! appsink`. The appsink keeps only the
/// newest buffer (`drop=true, max-buffers=1`) so the worker always
/// processes the freshest frame no matter how slowly it paces itself.
pub struct RtspSource {
    pipeline: gst::Pipeline,
    appsink: gst_app::AppSink,
}

fn init_gstreamer() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        if let Err(error) = gst::init() {
            tracing::error!(%error, "failed to initialise gstreamer");
        }
    });
}

impl RtspSource {
    /// Open an RTSP URL and wait for the pipeline to start playing.
    pub fn open(url: &str) -> Result<Self, StreamError> {
        init_gstreamer();
        let description = format!(
            "uridecodebin uri=\"{url}\" ! videoconvert ! video/x-raw,format=RGB \
             ! appsink name=sink sync=false"
        );
        let element = gst::parse::launch(&description)
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        let pipeline = element
            .downcast::<gst::Pipeline>()
            .map_err(|_| StreamError::Connect("not a pipeline".to_string()))?;
        let appsink = pipeline
            .by_name("sink")
            .and_then(|e| e.downcast::<gst_app::AppSink>().ok())
            .ok_or_else(|| StreamError::Connect("appsink missing".to_string()))?;
        appsink.set_property("max-buffers", 1u32);
        appsink.set_property("drop", true);

        pipeline
            .set_state(gst::State::Playing)
            .map_err(|e| StreamError::Connect(e.to_string()))?;
        // The state change is asynchronous for network sources, wait
        // for it to settle before declaring the stream connected. Live
        // sources report NoPreroll rather than Success.
        let (result, _, _) =
            pipeline.state(Some(gst::ClockTime::from_seconds(CONNECT_TIMEOUT.as_secs())));
        match result {
            Ok(gst::StateChangeSuccess::Async) => {
                let _ = pipeline.set_state(gst::State::Null);
                Err(StreamError::Connect(
                    "timed out waiting for the pipeline to start".to_string(),
                ))
            }
            Ok(_) => Ok(Self { pipeline, appsink }),
            Err(_) => {
                let _ = pipeline.set_state(gst::State::Null);
                Err(StreamError::Connect("pipeline failed to start".to_string()))
            }
        }
    }
}

impl VideoSource for RtspSource {
    fn read_frame(&mut self, timeout: Duration) -> Result<RgbImage, StreamError> {
        let clock_timeout = gst::ClockTime::from_mseconds(timeout.as_millis() as u64);
        let sample = match self.appsink.try_pull_sample(clock_timeout) {
            Some(sample) => sample,
            None if self.appsink.is_eos() => {
                return Err(StreamError::Read("stream ended".to_string()))
            }
            None => return Err(StreamError::Timeout(timeout)),
        };
        let caps = sample
            .caps()
            .ok_or_else(|| StreamError::Decode("sample without caps".to_string()))?;
        let info = gst_video::VideoInfo::from_caps(caps)
            .map_err(|e| StreamError::Decode(e.to_string()))?;
        let buffer = sample
            .buffer()
            .ok_or_else(|| StreamError::Decode("sample without buffer".to_string()))?;
        let frame = gst_video::VideoFrameRef::from_buffer_ref_readable(buffer, &info)
            .map_err(|_| StreamError::Decode("buffer not readable".to_string()))?;

        let (width, height) = (info.width(), info.height());
        let stride = frame.plane_stride()[0] as usize;
        let data = frame
            .plane_data(0)
            .map_err(|_| StreamError::Decode("missing plane".to_string()))?;
        // Rows can be padded to the stride, copy them out row by row.
        let mut image = RgbImage::new(width, height);
        let row_bytes = width as usize * 3;
        for y in 0..height as usize {
            let src = &data[y * stride..y * stride + row_bytes];
            let dst_start = y * row_bytes;
            image[dst_start..dst_start + row_bytes].copy_from_slice(src);
        }
        Ok(image)
    }
}

impl Drop for RtspSource {
    fn drop(&mut self) {
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
