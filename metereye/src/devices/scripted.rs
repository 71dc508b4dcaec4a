use crate::devices::hardware::rtsp::{VideoSource, VideoSourceFactory};
use crate::errors::StreamError;
use image::RgbImage;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// One scripted read outcome: a frame, or a read failure message.
pub type ScriptStep = Result<RgbImage, String>;

/// A video source that replays a prepared list of frames. When the
/// script runs out it either loops the last frame forever or reports
/// the stream as ended.
pub struct ScriptedSource {
    steps: VecDeque<ScriptStep>,
    loop_last: bool,
    last: Option<RgbImage>,
}

impl ScriptedSource {
    pub fn new(steps: Vec<ScriptStep>, loop_last: bool) -> Self {
        Self {
            steps: steps.into(),
            loop_last,
            last: None,
        }
    }
}

impl VideoSource for ScriptedSource {
    fn read_frame(&mut self, _timeout: Duration) -> Result<RgbImage, StreamError> {
        match self.steps.pop_front() {
            Some(Ok(frame)) => {
                self.last = Some(frame.clone());
                Ok(frame)
            }
            Some(Err(message)) => Err(StreamError::Read(message)),
            None => match (&self.last, self.loop_last) {
                (Some(frame), true) => Ok(frame.clone()),
                _ => Err(StreamError::Read("script exhausted".to_string())),
            },
        }
    }
}

/// What one `open` call should do.
pub enum ConnectOutcome {
    /// Fail the connection attempt.
    Refuse(String),
    /// Serve a scripted source.
    Serve(Vec<ScriptStep>, bool),
}

/// A factory with a plan of connect outcomes and a fallback once the
/// plan is exhausted. Records the instant of every attempt so the
/// backoff schedule can be asserted.
pub struct ScriptedFactory {
    plan: Mutex<VecDeque<ConnectOutcome>>,
    fallback_frame: Option<RgbImage>,
    attempts: Mutex<Vec<Instant>>,
}

impl ScriptedFactory {
    /// Refuse every connection attempt.
    pub fn refusing() -> Self {
        Self {
            plan: Mutex::new(VecDeque::new()),
            fallback_frame: None,
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Serve an endless stream of the given frame on every attempt.
    pub fn serving(frame: RgbImage) -> Self {
        Self {
            plan: Mutex::new(VecDeque::new()),
            fallback_frame: Some(frame),
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Run through a plan first, then fall back to refusal or the
    /// fallback frame.
    pub fn with_plan(plan: Vec<ConnectOutcome>, fallback_frame: Option<RgbImage>) -> Self {
        Self {
            plan: Mutex::new(plan.into()),
            fallback_frame,
            attempts: Mutex::new(Vec::new()),
        }
    }

    /// Instants of every connect attempt so far.
    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().expect("factory mutex poisoned").clone()
    }
}

impl VideoSourceFactory for ScriptedFactory {
    fn open(&self, _url: &str) -> Result<Box<dyn VideoSource>, StreamError> {
        self.attempts
            .lock()
            .expect("factory mutex poisoned")
            .push(Instant::now());
        let next = self.plan.lock().expect("factory mutex poisoned").pop_front();
        match next {
            Some(ConnectOutcome::Refuse(message)) => Err(StreamError::Connect(message)),
            Some(ConnectOutcome::Serve(steps, loop_last)) => {
                Ok(Box::new(ScriptedSource::new(steps, loop_last)))
            }
            None => match &self.fallback_frame {
                Some(frame) => Ok(Box::new(ScriptedSource::new(
                    vec![Ok(frame.clone())],
                    true,
                ))),
                None => Err(StreamError::Connect("connection refused".to_string())),
            },
        }
    }
}
