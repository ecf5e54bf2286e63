// ============================================================================
// EDIT ORCHESTRATOR - validate, submit on a worker thread, poll for result
// ============================================================================

use image::RgbaImage;
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::components::history::MaskHistory;
use crate::io::{SourceImage, decode_image_bytes, encode_png_rgb, encode_png_rgba};
use crate::ops::generate::{GeneratedImage, GenerationRequest, GenerationService, ServiceError};
use crate::ops::mask::build_submission_mask;

/// Problems caught locally, before anything is sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationError {
    EmptyPrompt,
    EmptyMask,
    Busy,
    NoImage,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyPrompt => write!(f, "Describe the change you want first."),
            ValidationError::EmptyMask => {
                write!(f, "Paint over the area you want to change first.")
            }
            ValidationError::Busy => write!(f, "An edit is already in progress."),
            ValidationError::NoImage => write!(f, "Upload an image first."),
        }
    }
}

impl std::error::Error for ValidationError {}

#[derive(Clone, Debug, PartialEq)]
pub enum EditError {
    Validation(ValidationError),
    Service(ServiceError),
    /// Encoding the request images failed.
    Encode(String),
}

impl std::fmt::Display for EditError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EditError::Validation(e) => write!(f, "{}", e),
            EditError::Service(e) => write!(f, "{}", e),
            EditError::Encode(e) => write!(f, "Could not prepare the request: {}", e),
        }
    }
}

impl std::error::Error for EditError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EditError::Validation(e) => Some(e),
            EditError::Service(e) => Some(e),
            EditError::Encode(_) => None,
        }
    }
}

impl From<ValidationError> for EditError {
    fn from(e: ValidationError) -> Self {
        EditError::Validation(e)
    }
}

impl From<ServiceError> for EditError {
    fn from(e: ServiceError) -> Self {
        EditError::Service(e)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EditState {
    #[default]
    Idle,
    Validating,
    Submitting,
    Succeeded,
    Failed,
}

/// A finished edit, ready to show and download.
#[derive(Clone, Debug)]
pub struct EditResult {
    pub image: Arc<RgbaImage>,
    pub prompt: String,
}

/// Message from the worker thread back to the UI thread.
struct WorkerOutcome {
    prompt: String,
    result: Result<GeneratedImage, ServiceError>,
}

/// Owns the single in-flight submission. The UI thread calls [`submit`]
/// once, then [`poll`] every frame until it yields a result.
///
/// [`submit`]: EditOrchestrator::submit
/// [`poll`]: EditOrchestrator::poll
pub struct EditOrchestrator {
    sender: mpsc::Sender<WorkerOutcome>,
    receiver: mpsc::Receiver<WorkerOutcome>,
    state: EditState,
    last_error: Option<EditError>,
    started_at: Option<Instant>,
    worker: Option<JoinHandle<()>>,
}

impl Default for EditOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl EditOrchestrator {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            state: EditState::Idle,
            last_error: None,
            started_at: None,
            worker: None,
        }
    }

    pub fn state(&self) -> EditState {
        self.state
    }

    /// True while a request is in flight; editing controls are disabled.
    pub fn is_busy(&self) -> bool {
        self.state == EditState::Submitting
    }

    /// Message from the most recent failed attempt. It stays until the next
    /// submission, [`dismiss_error`](Self::dismiss_error) or
    /// [`reset`](Self::reset).
    pub fn last_error(&self) -> Option<&EditError> {
        self.last_error.as_ref()
    }

    /// Acknowledge a failure: `Failed` becomes `Idle` and the message goes.
    pub fn dismiss_error(&mut self) {
        self.last_error = None;
        if self.state == EditState::Failed {
            self.state = EditState::Idle;
        }
    }

    /// Seconds since the in-flight request was sent.
    pub fn elapsed_secs(&self) -> Option<f32> {
        self.started_at.map(|t| t.elapsed().as_secs_f32())
    }

    /// Validate and send. On `Ok` the request is in flight and the state is
    /// `Submitting`. A `Busy` error changes nothing; every other `Err` leaves
    /// the state `Failed` with the error recorded, and no request was made.
    /// `history` is only read.
    pub fn submit(
        &mut self,
        prompt: &str,
        image: Option<&SourceImage>,
        history: &MaskHistory,
        service: Arc<dyn GenerationService>,
    ) -> Result<(), EditError> {
        if self.is_busy() {
            return Err(ValidationError::Busy.into());
        }
        self.state = EditState::Validating;
        self.last_error = None;

        let request = match Self::prepare(prompt, image, history) {
            Ok(request) => request,
            Err(e) => {
                crate::log_warn!("Edit rejected: {}", e);
                self.fail(e.clone());
                return Err(e);
            }
        };

        crate::log_info!(
            "Submitting edit to {} (prompt {} chars)",
            service.name(),
            request.prompt.chars().count()
        );
        let sender = self.sender.clone();
        self.worker = Some(std::thread::spawn(move || {
            let result = catch_unwind(AssertUnwindSafe(|| service.generate(&request)))
                .unwrap_or_else(|payload| Err(worker_stopped(payload.as_ref())));
            let _ = sender.send(WorkerOutcome {
                prompt: request.prompt,
                result,
            });
        }));
        self.state = EditState::Submitting;
        self.started_at = Some(Instant::now());
        Ok(())
    }

    fn prepare(
        prompt: &str,
        image: Option<&SourceImage>,
        history: &MaskHistory,
    ) -> Result<GenerationRequest, EditError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ValidationError::EmptyPrompt.into());
        }
        let image = image
            .filter(|img| img.is_loaded())
            .ok_or(ValidationError::NoImage)?;
        let snapshot = history.current().ok_or(ValidationError::EmptyMask)?;
        let mask = build_submission_mask(snapshot, image.width(), image.height())?;
        Ok(GenerationRequest {
            image_png: encode_png_rgba(image.pixels()).map_err(EditError::Encode)?,
            mask_png: encode_png_rgb(&mask).map_err(EditError::Encode)?,
            prompt: prompt.to_string(),
        })
    }

    /// Check for a finished request without blocking.
    pub fn poll(&mut self) -> Option<Result<EditResult, EditError>> {
        if !self.is_busy() {
            return None;
        }
        let worker_done = self.worker.as_ref().is_none_or(|w| w.is_finished());
        // The worker sends before it exits, so a finished worker with an
        // empty channel never sent anything.
        match self.receiver.try_recv() {
            Ok(outcome) => Some(self.finish(outcome)),
            Err(mpsc::TryRecvError::Empty) if worker_done => Some(self.lost_worker()),
            Err(_) => None,
        }
    }

    /// Block until the in-flight request resolves. `None` when nothing is
    /// in flight.
    pub fn wait(&mut self) -> Option<Result<EditResult, EditError>> {
        if !self.is_busy() {
            return None;
        }
        loop {
            let worker_done = self.worker.as_ref().is_none_or(|w| w.is_finished());
            match self.receiver.recv_timeout(Duration::from_millis(50)) {
                Ok(outcome) => return Some(self.finish(outcome)),
                Err(mpsc::RecvTimeoutError::Timeout) if worker_done => {
                    return Some(self.lost_worker());
                }
                Err(mpsc::RecvTimeoutError::Timeout) => continue,
                Err(mpsc::RecvTimeoutError::Disconnected) => return Some(self.lost_worker()),
            }
        }
    }

    fn lost_worker(&mut self) -> Result<EditResult, EditError> {
        self.finish(WorkerOutcome {
            prompt: String::new(),
            result: Err(ServiceError::Transport(
                "generation worker stopped without a reply".to_string(),
            )),
        })
    }

    fn finish(&mut self, outcome: WorkerOutcome) -> Result<EditResult, EditError> {
        let elapsed = self.elapsed_secs().unwrap_or(0.0);
        self.started_at = None;
        self.worker = None;
        let decoded = outcome.result.map_err(EditError::from).and_then(|generated| {
            decode_image_bytes(&generated.bytes)
                .map_err(|e| EditError::Service(ServiceError::InvalidImage(e)))
        });
        match decoded {
            Ok(image) => {
                crate::log_info!(
                    "Edit succeeded in {:.1}s ({}x{})",
                    elapsed,
                    image.width(),
                    image.height()
                );
                self.state = EditState::Succeeded;
                Ok(EditResult {
                    image: Arc::new(image),
                    prompt: outcome.prompt,
                })
            }
            Err(e) => {
                crate::log_err!("Edit failed after {:.1}s: {}", elapsed, e);
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    fn fail(&mut self, error: EditError) {
        self.state = EditState::Failed;
        self.last_error = Some(error);
    }

    /// Forget a finished result or error, e.g. when starting over.
    pub fn reset(&mut self) {
        if !self.is_busy() {
            self.state = EditState::Idle;
            self.last_error = None;
        }
    }
}

fn worker_stopped(payload: &(dyn Any + Send)) -> ServiceError {
    let reason = payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic");
    crate::log_err!("Generation worker panicked: {}", reason);
    ServiceError::Transport(format!("generation worker stopped: {}", reason))
}
