//! Validation actor: runs the analyzer on one read-back capture at a time

use std::any::Any;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use bytes::BytesMut;
use flume::{Receiver, Sender};
use tracing::{debug, error, info, instrument, warn};

use super::message::{ActorKind, HostEvent, RenderMessage, ValidatorMessage};
use crate::analysis::{Analyzer, AnalyzerError};
use crate::capture::{Capture, CaptureSnapshotBuilder, ValidationState};
use crate::error::{PipelineError, Result};
use crate::ValidationConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidatorState {
    Waiting,
    Validating,
    /// Last analysis failed; reported, then back to Waiting
    Error,
}

pub struct ValidationActor {
    analyzer: Box<dyn Analyzer>,
    state: ValidatorState,
    reply: Sender<RenderMessage>,
    builder: Arc<CaptureSnapshotBuilder>,
    timeout: Duration,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl ValidationActor {
    /// `reply` is the render orchestrator mailbox. `builder` takes back
    /// captures whose result cannot be delivered.
    pub fn new(
        analyzer: Box<dyn Analyzer>,
        reply: Sender<RenderMessage>,
        builder: Arc<CaptureSnapshotBuilder>,
        config: &ValidationConfig,
    ) -> Self {
        Self {
            analyzer,
            state: ValidatorState::Waiting,
            reply,
            builder,
            timeout: config.analysis_timeout(),
        }
    }

    pub fn state(&self) -> ValidatorState {
        self.state
    }

    pub fn handle(&mut self, message: ValidatorMessage) -> ControlFlow<()> {
        match message {
            ValidatorMessage::ValidationRequest(capture) => {
                self.validate(capture);
                ControlFlow::Continue(())
            }
            ValidatorMessage::Shutdown => ControlFlow::Break(()),
        }
    }

    /// Sends exactly one VALIDATION_RESULT for the capture, whatever the
    /// analyzer does.
    #[instrument(skip_all, fields(width = capture.width, height = capture.height))]
    fn validate(&mut self, mut capture: Capture) {
        if self.state != ValidatorState::Waiting {
            warn!(
                "Validation request while {:?}, rejecting: {:?}",
                self.state, capture
            );
            capture.validation = ValidationState::Failed;
            self.send_result(capture);
            return;
        }

        self.state = ValidatorState::Validating;
        let started = Instant::now();
        let had_pixels = capture.pixels.is_some();

        let analyzer = &mut self.analyzer;
        let mut outcome = panic::catch_unwind(AssertUnwindSafe(|| analyzer.analyze(&mut capture)))
            .unwrap_or_else(|payload| Err(AnalyzerError::Panicked(panic_message(&*payload))));

        if had_pixels && capture.pixels.is_none() {
            // The pooled buffer is gone; an empty stand-in keeps the
            // allocator's outstanding count balanced on recycle.
            error!("Analyzer took the pixel buffer");
            capture.pixels = Some(BytesMut::new());
            outcome = Err(AnalyzerError::PixelsTaken);
        }

        let elapsed = started.elapsed();
        metrics::histogram!("analysis_time_us").record(elapsed.as_micros() as f64);

        let outcome = match outcome {
            Ok(_) if elapsed > self.timeout => Err(AnalyzerError::TimedOut {
                elapsed_ms: elapsed.as_millis() as u64,
                limit_ms: self.timeout.as_millis() as u64,
            }),
            other => other,
        };

        capture.validation = match outcome {
            Ok(ValidationState::Succeeded) => ValidationState::Succeeded,
            Ok(other) => {
                if other != ValidationState::Failed {
                    debug!("Analyzer returned unresolved state {:?}", other);
                }
                ValidationState::Failed
            }
            Err(e) => {
                self.state = ValidatorState::Error;
                warn!("Analysis failed after {:?}: {}", elapsed, e);
                ValidationState::Failed
            }
        };

        match capture.validation {
            ValidationState::Succeeded => metrics::counter!("validation_succeeded").increment(1),
            _ => metrics::counter!("validation_failed").increment(1),
        }
        debug!("Validation result {:?} in {:?}", capture.validation, elapsed);

        self.send_result(capture);
        self.state = ValidatorState::Waiting;
    }

    fn send_result(&self, capture: Capture) {
        if let Err(flume::SendError(message)) =
            self.reply.send(RenderMessage::ValidationResult(capture))
        {
            warn!("Renderer gone, dropping validation result");
            if let RenderMessage::ValidationResult(capture) = message {
                self.builder.recycle(capture);
            }
        }
    }

    /// Message loop. Requests still queued after SYSTEM_SHUTDOWN are not
    /// analyzed; their captures go back to the pool.
    pub fn run(mut self, mailbox: Receiver<ValidatorMessage>) {
        info!("Validator running");
        while let Ok(message) = mailbox.recv() {
            if self.handle(message).is_break() {
                break;
            }
        }

        for message in mailbox.drain() {
            if let ValidatorMessage::ValidationRequest(capture) = message {
                debug!("Discarding queued request after shutdown");
                self.builder.recycle(capture);
            }
        }
        info!("Validator stopped");
    }

    /// Runs the actor on its own thread
    pub fn spawn(
        self,
        mailbox: Receiver<ValidatorMessage>,
        handle: Sender<ValidatorMessage>,
        host: Sender<HostEvent>,
    ) -> Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("capture-validator".into())
            .spawn(move || {
                let _ = host.send(HostEvent::ConnectValidator(handle));
                self.run(mailbox);
                let _ = host.send(HostEvent::Stopped(ActorKind::Validator));
            })
            .map_err(|e| PipelineError::Spawn("validator", e.to_string()))
    }
}
