//! Device-side capture flow.
//!
//! One enum holds the whole screen state, so combinations such as "uploading
//! while showing a processed result" cannot be represented. Each user or
//! device event is a method that either performs a legal transition or
//! returns [`CaptureError::InvalidEvent`] and leaves the state untouched.

use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::errors::{CaptureError, Permission, PermissionError};
use super::jobs::AnalysisResult;
use crate::ports::uploader::Uploader;

/// Countdown length, in ticks, before recording starts.
pub const DEFAULT_COUNTDOWN: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PermissionSet {
    pub camera: bool,
    pub microphone: bool,
    pub media_library: bool,
}

impl PermissionSet {
    pub fn all() -> Self {
        Self {
            camera: true,
            microphone: true,
            media_library: true,
        }
    }

    fn missing(&self) -> Vec<Permission> {
        let mut missing = Vec::new();
        if !self.camera {
            missing.push(Permission::Camera);
        }
        if !self.microphone {
            missing.push(Permission::Microphone);
        }
        if !self.media_library {
            missing.push(Permission::MediaLibrary);
        }
        missing
    }
}

/// Handed out when an upload starts; the completion must present the same ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket {
    pub id: u64,
    pub video: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureState {
    AwaitingPermission,
    Idle,
    Countdown {
        remaining: u32,
    },
    Recording,
    LocalReview {
        video: PathBuf,
        /// Set when the last upload attempt failed.
        alert: Option<String>,
    },
    Uploading {
        video: PathBuf,
        ticket: u64,
    },
    RemoteReview {
        result: AnalysisResult,
    },
    Error {
        reason: String,
        /// The local recording, when one survived the failure.
        video: Option<PathBuf>,
    },
}

impl CaptureState {
    pub fn name(&self) -> &'static str {
        match self {
            CaptureState::AwaitingPermission => "awaiting permission",
            CaptureState::Idle => "idle",
            CaptureState::Countdown { .. } => "counting down",
            CaptureState::Recording => "recording",
            CaptureState::LocalReview { .. } => "reviewing the local video",
            CaptureState::Uploading { .. } => "uploading",
            CaptureState::RemoteReview { .. } => "reviewing the processed video",
            CaptureState::Error { .. } => "in error",
        }
    }
}

/// The artifact currently shown to the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActiveArtifact<'a> {
    Local(&'a Path),
    Remote(&'a str),
}

#[derive(Debug)]
pub struct CaptureSession {
    state: CaptureState,
    countdown: u32,
    next_ticket: u64,
}

impl Default for CaptureSession {
    fn default() -> Self {
        Self::new(DEFAULT_COUNTDOWN)
    }
}

impl CaptureSession {
    pub fn new(countdown: u32) -> Self {
        Self {
            state: CaptureState::AwaitingPermission,
            countdown,
            next_ticket: 0,
        }
    }

    pub fn state(&self) -> &CaptureState {
        &self.state
    }

    pub fn active_artifact(&self) -> Option<ActiveArtifact<'_>> {
        match &self.state {
            CaptureState::LocalReview { video, .. } | CaptureState::Uploading { video, .. } => {
                Some(ActiveArtifact::Local(video))
            }
            CaptureState::RemoteReview { result } => {
                Some(ActiveArtifact::Remote(&result.processed_video_url))
            }
            CaptureState::Error {
                video: Some(video), ..
            } => Some(ActiveArtifact::Local(video)),
            _ => None,
        }
    }

    fn reject(&self, event: &'static str) -> CaptureError {
        CaptureError::InvalidEvent {
            state: self.state.name(),
            event,
        }
    }

    fn enter(&mut self, next: CaptureState) {
        debug!(from = self.state.name(), to = next.name(), "Capture transition");
        self.state = next;
    }

    /// Result of the device permission prompts. Stays blocked unless all three are granted.
    pub fn grant(&mut self, granted: PermissionSet) -> Result<(), CaptureError> {
        if self.state != CaptureState::AwaitingPermission {
            return Err(self.reject("grant"));
        }
        let missing = granted.missing();
        if !missing.is_empty() {
            warn!(?missing, "Capture blocked on permissions");
            return Err(PermissionError::Denied(missing).into());
        }
        self.enter(CaptureState::Idle);
        Ok(())
    }

    pub fn record(&mut self) -> Result<(), CaptureError> {
        if self.state != CaptureState::Idle {
            return Err(self.reject("record"));
        }
        if self.countdown == 0 {
            self.enter(CaptureState::Recording);
        } else {
            self.enter(CaptureState::Countdown {
                remaining: self.countdown,
            });
        }
        Ok(())
    }

    /// One countdown time unit elapsed. Recording begins when it reaches zero.
    pub fn tick(&mut self) -> Result<(), CaptureError> {
        let CaptureState::Countdown { remaining } = self.state else {
            return Err(self.reject("tick"));
        };
        if remaining <= 1 {
            self.enter(CaptureState::Recording);
        } else {
            self.state = CaptureState::Countdown {
                remaining: remaining - 1,
            };
        }
        Ok(())
    }

    pub fn stop(&mut self, video: PathBuf) -> Result<(), CaptureError> {
        if self.state != CaptureState::Recording {
            return Err(self.reject("stop"));
        }
        self.enter(CaptureState::LocalReview { video, alert: None });
        Ok(())
    }

    /// Starts uploading the reviewed video. A second call while uploading is rejected.
    pub fn confirm_upload(&mut self) -> Result<UploadTicket, CaptureError> {
        let CaptureState::LocalReview { video, .. } = &self.state else {
            return Err(self.reject("upload"));
        };
        let video = video.clone();
        self.next_ticket += 1;
        let ticket = UploadTicket {
            id: self.next_ticket,
            video: video.clone(),
        };
        self.enter(CaptureState::Uploading {
            video,
            ticket: ticket.id,
        });
        Ok(ticket)
    }

    /// Applies the pipeline outcome. A failure goes back to local review with
    /// an alert and the same file, so the user can retry without re-recording.
    pub fn complete_upload<E: std::fmt::Display>(
        &mut self,
        ticket: &UploadTicket,
        outcome: Result<AnalysisResult, E>,
    ) -> Result<(), CaptureError> {
        let video = match &self.state {
            CaptureState::Uploading {
                ticket: current,
                video,
            } if *current == ticket.id => video.clone(),
            _ => return Err(self.reject("upload finished")),
        };
        match outcome {
            Ok(result) => self.enter(CaptureState::RemoteReview { result }),
            Err(e) => {
                warn!(error = %e, "Upload failed, returning to local review");
                self.enter(CaptureState::LocalReview {
                    video,
                    alert: Some(format!(
                        "There was an error uploading your video. Please try again. ({})",
                        e
                    )),
                });
            }
        }
        Ok(())
    }

    /// Discards the current artifact reference. The file on the device is left alone.
    pub fn retake(&mut self) -> Result<(), CaptureError> {
        match self.state {
            CaptureState::LocalReview { .. } | CaptureState::RemoteReview { .. } => {
                self.enter(CaptureState::Idle);
                Ok(())
            }
            _ => Err(self.reject("retake")),
        }
    }

    /// A device-level failure (camera, recorder, connectivity) during an active phase.
    pub fn fault(&mut self, reason: impl Into<String>) -> Result<(), CaptureError> {
        let video = match &self.state {
            CaptureState::Countdown { .. } | CaptureState::Recording => None,
            CaptureState::Uploading { video, .. } => Some(video.clone()),
            _ => return Err(self.reject("fault")),
        };
        self.enter(CaptureState::Error {
            reason: reason.into(),
            video,
        });
        Ok(())
    }

    /// Acknowledges an error. A surviving recording is brought back for review.
    pub fn dismiss(&mut self) -> Result<(), CaptureError> {
        let CaptureState::Error { reason, video } = &self.state else {
            return Err(self.reject("dismiss"));
        };
        let (reason, video) = (reason.clone(), video.clone());
        match video {
            Some(video) => self.enter(CaptureState::LocalReview {
                video,
                alert: Some(reason),
            }),
            None => self.enter(CaptureState::Idle),
        }
        Ok(())
    }

    /// Confirms, uploads through `uploader` and applies the outcome.
    pub async fn upload<U: Uploader + ?Sized>(
        &mut self,
        uploader: &U,
    ) -> Result<&CaptureState, CaptureError> {
        let ticket = self.confirm_upload()?;
        let outcome = uploader.upload(&ticket.video).await;
        self.complete_upload(&ticket, outcome)?;
        Ok(&self.state)
    }
}
