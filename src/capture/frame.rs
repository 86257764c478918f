use serde::{Deserialize, Serialize};

use super::record::Readiness;

/// Auto-focus state reported with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FocusState {
    Inactive,
    PassiveScan,
    PassiveFocused,
    PassiveUnfocused,
    ActiveScan,
    FocusedLocked,
    NotFocusedLocked,
}

/// Auto-exposure state reported with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExposureState {
    Inactive,
    Searching,
    Converged,
    Locked,
    FlashRequired,
    Precapture,
}

/// Auto-white-balance state reported with a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhiteBalanceState {
    Inactive,
    Searching,
    Converged,
    Locked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LensState {
    Stationary,
    Moving,
}

/// Per-frame metadata delivered by the camera session callback.
///
/// Any field may be missing depending on the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FrameMetadata {
    pub sequence: u64,
    pub focus: Option<FocusState>,
    pub exposure: Option<ExposureState>,
    pub white_balance: Option<WhiteBalanceState>,
    pub lens: Option<LensState>,
    /// Number of detected faces, `None` when face detection is off
    pub faces: Option<usize>,
}

/// Camera and light readiness derived from one frame's metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraReadiness {
    pub camera: Readiness,
    pub light: Readiness,
}

impl FrameMetadata {
    /// Camera/light decision table.
    ///
    /// Focus gates everything. Exposure decides light readiness: a settled
    /// exposure makes both READY, any other reported state makes both
    /// NOT_READY, and a missing exposure leaves the camera READY with light
    /// NOT_AVAILABLE. White balance and lens only refine an already READY
    /// camera, and a missing value there does not degrade it.
    pub fn camera_readiness(&self) -> CameraReadiness {
        let Some(focus) = self.focus else {
            return CameraReadiness {
                camera: Readiness::NotAvailable,
                light: Readiness::NotAvailable,
            };
        };

        if !matches!(
            focus,
            FocusState::Inactive | FocusState::PassiveFocused | FocusState::FocusedLocked
        ) {
            // Light is not evaluated while focus hunts
            return CameraReadiness {
                camera: Readiness::NotReady,
                light: Readiness::NotAvailable,
            };
        }

        let (mut camera, light) = match self.exposure {
            Some(ExposureState::Inactive | ExposureState::Locked | ExposureState::Converged) => {
                (Readiness::Ready, Readiness::Ready)
            }
            Some(_) => (Readiness::NotReady, Readiness::NotReady),
            None => (Readiness::Ready, Readiness::NotAvailable),
        };

        if camera == Readiness::Ready {
            if let Some(awb) = self.white_balance {
                if !matches!(
                    awb,
                    WhiteBalanceState::Inactive
                        | WhiteBalanceState::Locked
                        | WhiteBalanceState::Converged
                ) {
                    camera = Readiness::NotReady;
                }
            }
        }

        if camera == Readiness::Ready && self.lens == Some(LensState::Moving) {
            camera = Readiness::NotReady;
        }

        CameraReadiness { camera, light }
    }

    /// At most one face is READY, several faces is NOT_READY
    pub fn face_readiness(&self) -> Readiness {
        match self.faces {
            None => Readiness::NotAvailable,
            Some(n) if n > 1 => Readiness::NotReady,
            Some(_) => Readiness::Ready,
        }
    }

    /// Metadata of a settled camera with no face in view
    pub fn settled(sequence: u64) -> Self {
        Self {
            sequence,
            focus: Some(FocusState::PassiveFocused),
            exposure: Some(ExposureState::Converged),
            white_balance: Some(WhiteBalanceState::Converged),
            lens: Some(LensState::Stationary),
            faces: Some(0),
        }
    }
}
