//! crates/liveness_core/src/face_match.rs
//!
//! Compares an ID document image against a selfie through the external face
//! comparison collaborator and applies the match threshold. Results are never
//! stored; every call asks the collaborator again.

use std::sync::Arc;

use tracing::{error, info};

use crate::domain::FaceMatchResult;
use crate::error::{VerificationError, VerificationResult};
use crate::image::ImageFrame;
use crate::policy::VerificationPolicy;
use crate::ports::{FaceComparisonService, PortError};

pub struct FaceMatchCoordinator {
    comparer: Arc<dyn FaceComparisonService>,
    policy: Arc<VerificationPolicy>,
}

impl FaceMatchCoordinator {
    pub fn new(comparer: Arc<dyn FaceComparisonService>, policy: Arc<VerificationPolicy>) -> Self {
        Self { comparer, policy }
    }

    pub fn threshold(&self) -> f64 {
        self.policy.match_threshold
    }

    pub async fn compare_face(
        &self,
        id_document: &ImageFrame,
        selfie: &ImageFrame,
    ) -> VerificationResult<FaceMatchResult> {
        let call = self.comparer.compare_faces(id_document, selfie);
        let confidence = match tokio::time::timeout(self.policy.comparison_timeout, call).await {
            Ok(Ok(confidence)) => confidence,
            Ok(Err(PortError::InvalidImage(reason))) => {
                return Err(VerificationError::InvalidImage(reason))
            }
            Ok(Err(e)) => {
                error!("Face comparison failed: {}", e);
                return Err(VerificationError::ComparisonUnavailable(e.to_string()));
            }
            Err(_) => {
                error!(
                    "Face comparison timed out after {:?}",
                    self.policy.comparison_timeout
                );
                return Err(VerificationError::ComparisonUnavailable(
                    "face comparison timed out".to_string(),
                ));
            }
        };

        if !(0.0..=100.0).contains(&confidence) {
            error!(confidence, "Face comparison returned an out-of-range confidence");
            return Err(VerificationError::ComparisonUnavailable(format!(
                "collaborator returned invalid confidence {}",
                confidence
            )));
        }

        let result = decide(confidence, self.policy.match_threshold);
        info!(
            confidence = result.confidence,
            threshold = result.threshold,
            matched = result.matched,
            "Face comparison completed"
        );
        Ok(result)
    }
}

/// `matched` holds exactly when `confidence >= threshold`.
pub fn decide(confidence: f64, threshold: f64) -> FaceMatchResult {
    FaceMatchResult {
        confidence,
        threshold,
        matched: confidence >= threshold,
    }
}
