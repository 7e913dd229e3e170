//! services/api/src/adapters/face_llm.rs
//!
//! This module contains the adapter that asks a vision model how likely an ID
//! document photo and a selfie show the same person. It implements the
//! `FaceComparisonService` port from the core crate.

use async_trait::async_trait;
use liveness_core::image::ImageFrame;
use liveness_core::ports::{FaceComparisonService, PortError, PortResult};
use serde::Deserialize;

use super::vision_llm::VisionClient;

const SYSTEM_INSTRUCTIONS: &str = r#"You compare faces for an identity verification flow.
The first image is a photo of an identity document. The second image is a live selfie.

Locate the portrait on the document and the face in the selfie, then estimate how confident you are that both depict the same person, on a scale from 0 (certainly different people) to 100 (certainly the same person).
Ignore differences in lighting, age of the document photo, glasses and hairstyle.

Reply with a single JSON object and nothing else:
{"document_face_found": true|false, "selfie_face_found": true|false, "confidence": <number 0-100>}"#;

const USER_INSTRUCTION: &str = "Image 1 is the identity document, image 2 is the selfie.";

#[derive(Deserialize)]
struct ComparisonVerdict {
    document_face_found: bool,
    selfie_face_found: bool,
    #[serde(default)]
    confidence: f64,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `FaceComparisonService` using a vision-capable LLM.
#[derive(Clone)]
pub struct OpenAiFaceComparisonAdapter {
    vision: VisionClient,
}

impl OpenAiFaceComparisonAdapter {
    /// Creates a new `OpenAiFaceComparisonAdapter`.
    pub fn new(vision: VisionClient) -> Self {
        Self { vision }
    }
}

fn into_confidence(verdict: ComparisonVerdict) -> PortResult<f64> {
    if !verdict.document_face_found {
        return Err(PortError::InvalidImage("no face found on the ID document".to_string()));
    }
    if !verdict.selfie_face_found {
        return Err(PortError::InvalidImage("no face found in the selfie".to_string()));
    }
    Ok(verdict.confidence.clamp(0.0, 100.0))
}

//=========================================================================================
// `FaceComparisonService` Trait Implementation
//=========================================================================================

#[async_trait]
impl FaceComparisonService for OpenAiFaceComparisonAdapter {
    async fn compare_faces(&self, image_a: &ImageFrame, image_b: &ImageFrame) -> PortResult<f64> {
        let verdict: ComparisonVerdict = self
            .vision
            .ask_json(SYSTEM_INSTRUCTIONS, USER_INSTRUCTION, &[image_a, image_b])
            .await?;
        into_confidence(verdict)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::vision_llm::parse_reply;

    #[test]
    fn missing_faces_are_invalid_images() {
        let verdict: ComparisonVerdict = parse_reply(
            r#"{"document_face_found": false, "selfie_face_found": true, "confidence": 0}"#,
        )
        .unwrap();
        assert!(matches!(into_confidence(verdict), Err(PortError::InvalidImage(_))));
    }

    #[test]
    fn confidence_is_clamped_to_the_contract_range() {
        let verdict: ComparisonVerdict = parse_reply(
            r#"{"document_face_found": true, "selfie_face_found": true, "confidence": 104.5}"#,
        )
        .unwrap();
        assert_eq!(into_confidence(verdict).unwrap(), 100.0);
    }
}
