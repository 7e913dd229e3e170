//! services/api/src/adapters/frame_llm.rs
//!
//! This module contains the adapter that asks a vision model whether a captured
//! frame shows the requested gesture. It implements the `FrameAnalysisService`
//! port from the core crate.

use async_trait::async_trait;
use liveness_core::domain::{ChallengeType, FrameAnalysis};
use liveness_core::image::ImageFrame;
use liveness_core::ports::{FrameAnalysisService, PortError, PortResult};
use serde::Deserialize;

use super::vision_llm::VisionClient;

const SYSTEM_INSTRUCTIONS: &str = r#"You check liveness challenges for an identity verification flow.
You receive one camera frame and the gesture the person was asked to perform.

Decide whether exactly one real human face is visible and whether that person is clearly performing the requested gesture at the moment the frame was captured.
Photos of photos, screens, masks or printed faces never pass.

Reply with a single JSON object and nothing else:
{"face_detected": true|false, "passed": true|false, "hint": "<short corrective instruction, or null when passed>"}

The hint is shown to the person, so keep it under ten words and phrase it as an instruction (e.g. "Turn your head further left")."#;

#[derive(Deserialize)]
struct FrameVerdict {
    face_detected: bool,
    passed: bool,
    hint: Option<String>,
}

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `FrameAnalysisService` using a vision-capable LLM.
#[derive(Clone)]
pub struct OpenAiFrameAnalysisAdapter {
    vision: VisionClient,
}

impl OpenAiFrameAnalysisAdapter {
    /// Creates a new `OpenAiFrameAnalysisAdapter`.
    pub fn new(vision: VisionClient) -> Self {
        Self { vision }
    }
}

fn gesture_description(challenge: ChallengeType) -> &'static str {
    match challenge {
        ChallengeType::TurnLeft => "head turned to the person's left",
        ChallengeType::TurnRight => "head turned to the person's right",
        ChallengeType::LookUp => "head tilted upwards",
        ChallengeType::LookDown => "head tilted downwards",
        ChallengeType::Blink => "eyes closed mid-blink",
        ChallengeType::Smile => "smiling with visible teeth or raised cheeks",
        ChallengeType::Nod => "head dipped forward in a nod",
        ChallengeType::OpenMouth => "mouth clearly open",
    }
}

fn into_analysis(verdict: FrameVerdict) -> PortResult<FrameAnalysis> {
    if !verdict.face_detected {
        return Err(PortError::InvalidImage("no face detected in the frame".to_string()));
    }
    Ok(FrameAnalysis {
        passed: verdict.passed,
        hint: if verdict.passed { None } else { verdict.hint },
    })
}

//=========================================================================================
// `FrameAnalysisService` Trait Implementation
//=========================================================================================

#[async_trait]
impl FrameAnalysisService for OpenAiFrameAnalysisAdapter {
    async fn analyze_frame(&self, frame: &ImageFrame, expected: ChallengeType) -> PortResult<FrameAnalysis> {
        let instruction = format!(
            "Requested gesture: {} ({}).",
            expected.as_str(),
            gesture_description(expected)
        );
        let verdict: FrameVerdict = self
            .vision
            .ask_json(SYSTEM_INSTRUCTIONS, &instruction, &[frame])
            .await?;
        into_analysis(verdict)
    }
}
